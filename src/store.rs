// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Embedded single-bucket key-value store.
//!
//! A thin wrapper over a `sled` database: the bucket is a named tree, values
//! are opaque bytes. The manager opens the store at startup and closes it at
//! shutdown; workers never touch it.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreError;

/// One bucket of an embedded database.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    bucket_name: String,
    db: sled::Db,
    bucket: sled::Tree,
}

impl Store {
    /// Open the database at `path`, creating it and `bucket` if absent.
    pub fn open(path: impl AsRef<Path>, bucket: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path).map_err(|e| store_error(&path, e))?;
        let tree = db.open_tree(bucket).map_err(|e| store_error(&path, e))?;

        debug!(
            "Opened store {} (bucket '{}', {} entries)",
            path.display(),
            bucket,
            tree.len()
        );
        Ok(Self {
            path,
            bucket_name: bucket.to_string(),
            db,
            bucket: tree,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bucket(&self) -> &str {
        &self.bucket_name
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.bucket
            .get(key)
            .map(|value| value.map(|v| v.to_vec()))
            .map_err(|e| store_error(&self.path, e))
    }

    /// Insert or overwrite `key`.
    pub fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.bucket
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| store_error(&self.path, e))
    }

    pub fn len(&self) -> usize {
        self.bucket.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bucket.is_empty()
    }

    /// Write pending changes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| store_error(&self.path, e))
    }

    /// Flush and release the database.
    pub fn close(self) -> Result<(), StoreError> {
        self.flush()?;
        debug!("Closed store {}", self.path.display());
        Ok(())
    }
}

fn store_error(path: &Path, e: sled::Error) -> StoreError {
    let path = path.display().to_string();
    match &e {
        sled::Error::Io(io) => StoreError::Io {
            path,
            reason: io.to_string(),
        },
        sled::Error::Corruption { .. } => StoreError::Corrupted {
            path,
            reason: e.to_string(),
        },
        _ => StoreError::Backend {
            path,
            reason: e.to_string(),
        },
    }
}
