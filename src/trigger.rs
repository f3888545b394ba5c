// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Triggers decide when a scheduled query runs.
//!
//! Each [`ScheduledQuery`] gets its own task. The task calls
//! [`Trigger::run`], which fires the query through a [`FireCallback`] until the
//! shutdown signal flips or the pipeline stops accepting work.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::queue::DispatchQueue;
use crate::window::{DataQuery, Query, Tags};

/// Submits a fired query, stamped with its scheduled tags, to the dispatch queue.
#[derive(Debug, Clone)]
pub struct FireCallback {
    queue: Arc<DispatchQueue>,
    tags: Tags,
}

impl FireCallback {
    pub(crate) fn new(queue: Arc<DispatchQueue>, tags: Tags) -> Self {
        Self { queue, tags }
    }

    /// Enqueue `query`, waiting if the queue is full.
    ///
    /// Returns `false` once the queue is closed; the trigger should then stop.
    pub async fn fire(&self, query: Query) -> bool {
        trace!(query = %query.name, "Trigger fired");
        match self
            .queue
            .enqueue(DataQuery::new(query, self.tags.clone()))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping fired query: {}", e);
                false
            }
        }
    }
}

/// Schedule driving one query.
#[async_trait]
pub trait Trigger: Send {
    /// Fire `query` through `on_fire` until `shutdown` becomes `true`.
    async fn run(
        self: Box<Self>,
        query: Query,
        on_fire: FireCallback,
        shutdown: watch::Receiver<bool>,
    );
}

/// A query, the tags stamped on its windows, and when to run it.
pub struct ScheduledQuery {
    pub query: Query,
    pub tags: Tags,
    pub trigger: Box<dyn Trigger>,
}

impl ScheduledQuery {
    pub fn new(query: Query, tags: Tags, trigger: Box<dyn Trigger>) -> Self {
        Self {
            query,
            tags,
            trigger,
        }
    }
}

impl std::fmt::Debug for ScheduledQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledQuery")
            .field("query", &self.query)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Fixed-period trigger. The first tick fires immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTrigger {
    period: Duration,
}

impl IntervalTrigger {
    /// A zero period is raised to one millisecond.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn run(
        self: Box<Self>,
        query: Query,
        on_fire: FireCallback,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !on_fire.fire(query.clone()).await {
                        break;
                    }
                }
            }
        }

        debug!(query = %query.name, "Interval trigger stopped");
    }
}
