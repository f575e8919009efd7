//! Periodic refresh of the dashboard corpus.
//!
//! Every poll takes a sequence number when it is issued. A response is
//! applied only if no newer poll has been applied already, so a slow early
//! fetch can never overwrite the result of a faster later one.

use chrono::{DateTime, Utc};
use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::reconcile::{RecordSource, fetch_all};
use crate::record::ValuationRecord;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone, Debug, Default)]
pub struct FeedSnapshot {
    pub seq: u64,
    pub records: Arc<Vec<ValuationRecord>>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Latest merged record list shared with request handlers.
#[derive(Default)]
pub struct DashboardFeed {
    state: RwLock<FeedSnapshot>,
}

impl DashboardFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record list if `seq` is newer than the one applied last.
    /// Returns whether the response was applied.
    pub async fn apply(&self, seq: u64, records: Vec<ValuationRecord>) -> bool {
        let mut state = self.state.write().await;
        if seq <= state.seq {
            debug!("dropping stale poll #{} (have #{})", seq, state.seq);
            return false;
        }
        *state = FeedSnapshot {
            seq,
            records: Arc::new(records),
            refreshed_at: Some(Utc::now()),
        };
        true
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        self.state.read().await.clone()
    }
}

pub struct Poller<S> {
    source: Arc<S>,
    feed: Arc<DashboardFeed>,
    next_seq: AtomicU64,
    wake: Notify,
    interval: Duration,
}

impl<S: RecordSource> Poller<S> {
    pub fn new(source: Arc<S>, feed: Arc<DashboardFeed>, interval: Duration) -> Arc<Self> {
        Arc::new(Poller {
            source,
            feed,
            next_seq: AtomicU64::new(0),
            wake: Notify::new(),
            interval,
        })
    }

    pub fn feed(&self) -> &Arc<DashboardFeed> {
        &self.feed
    }

    /// Fetch and merge every form type, then hand the result to the feed.
    pub async fn refresh_once(&self) -> bool {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let records = fetch_all(Arc::clone(&self.source)).await;
        let count = records.len();
        let applied = self.feed.apply(seq, records).await;
        if applied {
            debug!("poll #{} applied {} records", seq, count);
        }
        applied
    }

    /// Ask the background loop for an immediate refresh.
    pub fn request_refresh(&self) {
        self.wake.notify_one();
    }

    /// Run the poll loop until the runtime shuts down. Each poll runs in its
    /// own task so a slow fetch does not delay the next tick.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        info!("polling records every {:?}", self.interval);
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.wake.notified() => {}
                }
                let poller = Arc::clone(&self);
                tokio::spawn(async move {
                    poller.refresh_once().await;
                });
            }
        })
    }
}
