//! Aggregate YouTube usage counters, submitted on a fixed interval.

mod types;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use crate::preprocessor::NavigationBatch;
use crate::sharing::{DataPointPayload, DataSharer};
use crate::store::{Store, USAGE_STATISTICS_KEY};
use crate::utils::{lock_or_recover, PeriodicTask};

pub use types::UsageStatisticsSnapshot;
use types::UsageCounters;

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "usage-statistics";

use crate::{log_debug, log_error, log_info, log_warn};

struct StatisticsInner {
    store: Store,
    interval: Duration,
    counters: Mutex<UsageCounters>,
    task: Mutex<Option<PeriodicTask>>,
}

#[derive(Clone)]
pub struct YouTubeUsageStatistics {
    inner: Arc<StatisticsInner>,
}

impl YouTubeUsageStatistics {
    pub fn new(store: Store, interval: Duration) -> Self {
        Self {
            inner: Arc::new(StatisticsInner {
                store,
                interval,
                counters: Mutex::new(UsageCounters::default()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Counts a batch that just completed. Only reads the batch.
    pub fn seen_navigation_batch(&self, batch: &NavigationBatch) {
        lock_or_recover(&self.inner.counters).observe(batch, Utc::now());
    }

    /// Counters so far, without resetting them.
    pub fn current_snapshot(&self) -> UsageStatisticsSnapshot {
        lock_or_recover(&self.inner.counters).snapshot(None)
    }

    /// Reads and resets the counters in one critical section.
    pub fn take_snapshot(&self) -> UsageStatisticsSnapshot {
        self.take_counters().snapshot(Some(Utc::now()))
    }

    fn take_counters(&self) -> UsageCounters {
        std::mem::take(&mut *lock_or_recover(&self.inner.counters))
    }

    fn restore_counters(&self, earlier: UsageCounters) {
        lock_or_recover(&self.inner.counters).absorb(earlier);
    }

    /// Hands the interval's counters to the sharer. Counts are put back if
    /// the sharer fails and discarded if consent is not given.
    pub async fn submit(&self, sharer: &DataSharer) -> Result<bool> {
        let counters = self.take_counters();
        if counters.is_empty() {
            log_debug!("nothing to submit");
            return Ok(false);
        }

        let snapshot = counters.snapshot(Some(Utc::now()));
        match sharer
            .share(DataPointPayload::YoutubeUsageStatisticsUpdate(snapshot))
            .await
        {
            Ok(true) => Ok(true),
            Ok(false) => {
                log_info!(
                    "discarding {} counted navigations, consent not given",
                    counters.navigation_batches_seen
                );
                Ok(false)
            }
            Err(err) => {
                self.restore_counters(counters);
                Err(err)
            }
        }
    }

    /// Restores counters left by an earlier `cleanup` and starts periodic
    /// submission. No-op if already running.
    pub async fn run(&self, sharer: DataSharer) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let store = &self.inner.store;
        if let Some(persisted) = store.get_value::<UsageCounters>(USAGE_STATISTICS_KEY).await? {
            store
                .set_value(USAGE_STATISTICS_KEY, &serde_json::Value::Null)
                .await?;
            log_info!(
                "restored {} unsubmitted navigations",
                persisted.navigation_batches_seen
            );
            self.restore_counters(persisted);
        }

        let mut task = lock_or_recover(&self.inner.task);
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            return Ok(());
        }
        let weak: Weak<StatisticsInner> = Arc::downgrade(&self.inner);
        *task = Some(PeriodicTask::spawn(
            "usage statistics submission",
            self.inner.interval,
            move || {
                let weak = weak.clone();
                let sharer = sharer.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if let Err(err) = (YouTubeUsageStatistics { inner }).submit(&sharer).await {
                        log_error!("usage statistics submission failed: {err:#}");
                    }
                }
            },
        ));
        log_info!("submitting usage statistics every {:?}", self.inner.interval);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock_or_recover(&self.inner.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops periodic submission. Counters are kept in memory.
    pub fn stop(&self) {
        if let Some(task) = lock_or_recover(&self.inner.task).take() {
            task.stop();
        }
    }

    /// Stops periodic submission and persists counters that were never
    /// submitted, so the next `run` picks them up. Safe to call repeatedly.
    pub async fn cleanup(&self) -> Result<()> {
        self.stop();

        let counters = self.take_counters();
        if counters.is_empty() {
            return Ok(());
        }

        let store = &self.inner.store;
        let mut persisted = match store.get_value::<UsageCounters>(USAGE_STATISTICS_KEY).await {
            Ok(persisted) => persisted.unwrap_or_default(),
            Err(err) => {
                log_warn!("replacing unreadable persisted counters: {err:#}");
                UsageCounters::default()
            }
        };
        persisted.absorb(counters.clone());

        if let Err(err) = store.set_value(USAGE_STATISTICS_KEY, &persisted).await {
            self.restore_counters(counters);
            return Err(err);
        }
        log_info!(
            "persisted {} unsubmitted navigations",
            persisted.navigation_batches_seen
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::RawEvent;
    use crate::sharing::{DataSink, SharedDataPoint};
    use crate::store::{ConsentStatus, MemoryStorageArea};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlakySink {
        failing: AtomicBool,
        received: Mutex<Vec<SharedDataPoint>>,
    }

    #[async_trait]
    impl DataSink for FlakySink {
        async fn transmit(&self, point: &SharedDataPoint) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("offline");
            }
            lock_or_recover(&self.received).push(point.clone());
            Ok(())
        }
    }

    fn batch(uuid: &str, url: &str) -> NavigationBatch {
        let event: RawEvent = serde_json::from_value(json!({
            "type": "navigation",
            "navigationUuid": uuid,
            "tabId": 1,
            "timestamp": "2024-01-01T00:00:00Z",
            "payload": {"url": url, "phase": "committed"},
        }))
        .unwrap();
        let body = event.parse_body().unwrap();
        let mut batch = NavigationBatch::new(&event, Utc::now());
        batch.append(event, &body, Utc::now());
        batch
    }

    async fn setup(consent: ConsentStatus) -> (YouTubeUsageStatistics, DataSharer, Arc<FlakySink>, Store) {
        let store = Store::new(Arc::new(MemoryStorageArea::new()));
        store.set_consent_status(consent).await.unwrap();
        let sink = Arc::new(FlakySink::default());
        let sharer = DataSharer::new(store.clone(), sink.clone(), Duration::from_secs(60));
        let statistics = YouTubeUsageStatistics::new(store.clone(), Duration::from_secs(60));
        (statistics, sharer, sink, store)
    }

    #[test]
    fn counts_page_types_and_distinct_videos() {
        let statistics = YouTubeUsageStatistics::new(
            Store::new(Arc::new(MemoryStorageArea::new())),
            Duration::from_secs(60),
        );
        statistics.seen_navigation_batch(&batch("a", "https://www.youtube.com/watch?v=1"));
        statistics.seen_navigation_batch(&batch("b", "https://www.youtube.com/watch?v=1"));
        statistics.seen_navigation_batch(&batch("c", "https://youtu.be/2"));
        statistics.seen_navigation_batch(&batch("d", "https://www.youtube.com/results?search_query=x"));
        statistics.seen_navigation_batch(&batch("e", "https://example.com/"));

        let snapshot = statistics.take_snapshot();
        assert_eq!(snapshot.navigation_batches_seen, 5);
        assert_eq!(snapshot.youtube_navigations, 4);
        assert_eq!(snapshot.watch_page_navigations, 3);
        assert_eq!(snapshot.search_results_page_navigations, 1);
        assert_eq!(snapshot.non_youtube_navigations, 1);
        assert_eq!(snapshot.distinct_videos_watched, 2);
        assert!(snapshot.interval_ended_at.is_some());

        assert_eq!(statistics.current_snapshot().navigation_batches_seen, 0);
    }

    #[tokio::test]
    async fn submission_resets_counters() {
        let (statistics, sharer, sink, _) = setup(ConsentStatus::Given).await;
        statistics.seen_navigation_batch(&batch("a", "https://www.youtube.com/"));
        assert!(statistics.submit(&sharer).await.unwrap());
        assert!(!statistics.submit(&sharer).await.unwrap());

        let received = lock_or_recover(&sink.received).clone();
        assert_eq!(received.len(), 1);
        let DataPointPayload::YoutubeUsageStatisticsUpdate(snapshot) = &received[0].data else {
            panic!("unexpected payload");
        };
        assert_eq!(snapshot.navigation_batches_seen, 1);
    }

    #[tokio::test]
    async fn no_submission_without_consent() {
        let (statistics, sharer, sink, _) = setup(ConsentStatus::Withdrawn).await;
        statistics.seen_navigation_batch(&batch("a", "https://www.youtube.com/"));
        assert!(!statistics.submit(&sharer).await.unwrap());
        assert!(lock_or_recover(&sink.received).is_empty());
        assert_eq!(statistics.current_snapshot().navigation_batches_seen, 0);
    }

    #[tokio::test]
    async fn cleanup_persists_unsubmitted_counts_for_next_run() {
        let (statistics, sharer, _, store) = setup(ConsentStatus::Given).await;
        statistics.seen_navigation_batch(&batch("a", "https://www.youtube.com/watch?v=1"));
        statistics.cleanup().await.unwrap();
        statistics.cleanup().await.unwrap();
        assert_eq!(statistics.current_snapshot().navigation_batches_seen, 0);

        let restarted = YouTubeUsageStatistics::new(store, Duration::from_secs(60));
        restarted.run(sharer.clone()).await.unwrap();
        assert_eq!(restarted.current_snapshot().navigation_batches_seen, 1);
        assert_eq!(restarted.current_snapshot().distinct_videos_watched, 1);
        restarted.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshot_and_reset_is_exactly_once() {
        let statistics = YouTubeUsageStatistics::new(
            Store::new(Arc::new(MemoryStorageArea::new())),
            Duration::from_secs(60),
        );
        let sample = batch("a", "https://www.youtube.com/watch?v=1");

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let statistics = statistics.clone();
                let sample = sample.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        statistics.seen_navigation_batch(&sample);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let reader = {
            let statistics = statistics.clone();
            tokio::spawn(async move {
                let mut total = 0;
                for _ in 0..200 {
                    total += statistics.take_snapshot().navigation_batches_seen;
                    tokio::task::yield_now().await;
                }
                total
            })
        };

        for writer in writers {
            writer.await.unwrap();
        }
        let taken = reader.await.unwrap();
        let remaining = statistics.take_snapshot().navigation_batches_seen;
        assert_eq!(taken + remaining, 2_000);
    }
}
