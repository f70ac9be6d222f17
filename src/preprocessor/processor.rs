use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PreprocessorConfig;
use crate::instrumentation::{EventBody, RawEvent};
use crate::utils::{lock_or_recover, PeriodicTask};

use super::batch::{NavigationBatch, NavigationBatchTrimmer, RetainedBatch};

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "preprocessor";

use crate::{log_debug, log_info, log_warn};

/// Counters for everything the preprocessor accepted, produced or dropped.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessorStats {
    pub events_enqueued: u64,
    pub events_ingested: u64,
    pub batches_created: u64,
    pub batches_trimmed: u64,
    pub batches_evicted: u64,
    pub late_events_dropped: u64,
    pub backlog_events_dropped: u64,
    pub malformed_events_dropped: u64,
    pub unattributed_dwell_time_ms: u64,
    pub open_batches: usize,
    pub trimmed_batches: usize,
}

#[derive(Default)]
struct Intake {
    queue: VecDeque<RawEvent>,
    enqueued: u64,
    dropped: u64,
}

/// Evicted navigations kept per retained batch slot.
const EVICTED_PER_RETAINED_BATCH: usize = 4;

/// Recently evicted navigations, oldest first. Late events for these are
/// dropped like for any other closed batch.
#[derive(Default)]
struct EvictedNavigations {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl EvictedNavigations {
    fn contains(&self, uuid: &str) -> bool {
        self.members.contains(uuid)
    }

    fn insert(&mut self, uuid: String, capacity: usize) {
        if !self.members.insert(uuid.clone()) {
            return;
        }
        self.order.push_back(uuid);
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

/// Top-level navigations of one tab, ordered by start time.
type TabNavigations = BTreeSet<(DateTime<Utc>, String)>;

#[derive(Default)]
struct BatchState {
    batches: HashMap<String, RetainedBatch>,
    evicted: EvictedNavigations,
    navigations_by_tab: HashMap<i64, TabNavigations>,
    stats: PreprocessorStats,
}

struct PreprocessorInner {
    config: PreprocessorConfig,
    trimmer: Arc<dyn NavigationBatchTrimmer>,
    intake: Mutex<Intake>,
    state: Mutex<BatchState>,
    drain_task: Mutex<Option<PeriodicTask>>,
}

/// Groups raw events into per-navigation batches and trims batches once
/// they complete.
#[derive(Clone)]
pub struct NavigationBatchPreprocessor {
    inner: Arc<PreprocessorInner>,
}

impl NavigationBatchPreprocessor {
    pub fn new(config: PreprocessorConfig, trimmer: Arc<dyn NavigationBatchTrimmer>) -> Self {
        Self {
            inner: Arc::new(PreprocessorInner {
                config,
                trimmer,
                intake: Mutex::new(Intake::default()),
                state: Mutex::new(BatchState::default()),
                drain_task: Mutex::new(None),
            }),
        }
    }

    /// Queues an event for the next drain. Never blocks on a drain and never
    /// fails; when the backlog is full the oldest queued event is dropped.
    pub fn enqueue(&self, event: RawEvent) {
        let mut intake = lock_or_recover(&self.inner.intake);
        if intake.queue.len() >= self.inner.config.max_intake_backlog {
            if let Some(dropped) = intake.queue.pop_front() {
                intake.dropped += 1;
                log_warn!(
                    "intake backlog full ({}), dropped oldest event for {}",
                    self.inner.config.max_intake_backlog,
                    dropped.navigation_uuid
                );
            }
        }
        intake.queue.push_back(event);
        intake.enqueued += 1;
    }

    pub fn pending_events(&self) -> usize {
        lock_or_recover(&self.inner.intake).queue.len()
    }

    /// Drains the intake queue against the wall clock.
    pub fn process_queue(&self) {
        self.process_queue_at(Utc::now());
    }

    /// Drains the intake queue, treating `now` as the current time for
    /// completion decisions.
    ///
    /// Holds the batch map for the whole drain, so drains never interleave.
    /// The trimmer is called with that lock held and must not call back into
    /// the preprocessor.
    pub fn process_queue_at(&self, now: DateTime<Utc>) {
        let drained = {
            let mut intake = lock_or_recover(&self.inner.intake);
            std::mem::take(&mut intake.queue)
        };

        let mut state = lock_or_recover(&self.inner.state);

        // Step 1: group queued events by navigation uuid
        for event in drained {
            ingest_event(&mut state, event, now);
        }

        // Step 2: trim every batch that is now complete, oldest first
        let config = &self.inner.config;
        let mut completed: Vec<(DateTime<Utc>, String)> = state
            .batches
            .values()
            .filter_map(|entry| match entry {
                RetainedBatch::Open(batch)
                    if batch.is_complete(now, config.quiescence_window, config.grace_period) =>
                {
                    Some((batch.first_event_at, batch.navigation_uuid.clone()))
                }
                _ => None,
            })
            .collect();
        completed.sort();

        for (_, uuid) in completed {
            if let Some(entry) = state.batches.remove(&uuid) {
                let trimmed = entry.trim(self.inner.trimmer.as_ref());
                state.batches.insert(uuid.clone(), trimmed);
                state.stats.batches_trimmed += 1;
                log_debug!("navigation {uuid} complete, batch trimmed");
            }
        }

        // Step 3: keep the number of retained trimmed batches bounded
        evict_oldest_trimmed(&mut state, config.max_retained_batches);
    }

    /// Credits active dwell time to the latest open navigation of a tab.
    pub fn add_tab_active_dwell_time(&self, tab_id: i64, elapsed_ms: u64) {
        if elapsed_ms == 0 {
            return;
        }
        let mut state = lock_or_recover(&self.inner.state);
        let latest = state
            .navigations_by_tab
            .get(&tab_id)
            .and_then(|navigations| navigations.last())
            .map(|(_, uuid)| uuid.clone());
        match latest.and_then(|uuid| state.batches.get_mut(&uuid)) {
            Some(RetainedBatch::Open(batch)) => {
                batch.tab_active_dwell_time_ms += elapsed_ms;
            }
            _ => {
                state.stats.unattributed_dwell_time_ms += elapsed_ms;
            }
        }
    }

    /// Copy of the batch map, keyed by navigation uuid.
    pub fn retained_batches(&self) -> BTreeMap<String, RetainedBatch> {
        let state = lock_or_recover(&self.inner.state);
        state
            .batches
            .iter()
            .map(|(uuid, entry)| (uuid.clone(), entry.clone()))
            .collect()
    }

    pub fn stats(&self) -> PreprocessorStats {
        let (enqueued, backlog_dropped) = {
            let intake = lock_or_recover(&self.inner.intake);
            (intake.enqueued, intake.dropped)
        };
        let state = lock_or_recover(&self.inner.state);
        let trimmed_batches = state.batches.values().filter(|b| b.is_trimmed()).count();

        PreprocessorStats {
            events_enqueued: enqueued,
            backlog_events_dropped: backlog_dropped,
            open_batches: state.batches.len() - trimmed_batches,
            trimmed_batches,
            ..state.stats.clone()
        }
    }

    /// Starts draining on the configured interval. No-op if already running.
    pub fn run(&self) {
        let mut task = lock_or_recover(&self.inner.drain_task);
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            log_debug!("periodic drain already running");
            return;
        }

        let weak: Weak<PreprocessorInner> = Arc::downgrade(&self.inner);
        *task = Some(PeriodicTask::spawn(
            "navigation batch drain",
            self.inner.config.drain_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        NavigationBatchPreprocessor { inner }.process_queue();
                    }
                }
            },
        ));
        log_info!(
            "periodic drain started every {:?}",
            self.inner.config.drain_interval
        );
    }

    pub fn is_running(&self) -> bool {
        lock_or_recover(&self.inner.drain_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops the periodic drain. Queued events and batches are kept.
    pub fn stop(&self) {
        if let Some(task) = lock_or_recover(&self.inner.drain_task).take() {
            task.stop();
            log_info!("periodic drain stopped");
        }
    }

    /// Stops the periodic drain and discards queued events and batches.
    /// Safe to call repeatedly.
    pub fn cleanup(&self) {
        self.stop();

        let discarded_events = {
            let mut intake = lock_or_recover(&self.inner.intake);
            let count = intake.queue.len();
            intake.queue.clear();
            count
        };

        let mut state = lock_or_recover(&self.inner.state);
        let discarded_batches = state.batches.len();
        state.batches.clear();
        state.evicted.clear();
        state.navigations_by_tab.clear();

        if discarded_events > 0 || discarded_batches > 0 {
            log_info!(
                "cleanup discarded {discarded_events} queued events and {discarded_batches} batches"
            );
        }
    }
}

fn ingest_event(state: &mut BatchState, event: RawEvent, now: DateTime<Utc>) {
    let body = match event.parse_body() {
        Ok(body) => body,
        Err(err) => {
            state.stats.malformed_events_dropped += 1;
            log_warn!("dropping malformed event: {err:#}");
            return;
        }
    };

    let uuid = event.navigation_uuid.clone();
    if state.evicted.contains(&uuid)
        || matches!(state.batches.get(&uuid), Some(RetainedBatch::Trimmed(_)))
    {
        state.stats.late_events_dropped += 1;
        log_warn!("dropping late {:?} event for closed navigation {uuid}", event.kind);
        return;
    }

    let tab_id = event.tab_id;
    let BatchState {
        batches,
        navigations_by_tab,
        stats,
        ..
    } = state;

    let entry = batches.entry(uuid.clone()).or_insert_with(|| {
        stats.batches_created += 1;
        RetainedBatch::Open(NavigationBatch::new(&event, now))
    });

    let RetainedBatch::Open(batch) = entry else {
        return;
    };

    let is_new_navigation = batch.append(event, &body, now);
    stats.events_ingested += 1;

    if !(is_new_navigation && matches!(body, EventBody::Navigation(_))) {
        return;
    }

    let started_at = batch.navigation_started_at.unwrap_or(batch.first_event_at);
    let navigations = navigations_by_tab.entry(tab_id).or_default();
    navigations.insert((started_at, uuid.clone()));
    batch.referrer_navigation_uuid = started_before(navigations, started_at);

    // Navigations that started later in this tab but arrived first now follow
    // this one. Trimmed batches keep the referrer they were trimmed with.
    let mut later = navigations
        .range((started_at, String::new())..)
        .filter(|(start, _)| *start > started_at)
        .peekable();
    let Some(next_start) = later.peek().map(|(start, _)| *start) else {
        return;
    };
    let successors: Vec<String> = later
        .take_while(|(start, _)| *start == next_start)
        .map(|(_, uuid)| uuid.clone())
        .collect();
    let referrer = started_before(navigations, next_start);
    for successor in successors {
        if let Some(RetainedBatch::Open(next)) = batches.get_mut(&successor) {
            next.referrer_navigation_uuid = referrer.clone();
        }
    }
}

/// The navigation that most recently started strictly before `at`.
fn started_before(navigations: &TabNavigations, at: DateTime<Utc>) -> Option<String> {
    navigations
        .range(..(at, String::new()))
        .next_back()
        .map(|(_, uuid)| uuid.clone())
}

fn evict_oldest_trimmed(state: &mut BatchState, max_retained: usize) {
    let mut trimmed: Vec<(DateTime<Utc>, String, i64)> = state
        .batches
        .values()
        .filter_map(|entry| match entry {
            RetainedBatch::Trimmed(batch) => {
                Some((batch.first_event_at, batch.navigation_uuid.clone(), batch.tab_id))
            }
            RetainedBatch::Open(_) => None,
        })
        .collect();

    if trimmed.len() <= max_retained {
        return;
    }

    trimmed.sort();
    let excess = trimmed.len() - max_retained;
    let evicted_capacity = max_retained.max(1).saturating_mul(EVICTED_PER_RETAINED_BATCH);
    for (_, uuid, tab_id) in trimmed.into_iter().take(excess) {
        state.batches.remove(&uuid);
        if let Some(navigations) = state.navigations_by_tab.get_mut(&tab_id) {
            navigations.retain(|(_, navigation)| *navigation != uuid);
            if navigations.is_empty() {
                state.navigations_by_tab.remove(&tab_id);
            }
        }
        state.evicted.insert(uuid, evicted_capacity);
        state.stats.batches_evicted += 1;
    }
    log_debug!("evicted {excess} trimmed batches");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessor::batch::TrimmedNavigationBatch;
    use crate::summarizer::ReportSummarizer;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTrimmer {
        calls: AtomicUsize,
    }

    impl NavigationBatchTrimmer for CountingTrimmer {
        fn trim(&self, batch: &NavigationBatch) -> TrimmedNavigationBatch {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ReportSummarizer::default().trim_navigation_batch(batch)
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn navigation(uuid: &str, tab: i64, at: i64, phase: &str) -> RawEvent {
        serde_json::from_value(json!({
            "type": "navigation",
            "navigationUuid": uuid,
            "tabId": tab,
            "timestamp": t(at),
            "payload": {"url": "https://www.youtube.com/watch?v=x", "phase": phase, "transitionType": "link"},
        }))
        .unwrap()
    }

    fn http(uuid: &str, tab: i64, at: i64) -> RawEvent {
        serde_json::from_value(json!({
            "type": "http",
            "navigationUuid": uuid,
            "tabId": tab,
            "timestamp": t(at),
            "payload": {"url": "https://www.youtube.com/watch?v=x", "phase": "response", "statusCode": 200},
        }))
        .unwrap()
    }

    fn config() -> PreprocessorConfig {
        PreprocessorConfig {
            drain_interval: Duration::from_millis(10),
            quiescence_window: Duration::from_secs(30),
            grace_period: Duration::from_secs(5),
            max_intake_backlog: 100,
            max_retained_batches: 100,
        }
    }

    fn preprocessor(config: PreprocessorConfig) -> (NavigationBatchPreprocessor, Arc<CountingTrimmer>) {
        let trimmer = Arc::new(CountingTrimmer {
            calls: AtomicUsize::new(0),
        });
        (NavigationBatchPreprocessor::new(config, trimmer.clone()), trimmer)
    }

    #[test]
    fn events_group_by_uuid_preserving_order() {
        let (pre, _) = preprocessor(config());
        pre.enqueue(navigation("A", 1, 0, "committed"));
        pre.enqueue(http("B", 2, 1));
        pre.enqueue(http("A", 1, 2));
        pre.enqueue(navigation("B", 2, 0, "committed"));
        pre.enqueue(http("A", 1, 1));
        pre.process_queue_at(t(3));

        let batches = pre.retained_batches();
        assert_eq!(batches.len(), 2);
        let RetainedBatch::Open(a) = &batches["A"] else {
            panic!("A should still be open");
        };
        let a_times: Vec<_> = a.events.iter().map(|e| e.timestamp).collect();
        assert_eq!(a_times, vec![t(0), t(2), t(1)]);
        let RetainedBatch::Open(b) = &batches["B"] else {
            panic!("B should still be open");
        };
        assert_eq!(b.events.len(), 2);
        assert_eq!(b.first_event_at, t(0));
    }

    #[test]
    fn quiescent_batch_is_trimmed_once() {
        let (pre, trimmer) = preprocessor(config());
        pre.enqueue(navigation("A", 1, 0, "committed"));
        pre.enqueue(http("A", 1, 1));
        pre.process_queue_at(t(1));
        assert_eq!(trimmer.calls.load(Ordering::SeqCst), 0);

        pre.process_queue_at(t(40));
        pre.process_queue_at(t(80));

        assert_eq!(trimmer.calls.load(Ordering::SeqCst), 1);
        let batches = pre.retained_batches();
        assert_eq!(batches.len(), 1);
        assert!(batches["A"].is_trimmed());
    }

    #[test]
    fn terminal_event_closes_after_grace_period() {
        let (pre, trimmer) = preprocessor(config());
        pre.enqueue(navigation("A", 1, 0, "completed"));
        pre.process_queue_at(t(0));

        // A late event inside the grace period is still merged.
        pre.enqueue(http("A", 1, 3));
        pre.process_queue_at(t(3));
        assert_eq!(trimmer.calls.load(Ordering::SeqCst), 0);

        pre.process_queue_at(t(9));
        assert_eq!(trimmer.calls.load(Ordering::SeqCst), 1);
        let RetainedBatch::Trimmed(trimmed) = &pre.retained_batches()["A"] else {
            panic!("A should be trimmed");
        };
        assert_eq!(trimmed.event_counts.http, 1);
    }

    #[test]
    fn late_event_after_close_is_dropped_and_counted() {
        let (pre, trimmer) = preprocessor(config());
        pre.enqueue(navigation("A", 1, 0, "completed"));
        pre.process_queue_at(t(0));
        pre.process_queue_at(t(10));
        let before = pre.retained_batches();

        pre.enqueue(http("A", 1, 11));
        pre.process_queue_at(t(11));

        assert_eq!(pre.retained_batches(), before);
        assert_eq!(pre.stats().late_events_dropped, 1);
        assert_eq!(pre.stats().batches_created, 1);
        assert_eq!(trimmer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_events_are_dropped() {
        let (pre, _) = preprocessor(config());
        let mut bad = http("A", 1, 0);
        bad.payload = json!({"nope": true});
        pre.enqueue(bad);
        let mut anonymous = http("", 1, 0);
        anonymous.navigation_uuid = "  ".into();
        pre.enqueue(anonymous);
        pre.process_queue_at(t(0));

        assert!(pre.retained_batches().is_empty());
        assert_eq!(pre.stats().malformed_events_dropped, 2);
    }

    #[test]
    fn backlog_drops_oldest() {
        let mut cfg = config();
        cfg.max_intake_backlog = 2;
        let (pre, _) = preprocessor(cfg);
        pre.enqueue(http("A", 1, 0));
        pre.enqueue(http("B", 1, 0));
        pre.enqueue(http("C", 1, 0));
        assert_eq!(pre.pending_events(), 2);

        pre.process_queue_at(t(0));
        let batches = pre.retained_batches();
        assert!(!batches.contains_key("A"));
        assert!(batches.contains_key("B") && batches.contains_key("C"));
        assert_eq!(pre.stats().backlog_events_dropped, 1);
    }

    #[test]
    fn referrer_is_previous_navigation_in_tab() {
        let (pre, _) = preprocessor(config());
        pre.enqueue(navigation("A", 1, 0, "committed"));
        pre.enqueue(navigation("X", 2, 1, "committed"));
        pre.enqueue(navigation("B", 1, 2, "committed"));
        pre.process_queue_at(t(2));

        let batches = pre.retained_batches();
        let referrer = |uuid: &str| match &batches[uuid] {
            RetainedBatch::Open(batch) => batch.referrer_navigation_uuid.clone(),
            RetainedBatch::Trimmed(batch) => batch.referrer_navigation_uuid.clone(),
        };
        assert_eq!(referrer("A"), None);
        assert_eq!(referrer("X"), None);
        assert_eq!(referrer("B").as_deref(), Some("A"));
    }

    #[test]
    fn referrer_follows_start_time_not_arrival() {
        let (pre, _) = preprocessor(config());
        pre.enqueue(navigation("C", 1, 4, "committed"));
        pre.enqueue(navigation("A", 1, 0, "committed"));
        pre.process_queue_at(t(4));
        pre.enqueue(navigation("B", 1, 2, "committed"));
        pre.process_queue_at(t(5));

        let batches = pre.retained_batches();
        let referrer = |uuid: &str| match &batches[uuid] {
            RetainedBatch::Open(batch) => batch.referrer_navigation_uuid.clone(),
            RetainedBatch::Trimmed(batch) => batch.referrer_navigation_uuid.clone(),
        };
        assert_eq!(referrer("A"), None);
        assert_eq!(referrer("B").as_deref(), Some("A"));
        assert_eq!(referrer("C").as_deref(), Some("B"));

        // Dwell time goes to the navigation that started last.
        pre.add_tab_active_dwell_time(1, 40);
        let RetainedBatch::Open(c) = &pre.retained_batches()["C"] else {
            panic!("C should be open");
        };
        assert_eq!(c.tab_active_dwell_time_ms, 40);
    }

    #[test]
    fn dwell_time_goes_to_latest_open_navigation() {
        let (pre, _) = preprocessor(config());
        pre.enqueue(navigation("A", 1, 0, "committed"));
        pre.process_queue_at(t(0));
        pre.add_tab_active_dwell_time(1, 250);
        pre.add_tab_active_dwell_time(9, 100);

        let RetainedBatch::Open(a) = &pre.retained_batches()["A"] else {
            panic!("A should be open");
        };
        assert_eq!(a.tab_active_dwell_time_ms, 250);
        assert_eq!(pre.stats().unattributed_dwell_time_ms, 100);
    }

    #[test]
    fn evicted_batches_stay_closed() {
        let mut cfg = config();
        cfg.max_retained_batches = 1;
        let (pre, _) = preprocessor(cfg);
        pre.enqueue(navigation("A", 1, 0, "completed"));
        pre.enqueue(navigation("B", 2, 1, "completed"));
        pre.process_queue_at(t(1));
        pre.process_queue_at(t(20));

        let batches = pre.retained_batches();
        assert_eq!(batches.len(), 1);
        assert!(batches.contains_key("B"));

        pre.enqueue(http("A", 1, 21));
        pre.process_queue_at(t(21));
        assert!(!pre.retained_batches().contains_key("A"));
        assert_eq!(pre.stats().batches_evicted, 1);
        assert_eq!(pre.stats().late_events_dropped, 1);
    }

    #[test]
    fn subframe_completion_does_not_shorten_the_window() {
        let (pre, trimmer) = preprocessor(config());
        pre.enqueue(navigation("A", 1, 0, "committed"));
        pre.enqueue(
            serde_json::from_value(json!({
                "type": "navigation",
                "navigationUuid": "A",
                "tabId": 1,
                "timestamp": t(1),
                "payload": {"url": "https://www.youtube.com/embed/x", "phase": "completed", "frameId": 3},
            }))
            .unwrap(),
        );
        pre.process_queue_at(t(1));
        pre.process_queue_at(t(10));
        assert!(!pre.retained_batches()["A"].is_trimmed());

        pre.enqueue(navigation("A", 1, 11, "completed"));
        pre.process_queue_at(t(11));
        pre.process_queue_at(t(17));
        assert!(pre.retained_batches()["A"].is_trimmed());
        assert_eq!(trimmer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eviction_bookkeeping_stays_bounded() {
        let mut cfg = config();
        cfg.max_retained_batches = 1;
        let (pre, _) = preprocessor(cfg);
        for i in 0..5000 {
            pre.enqueue(navigation(&format!("N{i}"), i % 7, 0, "completed"));
        }
        pre.process_queue_at(t(0));
        pre.process_queue_at(t(10));

        // Equal start times, so eviction runs in uuid order and N999 survives.
        assert!(pre.retained_batches().contains_key("N999"));
        assert_eq!(pre.retained_batches().len(), 1);
        assert_eq!(pre.stats().batches_evicted, 4999);
        let state = lock_or_recover(&pre.inner.state);
        assert_eq!(state.evicted.len(), EVICTED_PER_RETAINED_BATCH);
        assert!(state.evicted.contains("N998"));
        assert!(!state.evicted.contains("N0"));
        let tracked: usize = state.navigations_by_tab.values().map(|n| n.len()).sum();
        assert_eq!(tracked, 1);
    }

    #[test]
    fn cleanup_discards_state_and_is_repeatable() {
        let (pre, _) = preprocessor(config());
        pre.enqueue(navigation("A", 1, 0, "committed"));
        pre.process_queue_at(t(0));
        pre.enqueue(http("A", 1, 1));

        pre.cleanup();
        pre.cleanup();

        assert_eq!(pre.pending_events(), 0);
        assert!(pre.retained_batches().is_empty());
    }

    #[tokio::test]
    async fn run_drains_periodically_until_stopped() {
        let (pre, _) = preprocessor(config());
        pre.run();
        pre.run();
        assert!(pre.is_running());

        pre.enqueue(navigation("A", 1, 0, "committed"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pre.pending_events(), 0);
        assert_eq!(pre.retained_batches().len(), 1);

        pre.stop();
        pre.enqueue(http("A", 1, 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pre.pending_events(), 1);
        assert!(!pre.is_running());
    }
}
