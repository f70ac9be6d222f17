use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::time::Instant;

use crate::utils::{lock_or_recover, PeriodicTask};

use super::NavigationBatchPreprocessor;

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "dwell-time";

use crate::{log_debug, log_info};

#[derive(Default)]
struct ActiveTab {
    tab_id: Option<i64>,
    since: Option<Instant>,
}

struct MonitorInner {
    preprocessor: NavigationBatchPreprocessor,
    tick_interval: Duration,
    active: Mutex<ActiveTab>,
    task: Mutex<Option<PeriodicTask>>,
}

/// Tracks which tab has focus and credits the time spent there to that
/// tab's latest navigation.
#[derive(Clone)]
pub struct ActiveTabDwellTimeMonitor {
    inner: Arc<MonitorInner>,
}

impl ActiveTabDwellTimeMonitor {
    pub fn new(preprocessor: NavigationBatchPreprocessor, tick_interval: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                preprocessor,
                tick_interval,
                active: Mutex::new(ActiveTab::default()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Switches focus. Time accrued by the previously active tab is credited
    /// first. `None` means no browser tab has focus.
    pub fn set_active_tab(&self, tab_id: Option<i64>) {
        let running = self.is_running();
        let mut active = lock_or_recover(&self.inner.active);
        credit_elapsed(&self.inner.preprocessor, &mut active);
        active.tab_id = tab_id;
        active.since = if running && tab_id.is_some() {
            Some(Instant::now())
        } else {
            None
        };
    }

    pub fn active_tab(&self) -> Option<i64> {
        lock_or_recover(&self.inner.active).tab_id
    }

    /// Starts accounting. No-op if already running.
    pub fn run(&self) {
        let mut task = lock_or_recover(&self.inner.task);
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }

        {
            let mut active = lock_or_recover(&self.inner.active);
            if active.tab_id.is_some() {
                active.since = Some(Instant::now());
            }
        }

        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        *task = Some(PeriodicTask::spawn(
            "active tab dwell time",
            self.inner.tick_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let mut active = lock_or_recover(&inner.active);
                        credit_elapsed(&inner.preprocessor, &mut active);
                    }
                }
            },
        ));
        log_info!("dwell time accounting started");
    }

    pub fn is_running(&self) -> bool {
        lock_or_recover(&self.inner.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Credits outstanding time and stops accounting. Time while stopped is
    /// never credited. Safe to call repeatedly.
    pub fn cleanup(&self) {
        let Some(task) = lock_or_recover(&self.inner.task).take() else {
            return;
        };
        task.stop();

        let mut active = lock_or_recover(&self.inner.active);
        credit_elapsed(&self.inner.preprocessor, &mut active);
        active.since = None;
        log_info!("dwell time accounting stopped");
    }
}

/// Credits the time since the last checkpoint and moves the checkpoint up.
fn credit_elapsed(preprocessor: &NavigationBatchPreprocessor, active: &mut ActiveTab) {
    let (Some(tab_id), Some(since)) = (active.tab_id, active.since) else {
        return;
    };
    let now = Instant::now();
    let elapsed_ms = now.duration_since(since).as_millis() as u64;
    if elapsed_ms == 0 {
        return;
    }
    preprocessor.add_tab_active_dwell_time(tab_id, elapsed_ms);
    // Only whole milliseconds are credited; the remainder carries over.
    active.since = Some(since + Duration::from_millis(elapsed_ms));
    log_debug!("credited {elapsed_ms}ms to tab {tab_id}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessorConfig;
    use crate::instrumentation::RawEvent;
    use crate::preprocessor::RetainedBatch;
    use crate::summarizer::ReportSummarizer;
    use serde_json::json;

    fn preprocessor_with_navigation(tab: i64) -> NavigationBatchPreprocessor {
        let preprocessor = NavigationBatchPreprocessor::new(
            PreprocessorConfig::default(),
            Arc::new(ReportSummarizer::default()),
        );
        let event: RawEvent = serde_json::from_value(json!({
            "type": "navigation",
            "navigationUuid": "A",
            "tabId": tab,
            "timestamp": "2024-01-01T00:00:00Z",
            "payload": {"url": "https://www.youtube.com/", "phase": "committed"},
        }))
        .unwrap();
        preprocessor.enqueue(event);
        preprocessor.process_queue();
        preprocessor
    }

    fn dwell_of(preprocessor: &NavigationBatchPreprocessor, uuid: &str) -> u64 {
        match &preprocessor.retained_batches()[uuid] {
            RetainedBatch::Open(batch) => batch.tab_active_dwell_time_ms,
            RetainedBatch::Trimmed(batch) => batch.tab_active_dwell_time_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn credits_active_tab_while_running() {
        let preprocessor = preprocessor_with_navigation(7);
        let monitor = ActiveTabDwellTimeMonitor::new(preprocessor.clone(), Duration::from_millis(250));
        monitor.set_active_tab(Some(7));
        monitor.run();
        monitor.run();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        monitor.set_active_tab(None);
        assert_eq!(dwell_of(&preprocessor, "A"), 1_000);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(dwell_of(&preprocessor, "A"), 1_000);
        monitor.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_time_is_not_credited() {
        let preprocessor = preprocessor_with_navigation(3);
        let monitor = ActiveTabDwellTimeMonitor::new(preprocessor.clone(), Duration::from_millis(250));
        monitor.set_active_tab(Some(3));
        monitor.run();
        tokio::time::sleep(Duration::from_millis(400)).await;
        monitor.cleanup();
        monitor.cleanup();
        assert_eq!(dwell_of(&preprocessor, "A"), 400);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        monitor.run();
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.cleanup();
        assert_eq!(dwell_of(&preprocessor, "A"), 500);
    }
}
