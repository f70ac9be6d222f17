use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::instrumentation::RawEvent;
use crate::preprocessor::{
    ActiveTabDwellTimeMonitor, NavigationBatch, NavigationBatchPreprocessor,
    NavigationBatchTrimmer, TrimmedNavigationBatch,
};
use crate::sharing::{
    export_file_name, ConsentStatusUpdate, DataPointPayload, DataSharer, DataSink,
    SharedDataExport,
};
use crate::store::{ConsentStatus, Store};
use crate::summarizer::{RegretReport, RegretReportData, ReportSummarizer};
use crate::usage_statistics::YouTubeUsageStatistics;

use super::ports::{
    run_message_loop, ConsentFormMessage, ConsentStatusReply, PortClient, PortHandler, PortName,
    PortRegistry, ReportRegretFormMessage, ReportRegretFormReply,
};
use super::state::GlueState;

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "glue";

use crate::{log_debug, log_error, log_info};

/// Trimming hook handed to the preprocessor: counts the batch, then trims it.
struct ObservingTrimmer {
    summarizer: ReportSummarizer,
    usage_statistics: YouTubeUsageStatistics,
}

impl NavigationBatchTrimmer for ObservingTrimmer {
    fn trim(&self, batch: &NavigationBatch) -> TrimmedNavigationBatch {
        self.usage_statistics.seen_navigation_batch(batch);
        self.summarizer.trim_navigation_batch(batch)
    }
}

struct GlueInner {
    store: Store,
    preprocessor: NavigationBatchPreprocessor,
    summarizer: ReportSummarizer,
    usage_statistics: YouTubeUsageStatistics,
    data_sharer: DataSharer,
    dwell_time_monitor: ActiveTabDwellTimeMonitor,
    ports: Arc<PortRegistry>,
    state: Mutex<GlueState>,
    /// Mirrors `state == Active` for the synchronous intake path.
    collecting: AtomicBool,
}

/// Wires the pipeline components together and drives their lifecycle.
#[derive(Clone)]
pub struct ExtensionGlue {
    inner: Arc<GlueInner>,
}

impl ExtensionGlue {
    pub fn new(config: PipelineConfig, store: Store, sink: Arc<dyn DataSink>) -> Self {
        let summarizer = ReportSummarizer::new(config.parent_chain_length);
        let usage_statistics =
            YouTubeUsageStatistics::new(store.clone(), config.usage_statistics_interval);
        let trimmer = Arc::new(ObservingTrimmer {
            summarizer: summarizer.clone(),
            usage_statistics: usage_statistics.clone(),
        });
        let preprocessor = NavigationBatchPreprocessor::new(config.preprocessor.clone(), trimmer);
        let dwell_time_monitor =
            ActiveTabDwellTimeMonitor::new(preprocessor.clone(), config.dwell_tick_interval);
        let data_sharer = DataSharer::new(store.clone(), sink, config.share_retry_interval);

        Self {
            inner: Arc::new(GlueInner {
                store,
                preprocessor,
                summarizer,
                usage_statistics,
                data_sharer,
                dwell_time_monitor,
                ports: Arc::new(PortRegistry::new()),
                state: Mutex::new(GlueState::Uninitialized),
                collecting: AtomicBool::new(false),
            }),
        }
    }

    pub async fn state(&self) -> GlueState {
        *self.inner.state.lock().await
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn preprocessor(&self) -> &NavigationBatchPreprocessor {
        &self.inner.preprocessor
    }

    pub fn usage_statistics(&self) -> &YouTubeUsageStatistics {
        &self.inner.usage_statistics
    }

    pub fn data_sharer(&self) -> &DataSharer {
        &self.inner.data_sharer
    }

    pub fn ports(&self) -> Arc<PortRegistry> {
        self.inner.ports.clone()
    }

    /// Instrumentation intake. Events are only collected while active.
    pub fn enqueue(&self, event: RawEvent) -> bool {
        if !self.inner.collecting.load(Ordering::SeqCst) {
            log_debug!("not collecting, ignoring {:?} event", event.kind);
            return false;
        }
        self.inner.preprocessor.enqueue(event);
        true
    }

    pub fn set_active_tab(&self, tab_id: Option<i64>) {
        self.inner.dwell_time_monitor.set_active_tab(tab_id);
    }

    /// Starts listening for consent and, if consent was already given,
    /// starts the pipeline. Calling it again has no effect.
    pub async fn init(&self) -> Result<GlueState> {
        let mut state = self.inner.state.lock().await;
        if *state != GlueState::Uninitialized {
            return Ok(*state);
        }

        self.inner.ports.register(
            PortName::ConsentForm,
            Arc::new(ConsentFormHandler {
                glue: Arc::downgrade(&self.inner),
            }),
        );

        if self.inner.store.get_consent_status().await?.is_given() {
            self.start_locked(&mut state).await?;
        } else {
            *state = GlueState::AwaitingConsent;
            log_info!("awaiting consent");
        }
        Ok(*state)
    }

    pub async fn consent_status(&self) -> Result<ConsentStatusReply> {
        Ok(ConsentStatusReply {
            consent_status: self.inner.store.get_consent_status().await?,
            consent_status_timestamp: self.inner.store.get_consent_status_timestamp().await?,
        })
    }

    /// Persists a consent form submission. Giving consent shares a consent
    /// update and starts the pipeline if it was waiting for consent.
    pub async fn on_consent_update(&self, message: &ConsentFormMessage) -> Result<()> {
        let store = &self.inner.store;

        if message.has_demographics() {
            let mut demographics = store.get_user_supplied_demographics().await?;
            if message.user_over_18.is_some() {
                demographics.user_over_18 = message.user_over_18.clone();
            }
            if message.user_part_of_marginalized_group.is_some() {
                demographics.user_part_of_marginalized_group =
                    message.user_part_of_marginalized_group.clone();
            }
            demographics.last_updated = Some(Utc::now());
            store.set_user_supplied_demographics(&demographics).await?;
        }

        let Some(status) = message.updated_consent_status else {
            return Ok(());
        };
        store.set_consent_status(status).await?;
        log_info!("consent status updated to {status:?}");

        if status != ConsentStatus::Given {
            return Ok(());
        }

        let update = ConsentStatusUpdate {
            consent_status: status,
            consent_status_timestamp: store.get_consent_status_timestamp().await?,
            user_supplied_demographics: store.get_user_supplied_demographics().await?,
        };
        self.inner
            .data_sharer
            .share(DataPointPayload::ConsentStatusUpdate(update))
            .await?;

        let mut state = self.inner.state.lock().await;
        if *state == GlueState::AwaitingConsent {
            self.start_locked(&mut state).await?;
        }
        Ok(())
    }

    async fn start_locked(&self, state: &mut GlueState) -> Result<()> {
        let inner = &self.inner;

        inner.ports.register(
            PortName::ReportRegretForm,
            Arc::new(ReportRegretFormHandler {
                glue: Arc::downgrade(inner),
            }),
        );
        self.start_timers().await?;

        if let Err(err) = inner.data_sharer.flush().await {
            log_error!("flushing pending data points failed: {err:#}");
        }

        *state = GlueState::Active;
        log_info!("pipeline active");
        Ok(())
    }

    async fn start_timers(&self) -> Result<()> {
        let inner = &self.inner;
        inner.collecting.store(true, Ordering::SeqCst);
        inner.dwell_time_monitor.run();
        inner.preprocessor.run();
        inner.data_sharer.run();
        inner
            .usage_statistics
            .run(inner.data_sharer.clone())
            .await
            .context("failed to start usage statistics")
    }

    fn stop_timers(&self) {
        let inner = &self.inner;
        inner.collecting.store(false, Ordering::SeqCst);
        inner.dwell_time_monitor.cleanup();
        inner.preprocessor.stop();
        inner.usage_statistics.stop();
        inner.data_sharer.cleanup();
    }

    /// Suspends collection and periodic work. Retained state is kept.
    pub async fn pause(&self) -> GlueState {
        let mut state = self.inner.state.lock().await;
        if *state == GlueState::Active {
            self.stop_timers();
            *state = GlueState::Paused;
            log_info!("pipeline paused");
        }
        *state
    }

    pub async fn resume(&self) -> Result<GlueState> {
        let mut state = self.inner.state.lock().await;
        if *state == GlueState::Paused {
            self.start_timers().await?;
            *state = GlueState::Active;
            log_info!("pipeline resumed");
        }
        Ok(*state)
    }

    /// Stops every timer and listener and releases retained batches.
    /// Unsubmitted statistics and queued data points stay persisted. Safe to
    /// call repeatedly.
    pub async fn cleanup(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let inner = &self.inner;

        inner.ports.deregister_all();
        self.stop_timers();
        inner.preprocessor.cleanup();
        let persisted = inner.usage_statistics.cleanup().await;

        if *state != GlueState::Uninitialized {
            log_info!("cleaned up from {:?}", *state);
        }
        *state = GlueState::Uninitialized;
        persisted
    }

    /// Drains pending events and summarizes everything retained.
    pub fn regret_report_data(&self) -> RegretReportData {
        let inner = &self.inner;
        inner.preprocessor.process_queue();
        let batches = inner.preprocessor.retained_batches();
        let navigations = inner
            .summarizer
            .navigation_batches_by_uuid_to_youtube_navigations(&batches);
        inner
            .summarizer
            .regret_report_data_from_youtube_navigations(&navigations)
    }

    pub async fn share_regret_report(&self, report: RegretReport) -> Result<bool> {
        self.inner
            .data_sharer
            .share(DataPointPayload::RegretReport(report))
            .await
    }

    /// The export document and the file name it should be saved under.
    pub async fn export_shared_data(&self) -> Result<(String, SharedDataExport)> {
        let export = self.inner.data_sharer.export().await?;
        Ok((export_file_name(&export.extension_installation_uuid), export))
    }

    /// Spawns the inbound message loop over this glue's ports.
    pub fn spawn_message_loop(&self, cancel: CancellationToken) -> (PortClient, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_message_loop(self.ports(), rx, cancel));
        (PortClient::new(tx), handle)
    }
}

fn upgrade(glue: &Weak<GlueInner>) -> Result<ExtensionGlue> {
    glue.upgrade()
        .map(|inner| ExtensionGlue { inner })
        .ok_or_else(|| anyhow!("extension has shut down"))
}

struct ConsentFormHandler {
    glue: Weak<GlueInner>,
}

#[async_trait]
impl PortHandler for ConsentFormHandler {
    async fn on_message(&self, message: Value) -> Result<Option<Value>> {
        let message: ConsentFormMessage =
            serde_json::from_value(message).context("malformed consent form message")?;
        let glue = upgrade(&self.glue)?;

        let updated = message.updated_consent_status.is_some() || message.has_demographics();
        if updated {
            glue.on_consent_update(&message).await?;
        }
        if !updated && !message.request_consent_status {
            return Ok(None);
        }

        let reply = glue.consent_status().await?;
        Ok(Some(serde_json::to_value(reply)?))
    }
}

struct ReportRegretFormHandler {
    glue: Weak<GlueInner>,
}

#[async_trait]
impl PortHandler for ReportRegretFormHandler {
    async fn on_message(&self, message: Value) -> Result<Option<Value>> {
        let message: ReportRegretFormMessage =
            serde_json::from_value(message).context("malformed report form message")?;
        let glue = upgrade(&self.glue)?;

        if let Some(report) = message.regret_report {
            if let Err(err) = glue.share_regret_report(report).await {
                log_error!("sharing regret report failed: {err:#}");
            }
        }

        if !message.request_regret_report_data {
            return Ok(None);
        }
        let reply = ReportRegretFormReply::RegretReportData(glue.regret_report_data());
        Ok(Some(serde_json::to_value(reply)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharing::SharedDataPoint;
    use crate::store::MemoryStorageArea;
    use serde_json::json;

    struct NullSink;

    #[async_trait]
    impl DataSink for NullSink {
        async fn transmit(&self, _point: &SharedDataPoint) -> Result<()> {
            Ok(())
        }
    }

    fn glue() -> ExtensionGlue {
        ExtensionGlue::new(
            PipelineConfig::default(),
            Store::new(Arc::new(MemoryStorageArea::new())),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn init_without_consent_waits() {
        let glue = glue();
        assert_eq!(glue.init().await.unwrap(), GlueState::AwaitingConsent);
        assert_eq!(glue.init().await.unwrap(), GlueState::AwaitingConsent);
        assert!(glue.ports().is_registered(PortName::ConsentForm));
        assert!(!glue.ports().is_registered(PortName::ReportRegretForm));
        assert!(!glue.preprocessor().is_running());
        glue.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn init_with_prior_consent_starts() {
        let glue = glue();
        glue.store().set_consent_status(ConsentStatus::Given).await.unwrap();
        assert_eq!(glue.init().await.unwrap(), GlueState::Active);
        assert!(glue.ports().is_registered(PortName::ReportRegretForm));
        assert!(glue.preprocessor().is_running());
        glue.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn pause_resume_and_cleanup() {
        let glue = glue();
        glue.store().set_consent_status(ConsentStatus::Given).await.unwrap();
        glue.init().await.unwrap();

        assert_eq!(glue.pause().await, GlueState::Paused);
        assert!(!glue.preprocessor().is_running());
        assert!(!glue.usage_statistics().is_running());
        assert_eq!(glue.resume().await.unwrap(), GlueState::Active);
        assert!(glue.preprocessor().is_running());

        glue.cleanup().await.unwrap();
        glue.cleanup().await.unwrap();
        assert_eq!(glue.state().await, GlueState::Uninitialized);
        assert!(!glue.ports().is_registered(PortName::ConsentForm));
        assert!(!glue.data_sharer().is_running());
    }

    #[tokio::test]
    async fn events_are_ignored_until_active() {
        let glue = glue();
        glue.init().await.unwrap();
        let event: RawEvent = serde_json::from_value(json!({
            "type": "cookie",
            "navigationUuid": "A",
            "tabId": 1,
            "timestamp": "2024-01-01T00:00:00Z",
        }))
        .unwrap();
        assert!(!glue.enqueue(event.clone()));

        glue.on_consent_update(&ConsentFormMessage {
            updated_consent_status: Some(ConsentStatus::Given),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(glue.state().await, GlueState::Active);
        assert!(glue.enqueue(event));
        glue.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn demographics_are_merged() {
        let glue = glue();
        glue.on_consent_update(&ConsentFormMessage {
            user_over_18: Some("yes".into()),
            ..Default::default()
        })
        .await
        .unwrap();
        glue.on_consent_update(&ConsentFormMessage {
            user_part_of_marginalized_group: Some("prefer-not-to-answer".into()),
            ..Default::default()
        })
        .await
        .unwrap();

        let demographics = glue.store().get_user_supplied_demographics().await.unwrap();
        assert_eq!(demographics.user_over_18.as_deref(), Some("yes"));
        assert_eq!(
            demographics.user_part_of_marginalized_group.as_deref(),
            Some("prefer-not-to-answer")
        );
        assert!(demographics.last_updated.is_some());
        assert_eq!(glue.store().get_consent_status().await.unwrap(), ConsentStatus::Unset);
    }
}
