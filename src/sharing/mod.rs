//! Consent-gated outbound data points and the local shared-data history.

mod sink;
mod types;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::store::{Store, StorageItems, PENDING_SHARED_DATA_KEY};
use crate::utils::{lock_or_recover, PeriodicTask};

pub use sink::{DataSink, JsonLinesFileSink};
use types::RegretReportTally;

pub use types::{
    export_file_name, ConsentStatusUpdate, DataPointKind, DataPointPayload, EventMetadata,
    SharedDataExport, SharedDataPoint,
};

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "data-sharer";

const REGRET_REPORT_TALLY_KEY: &str = "regretReportsSinceConsent";

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Default)]
struct Outbox {
    loaded: bool,
    queues: BTreeMap<DataPointKind, VecDeque<SharedDataPoint>>,
}

impl Outbox {
    fn pending(&self) -> Vec<SharedDataPoint> {
        self.queues.values().flatten().cloned().collect()
    }

    fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

struct SharerInner {
    store: Store,
    sink: Arc<dyn DataSink>,
    retry_interval: Duration,
    /// Held across store and sink calls so shares and flushes never
    /// interleave.
    outbox: AsyncMutex<Outbox>,
    retry_task: Mutex<Option<PeriodicTask>>,
}

#[derive(Clone)]
pub struct DataSharer {
    inner: Arc<SharerInner>,
}

impl DataSharer {
    pub fn new(store: Store, sink: Arc<dyn DataSink>, retry_interval: Duration) -> Self {
        Self {
            inner: Arc::new(SharerInner {
                store,
                sink,
                retry_interval,
                outbox: AsyncMutex::new(Outbox::default()),
                retry_task: Mutex::new(None),
            }),
        }
    }

    /// Records and queues a data point, then tries to transmit.
    ///
    /// Returns `Ok(false)` without recording anything unless consent is
    /// given. Transmission failures leave the point queued and are not
    /// errors; store failures are.
    pub async fn share(&self, payload: DataPointPayload) -> Result<bool> {
        let store = &self.inner.store;
        let mut outbox = self.inner.outbox.lock().await;

        // Step 1: consent gate
        if !store.get_consent_status().await?.is_given() {
            log_info!("consent not given, not sharing {:?}", payload.kind());
            return Ok(false);
        }

        // Step 2: wrap in an envelope and append to the local history
        let consent_given_at = store.get_consent_status_timestamp().await?;
        let mut tally = store
            .get_value::<RegretReportTally>(REGRET_REPORT_TALLY_KEY)
            .await?
            .filter(|tally| tally.consent_given_at == consent_given_at)
            .unwrap_or(RegretReportTally {
                consent_given_at,
                count: 0,
            });

        let point = SharedDataPoint {
            event_metadata: EventMetadata {
                event_uuid: Uuid::new_v4().to_string(),
                client_timestamp: Utc::now(),
                extension_installation_uuid: store.extension_installation_uuid().await?,
                extension_version: env!("CARGO_PKG_VERSION").to_string(),
                amount_of_regret_reports_since_consent_was_given: tally.count,
            },
            data: payload,
        };
        if point.kind() == DataPointKind::RegretReport {
            tally.count += 1;
        }
        let mut also = StorageItems::new();
        also.insert(REGRET_REPORT_TALLY_KEY.into(), serde_json::to_value(&tally)?);
        store.append_shared_data(&point, also).await?;

        // Step 3: queue for transmission
        self.ensure_loaded(&mut outbox).await?;
        let kind = point.kind();
        outbox.queues.entry(kind).or_default().push_back(point);
        store
            .set_value(PENDING_SHARED_DATA_KEY, &outbox.pending())
            .await?;
        log_debug!("queued {kind:?} data point");

        // Step 4: transmit what consent allows
        self.flush_locked(&mut outbox).await?;
        Ok(true)
    }

    /// Transmits queued points category by category. Returns how many were
    /// sent.
    pub async fn flush(&self) -> Result<usize> {
        let mut outbox = self.inner.outbox.lock().await;
        self.ensure_loaded(&mut outbox).await?;
        self.flush_locked(&mut outbox).await
    }

    async fn flush_locked(&self, outbox: &mut Outbox) -> Result<usize> {
        let store = &self.inner.store;
        let mut sent = 0;

        for (kind, queue) in outbox.queues.iter_mut() {
            while let Some(point) = queue.front() {
                // Re-checked per point so a withdrawal takes effect
                // mid-flush.
                if !store.get_consent_status().await?.is_given() {
                    log_info!("consent not given, {} points stay queued", queue.len());
                    break;
                }
                match self.inner.sink.transmit(point).await {
                    Ok(()) => {
                        queue.pop_front();
                        sent += 1;
                    }
                    Err(err) => {
                        log_warn!("transmitting {kind:?} failed, will retry: {err:#}");
                        break;
                    }
                }
            }
        }
        outbox.queues.retain(|_, queue| !queue.is_empty());

        if sent > 0 {
            store
                .set_value(PENDING_SHARED_DATA_KEY, &outbox.pending())
                .await?;
            log_debug!("transmitted {sent} data points, {} pending", outbox.len());
        }
        Ok(sent)
    }

    async fn ensure_loaded(&self, outbox: &mut Outbox) -> Result<()> {
        if outbox.loaded {
            return Ok(());
        }
        let pending: Vec<SharedDataPoint> = self
            .inner
            .store
            .get_value(PENDING_SHARED_DATA_KEY)
            .await?
            .unwrap_or_default();
        if !pending.is_empty() {
            log_info!("restored {} pending data points", pending.len());
        }
        for point in pending {
            outbox.queues.entry(point.kind()).or_default().push_back(point);
        }
        outbox.loaded = true;
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<usize> {
        let mut outbox = self.inner.outbox.lock().await;
        self.ensure_loaded(&mut outbox).await?;
        Ok(outbox.len())
    }

    /// The full local history. Allowed regardless of consent.
    pub async fn export(&self) -> Result<SharedDataExport> {
        let store = &self.inner.store;
        let shared_data = store.shared_data().await?;
        Ok(SharedDataExport {
            extension_installation_uuid: store.extension_installation_uuid().await?,
            exported_at: Utc::now(),
            shared_data,
        })
    }

    /// Starts periodic retries of queued points. No-op if already running.
    pub fn run(&self) {
        let mut task = lock_or_recover(&self.inner.retry_task);
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }

        let weak: Weak<SharerInner> = Arc::downgrade(&self.inner);
        *task = Some(PeriodicTask::spawn(
            "data sharer retry",
            self.inner.retry_interval,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if let Err(err) = (DataSharer { inner }).flush().await {
                        log_error!("retrying queued data points failed: {err:#}");
                    }
                }
            },
        ));
        log_info!("retrying queued data points every {:?}", self.inner.retry_interval);
    }

    pub fn is_running(&self) -> bool {
        lock_or_recover(&self.inner.retry_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops retrying. Queued points stay persisted. Safe to call repeatedly.
    pub fn cleanup(&self) {
        if let Some(task) = lock_or_recover(&self.inner.retry_task).take() {
            task.stop();
            log_info!("retry loop stopped");
        }
    }
}
