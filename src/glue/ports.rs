//! Duplex message channels to the UI surfaces.
//!
//! Each channel has one registered handler. All inbound messages go through
//! a single loop that dispatches them in arrival order and sends the
//! handler's reply back to the sender.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::store::ConsentStatus;
use crate::summarizer::{RegretReport, RegretReportData};
use crate::utils::lock_or_recover;

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "ports";

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortName {
    #[serde(rename = "port-from-consent-form")]
    ConsentForm,
    #[serde(rename = "port-from-report-regret-form")]
    ReportRegretForm,
}

impl PortName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortName::ConsentForm => "port-from-consent-form",
            PortName::ReportRegretForm => "port-from-report-regret-form",
        }
    }
}

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsentFormMessage {
    pub request_consent_status: bool,
    pub updated_consent_status: Option<ConsentStatus>,
    pub user_over_18: Option<String>,
    pub user_part_of_marginalized_group: Option<String>,
}

impl ConsentFormMessage {
    pub fn has_demographics(&self) -> bool {
        self.user_over_18.is_some() || self.user_part_of_marginalized_group.is_some()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsentStatusReply {
    pub consent_status: ConsentStatus,
    pub consent_status_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportRegretFormMessage {
    pub request_regret_report_data: bool,
    pub regret_report: Option<RegretReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportRegretFormReply {
    RegretReportData(RegretReportData),
    ErrorMessage(String),
}

/// Inbound message handler for one channel. `Ok(None)` means the message
/// needs no reply.
#[async_trait]
pub trait PortHandler: Send + Sync {
    async fn on_message(&self, message: Value) -> Result<Option<Value>>;
}

#[derive(Default)]
pub struct PortRegistry {
    handlers: Mutex<HashMap<PortName, Arc<dyn PortHandler>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handler already registered for `port`.
    pub fn register(&self, port: PortName, handler: Arc<dyn PortHandler>) {
        lock_or_recover(&self.handlers).insert(port, handler);
        log_debug!("listening on {port}");
    }

    /// Returns false if nothing was registered.
    pub fn deregister(&self, port: PortName) -> bool {
        lock_or_recover(&self.handlers).remove(&port).is_some()
    }

    pub fn deregister_all(&self) {
        lock_or_recover(&self.handlers).clear();
    }

    pub fn is_registered(&self, port: PortName) -> bool {
        lock_or_recover(&self.handlers).contains_key(&port)
    }

    pub async fn dispatch(&self, port: PortName, message: Value) -> Result<Option<Value>> {
        let handler = lock_or_recover(&self.handlers)
            .get(&port)
            .cloned()
            .ok_or_else(|| anyhow!("no listener on {port}"))?;
        handler.on_message(message).await
    }
}

/// One inbound message, with a slot for the reply.
pub struct PortEnvelope {
    pub port: PortName,
    pub message: Value,
    pub reply: Option<oneshot::Sender<Option<Value>>>,
}

/// Dispatches envelopes one at a time until the channel closes or `cancel`
/// fires. Handler errors are answered with `{"errorMessage": ...}`.
pub async fn run_message_loop(
    registry: Arc<PortRegistry>,
    mut inbound: mpsc::UnboundedReceiver<PortEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = inbound.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let reply = match registry.dispatch(envelope.port, envelope.message).await {
            Ok(reply) => reply,
            Err(err) => {
                log_warn!("message on {} failed: {err:#}", envelope.port);
                Some(json!({ "errorMessage": err.to_string() }))
            }
        };

        if let Some(reply_tx) = envelope.reply {
            // The sender may have stopped waiting.
            let _ = reply_tx.send(reply);
        }
    }
    log_debug!("message loop stopped");
}

/// Sending half of the message loop.
#[derive(Clone)]
pub struct PortClient {
    tx: mpsc::UnboundedSender<PortEnvelope>,
}

impl PortClient {
    pub fn new(tx: mpsc::UnboundedSender<PortEnvelope>) -> Self {
        Self { tx }
    }

    /// Posts a message and waits for the handler's reply.
    pub async fn post(&self, port: PortName, message: Value) -> Result<Option<Value>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PortEnvelope {
                port,
                message,
                reply: Some(reply_tx),
            })
            .map_err(|_| anyhow!("message loop is not running"))?;
        reply_rx.await.context("message loop dropped the reply")
    }

    /// Posts a message without waiting for it to be handled.
    pub fn post_and_forget(&self, port: PortName, message: Value) -> Result<()> {
        self.tx
            .send(PortEnvelope {
                port,
                message,
                reply: None,
            })
            .map_err(|_| anyhow!("message loop is not running"))
    }
}
