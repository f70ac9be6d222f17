//! Raw instrumentation records as they arrive from the browser.
//!
//! Payloads are kept as JSON until a batch needs them; only navigation and
//! HTTP payloads have a shape the pipeline relies on.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RawEventKind {
    Navigation,
    Http,
    Cookie,
    Script,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: RawEventKind,
    #[serde(default)]
    pub navigation_uuid: String,
    pub tab_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NavigationPhase {
    BeforeNavigate,
    Committed,
    Completed,
    HistoryStateUpdated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NavigationPayload {
    pub url: String,
    pub phase: NavigationPhase,
    #[serde(default)]
    pub transition_type: Option<String>,
    #[serde(default)]
    pub transition_qualifiers: Vec<String>,
    /// 0 for the top-level frame.
    #[serde(default)]
    pub frame_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HttpPhase {
    Request,
    Response,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPayload {
    pub url: String,
    pub phase: HttpPhase,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub response_body: Option<String>,
}

/// A raw event's payload decoded according to its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Navigation(NavigationPayload),
    Http(HttpPayload),
    Cookie,
    Script,
}

impl RawEvent {
    /// Validates the correlation id and decodes the payload.
    pub fn parse_body(&self) -> Result<EventBody> {
        if self.navigation_uuid.trim().is_empty() {
            bail!("{:?} event on tab {} has no navigation uuid", self.kind, self.tab_id);
        }

        match self.kind {
            RawEventKind::Navigation => NavigationPayload::deserialize(&self.payload)
                .map(EventBody::Navigation)
                .with_context(|| {
                    format!("malformed navigation payload for {}", self.navigation_uuid)
                }),
            RawEventKind::Http => HttpPayload::deserialize(&self.payload)
                .map(EventBody::Http)
                .with_context(|| format!("malformed http payload for {}", self.navigation_uuid)),
            RawEventKind::Cookie => Ok(EventBody::Cookie),
            RawEventKind::Script => Ok(EventBody::Script),
        }
    }
}

impl HttpPayload {
    /// Main frame documents and XHR responses can carry page metadata.
    pub fn may_carry_page_content(&self) -> bool {
        self.phase == HttpPhase::Response
            && matches!(
                self.resource_type.as_deref(),
                None | Some("main_frame") | Some("xmlhttprequest")
            )
    }
}
