use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::instrumentation::{EventBody, NavigationPayload, NavigationPhase, RawEvent};
use crate::summarizer::VideoDetails;

/// Every raw event seen so far for one navigation, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationBatch {
    pub navigation_uuid: String,
    pub tab_id: i64,
    /// Navigation that was showing in the same tab right before this one.
    pub referrer_navigation_uuid: Option<String>,
    /// Top-level navigation record, once one has arrived.
    pub navigation: Option<NavigationPayload>,
    pub navigation_started_at: Option<DateTime<Utc>>,
    pub events: Vec<RawEvent>,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub tab_active_dwell_time_ms: u64,
    /// A top-level `completed` navigation event was observed.
    pub terminal_seen: bool,
    /// Preprocessor clock reading of the latest append. Drives completion.
    pub(crate) last_activity_at: DateTime<Utc>,
}

impl NavigationBatch {
    pub(crate) fn new(first: &RawEvent, now: DateTime<Utc>) -> Self {
        Self {
            navigation_uuid: first.navigation_uuid.clone(),
            tab_id: first.tab_id,
            referrer_navigation_uuid: None,
            navigation: None,
            navigation_started_at: None,
            events: Vec::new(),
            first_event_at: first.timestamp,
            last_event_at: first.timestamp,
            tab_active_dwell_time_ms: 0,
            terminal_seen: false,
            last_activity_at: now,
        }
    }

    /// Appends an already validated event. Returns true if this event was the
    /// batch's first top-level navigation record.
    pub(crate) fn append(&mut self, event: RawEvent, body: &EventBody, now: DateTime<Utc>) -> bool {
        let mut first_navigation = false;

        if let EventBody::Navigation(payload) = body {
            let is_top_level = payload.frame_id == 0;
            if is_top_level && payload.phase == NavigationPhase::Completed {
                self.terminal_seen = true;
            }
            match &self.navigation {
                None if is_top_level => {
                    self.navigation = Some(payload.clone());
                    self.navigation_started_at = Some(event.timestamp);
                    first_navigation = true;
                }
                // Same-document navigations keep the original transition data
                // but follow the address bar.
                Some(existing) if is_top_level && payload.phase == NavigationPhase::HistoryStateUpdated => {
                    let mut updated = existing.clone();
                    updated.url = payload.url.clone();
                    self.navigation = Some(updated);
                }
                _ => {}
            }
        }

        self.first_event_at = self.first_event_at.min(event.timestamp);
        self.last_event_at = self.last_event_at.max(event.timestamp);
        self.last_activity_at = now;
        self.events.push(event);

        first_navigation
    }

    /// No new events for the quiescence window, or for the grace period once
    /// a terminal navigation event has been seen.
    pub fn is_complete(&self, now: DateTime<Utc>, quiescence_window: Duration, grace_period: Duration) -> bool {
        let window = if self.terminal_seen {
            grace_period
        } else {
            quiescence_window
        };

        (now - self.last_activity_at)
            .to_std()
            .map(|idle| idle >= window)
            .unwrap_or(false)
    }

    pub fn url(&self) -> Option<&str> {
        self.navigation.as_ref().map(|navigation| navigation.url.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct EventCounts {
    pub navigation: u32,
    pub http: u32,
    pub cookie: u32,
    pub script: u32,
}

/// An HTTP exchange with its request and response bodies removed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrimmedHttpExchange {
    pub url: String,
    pub method: Option<String>,
    pub resource_type: Option<String>,
    pub status_code: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

/// The durable form of a completed batch: enough to rebuild a YouTube
/// navigation summary, nothing more.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrimmedNavigationBatch {
    pub navigation_uuid: String,
    pub tab_id: i64,
    pub referrer_navigation_uuid: Option<String>,
    pub navigation: Option<NavigationPayload>,
    pub navigation_started_at: Option<DateTime<Utc>>,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub tab_active_dwell_time_ms: u64,
    pub event_counts: EventCounts,
    pub http_exchanges: Vec<TrimmedHttpExchange>,
    pub video_details: Option<VideoDetails>,
}

impl TrimmedNavigationBatch {
    pub fn url(&self) -> Option<&str> {
        self.navigation.as_ref().map(|navigation| navigation.url.as_str())
    }

    /// When the navigation started, falling back to its first event.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.navigation_started_at.unwrap_or(self.first_event_at)
    }
}

/// Reduces a batch to its trimmed form. Injected into the preprocessor at
/// construction; invoked exactly once per batch, when it completes.
pub trait NavigationBatchTrimmer: Send + Sync {
    fn trim(&self, batch: &NavigationBatch) -> TrimmedNavigationBatch;
}

/// Entry of the preprocessor's batch map.
#[derive(Debug, Clone, PartialEq)]
pub enum RetainedBatch {
    Open(NavigationBatch),
    Trimmed(TrimmedNavigationBatch),
}

impl RetainedBatch {
    pub fn navigation_uuid(&self) -> &str {
        match self {
            RetainedBatch::Open(batch) => &batch.navigation_uuid,
            RetainedBatch::Trimmed(batch) => &batch.navigation_uuid,
        }
    }

    pub fn tab_id(&self) -> i64 {
        match self {
            RetainedBatch::Open(batch) => batch.tab_id,
            RetainedBatch::Trimmed(batch) => batch.tab_id,
        }
    }

    pub fn is_trimmed(&self) -> bool {
        matches!(self, RetainedBatch::Trimmed(_))
    }

    /// Trims an open batch; a trimmed batch is returned unchanged.
    pub fn trim(self, trimmer: &dyn NavigationBatchTrimmer) -> RetainedBatch {
        match self {
            RetainedBatch::Open(batch) => RetainedBatch::Trimmed(trimmer.trim(&batch)),
            trimmed @ RetainedBatch::Trimmed(_) => trimmed,
        }
    }
}
