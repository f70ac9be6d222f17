//! Turns navigation batches into YouTube navigation summaries and regret
//! report payloads.

mod metadata;
mod navigation;
mod report;
mod url;

use std::collections::BTreeMap;

use crate::instrumentation::{EventBody, RawEventKind};
use crate::preprocessor::{
    EventCounts, NavigationBatch, NavigationBatchTrimmer, RetainedBatch, TrimmedHttpExchange,
    TrimmedNavigationBatch,
};

pub use metadata::{extract_all_video_details, extract_video_details, VideoDetails};
pub use navigation::{classify_reach_type, ReachType, Reported, VideoMetadata, YouTubeNavigation};
pub use report::{RegretReport, RegretReportData};
pub use url::{classify_url, is_youtube_watch_page_url, ParsedYouTubeUrl, YouTubePageType};

const DEFAULT_PARENT_CHAIN_LENGTH: usize = 5;

#[derive(Debug, Clone)]
pub struct ReportSummarizer {
    parent_chain_length: usize,
}

impl Default for ReportSummarizer {
    fn default() -> Self {
        Self::new(DEFAULT_PARENT_CHAIN_LENGTH)
    }
}

impl ReportSummarizer {
    pub fn new(parent_chain_length: usize) -> Self {
        Self { parent_chain_length }
    }

    /// Reduces a batch to what summarization needs. Request and response
    /// bodies, cookie and script payloads are dropped; only event counts,
    /// body-less page-content exchanges and the page's video details remain.
    pub fn trim_navigation_batch(&self, batch: &NavigationBatch) -> TrimmedNavigationBatch {
        let url_video_id = batch.url().and_then(|url| classify_url(url).video_id);

        let mut event_counts = EventCounts::default();
        let mut http_exchanges = Vec::new();
        let mut matching_details = None;
        let mut last_details = None;

        for event in &batch.events {
            match event.kind {
                RawEventKind::Navigation => event_counts.navigation += 1,
                RawEventKind::Http => event_counts.http += 1,
                RawEventKind::Cookie => event_counts.cookie += 1,
                RawEventKind::Script => event_counts.script += 1,
            }

            let Ok(EventBody::Http(http)) = event.parse_body() else {
                continue;
            };
            if !http.may_carry_page_content() {
                continue;
            }

            for details in http
                .response_body
                .as_deref()
                .map(extract_all_video_details)
                .unwrap_or_default()
            {
                if url_video_id.is_some() && details.video_id == url_video_id {
                    matching_details = Some(details.clone());
                }
                last_details = Some(details);
            }

            http_exchanges.push(TrimmedHttpExchange {
                url: http.url,
                method: http.method,
                resource_type: http.resource_type,
                status_code: http.status_code,
                timestamp: event.timestamp,
            });
        }

        TrimmedNavigationBatch {
            navigation_uuid: batch.navigation_uuid.clone(),
            tab_id: batch.tab_id,
            referrer_navigation_uuid: batch.referrer_navigation_uuid.clone(),
            navigation: batch.navigation.clone(),
            navigation_started_at: batch.navigation_started_at,
            first_event_at: batch.first_event_at,
            last_event_at: batch.last_event_at,
            tab_active_dwell_time_ms: batch.tab_active_dwell_time_ms,
            event_counts,
            http_exchanges,
            video_details: matching_details.or(last_details),
        }
    }

    /// Summarizes every YouTube navigation in `batches_by_uuid`. Open batches
    /// are trimmed on the fly without touching the originals; non-YouTube
    /// navigations are left out but still serve as referrers.
    pub fn navigation_batches_by_uuid_to_youtube_navigations(
        &self,
        batches_by_uuid: &BTreeMap<String, RetainedBatch>,
    ) -> BTreeMap<String, YouTubeNavigation> {
        let trimmed: BTreeMap<&str, TrimmedNavigationBatch> = batches_by_uuid
            .iter()
            .map(|(uuid, entry)| {
                let batch = match entry {
                    RetainedBatch::Open(batch) => self.trim_navigation_batch(batch),
                    RetainedBatch::Trimmed(batch) => batch.clone(),
                };
                (uuid.as_str(), batch)
            })
            .collect();

        trimmed
            .values()
            .filter_map(|batch| {
                let referrer = batch
                    .referrer_navigation_uuid
                    .as_deref()
                    .and_then(|uuid| trimmed.get(uuid));
                let navigation = YouTubeNavigation::from_trimmed_batch(batch, referrer);
                navigation
                    .page_type
                    .is_youtube()
                    .then(|| (navigation.navigation_uuid.clone(), navigation))
            })
            .collect()
    }

    pub fn regret_report_data_from_youtube_navigations(
        &self,
        navigations: &BTreeMap<String, YouTubeNavigation>,
    ) -> RegretReportData {
        report::regret_report_data(navigations, self.parent_chain_length)
    }
}

impl NavigationBatchTrimmer for ReportSummarizer {
    fn trim(&self, batch: &NavigationBatch) -> TrimmedNavigationBatch {
        self.trim_navigation_batch(batch)
    }
}
