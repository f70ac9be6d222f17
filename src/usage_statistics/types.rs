use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::preprocessor::NavigationBatch;
use crate::summarizer::{classify_url, YouTubePageType};

/// Aggregate counters for one reporting interval.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageStatisticsSnapshot {
    pub interval_started_at: Option<DateTime<Utc>>,
    pub interval_ended_at: Option<DateTime<Utc>>,
    pub navigation_batches_seen: u64,
    pub youtube_navigations: u64,
    pub watch_page_navigations: u64,
    pub search_results_page_navigations: u64,
    pub other_youtube_page_navigations: u64,
    pub non_youtube_navigations: u64,
    pub distinct_videos_watched: u64,
    pub youtube_tab_active_dwell_time_ms: u64,
}

/// Running counters. Persisted as-is when the component is cleaned up with
/// counts that were never submitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub(crate) struct UsageCounters {
    pub interval_started_at: Option<DateTime<Utc>>,
    pub navigation_batches_seen: u64,
    pub watch_page_navigations: u64,
    pub search_results_page_navigations: u64,
    pub other_youtube_page_navigations: u64,
    pub non_youtube_navigations: u64,
    pub video_ids: BTreeSet<String>,
    pub youtube_tab_active_dwell_time_ms: u64,
}

impl UsageCounters {
    pub fn is_empty(&self) -> bool {
        self.navigation_batches_seen == 0
    }

    pub fn observe(&mut self, batch: &NavigationBatch, now: DateTime<Utc>) {
        self.interval_started_at.get_or_insert(now);
        self.navigation_batches_seen += 1;

        let parsed = batch.url().map(classify_url);
        let page_type = parsed
            .as_ref()
            .map_or(YouTubePageType::Unknown, |parsed| parsed.page_type);

        match page_type {
            YouTubePageType::WatchPage => self.watch_page_navigations += 1,
            YouTubePageType::SearchResultsPage => self.search_results_page_navigations += 1,
            YouTubePageType::NotYouTube | YouTubePageType::Unknown => {
                self.non_youtube_navigations += 1
            }
            _ => self.other_youtube_page_navigations += 1,
        }

        if page_type.is_youtube() {
            self.youtube_tab_active_dwell_time_ms += batch.tab_active_dwell_time_ms;
        }
        if let Some(video_id) = parsed.and_then(|parsed| parsed.video_id) {
            self.video_ids.insert(video_id);
        }
    }

    /// Folds counts from an earlier interval back in.
    pub fn absorb(&mut self, earlier: UsageCounters) {
        self.interval_started_at = match (self.interval_started_at, earlier.interval_started_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.navigation_batches_seen += earlier.navigation_batches_seen;
        self.watch_page_navigations += earlier.watch_page_navigations;
        self.search_results_page_navigations += earlier.search_results_page_navigations;
        self.other_youtube_page_navigations += earlier.other_youtube_page_navigations;
        self.non_youtube_navigations += earlier.non_youtube_navigations;
        self.video_ids.extend(earlier.video_ids);
        self.youtube_tab_active_dwell_time_ms += earlier.youtube_tab_active_dwell_time_ms;
    }

    pub fn snapshot(&self, ended_at: Option<DateTime<Utc>>) -> UsageStatisticsSnapshot {
        UsageStatisticsSnapshot {
            interval_started_at: self.interval_started_at,
            interval_ended_at: ended_at,
            navigation_batches_seen: self.navigation_batches_seen,
            youtube_navigations: self.watch_page_navigations
                + self.search_results_page_navigations
                + self.other_youtube_page_navigations,
            watch_page_navigations: self.watch_page_navigations,
            search_results_page_navigations: self.search_results_page_navigations,
            other_youtube_page_navigations: self.other_youtube_page_navigations,
            non_youtube_navigations: self.non_youtube_navigations,
            distinct_videos_watched: self.video_ids.len() as u64,
            youtube_tab_active_dwell_time_ms: self.youtube_tab_active_dwell_time_ms,
        }
    }
}
