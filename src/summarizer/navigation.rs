use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::instrumentation::NavigationPayload;
use crate::preprocessor::TrimmedNavigationBatch;

use super::url::{classify_url, YouTubePageType};

/// A field that could not be derived from the captured events is reported
/// as the literal string `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reported<T> {
    Known(T),
    Unknown,
}

impl<T> Reported<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Reported::Known(value) => Some(value),
            Reported::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Reported::Unknown)
    }
}

impl<T> From<Option<T>> for Reported<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Reported::Unknown, Reported::Known)
    }
}

impl<T: Serialize> Serialize for Reported<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reported::Known(value) => value.serialize(serializer),
            Reported::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// How the user arrived at a navigation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReachType {
    DirectNavigation,
    PageReload,
    SearchResultsPageVideoClick,
    WatchPageUpNextClick,
    WatchPageAutoplay,
    OtherPageVideoClick,
    FromOutsideYoutube,
    Unknown,
}

const DIRECT_TRANSITIONS: [&str; 6] = [
    "typed",
    "auto_bookmark",
    "generated",
    "keyword",
    "keyword_generated",
    "start_page",
];

/// Transition data decides reloads and direct navigations; everything else
/// is attributed by the page the user came from.
pub fn classify_reach_type(
    navigation: Option<&NavigationPayload>,
    referrer_page_type: Option<YouTubePageType>,
) -> ReachType {
    let transition = navigation.and_then(|n| n.transition_type.as_deref());
    let has_qualifier = |qualifier: &str| {
        navigation.is_some_and(|n| n.transition_qualifiers.iter().any(|q| q == qualifier))
    };

    if transition == Some("reload") {
        return ReachType::PageReload;
    }
    if transition.is_some_and(|t| DIRECT_TRANSITIONS.contains(&t)) || has_qualifier("from_address_bar") {
        return ReachType::DirectNavigation;
    }

    match referrer_page_type {
        Some(YouTubePageType::SearchResultsPage) => ReachType::SearchResultsPageVideoClick,
        Some(YouTubePageType::WatchPage) if has_qualifier("client_redirect") => {
            ReachType::WatchPageAutoplay
        }
        Some(YouTubePageType::WatchPage) => ReachType::WatchPageUpNextClick,
        Some(YouTubePageType::NotYouTube) => ReachType::FromOutsideYoutube,
        Some(YouTubePageType::Unknown) | None => ReachType::Unknown,
        Some(_) => ReachType::OtherPageVideoClick,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub video_id: Reported<String>,
    pub video_title: Reported<String>,
    pub channel_name: Reported<String>,
    pub channel_id: Reported<String>,
    pub view_count: Reported<u64>,
    pub video_duration_secs: Reported<u64>,
}

/// Read-only summary of one YouTube navigation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct YouTubeNavigation {
    pub navigation_uuid: String,
    pub parent_navigation_uuid: Option<String>,
    pub tab_id: i64,
    pub url: Reported<String>,
    pub page_type: YouTubePageType,
    pub navigation_started_at: DateTime<Utc>,
    pub transition_type: Reported<String>,
    pub reach_type: ReachType,
    pub video_metadata: Option<VideoMetadata>,
    pub search_query: Option<String>,
    pub tab_active_dwell_time_ms: u64,
}

impl YouTubeNavigation {
    /// Summarizes `batch`. `referrer` is the batch named by its referrer
    /// uuid, if that batch is still retained.
    pub fn from_trimmed_batch(
        batch: &TrimmedNavigationBatch,
        referrer: Option<&TrimmedNavigationBatch>,
    ) -> Self {
        let parsed = batch
            .url()
            .map(classify_url)
            .map(|parsed| (parsed.page_type, parsed.video_id, parsed.search_query));
        let (page_type, url_video_id, search_query) =
            parsed.unwrap_or((YouTubePageType::Unknown, None, None));

        let referrer_page_type = match (&batch.referrer_navigation_uuid, referrer) {
            (Some(_), Some(referrer)) => Some(
                referrer
                    .url()
                    .map(|url| classify_url(url).page_type)
                    .unwrap_or(YouTubePageType::Unknown),
            ),
            (Some(_), None) => Some(YouTubePageType::Unknown),
            (None, _) => None,
        };

        let video_metadata = (page_type == YouTubePageType::WatchPage)
            .then(|| video_metadata(batch, url_video_id));

        YouTubeNavigation {
            navigation_uuid: batch.navigation_uuid.clone(),
            parent_navigation_uuid: batch.referrer_navigation_uuid.clone(),
            tab_id: batch.tab_id,
            url: batch.url().map(str::to_string).into(),
            page_type,
            navigation_started_at: batch.started_at(),
            transition_type: batch
                .navigation
                .as_ref()
                .and_then(|n| n.transition_type.clone())
                .into(),
            reach_type: classify_reach_type(batch.navigation.as_ref(), referrer_page_type),
            video_metadata,
            search_query,
            tab_active_dwell_time_ms: batch.tab_active_dwell_time_ms,
        }
    }

    pub fn is_watch_page(&self) -> bool {
        self.page_type == YouTubePageType::WatchPage
    }
}

/// Captured details describing a different video than the URL are ignored.
fn video_metadata(batch: &TrimmedNavigationBatch, url_video_id: Option<String>) -> VideoMetadata {
    let details = batch.video_details.as_ref().filter(|details| {
        match (&url_video_id, &details.video_id) {
            (Some(from_url), Some(from_page)) => from_url == from_page,
            _ => true,
        }
    });

    let video_id = url_video_id.or_else(|| details.and_then(|d| d.video_id.clone()));
    VideoMetadata {
        video_id: video_id.into(),
        video_title: details.and_then(|d| d.title.clone()).into(),
        channel_name: details.and_then(|d| d.author.clone()).into(),
        channel_id: details.and_then(|d| d.channel_id.clone()).into(),
        view_count: details.and_then(|d| d.view_count).into(),
        video_duration_secs: details.and_then(|d| d.length_seconds).into(),
    }
}
