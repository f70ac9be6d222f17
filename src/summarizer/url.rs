use serde::{Deserialize, Serialize};
use url::Url;

const YOUTUBE_DOMAINS: [&str; 3] = ["youtube.com", "youtube-nocookie.com", "youtu.be"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum YouTubePageType {
    WatchPage,
    SearchResultsPage,
    ChannelPage,
    UserPage,
    HomePage,
    OtherYouTubePage,
    NotYouTube,
    Unknown,
}

impl YouTubePageType {
    pub fn is_youtube(&self) -> bool {
        !matches!(self, YouTubePageType::NotYouTube | YouTubePageType::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedYouTubeUrl {
    pub page_type: YouTubePageType,
    pub video_id: Option<String>,
    pub search_query: Option<String>,
}

impl ParsedYouTubeUrl {
    fn page(page_type: YouTubePageType) -> Self {
        Self {
            page_type,
            video_id: None,
            search_query: None,
        }
    }

    fn watch(video_id: Option<String>) -> Self {
        Self {
            page_type: YouTubePageType::WatchPage,
            video_id: video_id.filter(|id| !id.is_empty()),
            search_query: None,
        }
    }
}

pub fn is_youtube_watch_page_url(url: &str) -> bool {
    classify_url(url).page_type == YouTubePageType::WatchPage
}

/// Classifies an absolute http(s) URL. Anything that cannot be read as one
/// is `Unknown`.
pub fn classify_url(url: &str) -> ParsedYouTubeUrl {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return ParsedYouTubeUrl::page(YouTubePageType::Unknown);
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return ParsedYouTubeUrl::page(YouTubePageType::Unknown);
    }
    let Some(host) = parsed.host_str().filter(|host| !host.is_empty()) else {
        return ParsedYouTubeUrl::page(YouTubePageType::Unknown);
    };

    let Some(domain) = YOUTUBE_DOMAINS
        .iter()
        .find(|domain| host == **domain || host.ends_with(&format!(".{domain}")))
    else {
        return ParsedYouTubeUrl::page(YouTubePageType::NotYouTube);
    };

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    if *domain == "youtu.be" {
        return match segments.as_slice() {
            [id] => ParsedYouTubeUrl::watch(Some(id.to_string())),
            _ => ParsedYouTubeUrl::page(YouTubePageType::OtherYouTubePage),
        };
    }

    match segments.as_slice() {
        [] => ParsedYouTubeUrl::page(YouTubePageType::HomePage),
        ["watch"] => ParsedYouTubeUrl::watch(query_param(&parsed, "v")),
        ["shorts", id, ..] | ["embed", id, ..] | ["live", id, ..] => {
            ParsedYouTubeUrl::watch(Some(id.to_string()))
        }
        ["results"] => ParsedYouTubeUrl {
            page_type: YouTubePageType::SearchResultsPage,
            video_id: None,
            search_query: query_param(&parsed, "search_query"),
        },
        ["channel", ..] | ["c", ..] => ParsedYouTubeUrl::page(YouTubePageType::ChannelPage),
        [handle, ..] if handle.starts_with('@') => {
            ParsedYouTubeUrl::page(YouTubePageType::ChannelPage)
        }
        ["user", ..] => ParsedYouTubeUrl::page(YouTubePageType::UserPage),
        _ => ParsedYouTubeUrl::page(YouTubePageType::OtherYouTubePage),
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
