//! Video metadata embedded in captured YouTube page content.
//!
//! Watch pages and their XHR continuations carry a `"videoDetails"` object
//! inside a much larger JSON blob (or inline script). Only that object is
//! located and decoded; the surrounding document is never parsed.

use serde::{Deserialize, Deserializer, Serialize};

const VIDEO_DETAILS_KEY: &str = "\"videoDetails\"";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoDetails {
    pub video_id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub channel_id: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub view_count: Option<u64>,
    #[serde(deserialize_with = "lenient_number")]
    pub length_seconds: Option<u64>,
}

/// YouTube sends counts as strings. Garbage becomes `None` instead of
/// failing the whole object.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(number) => number.as_u64(),
        serde_json::Value::String(text) => text.trim().replace(',', "").parse().ok(),
        _ => None,
    })
}

/// Every decodable `videoDetails` object in `body`, in document order.
pub fn extract_all_video_details(body: &str) -> Vec<VideoDetails> {
    let mut found = Vec::new();
    let mut search_from = 0;

    while let Some(offset) = body[search_from..].find(VIDEO_DETAILS_KEY) {
        let key_end = search_from + offset + VIDEO_DETAILS_KEY.len();
        search_from = key_end;

        let Some(object_start) = object_start_after_key(body, key_end) else {
            continue;
        };
        let Some(object_end) = balanced_object_end(body, object_start) else {
            continue;
        };

        if let Ok(details) = serde_json::from_str::<VideoDetails>(&body[object_start..object_end]) {
            found.push(details);
        }
        search_from = object_end;
    }

    found
}

/// The last decodable `videoDetails` object in `body`.
pub fn extract_video_details(body: &str) -> Option<VideoDetails> {
    extract_all_video_details(body).pop()
}

/// Skips whitespace, a colon and more whitespace, and expects `{`.
fn object_start_after_key(body: &str, key_end: usize) -> Option<usize> {
    let rest = &body[key_end..];
    let after_colon = rest.trim_start().strip_prefix(':')?;
    let trimmed = after_colon.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    Some(body.len() - trimmed.len())
}

/// Byte index one past the `}` matching the `{` at `start`. Braces inside
/// JSON strings are ignored.
fn balanced_object_end(body: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, byte) in body.as_bytes()[start..].iter().copied().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + index + 1);
                }
            }
            _ => {}
        }
    }

    None
}
