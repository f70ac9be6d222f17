use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::navigation::{ReachType, YouTubeNavigation};

/// The reported watch page plus the navigations that led to it.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegretReportData {
    pub reported_navigation_uuid: Option<String>,
    pub how_the_video_was_reached: Option<ReachType>,
    /// Reported navigation first, then its predecessors most-recent-first.
    pub navigations: Vec<YouTubeNavigation>,
}

/// A completed report form submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegretReport {
    pub report_data: Value,
    pub user_supplied_regret_categories: Vec<String>,
    pub user_supplied_other_regret_category: String,
    pub user_supplied_severity: Option<u8>,
    pub user_supplied_optional_comment: String,
    pub form_step: u32,
}

/// Picks the most recently started watch page and walks its referrer chain
/// for at most `parent_chain_length` predecessors.
pub(crate) fn regret_report_data(
    navigations: &BTreeMap<String, YouTubeNavigation>,
    parent_chain_length: usize,
) -> RegretReportData {
    let Some(reported) = navigations
        .values()
        .filter(|navigation| navigation.is_watch_page())
        .max_by(|a, b| {
            a.navigation_started_at
                .cmp(&b.navigation_started_at)
                .then_with(|| a.navigation_uuid.cmp(&b.navigation_uuid))
        })
    else {
        return RegretReportData::default();
    };

    let mut chain = vec![reported.clone()];
    let mut visited = HashSet::from([reported.navigation_uuid.as_str()]);
    let mut parent_uuid = reported.parent_navigation_uuid.as_deref();

    while chain.len() <= parent_chain_length {
        let Some(parent) = parent_uuid.and_then(|uuid| navigations.get(uuid)) else {
            break;
        };
        if !visited.insert(parent.navigation_uuid.as_str()) {
            break;
        }
        chain.push(parent.clone());
        parent_uuid = parent.parent_navigation_uuid.as_deref();
    }

    RegretReportData {
        reported_navigation_uuid: Some(reported.navigation_uuid.clone()),
        how_the_video_was_reached: Some(reported.reach_type),
        navigations: chain,
    }
}
