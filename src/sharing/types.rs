use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{ConsentStatus, UserSuppliedDemographics};
use crate::summarizer::RegretReport;
use crate::usage_statistics::UsageStatisticsSnapshot;

/// Outbound category. Points are transmitted in order within a category;
/// categories are independent of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPointKind {
    RegretReport,
    YoutubeUsageStatisticsUpdate,
    ConsentStatusUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsentStatusUpdate {
    pub consent_status: ConsentStatus,
    pub consent_status_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_supplied_demographics: UserSuppliedDemographics,
}

/// Payload tagged with its schema discriminator, e.g.
/// `{"regret_report": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DataPointPayload {
    RegretReport(RegretReport),
    YoutubeUsageStatisticsUpdate(UsageStatisticsSnapshot),
    ConsentStatusUpdate(ConsentStatusUpdate),
}

impl DataPointPayload {
    pub fn kind(&self) -> DataPointKind {
        match self {
            DataPointPayload::RegretReport(_) => DataPointKind::RegretReport,
            DataPointPayload::YoutubeUsageStatisticsUpdate(_) => {
                DataPointKind::YoutubeUsageStatisticsUpdate
            }
            DataPointPayload::ConsentStatusUpdate(_) => DataPointKind::ConsentStatusUpdate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    pub event_uuid: String,
    pub client_timestamp: DateTime<Utc>,
    pub extension_installation_uuid: String,
    pub extension_version: String,
    pub amount_of_regret_reports_since_consent_was_given: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedDataPoint {
    pub event_metadata: EventMetadata,
    pub data: DataPointPayload,
}

impl SharedDataPoint {
    pub fn kind(&self) -> DataPointKind {
        self.data.kind()
    }
}

/// Regret reports shared since consent was last given. Reset whenever the
/// consent timestamp moves.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegretReportTally {
    pub consent_given_at: Option<DateTime<Utc>>,
    pub count: u64,
}

/// Everything this installation has shared, for on-device download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedDataExport {
    pub extension_installation_uuid: String,
    pub exported_at: DateTime<Utc>,
    pub shared_data: Vec<SharedDataPoint>,
}

pub fn export_file_name(extension_installation_uuid: &str) -> String {
    format!("youTubeRegretsReporter-sharedData-userUuid={extension_installation_uuid}.json")
}
