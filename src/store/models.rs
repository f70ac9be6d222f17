use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Persisted data sharing consent. `Unset` is stored and sent as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsentStatus {
    #[default]
    Unset,
    Given,
    Withdrawn,
}

impl ConsentStatus {
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            ConsentStatus::Unset => None,
            ConsentStatus::Given => Some("given"),
            ConsentStatus::Withdrawn => Some("withdrawn"),
        }
    }

    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value {
            None => Ok(ConsentStatus::Unset),
            Some("given") => Ok(ConsentStatus::Given),
            Some("withdrawn") => Ok(ConsentStatus::Withdrawn),
            Some(other) => bail!("unknown consent status '{other}'"),
        }
    }

    pub fn is_given(&self) -> bool {
        *self == ConsentStatus::Given
    }
}

impl Serialize for ConsentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConsentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        ConsentStatus::parse(raw.as_deref()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionPreferences {
    pub enable_error_reporting: bool,
}

impl Default for ExtensionPreferences {
    fn default() -> Self {
        Self {
            enable_error_reporting: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct UserSuppliedDemographics {
    pub user_over_18: Option<String>,
    pub user_part_of_marginalized_group: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn consent_status_uses_null_for_unset() {
        assert_eq!(serde_json::to_value(ConsentStatus::Unset).unwrap(), json!(null));
        assert_eq!(serde_json::to_value(ConsentStatus::Given).unwrap(), json!("given"));
        let parsed: ConsentStatus = serde_json::from_value(json!("withdrawn")).unwrap();
        assert_eq!(parsed, ConsentStatus::Withdrawn);
        assert!(serde_json::from_value::<ConsentStatus>(json!("maybe")).is_err());
    }

    #[test]
    fn preferences_merge_over_defaults() {
        let prefs: ExtensionPreferences = serde_json::from_value(json!({})).unwrap();
        assert!(prefs.enable_error_reporting);
        let prefs: ExtensionPreferences =
            serde_json::from_value(json!({"enableErrorReporting": false, "legacy": 1})).unwrap();
        assert!(!prefs.enable_error_reporting);
    }
}
