//! Typed access to the persisted extension state.
//!
//! The host owns the actual key-value substrate (`StorageArea`); this module
//! only knows which keys the core reads and writes and how to default them.

mod migrations;
pub mod models;
pub mod sqlite;
pub mod storage_area;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub use models::{ConsentStatus, ExtensionPreferences, UserSuppliedDemographics};
pub use sqlite::SqliteStorageArea;
pub use storage_area::{MemoryStorageArea, StorageArea, StorageItems};

pub const CONSENT_STATUS_KEY: &str = "consentStatus";
pub const CONSENT_STATUS_TIMESTAMP_KEY: &str = "consentStatusTimestamp";
pub const EXTENSION_INSTALLATION_UUID_KEY: &str = "extensionInstallationUuid";
pub const EXTENSION_PREFERENCES_KEY: &str = "extensionPreferences";
pub const USER_SUPPLIED_DEMOGRAPHICS_KEY: &str = "userSuppliedDemographics";
/// Prefix of the shared-data history entries, stored as `sharedData/<index>`.
pub const SHARED_DATA_KEY: &str = "sharedData";
pub const SHARED_DATA_LENGTH_KEY: &str = "sharedDataLength";
pub const PENDING_SHARED_DATA_KEY: &str = "pendingSharedData";
pub const USAGE_STATISTICS_KEY: &str = "youTubeUsageStatistics";

#[derive(Clone)]
pub struct Store {
    area: Arc<dyn StorageArea>,
    installation_uuid: Arc<OnceCell<String>>,
}

impl Store {
    pub fn new(area: Arc<dyn StorageArea>) -> Self {
        Self {
            area,
            installation_uuid: Arc::new(OnceCell::new()),
        }
    }

    /// Reads and decodes one key. Absent and `null` values are both `None`.
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut items = self.area.get(&[key]).await?;
        match items.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .with_context(|| format!("failed to decode stored {key}")),
        }
    }

    pub async fn set_value<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut items = StorageItems::new();
        items.insert(
            key.to_string(),
            serde_json::to_value(value).with_context(|| format!("failed to encode {key}"))?,
        );
        self.area.set(items).await
    }

    pub async fn shared_data_len(&self) -> Result<u64> {
        Ok(self.get_value(SHARED_DATA_LENGTH_KEY).await?.unwrap_or(0))
    }

    /// Appends one history entry. `also` is written in the same `set`, so
    /// the entry and any bookkeeping that goes with it land together.
    pub async fn append_shared_data<T: Serialize>(&self, entry: &T, also: StorageItems) -> Result<()> {
        let length = self.shared_data_len().await?;
        let mut items = also;
        items.insert(
            shared_data_entry_key(length),
            serde_json::to_value(entry).context("failed to encode shared data entry")?,
        );
        items.insert(SHARED_DATA_LENGTH_KEY.into(), Value::from(length + 1));
        self.area.set(items).await
    }

    /// The whole history, oldest first.
    pub async fn shared_data<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let length = self.shared_data_len().await?;
        let keys: Vec<String> = (0..length).map(shared_data_entry_key).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let mut items = self.area.get(&key_refs).await?;

        keys.iter()
            .map(|key| {
                let value = items
                    .remove(key)
                    .with_context(|| format!("shared data entry {key} is missing"))?;
                serde_json::from_value(value)
                    .with_context(|| format!("failed to decode stored {key}"))
            })
            .collect()
    }

    pub async fn get_consent_status(&self) -> Result<ConsentStatus> {
        Ok(self
            .get_value::<ConsentStatus>(CONSENT_STATUS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn get_consent_status_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_value(CONSENT_STATUS_TIMESTAMP_KEY).await
    }

    /// Persists the status together with the moment it changed.
    pub async fn set_consent_status(&self, status: ConsentStatus) -> Result<()> {
        let mut items = StorageItems::new();
        items.insert(CONSENT_STATUS_KEY.into(), serde_json::to_value(status)?);
        items.insert(
            CONSENT_STATUS_TIMESTAMP_KEY.into(),
            serde_json::to_value(Utc::now())?,
        );
        self.area.set(items).await
    }

    /// Persistent identifier of this installation, sent with every data point.
    /// Generated and stored on first use.
    pub async fn extension_installation_uuid(&self) -> Result<String> {
        self.installation_uuid
            .get_or_try_init(|| async {
                if let Some(existing) = self
                    .get_value::<String>(EXTENSION_INSTALLATION_UUID_KEY)
                    .await?
                {
                    return Ok(existing);
                }
                let generated = Uuid::new_v4().to_string();
                self.set_value(EXTENSION_INSTALLATION_UUID_KEY, &generated)
                    .await?;
                Ok::<String, anyhow::Error>(generated)
            })
            .await
            .cloned()
    }

    pub async fn get_extension_preferences(&self) -> Result<ExtensionPreferences> {
        Ok(self
            .get_value(EXTENSION_PREFERENCES_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn set_extension_preferences(&self, preferences: &ExtensionPreferences) -> Result<()> {
        self.set_value(EXTENSION_PREFERENCES_KEY, preferences).await
    }

    pub async fn get_user_supplied_demographics(&self) -> Result<UserSuppliedDemographics> {
        Ok(self
            .get_value(USER_SUPPLIED_DEMOGRAPHICS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn set_user_supplied_demographics(
        &self,
        demographics: &UserSuppliedDemographics,
    ) -> Result<()> {
        self.set_value(USER_SUPPLIED_DEMOGRAPHICS_KEY, demographics)
            .await
    }
}

fn shared_data_entry_key(index: u64) -> String {
    format!("{SHARED_DATA_KEY}/{index}")
}
