use std::path::PathBuf;
use std::time::Duration;

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "config";

use crate::log_warn;

/// Tunables for navigation batch grouping and completion.
#[derive(Debug, Clone)]
pub struct PreprocessorConfig {
    /// How often the periodic drain runs `process_queue`.
    pub drain_interval: Duration,

    /// A batch with no new events for this long is considered complete.
    pub quiescence_window: Duration,

    /// After a terminal navigation event, late events are still merged for
    /// this long (measured from the latest event) before the batch closes.
    pub grace_period: Duration,

    /// Intake queue bound. The oldest queued event is dropped when full.
    pub max_intake_backlog: usize,

    /// Retention bound for trimmed batches. Oldest trimmed batches are evicted.
    pub max_retained_batches: usize,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(1),
            quiescence_window: Duration::from_secs(30),
            grace_period: Duration::from_secs(5),
            max_intake_backlog: 10_000,
            max_retained_batches: 2_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub preprocessor: PreprocessorConfig,

    /// Granularity of active tab dwell time accounting.
    pub dwell_tick_interval: Duration,

    /// Period between usage statistics submissions.
    pub usage_statistics_interval: Duration,

    /// Period between outbox retry attempts.
    pub share_retry_interval: Duration,

    /// Maximum number of predecessor navigations attached to a regret report.
    pub parent_chain_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preprocessor: PreprocessorConfig::default(),
            dwell_tick_interval: Duration::from_millis(250),
            usage_statistics_interval: Duration::from_secs(24 * 60 * 60),
            share_retry_interval: Duration::from_secs(5 * 60),
            parent_chain_length: 5,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `REGRETS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let debug_mode = lookup("REGRETS_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            config.usage_statistics_interval = Duration::from_secs(60);
        }

        let millis = |key: &str| parse_number(&lookup, key).map(Duration::from_millis);
        let secs = |key: &str| parse_number(&lookup, key).map(Duration::from_secs);
        let count = |key: &str| parse_number(&lookup, key).map(|value| value as usize);

        if let Some(value) = millis("REGRETS_DRAIN_INTERVAL_MS") {
            config.preprocessor.drain_interval = value;
        }
        if let Some(value) = millis("REGRETS_QUIESCENCE_WINDOW_MS") {
            config.preprocessor.quiescence_window = value;
        }
        if let Some(value) = millis("REGRETS_GRACE_PERIOD_MS") {
            config.preprocessor.grace_period = value;
        }
        if let Some(value) = count("REGRETS_MAX_INTAKE_BACKLOG") {
            config.preprocessor.max_intake_backlog = value.max(1);
        }
        if let Some(value) = count("REGRETS_MAX_RETAINED_BATCHES") {
            config.preprocessor.max_retained_batches = value.max(1);
        }
        if let Some(value) = millis("REGRETS_DWELL_TICK_MS") {
            config.dwell_tick_interval = value;
        }
        if let Some(value) = secs("REGRETS_USAGE_STATISTICS_INTERVAL_SECS") {
            config.usage_statistics_interval = value;
        }
        if let Some(value) = secs("REGRETS_SHARE_RETRY_INTERVAL_SECS") {
            config.share_retry_interval = value;
        }
        if let Some(value) = count("REGRETS_PARENT_CHAIN_LENGTH") {
            config.parent_chain_length = value;
        }

        config
    }
}

const DEFAULT_DATA_DIR: &str = "regrets-reporter-data";

/// Directory holding the storage database, outbound log and exports.
pub fn data_dir_from_env() -> PathBuf {
    std::env::var_os("REGRETS_REPORTER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn parse_number<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            log_warn!("ignoring {key}={raw:?}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> PipelineConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.preprocessor.quiescence_window, Duration::from_secs(30));
        assert_eq!(config.preprocessor.grace_period, Duration::from_secs(5));
        assert_eq!(config.parent_chain_length, 5);
        assert_eq!(config.usage_statistics_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("REGRETS_QUIESCENCE_WINDOW_MS", "1500"),
            ("REGRETS_MAX_INTAKE_BACKLOG", "10"),
            ("REGRETS_PARENT_CHAIN_LENGTH", "2"),
        ]);
        assert_eq!(config.preprocessor.quiescence_window, Duration::from_millis(1500));
        assert_eq!(config.preprocessor.max_intake_backlog, 10);
        assert_eq!(config.parent_chain_length, 2);
    }

    #[test]
    fn unparsable_values_are_ignored() {
        let config = config_from(&[("REGRETS_GRACE_PERIOD_MS", "soon")]);
        assert_eq!(config.preprocessor.grace_period, Duration::from_secs(5));
    }

    #[test]
    fn debug_mode_shortens_statistics_interval() {
        let config = config_from(&[("REGRETS_DEBUG", "TRUE")]);
        assert_eq!(config.usage_statistics_interval, Duration::from_secs(60));
    }
}
