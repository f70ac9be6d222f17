//! Navigation batching, regret report summarization and consent-gated data
//! sharing for YouTube browsing activity.

pub mod config;
pub mod glue;
pub mod host;
pub mod instrumentation;
pub mod preprocessor;
pub mod sharing;
pub mod store;
pub mod summarizer;
pub mod usage_statistics;
pub mod utils;

pub use config::{PipelineConfig, PreprocessorConfig};
pub use glue::{ExtensionGlue, GlueState};

/// Entry point of the `regrets-reporter` binary.
pub fn run() -> anyhow::Result<()> {
    // Reads RUST_LOG, defaulting to info
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("regrets reporter starting up...");

    host::run()
}
