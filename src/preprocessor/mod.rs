//! Grouping of raw instrumentation events into per-navigation batches.

mod batch;
mod dwell_time;
mod processor;

pub use batch::{
    EventCounts, NavigationBatch, NavigationBatchTrimmer, RetainedBatch, TrimmedHttpExchange,
    TrimmedNavigationBatch,
};
pub use dwell_time::ActiveTabDwellTimeMonitor;
pub use processor::{NavigationBatchPreprocessor, PreprocessorStats};
