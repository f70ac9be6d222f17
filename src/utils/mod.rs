pub mod logging;
pub mod periodic;
pub mod sync;

pub use periodic::PeriodicTask;
pub use sync::lock_or_recover;
