use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const ENABLE_LOGS: bool = true;
const LOG_PREFIX: &str = "periodic";

use crate::log_debug;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A spawned loop that runs `tick` on a fixed period until stopped.
///
/// Ticks never overlap: the next tick is only taken after the previous
/// `tick` future resolves, and missed ticks are delayed rather than bunched.
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl PeriodicTask {
    /// Spawns the loop on the current tokio runtime. The first tick fires one
    /// full `period` after spawning.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tick().await;
                    }
                    _ = token_clone.cancelled() => {
                        log_debug!("{name} loop shutting down");
                        break;
                    }
                }
            }
        });

        log_debug!("{name} loop started with period {period:?}");

        Self {
            name,
            handle,
            cancel_token,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the loop to exit. Does not wait for an in-flight tick.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
