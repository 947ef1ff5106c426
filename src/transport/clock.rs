//! Time source for the tunnel driver.

use std::fmt::Debug;
use std::time::Instant;

/// Source of `now` for the connection engine.
pub trait Clock: Debug + Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Clock that follows tokio's timer, including paused test time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}
