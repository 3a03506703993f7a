//! Cooperative stop flag shared across threads.
//!
//! A `StopToken` is a cheap handle onto an atomic flag with an optional
//! parent. Stopping a token stops every token derived from it, which is how
//! a stop on a container reaches all of its children, and how a supervisor
//! stop reaches both threads of a pipeline.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll tick used by every wait loop that must observe a stop.
pub const DEFAULT_STOP_TICK: Duration = Duration::from_millis(100);

struct StopState {
    stopped: AtomicBool,
    parent: Option<Arc<StopState>>,
}

impl StopState {
    fn is_stopped(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.is_stopped(),
            None => false,
        }
    }
}

/// Hierarchical cooperative stop token.
#[derive(Clone)]
pub struct StopToken {
    state: Arc<StopState>,
}

impl fmt::Debug for StopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

impl StopToken {
    /// A root token with no parent.
    pub fn new() -> Self {
        Self {
            state: Arc::new(StopState {
                stopped: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// A token that is stopped when either it or `self` is stopped.
    pub fn child(&self) -> Self {
        Self {
            state: Arc::new(StopState {
                stopped: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.state)),
            }),
        }
    }

    /// Request a stop. Safe to call from any thread, any number of times.
    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::Release);
    }

    /// True if this token or any ancestor was stopped.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Sleep for `total`, waking every `tick` to check the flag.
    ///
    /// Returns `false` if the sleep was cut short by a stop.
    pub fn sleep(&self, total: Duration, tick: Duration) -> bool {
        let tick = tick.max(Duration::from_millis(1));
        let deadline = Instant::now() + total;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(tick.min(deadline - now));
        }
    }
}
