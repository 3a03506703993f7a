//! Enqueue guards: backpressure policies applied on admission to a queue bridge.

use crate::error::{FlowError, Result};
use crate::flow::stop::StopToken;
use crate::flow::token::Token;
use crate::rats::queue::QueueBridge;
use std::fmt;
use std::time::Duration;

/// A backpressure policy evaluated before an item is placed on a queue.
pub trait EnqueueGuard: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Admit `token` into `queue`, possibly waiting for space. Must return
    /// `FlowError::Stopped` rather than admit once `stop` is observed.
    fn enqueue(
        &self,
        queue: &QueueBridge,
        token: Token,
        delay: Duration,
        stop: &StopToken,
    ) -> Result<()>;
}

/// Admits unconditionally. Only the queue's hard capacity, if any, applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl EnqueueGuard for PassThrough {
    fn name(&self) -> &'static str {
        "pass-through"
    }

    fn enqueue(
        &self,
        queue: &QueueBridge,
        token: Token,
        delay: Duration,
        _stop: &StopToken,
    ) -> Result<()> {
        queue.push(token, delay)
    }
}

/// Blocks the enqueuing thread while the queue holds `limit` items.
#[derive(Debug, Clone, Copy)]
pub struct MaxSize {
    limit: Option<usize>,
    poll_interval: Duration,
}

impl MaxSize {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

    /// `limit <= 0` disables the bound. The poll interval is clamped to at
    /// least one millisecond.
    pub fn new(limit: i64, poll_interval_ms: u64) -> Self {
        Self {
            limit: usize::try_from(limit).ok().filter(|&l| l > 0),
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl EnqueueGuard for MaxSize {
    fn name(&self) -> &'static str {
        "max-size"
    }

    fn enqueue(
        &self,
        queue: &QueueBridge,
        token: Token,
        delay: Duration,
        stop: &StopToken,
    ) -> Result<()> {
        let Some(limit) = self.limit else {
            return queue.push(token, delay);
        };

        let mut pending = token;
        let mut waited = false;
        loop {
            if stop.is_stopped() {
                return Err(FlowError::Stopped);
            }
            match queue.try_admit(pending, delay, Some(limit)) {
                Ok(()) => return Ok(()),
                Err(rejected) => pending = rejected,
            }
            if !waited {
                tracing::debug!(queue = %queue.name(), limit, "Queue full, waiting for space");
                waited = true;
            }
            queue.wait_for_space(limit, self.poll_interval);
        }
    }
}
