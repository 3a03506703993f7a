//! Contracts for the two ends of a pipeline.
//!
//! Both ends run on their own thread and receive the pipeline's stop token
//! on every blocking call. Any internal wait must check it at least once
//! per tick.

use crate::error::Result;
use crate::flow::stop::StopToken;
use crate::flow::token::{PayloadType, Token};
use std::time::Duration;

/// Produces tokens on the receiver thread.
pub trait RatReceiver: Send {
    fn name(&self) -> &str;

    /// Type of every token this receiver emits.
    fn produces(&self) -> PayloadType;

    /// One-time configuration check, on registration.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reset per-run state; called on every start.
    fn init_reception(&mut self) -> Result<()> {
        Ok(())
    }

    /// Fetch the next batch of data into the pending outputs. May block,
    /// but must return `FlowError::Stopped` (or `Ok`) soon after `stop`.
    fn receive(&mut self, stop: &StopToken) -> Result<()>;

    fn has_pending_output(&self) -> bool;

    fn output(&mut self) -> Option<Token>;

    /// Wait between `receive` calls for polling receivers.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// True once a finite receiver has nothing more to deliver.
    fn is_exhausted(&self) -> bool {
        false
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn is_interactive(&self) -> bool {
        false
    }

    fn wrap_up(&mut self) {}
}

/// Consumes tokens on the transmitter thread.
pub trait RatTransmitter: Send {
    fn name(&self) -> &str;

    fn accepts(&self) -> &'static [PayloadType];

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn init_transmission(&mut self) -> Result<()> {
        Ok(())
    }

    /// False while the destination cannot take data; the transmitter thread
    /// backs off one tick at a time.
    fn can_input(&self) -> bool {
        true
    }

    fn transmit(&mut self, token: Token, stop: &StopToken) -> Result<()>;

    fn supports_pause(&self) -> bool {
        true
    }

    fn is_interactive(&self) -> bool {
        false
    }

    fn wrap_up(&mut self) {}
}
