//! Settings for queues, pipelines and the supervisor
//!
//! These are plain serde types so they can live in a config file or be
//! built in code. Durations are stored as milliseconds and exposed through
//! `Duration` accessors that apply the clamps the runtime relies on.
//!
//! # Main Types
//!
//! - [`GuardSettings`] - Backpressure policy for a queue
//! - [`QueueSettings`] - Hard capacity, guard and retrieval delay
//! - [`RatSettings`] - Per-pipeline mode, initial state and stop behaviour
//! - [`SupervisorSettings`] - Flow identity and control-plane tick

use crate::rats::guard::{EnqueueGuard, MaxSize, PassThrough};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default tick for pause and stop polling (must stay at or below 200ms)
pub const DEFAULT_TICK_MS: u64 = 100;

/// Default number of items a pipeline queue holds before the receiver blocks
pub const DEFAULT_QUEUE_LIMIT: i64 = 1024;

/// Default time to wait for pipeline threads on stop
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Default interval between "still waiting" warnings on stop
pub const DEFAULT_STOP_WARNING_INTERVAL_MS: u64 = 1_000;

fn clamp_ms(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}

/// Backpressure policy applied on admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardSettings {
    /// Admit unconditionally
    PassThrough,
    /// Block while the queue holds `limit` items; `limit <= 0` is unlimited
    MaxSize { limit: i64, poll_interval_ms: u64 },
}

impl Default for GuardSettings {
    fn default() -> Self {
        GuardSettings::MaxSize {
            limit: DEFAULT_QUEUE_LIMIT,
            poll_interval_ms: MaxSize::DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl GuardSettings {
    pub fn build(&self) -> Box<dyn EnqueueGuard> {
        match *self {
            GuardSettings::PassThrough => Box::new(PassThrough),
            GuardSettings::MaxSize {
                limit,
                poll_interval_ms,
            } => Box::new(MaxSize::new(limit, poll_interval_ms)),
        }
    }
}

/// Settings for one queue bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Hard bound enforced regardless of the guard; `None` is unbounded
    pub capacity: Option<usize>,

    /// Admission policy
    pub guard: GuardSettings,

    /// Delay before an admitted item becomes retrievable
    pub retrieval_delay_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: None,
            guard: GuardSettings::default(),
            retrieval_delay_ms: 0,
        }
    }
}

impl QueueSettings {
    pub fn retrieval_delay(&self) -> Duration {
        Duration::from_millis(self.retrieval_delay_ms)
    }
}

/// How a pipeline is driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatMode {
    /// Started with the flow; may be paused
    #[default]
    Continuous,
    /// Only started on request; cannot be paused
    Manual,
}

/// State a continuous pipeline enters when the flow starts it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialState {
    #[default]
    Running,
    Paused,
}

/// Settings for one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatSettings {
    pub mode: RatMode,

    pub initial_state: InitialState,

    /// Listed in control surfaces
    pub show_in_control: bool,

    /// Whether the supervisor may stop it on request
    pub stoppable: bool,

    /// Stop the pipeline on the first receive/transmit failure instead of
    /// logging and carrying on
    pub stop_on_error: bool,

    /// The internal queue between receiver and transmitter
    pub queue: QueueSettings,

    /// Pause and stop polling tick
    pub tick_ms: u64,

    /// How long `stop` waits for the threads before declaring a leak
    pub stop_timeout_ms: u64,

    /// Interval between "still waiting" warnings while stopping
    pub stop_warning_interval_ms: u64,
}

impl Default for RatSettings {
    fn default() -> Self {
        Self {
            mode: RatMode::Continuous,
            initial_state: InitialState::Running,
            show_in_control: true,
            stoppable: true,
            stop_on_error: false,
            queue: QueueSettings::default(),
            tick_ms: DEFAULT_TICK_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            stop_warning_interval_ms: DEFAULT_STOP_WARNING_INTERVAL_MS,
        }
    }
}

impl RatSettings {
    pub fn manual() -> Self {
        Self {
            mode: RatMode::Manual,
            ..Self::default()
        }
    }

    pub fn tick(&self) -> Duration {
        clamp_ms(self.tick_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_warning_interval(&self) -> Duration {
        clamp_ms(self.stop_warning_interval_ms)
    }
}

/// Settings for the pipeline supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Identifier reported in the status table's `id` column
    pub flow_id: String,

    /// Poll tick of the control server
    pub tick_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            flow_id: "flow".to_string(),
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

impl SupervisorSettings {
    pub fn tick(&self) -> Duration {
        clamp_ms(self.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rat_settings_defaults() {
        let settings = RatSettings::default();
        assert_eq!(settings.mode, RatMode::Continuous);
        assert!(settings.stoppable);
        assert!(settings.tick() <= Duration::from_millis(200));
    }

    #[test]
    fn test_zero_ticks_are_clamped() {
        let settings = RatSettings {
            tick_ms: 0,
            stop_warning_interval_ms: 0,
            ..RatSettings::default()
        };
        assert_eq!(settings.tick(), Duration::from_millis(1));
        assert_eq!(settings.stop_warning_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_guard_settings_build() {
        let guard = GuardSettings::MaxSize {
            limit: 2,
            poll_interval_ms: 10,
        }
        .build();
        assert_eq!(guard.name(), "max-size");
        assert_eq!(GuardSettings::PassThrough.build().name(), "pass-through");
    }

    #[test]
    fn test_guard_settings_tagged_json() {
        let json = r#"{"type": "max_size", "limit": 4, "poll_interval_ms": 25}"#;
        let guard: GuardSettings = serde_json::from_str(json).unwrap();
        assert_eq!(
            guard,
            GuardSettings::MaxSize {
                limit: 4,
                poll_interval_ms: 25
            }
        );
    }

    #[test]
    fn test_partial_rat_settings_toml() {
        let settings: RatSettings = toml::from_str("mode = \"manual\"\nstoppable = false\n").unwrap();
        assert_eq!(settings.mode, RatMode::Manual);
        assert!(!settings.stoppable);
        assert_eq!(settings.tick_ms, DEFAULT_TICK_MS);
    }
}
