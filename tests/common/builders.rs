//! Test data builders for creating pipelines

use ratflow::config::{GuardSettings, RatMode, RatSettings};
use ratflow::rats::inputs::{ListInput, Ticker};
use ratflow::rats::outputs::{CollectOutput, Collected, Discard};
use ratflow::{Payload, Rat};
use std::time::Duration;

/// Builder for test pipelines with a short tick and a collecting output
pub struct RatBuilder {
    name: String,
    items: Option<Vec<Payload>>,
    settings: RatSettings,
    delay: Duration,
}

impl RatBuilder {
    /// A pipeline fed by an endless 5ms ticker
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            items: None,
            settings: RatSettings {
                tick_ms: 10,
                ..RatSettings::default()
            },
            delay: Duration::ZERO,
        }
    }

    /// Feed the pipeline from a fixed list instead of the ticker
    pub fn items(mut self, items: impl IntoIterator<Item = i64>) -> Self {
        self.items = Some(items.into_iter().map(Payload::Int).collect());
        self
    }

    pub fn manual(mut self) -> Self {
        self.settings.mode = RatMode::Manual;
        self
    }

    pub fn not_stoppable(mut self) -> Self {
        self.settings.stoppable = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.settings.show_in_control = false;
        self
    }

    pub fn queue_limit(mut self, limit: i64, poll_interval_ms: u64) -> Self {
        self.settings.queue.guard = GuardSettings::MaxSize {
            limit,
            poll_interval_ms,
        };
        self
    }

    /// Hard bound on the pipeline's queue, independent of the guard
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.settings.queue.capacity = Some(capacity);
        self
    }

    /// Slow the output down by `delay` per item
    pub fn output_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn build(self) -> (Rat, Collected) {
        let mut output = CollectOutput::new("collect");
        if !self.delay.is_zero() {
            output = output.with_delay(self.delay);
        }
        let collected = output.handle();
        let rat = match self.items {
            Some(items) => Rat::new(self.name, ListInput::new("list", items), output),
            None => Rat::new(self.name, Ticker::new("tick", Duration::from_millis(5)), output),
        };
        (rat.with_settings(self.settings), collected)
    }

    /// Same pipeline with its output discarded
    pub fn build_discarding(self) -> Rat {
        let rat = match self.items {
            Some(items) => Rat::new(self.name, ListInput::new("list", items), Discard::new()),
            None => Rat::new(
                self.name,
                Ticker::new("tick", Duration::from_millis(5)),
                Discard::new(),
            ),
        };
        rat.with_settings(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rat_builder() {
        let (rat, collected) = RatBuilder::new("test").items([1, 2]).manual().build();

        assert_eq!(rat.name(), "test");
        assert!(rat.is_manual());
        assert_eq!(rat.settings().tick_ms, 10);
        assert!(collected.lock().unwrap().is_empty());
    }
}
