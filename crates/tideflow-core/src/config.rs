//! Engine configuration, resolved once at construction.

use std::time::Duration;

const DEFAULT_TIMER_POLL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Global step ceiling per process. A blueprint's
    /// `parameters.max_step_number` takes precedence.
    pub max_step_number: Option<i64>,
    /// How often the worker polls for due timers and queued messages.
    pub timer_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_number: None,
            timer_poll_interval: Duration::from_millis(DEFAULT_TIMER_POLL_MS),
        }
    }
}

impl EngineConfig {
    /// Read `MAX_STEP_NUMBER` and `TIDEFLOW_TIMER_POLL_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let max_step_number = lookup("MAX_STEP_NUMBER").and_then(|v| {
            let parsed = v.trim().parse::<i64>().ok();
            if parsed.is_none() {
                tracing::warn!("Ignoring invalid MAX_STEP_NUMBER '{}'", v);
            }
            parsed
        });
        let timer_poll_interval = lookup("TIDEFLOW_TIMER_POLL_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.timer_poll_interval);
        Self {
            max_step_number,
            timer_poll_interval,
        }
    }

    pub fn with_max_step_number(mut self, max_step_number: i64) -> Self {
        self.max_step_number = Some(max_step_number);
        self
    }
}
