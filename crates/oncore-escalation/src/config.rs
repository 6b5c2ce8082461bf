//! Escalation timing configuration.

use serde::{Deserialize, Serialize};

/// Escalation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Delay between two escalation steps when a step computes no ETA of
    /// its own.
    #[serde(default = "default_next_step_delay")]
    pub next_step_delay_seconds: u64,
    /// Delay before the first step of a fresh escalation fires, so the
    /// alert group can settle (e.g. absorb near-simultaneous duplicates).
    #[serde(default = "default_start_delay")]
    pub start_escalation_delay_seconds: u64,
    /// Wait-step duration used when the step has no explicit delay.
    #[serde(default = "default_wait_delay")]
    pub default_wait_delay_seconds: u64,
    /// Maximum number of times a repeat step restarts the chain.
    #[serde(default = "default_max_repeats")]
    pub max_escalation_repeats: u32,
}

fn default_next_step_delay() -> u64 {
    5
}

fn default_start_delay() -> u64 {
    1
}

fn default_wait_delay() -> u64 {
    300 // 5 minutes
}

fn default_max_repeats() -> u32 {
    5
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            next_step_delay_seconds: default_next_step_delay(),
            start_escalation_delay_seconds: default_start_delay(),
            default_wait_delay_seconds: default_wait_delay(),
            max_escalation_repeats: default_max_repeats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EscalationConfig::default();
        assert_eq!(config.next_step_delay_seconds, 5);
        assert_eq!(config.start_escalation_delay_seconds, 1);
        assert_eq!(config.default_wait_delay_seconds, 300);
        assert_eq!(config.max_escalation_repeats, 5);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: EscalationConfig =
            serde_json::from_str(r#"{"default_wait_delay_seconds": 60}"#).unwrap();
        assert_eq!(config.default_wait_delay_seconds, 60);
        assert_eq!(config.next_step_delay_seconds, 5);
    }
}
