//! Module subsystem configuration.

/// Environment variable that turns on module assertions.
pub const ASSERTIONS_ENV: &str = "NEOVM_MODULE_ASSERTIONS";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Treat tolerated contract violations (double error-set, dangling
    /// handles, freeing an absent global reference) as fatal.
    pub assertions: bool,
}

impl ModuleConfig {
    pub fn from_env() -> Self {
        let assertions = std::env::var(ASSERTIONS_ENV)
            .map(|value| env_switch_enabled(&value))
            .unwrap_or(false);
        Self { assertions }
    }

    pub fn with_assertions(mut self, assertions: bool) -> Self {
        self.assertions = assertions;
        self
    }
}

fn env_switch_enabled(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_switch_values() {
        for on in ["1", "true", " YES ", "On"] {
            assert!(env_switch_enabled(on), "{on:?} should enable");
        }
        for off in ["", "0", "off", "no", "enabled"] {
            assert!(!env_switch_enabled(off), "{off:?} should not enable");
        }
    }

    #[test]
    fn default_has_assertions_off() {
        assert!(!ModuleConfig::default().assertions);
        assert!(ModuleConfig::default().with_assertions(true).assertions);
    }
}
