// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime limits.

/// Knobs shared by `EventLoop` and `Runtime`.
///
/// Both limits default to unbounded. With `unwrap_limit` unset, a thenable
/// that keeps resolving with fresh thenables never terminates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Max tasks a single `EventLoop::run_until_idle` call may run.
    pub turn_limit: Option<usize>,
    /// Max candidates one resolution may unwrap before rejecting.
    pub unwrap_limit: Option<usize>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turn_limit(mut self, turns: usize) -> Self {
        self.turn_limit = Some(turns);
        self
    }

    pub fn with_unwrap_limit(mut self, steps: usize) -> Self {
        self.unwrap_limit = Some(steps);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded() {
        let config = Config::new();
        assert_eq!(config.turn_limit, None);
        assert_eq!(config.unwrap_limit, None);
    }

    #[test]
    fn builder_sets_limits() {
        let config = Config::new().with_turn_limit(64).with_unwrap_limit(8);
        assert_eq!(config.turn_limit, Some(64));
        assert_eq!(config.unwrap_limit, Some(8));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"turn_limit": 10}"#).unwrap();
        assert_eq!(config, Config::new().with_turn_limit(10));
    }
}
