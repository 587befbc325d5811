//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the client can start with zero
//! configuration.

use std::time::Duration;

use shopfloor_shared::constants::{DEFAULT_MAX_MESSAGE_LEN, DEFAULT_TYPING_TTL_MS};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long a typing indicator stays visible without a refresh.
    /// Env: `SHOPFLOOR_TYPING_TTL_MS`
    /// Default: 5000 ms
    pub typing_ttl: Duration,

    /// Maximum message length in characters.
    /// Env: `SHOPFLOOR_MAX_MESSAGE_LEN`
    /// Default: `4000`
    pub max_message_len: usize,

    /// Record every store change in a journal for later replay.
    /// Env: `SHOPFLOOR_JOURNAL` (true/false)
    /// Default: `false`
    pub journal: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::from_millis(DEFAULT_TYPING_TTL_MS),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            journal: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("SHOPFLOOR_TYPING_TTL_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.typing_ttl = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid SHOPFLOOR_TYPING_TTL_MS, using default"),
            }
        }

        if let Some(val) = lookup("SHOPFLOOR_MAX_MESSAGE_LEN") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_message_len = n,
                _ => tracing::warn!(value = %val, "Invalid SHOPFLOOR_MAX_MESSAGE_LEN, using default"),
            }
        }

        if let Some(val) = lookup("SHOPFLOOR_JOURNAL") {
            config.journal = val != "false" && val != "0";
        }

        config
    }

    /// Typing TTL as a chrono duration, for the entity store.
    pub fn typing_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.typing_ttl)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(DEFAULT_TYPING_TTL_MS as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.typing_ttl, Duration::from_millis(5_000));
        assert_eq!(config.max_message_len, 4_000);
        assert!(!config.journal);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SHOPFLOOR_TYPING_TTL_MS", "1500"),
            ("SHOPFLOOR_MAX_MESSAGE_LEN", "280"),
            ("SHOPFLOOR_JOURNAL", "true"),
        ]));
        assert_eq!(config.typing_ttl, Duration::from_millis(1_500));
        assert_eq!(config.max_message_len, 280);
        assert!(config.journal);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SHOPFLOOR_TYPING_TTL_MS", "soon"),
            ("SHOPFLOOR_MAX_MESSAGE_LEN", "0"),
        ]));
        assert_eq!(config, ClientConfig::default());
    }
}
