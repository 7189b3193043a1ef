//! Session configuration

use serde::{Deserialize, Serialize};

use crate::registry::DEFAULT_SETTLED_HISTORY;

/// Options shared by UI and host sessions
///
/// Deserializable so embedders can load it with the rest of their settings;
/// missing fields take their defaults.
///
/// ```rust
/// use reson_bridge::SessionConfig;
///
/// let config = SessionConfig::default().with_force_wait(true);
/// assert!(config.force_wait);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Queue commands issued before the render data arrives instead of
    /// rejecting them with `NotReady`. UI sessions only.
    pub force_wait: bool,
    /// How many settled request ids to remember for duplicate detection
    pub settled_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            force_wait: false,
            settled_history: DEFAULT_SETTLED_HISTORY,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue (true) or reject (false) commands issued before ready
    pub fn with_force_wait(mut self, force_wait: bool) -> Self {
        self.force_wait = force_wait;
        self
    }

    /// Set the duplicate-detection window
    pub fn with_settled_history(mut self, settled_history: usize) -> Self {
        self.settled_history = settled_history;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert!(!config.force_wait);
        assert_eq!(config.settled_history, DEFAULT_SETTLED_HISTORY);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SessionConfig = serde_json::from_value(json!({"forceWait": true})).unwrap();
        assert!(config.force_wait);
        assert_eq!(config.settled_history, DEFAULT_SETTLED_HISTORY);
    }
}
