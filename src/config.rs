use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_DOUBLE_CLICK_INTERVAL_MS: i64 = 500;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 300;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TrayConfig {
    /// Two `Activate` calls closer than this are reported as a double click.
    pub double_click_interval_ms: i64,
    /// How long teardown waits for the session connection to close.
    pub close_timeout_ms: u64,
    /// Register again whenever a StatusNotifierWatcher (re)appears on the bus.
    pub track_watcher: bool,
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            double_click_interval_ms: DEFAULT_DOUBLE_CLICK_INTERVAL_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            track_watcher: true,
        }
    }
}

impl TrayConfig {
    /// Parse a (possibly partial) JSON document, missing keys keep their defaults.
    pub fn from_json(config: &str) -> Result<Self> {
        Ok(serde_json::from_str::<TrayConfig>(config)?)
    }

    pub fn default_ron() -> Result<String> {
        Ok(ron::ser::to_string_pretty(
            &TrayConfig::default(),
            PrettyConfig::default(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let conf = TrayConfig::from_json(r#"{ "double_click_interval_ms": 250 }"#).unwrap();
        assert_eq!(
            conf,
            TrayConfig {
                double_click_interval_ms: 250,
                ..TrayConfig::default()
            }
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(TrayConfig::from_json("{ double_click_interval_ms: }").is_err());
        assert!(TrayConfig::from_json(r#"{ "track_watcher": "yes" }"#).is_err());
    }

    #[test]
    fn default_ron_lists_every_field() {
        let ron = TrayConfig::default_ron().unwrap();
        assert!(ron.contains("double_click_interval_ms: 500"));
        assert!(ron.contains("close_timeout_ms: 300"));
        assert!(ron.contains("track_watcher: true"));
        let parsed: TrayConfig = ron::from_str(&ron).unwrap();
        assert_eq!(parsed, TrayConfig::default());
    }
}
