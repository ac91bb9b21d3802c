// ABOUTME: File-backed configuration for the chat bridge
// ABOUTME: One TOML document carrying bridge tunables, the bridged chat channels and logging settings

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use statebridge_logging::{LoggingConfig, info};
use statebridge_types::{BridgeConfig, BridgeError, BridgeResult};

use crate::chat::ChatChannel;

pub const CONFIG_FILE_NAME: &str = "statebridge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatebridgeConfig {
    pub bridge: BridgeConfig,
    pub chat: ChatConfig,
    pub logging: LoggingConfig,
}

/// Which chat channels cross the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub channels: BTreeSet<ChatChannel>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            channels: ChatChannel::ALL.into_iter().collect(),
        }
    }
}

impl ChatConfig {
    pub fn is_enabled(&self, channel: ChatChannel) -> bool {
        self.channels.contains(&channel)
    }
}

impl StatebridgeConfig {
    /// Load configuration from the standard location
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&config_dir())
    }

    /// Load `statebridge.toml` from `dir`, falling back to defaults when the
    /// file does not exist
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            info!(config_dir = %dir.display(), "No bridge configuration file found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_file(&path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        info!(
            config_path = %path.display(),
            channels = config.chat.channels.len(),
            max_batch_size = ?config.bridge.batching.max_batch_size,
            "Loaded bridge configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        self.bridge.validate()?;
        if self.chat.channels.is_empty() {
            return Err(BridgeError::invalid_config(
                "chat.channels must name at least one channel",
            ));
        }
        Ok(())
    }

    /// Logging settings with environment overrides applied
    pub fn logging_with_env(&self) -> Result<LoggingConfig> {
        let mut logging = self.logging.clone();
        logging.apply_env_overrides()?;
        Ok(logging)
    }
}

/// Directory holding `statebridge.toml`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("statebridge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let config = StatebridgeConfig::load_from_dir(dir.path()).unwrap();

        assert_eq!(config.bridge, BridgeConfig::default());
        assert_eq!(config.chat.channels.len(), ChatChannel::ALL.len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
[bridge.batching]
max_batch_size = 8

[bridge.healing]
failure_threshold = 2

[chat]
channels = ["session_select", "message_append"]

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = StatebridgeConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.bridge.batching.max_batch_size, Some(8));
        assert_eq!(config.bridge.healing.failure_threshold, 2);
        assert_eq!(config.bridge.healing.cooldown_ms, 5_000);
        assert!(config.chat.is_enabled(ChatChannel::MessageAppend));
        assert!(!config.chat.is_enabled(ChatChannel::DraftChange));
        assert_eq!(config.logging.level.0, statebridge_logging::Level::DEBUG);
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[bridge.batching\nmax_batch_size = ").unwrap();

        let error = StatebridgeConfig::load_from_file(&path).unwrap_err();
        assert!(format!("{error:#}").contains(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_unknown_channel_is_rejected() {
        let result: std::result::Result<StatebridgeConfig, _> =
            toml::from_str("[chat]\nchannels = [\"typing_indicator\"]");
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_channel_list_is_invalid() {
        let mut config = StatebridgeConfig::default();
        config.chat.channels.clear();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::InvalidConfig { .. })
        ));

        let mut config = StatebridgeConfig::default();
        config.bridge.batching.max_batch_size = Some(0);
        assert!(config.validate().is_err());
    }
}
