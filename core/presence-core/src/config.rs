//! Static configuration for a presence session.
//!
//! Read once at startup from a TOML file, then overlaid with `PRESENCE_*`
//! environment variables. A missing file yields defaults; only `validate`
//! decides whether the result is usable.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PresenceError, Result};

pub const CONFIG_ENV: &str = "PRESENCE_CONFIG";
const CONFIG_DIR: &str = "presence";
const CONFIG_FILE: &str = "config.toml";

const CLIENT_ID_ENV: &str = "PRESENCE_CLIENT_ID";
const DETAILS_ENV: &str = "PRESENCE_DETAILS";
const STATE_ENV: &str = "PRESENCE_STATE";
const LARGE_IMAGE_ENV: &str = "PRESENCE_LARGE_IMAGE";
const SMALL_IMAGE_ENV: &str = "PRESENCE_SMALL_IMAGE";
const WEBHOOK_URL_ENV: &str = "PRESENCE_WEBHOOK_URL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub large_image: Option<String>,
    #[serde(default)]
    pub small_image: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl PresenceConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(PresenceError::ConfigurationMissing("client_id"));
        }
        Ok(())
    }

    /// Overlays any `PRESENCE_*` variables found through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(CLIENT_ID_ENV) {
            self.client_id = value;
        }
        let optional = [
            (DETAILS_ENV, &mut self.details),
            (STATE_ENV, &mut self.state),
            (LARGE_IMAGE_ENV, &mut self.large_image),
            (SMALL_IMAGE_ENV, &mut self.small_image),
            (WEBHOOK_URL_ENV, &mut self.webhook_url),
        ];
        for (key, slot) in optional {
            if let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) {
                *slot = Some(value);
            }
        }
    }
}

/// Returns `$PRESENCE_CONFIG`, or `<config dir>/presence/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Loads the file at `path` (defaults when absent) and applies env overrides.
pub fn load_config(path: Option<&Path>) -> Result<PresenceConfig> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => match default_config_path() {
            Some(path) => read_config_file(&path)?,
            None => PresenceConfig::default(),
        },
    };
    config.apply_overrides(|key| env::var(key).ok());
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<PresenceConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No presence config file; using defaults");
        return Ok(PresenceConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| PresenceError::Io {
        context: format!("reading {}", path.display()),
        source,
    })?;
    toml::from_str::<PresenceConfig>(&content).map_err(|err| PresenceError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

/// Loop cadence. Every field is in wall-clock time; tests shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub tick: Duration,
    pub reconnect_backoff: Duration,
    pub keepalive_interval: Duration,
    pub handshake_timeout: Duration,
    /// Deadline for one frame write on transports that support it.
    pub write_timeout: Duration,
}

impl SessionTiming {
    /// How long `stop()` waits for the worker before detaching it. Covers one
    /// handshake read plus a pending write and the final clear.
    pub fn stop_grace(&self) -> Duration {
        self.handshake_timeout + self.write_timeout * 2 + self.tick
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            reconnect_backoff: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = read_config_file(&path).expect("load config");
        assert_eq!(config, PresenceConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_parses_all_fields() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
client_id = "123456"
details = "Reading"
state = "Chapter 4"
large_image = "book"
small_image = "pen"
webhook_url = "https://example.invalid/hook"
"#,
        )
        .expect("write config");

        let config = read_config_file(&path).expect("load config");
        assert_eq!(config.client_id, "123456");
        assert_eq!(config.details.as_deref(), Some("Reading"));
        assert_eq!(config.state.as_deref(), Some("Chapter 4"));
        assert_eq!(config.large_image.as_deref(), Some("book"));
        assert_eq!(config.small_image.as_deref(), Some("pen"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_file_is_reported_with_path() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "client_id = [").expect("write config");

        match read_config_file(&path) {
            Err(PresenceError::ConfigMalformed { path: reported, .. }) => {
                assert_eq!(reported, path)
            }
            other => panic!("expected ConfigMalformed, got {:?}", other),
        }
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = PresenceConfig::new("file-id");
        config.details = Some("from file".to_string());
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PRESENCE_CLIENT_ID", "env-id"),
            ("PRESENCE_STATE", "from env"),
            ("PRESENCE_DETAILS", "  "),
        ]);

        config.apply_overrides(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.client_id, "env-id");
        assert_eq!(config.state.as_deref(), Some("from env"));
        assert_eq!(config.details.as_deref(), Some("from file"));
    }

    #[test]
    fn blank_client_id_is_missing() {
        let config = PresenceConfig::new("   ");
        assert!(matches!(
            config.validate(),
            Err(PresenceError::ConfigurationMissing("client_id"))
        ));
    }
}
