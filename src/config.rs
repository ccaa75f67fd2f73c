//! Configuration loading and management
//!
//! Every setting has a default; `PARLEY_*` environment variables override it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::coordinator::{CoordinatorSettings, DEFAULT_APOLOGY};
use crate::gateway::GatewayConfig;

/// Seeded as the first turn of every conversation
pub const DEFAULT_DIRECTIVE: &str = "You are a spoken conversation partner. \
Answer in a few plain sentences that read well aloud, without lists or markup.";

/// Cap for frames carrying a base64 recording; other frames stop at 1 MiB
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub gateway: GatewayConfig,

    pub rearm_delay: Duration,
    pub recovery_rearm_delay: Duration,
    pub settle_delay: Duration,

    /// System-level instruction seeded into the conversation log
    pub directive: String,

    /// Machine turn recorded when the reply endpoint fails
    pub apology: String,

    /// Largest IPC frame accepted from a client when it carries a recording
    pub max_frame_bytes: usize,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Self::from_lookup(&home, |key| std::env::var(key).ok())
    }

    fn from_lookup(home: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup("PARLEY_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(home).join(".local").join("share").join("parley"),
        };
        let socket_path = lookup("PARLEY_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            base_url: lookup("PARLEY_GATEWAY_URL").unwrap_or(defaults.base_url),
            reply_path: lookup("PARLEY_REPLY_PATH").unwrap_or(defaults.reply_path),
            synthesis_path: lookup("PARLEY_SYNTHESIS_PATH").unwrap_or(defaults.synthesis_path),
            transcription_path: lookup("PARLEY_TRANSCRIPTION_PATH")
                .unwrap_or(defaults.transcription_path),
        };

        let timing = CoordinatorSettings::default();

        Ok(Self {
            socket_path,
            data_dir,
            gateway,
            rearm_delay: millis(&lookup, "PARLEY_REARM_DELAY_MS", timing.rearm_delay)?,
            recovery_rearm_delay: millis(
                &lookup,
                "PARLEY_RECOVERY_REARM_DELAY_MS",
                timing.recovery_rearm_delay,
            )?,
            settle_delay: millis(&lookup, "PARLEY_SETTLE_DELAY_MS", timing.settle_delay)?,
            directive: lookup("PARLEY_DIRECTIVE").unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string()),
            apology: lookup("PARLEY_APOLOGY").unwrap_or_else(|| DEFAULT_APOLOGY.to_string()),
            max_frame_bytes: match lookup("PARLEY_MAX_FRAME_BYTES") {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid PARLEY_MAX_FRAME_BYTES: {raw:?}"))?,
                None => DEFAULT_MAX_FRAME_BYTES,
            },
        })
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            rearm_delay: self.rearm_delay,
            recovery_rearm_delay: self.recovery_rearm_delay,
            settle_delay: self.settle_delay,
            apology: self.apology.clone(),
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration> {
    match lookup(key) {
        Some(raw) => {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {key}: {raw:?}"))?;
            Ok(Duration::from_millis(ms))
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_with(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup("/home/tester", |key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load_with(&[]).unwrap();
        assert_eq!(
            config.socket_path,
            PathBuf::from("/home/tester/.local/share/parley/daemon.sock")
        );
        assert_eq!(config.gateway, GatewayConfig::default());
        assert_eq!(config.coordinator_settings(), CoordinatorSettings::default());
        assert_eq!(config.directive, DEFAULT_DIRECTIVE);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    }

    #[test]
    fn test_config_overrides() {
        let config = load_with(&[
            ("PARLEY_DATA_DIR", "/tmp/parley"),
            ("PARLEY_GATEWAY_URL", "https://speech.example"),
            ("PARLEY_REARM_DELAY_MS", "250"),
            ("PARLEY_SETTLE_DELAY_MS", " 0 "),
            ("PARLEY_APOLOGY", "That did not work."),
        ])
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/parley/daemon.sock"));
        assert_eq!(config.gateway.base_url, "https://speech.example");
        assert_eq!(config.gateway.reply_path, "/api/chat");

        let settings = config.coordinator_settings();
        assert_eq!(settings.rearm_delay, Duration::from_millis(250));
        assert_eq!(settings.recovery_rearm_delay, Duration::from_millis(100));
        assert_eq!(settings.settle_delay, Duration::ZERO);
        assert_eq!(settings.apology, "That did not work.");
    }

    #[test]
    fn test_invalid_delay_is_an_error() {
        let err = load_with(&[("PARLEY_RECOVERY_REARM_DELAY_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("PARLEY_RECOVERY_REARM_DELAY_MS"));
    }

    #[test]
    fn test_config_load() {
        let config = Config::load().unwrap();
        assert!(config.socket_path.to_string_lossy().contains("daemon.sock"));
    }
}
