use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::framing::FramingStrategy;
use super::platform;
use super::session::Session;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Connection settings for one caption encoder, as entered by the user.
/// Out-of-range numbers are clamped when turned into a [`Session`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_encoder_port")]
    pub port: u32,
    /// How many caption lines stay visible.
    #[serde(default = "default_lines")]
    pub lines: u32,
    #[serde(default = "default_clear_after_interval")]
    pub clear_after_interval: bool,
    /// Seconds of silence before the window is emptied.
    #[serde(default = "default_silence_interval")]
    pub silence_interval: u64,
    #[serde(default)]
    pub framing: FramingStrategy,
    /// Send a periodic no-op while idle.  Some encoder firmwares drop quiet links.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,
}

/// Where collaborators reach the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_socket_port")]
    pub socket_port: u16,
    #[serde(default = "default_http_enabled")]
    pub http_enabled: bool,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_encoder_port(),
            lines: default_lines(),
            clear_after_interval: default_clear_after_interval(),
            silence_interval: default_silence_interval(),
            framing: FramingStrategy::default(),
            keep_alive: default_keep_alive(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            socket_port: default_socket_port(),
            http_enabled: default_http_enabled(),
            http_port: default_http_port(),
        }
    }
}

fn default_encoder_port() -> u32 {
    23
}

fn default_lines() -> u32 {
    2
}

fn default_clear_after_interval() -> bool {
    true
}

fn default_silence_interval() -> u64 {
    5
}

fn default_keep_alive() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_socket_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8991
}

impl EncoderConfig {
    /// Clamp to the ranges the settings form allows and freeze into a session.
    pub fn session(&self) -> Session {
        Session {
            host: self.host.trim().to_string(),
            port: self.port.clamp(1, u16::MAX as u32) as u16,
            lines: self.lines.clamp(1, 10) as usize,
            clear_after_interval: self.clear_after_interval,
            silence_interval: std::time::Duration::from_secs(self.silence_interval.clamp(1, 60)),
            framing: self.framing,
            keep_alive: self.keep_alive,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            tracing::info!("Wrote default config to {:?}", config_path);
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.encoder.host, "");
        assert_eq!(config.encoder.port, 23);
        assert_eq!(config.encoder.lines, 2);
        assert!(config.encoder.clear_after_interval);
        assert_eq!(config.encoder.silence_interval, 5);
        assert_eq!(config.encoder.framing, FramingStrategy::Sanitize);
        assert!(config.api.http_enabled);
        assert_eq!(config.api.bind_address, "127.0.0.1");
        assert!(Config::config_path().ends_with("encoder-captions/config.toml"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [encoder]
            host = "192.168.1.40"
            framing = "carry"
            "#,
        )
        .unwrap();
        assert_eq!(config.encoder.host, "192.168.1.40");
        assert_eq!(config.encoder.port, 23);
        assert_eq!(config.encoder.framing, FramingStrategy::Carry);
        assert_eq!(config.api.http_port, 8991);
    }

    #[test]
    fn test_session_clamps_ranges() {
        let encoder = EncoderConfig {
            host: "  enc.local ".to_string(),
            port: 70000,
            lines: 0,
            silence_interval: 600,
            ..EncoderConfig::default()
        };
        let session = encoder.session();
        assert_eq!(session.host, "enc.local");
        assert_eq!(session.port, 65535);
        assert_eq!(session.lines, 1);
        assert_eq!(session.silence_interval.as_secs(), 60);

        let encoder = EncoderConfig {
            port: 0,
            lines: 25,
            ..EncoderConfig::default()
        };
        let session = encoder.session();
        assert_eq!(session.port, 1);
        assert_eq!(session.lines, 10);
    }
}
