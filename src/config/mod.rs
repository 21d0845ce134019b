//! Configuration module for the voice client
//!
//! Configuration comes from .env files, environment variables and an optional
//! YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use voice_call::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(&PathBuf::from("voice.yaml"))?;
//! println!("Relay at {}", config.relay_url);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::Url;

mod env;
mod yaml;

pub use env::parse_bool;
pub use yaml::YamlConfig;

use crate::core::call::{CallSettings, ReconnectionConfig};
use crate::core::control::{InputAudioTranscription, SessionConfig};
use crate::core::relay::{DEFAULT_CALLS_PATH, HttpRelayConfig};
use crate::core::transport::{AudioConstraints, DEFAULT_ICE_SERVER, WebRtcConfig};

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8000";

// =============================================================================
// Voice
// =============================================================================

/// Voices offered by the realtime service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Voice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Ash => "ash",
            Voice::Ballad => "ballad",
            Voice::Coral => "coral",
            Voice::Echo => "echo",
            Voice::Sage => "sage",
            Voice::Shimmer => "shimmer",
            Voice::Verse => "verse",
        }
    }

    /// Parse a voice name, falling back to the default for unknown names.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "alloy" => Voice::Alloy,
            "ash" => Voice::Ash,
            "ballad" => Voice::Ballad,
            "coral" => Voice::Coral,
            "echo" => Voice::Echo,
            "sage" => Voice::Sage,
            "shimmer" => Voice::Shimmer,
            "verse" => Voice::Verse,
            other => {
                warn!("Unknown voice '{}', using {}", other, Voice::default());
                Voice::default()
            }
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Relay base URL, e.g. `http://127.0.0.1:8000`
    pub relay_url: String,
    /// Path of the offer endpoint under the relay
    pub calls_path: String,
    pub voice: Voice,
    /// Ask the relay to run input transcription
    pub enable_stt: bool,
    pub instructions: Option<String>,
    pub transcription_model: Option<String>,
    /// STUN/TURN server URLs
    pub ice_servers: Vec<String>,
    pub connect_timeout_ms: u64,
    pub relay_timeout_ms: u64,
    pub hangup_timeout_ms: u64,
    /// Delay between end of speech and `response.create`; 0 sends at once
    pub response_debounce_ms: u64,
    pub audio: AudioConstraints,
    pub reconnection: ReconnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            calls_path: DEFAULT_CALLS_PATH.to_string(),
            voice: Voice::default(),
            enable_stt: true,
            instructions: None,
            transcription_model: None,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            connect_timeout_ms: 10_000,
            relay_timeout_ms: 15_000,
            hangup_timeout_ms: 2_000,
            response_debounce_ms: 0,
            audio: AudioConstraints::default(),
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables over the defaults
    ///
    /// The .env file is expected to be loaded by the caller (main.rs does
    /// this at startup).
    ///
    /// # Errors
    /// Returns an error naming the variable when a value does not parse, or
    /// when the resulting configuration fails validation.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::env_layer()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// # Errors
    /// Returns an error if the YAML file cannot be read or is malformed, an
    /// environment variable is invalid, or validation fails.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = Self::env_layer()?;
        config.apply_yaml(yaml_config);
        config.validate()?;
        Ok(config)
    }

    fn env_layer() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();

        if let Some(url) = env::string(env::RELAY_URL) {
            config.relay_url = url;
        }
        if let Some(path) = env::string(env::CALLS_PATH) {
            config.calls_path = path;
        }
        if let Some(voice) = env::string(env::VOICE) {
            config.voice = Voice::from_str_or_default(&voice);
        }
        if let Some(enable_stt) = env::boolean(env::ENABLE_STT)? {
            config.enable_stt = enable_stt;
        }
        config.instructions = env::string(env::INSTRUCTIONS);
        config.transcription_model = env::string(env::TRANSCRIPTION_MODEL);
        if let Some(servers) = env::list(env::ICE_SERVERS) {
            config.ice_servers = servers;
        }
        if let Some(ms) = env::number(env::CONNECT_TIMEOUT_MS)? {
            config.connect_timeout_ms = ms;
        }
        if let Some(enabled) = env::boolean(env::RECONNECT_ENABLED)? {
            config.reconnection.enabled = enabled;
        }
        if let Some(attempts) = env::number(env::RECONNECT_MAX_ATTEMPTS)? {
            config.reconnection.max_attempts = attempts;
        }
        if let Some(ms) = env::number(env::RECONNECT_DELAY_MS)? {
            config.reconnection.initial_delay_ms = ms;
        }
        if let Some(ms) = env::number(env::RESPONSE_DEBOUNCE_MS)? {
            config.response_debounce_ms = ms;
        }

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(relay) = yaml.relay {
            if let Some(url) = relay.url {
                self.relay_url = url;
            }
            if let Some(path) = relay.calls_path {
                self.calls_path = path;
            }
            if let Some(ms) = relay.request_timeout_ms {
                self.relay_timeout_ms = ms;
            }
            if let Some(ms) = relay.hangup_timeout_ms {
                self.hangup_timeout_ms = ms;
            }
        }

        if let Some(session) = yaml.session {
            if let Some(voice) = session.voice {
                self.voice = Voice::from_str_or_default(&voice);
            }
            if let Some(enable_stt) = session.enable_stt {
                self.enable_stt = enable_stt;
            }
            if session.instructions.is_some() {
                self.instructions = session.instructions;
            }
            if session.transcription_model.is_some() {
                self.transcription_model = session.transcription_model;
            }
        }

        if let Some(call) = yaml.call {
            if let Some(ms) = call.connect_timeout_ms {
                self.connect_timeout_ms = ms;
            }
            if let Some(ms) = call.response_debounce_ms {
                self.response_debounce_ms = ms;
            }
            if let Some(servers) = call.ice_servers {
                self.ice_servers = servers;
            }
        }

        if let Some(audio) = yaml.audio {
            if let Some(rate) = audio.sample_rate {
                self.audio.sample_rate = rate;
            }
            if let Some(channels) = audio.channels {
                self.audio.channels = channels;
            }
        }

        if let Some(reconnection) = yaml.reconnection {
            if let Some(enabled) = reconnection.enabled {
                self.reconnection.enabled = enabled;
            }
            if let Some(attempts) = reconnection.max_attempts {
                self.reconnection.max_attempts = attempts;
            }
            if let Some(ms) = reconnection.initial_delay_ms {
                self.reconnection.initial_delay_ms = ms;
            }
            if let Some(ms) = reconnection.max_delay_ms {
                self.reconnection.max_delay_ms = ms;
            }
            if let Some(multiplier) = reconnection.backoff_multiplier {
                self.reconnection.backoff_multiplier = multiplier;
            }
        }
    }

    /// Check the configuration for values the client cannot run with.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let url = Url::parse(&self.relay_url)
            .map_err(|e| format!("Invalid relay URL '{}': {e}", self.relay_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("Relay URL must be http or https, got '{}'", url.scheme()).into());
        }
        if self.calls_path.len() < 2 || !self.calls_path.starts_with('/') {
            return Err(format!(
                "Calls path must start with '/' and name an endpoint, got '{}'",
                self.calls_path
            )
            .into());
        }
        if self.audio.sample_rate == 0 {
            return Err("Audio sample rate must be greater than zero".into());
        }
        if self.audio.channels != 1 {
            return Err(format!(
                "Only mono capture is supported, got {} channels",
                self.audio.channels
            )
            .into());
        }
        if self.connect_timeout_ms == 0 {
            return Err("Connect timeout must be greater than zero".into());
        }
        if self.reconnection.enabled && self.reconnection.max_attempts == 0 {
            return Err("Reconnection max_attempts must be greater than zero when enabled".into());
        }
        Ok(())
    }

    /// Session handshake built from the voice and transcription settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            voice: Some(self.voice.as_str().to_string()),
            instructions: self.instructions.clone(),
            input_audio_transcription: self.transcription_model.as_ref().map(|model| {
                InputAudioTranscription {
                    model: model.clone(),
                }
            }),
            ..Default::default()
        }
    }

    pub fn call_settings(&self) -> CallSettings {
        CallSettings {
            voice: self.voice.as_str().to_string(),
            enable_stt: self.enable_stt,
            audio: self.audio,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            hangup_timeout: Duration::from_millis(self.hangup_timeout_ms),
            session: self.session_config(),
            reconnection: self.reconnection.clone(),
        }
    }

    pub fn relay_config(&self) -> HttpRelayConfig {
        HttpRelayConfig {
            base_url: self.relay_url.clone(),
            calls_path: self.calls_path.clone(),
            request_timeout: Duration::from_millis(self.relay_timeout_ms),
        }
    }

    pub fn webrtc_config(&self) -> WebRtcConfig {
        WebRtcConfig {
            ice_servers: self.ice_servers.clone(),
        }
    }

    pub fn response_debounce(&self) -> Duration {
        Duration::from_millis(self.response_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for name in env::ALL {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    fn test_voice_parsing() {
        assert_eq!(Voice::from_str_or_default("Shimmer"), Voice::Shimmer);
        assert_eq!(Voice::from_str_or_default("nobody"), Voice::Alloy);
        assert_eq!(Voice::Verse.to_string(), "verse");
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.relay_url, "http://127.0.0.1:8000");
        assert_eq!(config.calls_path, "/api/realtime/calls");
        assert!(config.enable_stt);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.reconnection.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("VOICE_RELAY_URL", "https://relay.example.com");
            std::env::set_var("VOICE_VOICE", "coral");
            std::env::set_var("VOICE_ENABLE_STT", "no");
            std::env::set_var("VOICE_RECONNECT_MAX_ATTEMPTS", "5");
            std::env::set_var("VOICE_ICE_SERVERS", "stun:a:3478,stun:b:3478");
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.relay_url, "https://relay.example.com");
        assert_eq!(config.voice, Voice::Coral);
        assert!(!config.enable_stt);
        assert_eq!(config.reconnection.max_attempts, 5);
        assert_eq!(config.ice_servers.len(), 2);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("VOICE_RECONNECT_DELAY_MS", "later");
        }

        let result = ClientConfig::from_env();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("VOICE_RECONNECT_DELAY_MS")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("voice.yaml");
        fs::write(
            &config_path,
            r#"
session:
  voice: "verse"
reconnection:
  initial_delay_ms: 500
"#,
        )
        .unwrap();

        unsafe {
            std::env::set_var("VOICE_VOICE", "echo");
            std::env::set_var("VOICE_RELAY_URL", "http://env-relay:8000");
        }

        let config = ClientConfig::from_file(&config_path).unwrap();
        // YAML overrides ENV
        assert_eq!(config.voice, Voice::Verse);
        assert_eq!(config.reconnection.initial_delay_ms, 500);
        // ENV value kept where YAML is silent
        assert_eq!(config.relay_url, "http://env-relay:8000");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = ClientConfig::from_file(&PathBuf::from("/nonexistent/voice.yaml"));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig {
            relay_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = ClientConfig {
            calls_path: "calls".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = ClientConfig::default();
        config.audio.channels = 2;
        assert!(config.validate().is_err());

        config = ClientConfig::default();
        config.reconnection.max_attempts = 0;
        assert!(config.validate().is_err());
        config.reconnection.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_call_settings_conversion() {
        let config = ClientConfig {
            voice: Voice::Sage,
            transcription_model: Some("whisper-1".to_string()),
            connect_timeout_ms: 4_000,
            ..Default::default()
        };

        let settings = config.call_settings();
        assert_eq!(settings.voice, "sage");
        assert_eq!(settings.connect_timeout, Duration::from_secs(4));
        assert_eq!(settings.session.voice, Some("sage".to_string()));
        assert_eq!(
            settings
                .session
                .input_audio_transcription
                .map(|t| t.model),
            Some("whisper-1".to_string())
        );

        let relay = config.relay_config();
        assert_eq!(relay.calls_path, "/api/realtime/calls");
    }
}
