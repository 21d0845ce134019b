use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// relay:
///   url: "http://127.0.0.1:8000"
///   calls_path: "/api/realtime/calls"
///   request_timeout_ms: 15000
///   hangup_timeout_ms: 2000
///
/// session:
///   voice: "alloy"
///   enable_stt: true
///   instructions: "You are a helpful assistant."
///   transcription_model: "whisper-1"
///
/// call:
///   connect_timeout_ms: 10000
///   response_debounce_ms: 0
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///
/// audio:
///   sample_rate: 24000
///   channels: 1
///
/// reconnection:
///   enabled: true
///   max_attempts: 3
///   initial_delay_ms: 3000
///   max_delay_ms: 30000
///   backoff_multiplier: 1.0
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub relay: Option<RelayYaml>,
    pub session: Option<SessionYaml>,
    pub call: Option<CallYaml>,
    pub audio: Option<AudioYaml>,
    pub reconnection: Option<ReconnectionYaml>,
}

/// Signaling relay settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub url: Option<String>,
    pub calls_path: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub hangup_timeout_ms: Option<u64>,
}

/// Realtime session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub voice: Option<String>,
    pub enable_stt: Option<bool>,
    pub instructions: Option<String>,
    /// Input transcription model, e.g. "whisper-1"
    pub transcription_model: Option<String>,
}

/// Call establishment settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CallYaml {
    pub connect_timeout_ms: Option<u64>,
    pub response_debounce_ms: Option<u64>,
    pub ice_servers: Option<Vec<String>>,
}

/// Capture constraints from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Reconnection policy from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectionYaml {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
relay:
  url: "https://relay.example.com"
  calls_path: "/v1/calls"
  request_timeout_ms: 5000
  hangup_timeout_ms: 500

session:
  voice: "verse"
  enable_stt: false
  instructions: "Be brief."
  transcription_model: "whisper-1"

call:
  connect_timeout_ms: 8000
  response_debounce_ms: 250
  ice_servers:
    - "stun:stun.example.com:3478"
    - "turn:turn.example.com:3478"

audio:
  sample_rate: 16000
  channels: 1

reconnection:
  enabled: true
  max_attempts: 5
  initial_delay_ms: 1000
  max_delay_ms: 8000
  backoff_multiplier: 2.0
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let relay = config.relay.unwrap();
        assert_eq!(relay.url, Some("https://relay.example.com".to_string()));
        assert_eq!(relay.calls_path, Some("/v1/calls".to_string()));
        assert_eq!(relay.hangup_timeout_ms, Some(500));

        let session = config.session.unwrap();
        assert_eq!(session.voice, Some("verse".to_string()));
        assert_eq!(session.enable_stt, Some(false));

        let call = config.call.unwrap();
        assert_eq!(call.ice_servers.unwrap().len(), 2);
        assert_eq!(call.response_debounce_ms, Some(250));

        assert_eq!(config.audio.unwrap().sample_rate, Some(16000));

        let reconnection = config.reconnection.unwrap();
        assert_eq!(reconnection.max_attempts, Some(5));
        assert_eq!(reconnection.backoff_multiplier, Some(2.0));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
session:
  voice: "shimmer"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.relay.is_none());
        let session = config.session.unwrap();
        assert_eq!(session.voice, Some("shimmer".to_string()));
        assert!(session.enable_stt.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.relay.is_none());
        assert!(config.reconnection.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
relay:
  url: "http://localhost:9000"
"#,
        )
        .unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.relay.as_ref().unwrap().url,
            Some("http://localhost:9000".to_string())
        );
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
