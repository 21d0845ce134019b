//! Environment variable readers.
//!
//! Unset and empty variables read as `None`. Values that are set but do not
//! parse are errors naming the variable.

use std::env;
use std::str::FromStr;

pub const RELAY_URL: &str = "VOICE_RELAY_URL";
pub const CALLS_PATH: &str = "VOICE_CALLS_PATH";
pub const VOICE: &str = "VOICE_VOICE";
pub const ENABLE_STT: &str = "VOICE_ENABLE_STT";
pub const INSTRUCTIONS: &str = "VOICE_INSTRUCTIONS";
pub const TRANSCRIPTION_MODEL: &str = "VOICE_TRANSCRIPTION_MODEL";
pub const ICE_SERVERS: &str = "VOICE_ICE_SERVERS";
pub const CONNECT_TIMEOUT_MS: &str = "VOICE_CONNECT_TIMEOUT_MS";
pub const RECONNECT_ENABLED: &str = "VOICE_RECONNECT_ENABLED";
pub const RECONNECT_MAX_ATTEMPTS: &str = "VOICE_RECONNECT_MAX_ATTEMPTS";
pub const RECONNECT_DELAY_MS: &str = "VOICE_RECONNECT_DELAY_MS";
pub const RESPONSE_DEBOUNCE_MS: &str = "VOICE_RESPONSE_DEBOUNCE_MS";

/// Every variable read by [`super::ClientConfig::from_env`].
pub const ALL: &[&str] = &[
    RELAY_URL,
    CALLS_PATH,
    VOICE,
    ENABLE_STT,
    INSTRUCTIONS,
    TRANSCRIPTION_MODEL,
    ICE_SERVERS,
    CONNECT_TIMEOUT_MS,
    RECONNECT_ENABLED,
    RECONNECT_MAX_ATTEMPTS,
    RECONNECT_DELAY_MS,
    RESPONSE_DEBOUNCE_MS,
];

pub fn string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn number<T: FromStr>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>> {
    match string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("Invalid value for {name}: '{raw}' is not a number").into()),
        None => Ok(None),
    }
}

pub fn boolean(name: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match string(name) {
        Some(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| format!("Invalid value for {name}: '{raw}' is not a boolean").into()),
        None => Ok(None),
    }
}

/// Comma separated list; blank entries are skipped.
pub fn list(name: &str) -> Option<Vec<String>> {
    string(name).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

/// `true/1/yes/on` and `false/0/no/off`, case-insensitive.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
