//! Framing of control events over the ordered, reliable data channel.
//!
//! One JSON object per frame. Inbound frames that are not objects with a
//! string `type` are logged and dropped; the pipeline never fails on them.

use serde_json::Value;
use tracing::{debug, warn};

use super::messages::{ClientEvent, ServerEvent};
use crate::core::call::{CallError, CallResult};

/// Longest frame prefix included in log lines.
const LOG_PREVIEW_CHARS: usize = 120;

/// Stateless encoder/decoder for control frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlCodec;

impl ControlCodec {
    pub fn new() -> Self {
        Self
    }

    /// Serialize a client event into one text frame.
    pub fn encode(&self, event: &ClientEvent) -> CallResult<String> {
        serde_json::to_string(event).map_err(|e| {
            CallError::SerializationError(format!(
                "Failed to serialize {}: {e}",
                event.event_type()
            ))
        })
    }

    /// Decode one inbound frame.
    ///
    /// Returns `None` for malformed frames. Frames with an unrecognized
    /// `type` decode to [`ServerEvent::Unknown`].
    pub fn decode(&self, frame: &str) -> Option<ServerEvent> {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Dropping malformed control frame ({e}): {}",
                    preview(frame)
                );
                return None;
            }
        };

        let Some(event_type) = value.get("type").and_then(Value::as_str) else {
            warn!("Dropping control frame without type: {}", preview(frame));
            return None;
        };
        let event_type = event_type.to_string();

        match serde_json::from_value::<ServerEvent>(value) {
            Ok(ServerEvent::Unknown) => {
                debug!("Ignoring control event: {}", event_type);
                Some(ServerEvent::Unknown)
            }
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Dropping {} frame with invalid payload: {}", event_type, e);
                None
            }
        }
    }
}

fn preview(frame: &str) -> String {
    if frame.chars().count() <= LOG_PREVIEW_CHARS {
        frame.to_string()
    } else {
        let head: String = frame.chars().take(LOG_PREVIEW_CHARS).collect();
        format!("{head}...")
    }
}
