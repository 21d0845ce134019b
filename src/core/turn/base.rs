//! Turn-taking types: phases, events and the actions derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::core::control::ServerEvent;

// =============================================================================
// Phase
// =============================================================================

/// UI-facing turn phase. Driven only by control channel events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    /// Nobody is speaking and no response is pending
    #[default]
    Idle,
    /// The user is speaking
    Listening,
    /// The user stopped; a response is being requested
    Thinking,
    /// The assistant is responding
    Speaking,
}

impl TurnPhase {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Listening => "listening",
            TurnPhase::Thinking => "thinking",
            TurnPhase::Speaking => "speaking",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Transcripts
// =============================================================================

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// User speech transcript
    User,
    /// Assistant speech transcript
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Transcript surfaced to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// The transcribed text
    pub text: String,
    /// Role of the speaker
    pub role: TranscriptRole,
    /// Whether this is a final transcript
    pub is_final: bool,
    /// Conversation item ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

// =============================================================================
// Events
// =============================================================================

/// Control channel events the coordinator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// `session.updated`
    SessionAck,
    /// `input_audio_buffer.speech_started`
    SpeechStarted,
    /// `input_audio_buffer.speech_stopped`
    SpeechStopped,
    /// `input_audio_buffer.committed`
    BufferCommitted,
    /// `response.created`
    ResponseCreated { response_id: Option<String> },
    /// `response.done`
    ResponseDone { response_id: Option<String> },
    /// `error`
    Error { message: String },
    /// User or assistant transcript
    Transcript(TranscriptResult),
}

impl TurnEvent {
    /// Map a decoded control event. Events that do not affect turn-taking
    /// map to `None`.
    pub fn from_server_event(event: &ServerEvent) -> Option<Self> {
        let mapped = match event {
            ServerEvent::SessionUpdated => TurnEvent::SessionAck,
            ServerEvent::SpeechStarted { .. } => TurnEvent::SpeechStarted,
            ServerEvent::SpeechStopped { .. } => TurnEvent::SpeechStopped,
            ServerEvent::InputAudioBufferCommitted { .. } => TurnEvent::BufferCommitted,
            ServerEvent::ResponseCreated { response } => TurnEvent::ResponseCreated {
                response_id: response.id.clone(),
            },
            ServerEvent::ResponseDone { response } => TurnEvent::ResponseDone {
                response_id: response.id.clone(),
            },
            ServerEvent::Error { error } => TurnEvent::Error {
                message: error.describe(),
            },
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => TurnEvent::Transcript(TranscriptResult {
                text: transcript.clone(),
                role: TranscriptRole::User,
                is_final: true,
                item_id: item_id.clone(),
            }),
            ServerEvent::AudioTranscriptDelta { item_id, delta } => {
                TurnEvent::Transcript(TranscriptResult {
                    text: delta.clone(),
                    role: TranscriptRole::Assistant,
                    is_final: false,
                    item_id: item_id.clone(),
                })
            }
            ServerEvent::AudioTranscriptDone {
                item_id,
                transcript,
            } => TurnEvent::Transcript(TranscriptResult {
                text: transcript.clone(),
                role: TranscriptRole::Assistant,
                is_final: true,
                item_id: item_id.clone(),
            }),
            ServerEvent::SessionCreated
            | ServerEvent::ConversationItemCreated
            | ServerEvent::Unknown => return None,
        };
        Some(mapped)
    }
}

/// Call-level facts the coordinator needs but does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TurnContext {
    /// `usable(Call)` at the time of the event
    pub usable: bool,
    /// User pause flag
    pub paused: bool,
}

// =============================================================================
// Actions
// =============================================================================

/// Effects derived from one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    /// Set the call's session-ready flag
    SetSessionReady(bool),
    /// Publish a new phase
    EnterPhase(TurnPhase),
    /// Send `response.create` now
    CreateResponse,
    /// Send `response.create` after the debounce delay
    ScheduleResponse(Duration),
    /// A response exists on the remote side
    MarkResponseInFlight,
    /// Clear in-flight and scheduled response bookkeeping
    SettleResponse,
    /// Report an error to observers
    SurfaceError(String),
    /// Report a transcript to observers
    EmitTranscript(TranscriptResult),
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for phase changes.
pub type PhaseCallback =
    Arc<dyn Fn(TurnPhase) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for transcripts.
pub type TranscriptCallback =
    Arc<dyn Fn(TranscriptResult) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for errors surfaced by the remote service.
pub type TurnErrorCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
