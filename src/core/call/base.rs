//! Base types for the call lifecycle.
//!
//! This module defines the error taxonomy, the call state table and the
//! status events observers receive while a call is established, used and
//! torn down.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::reconnect::ReconnectionConfig;
use crate::core::control::SessionConfig;
use crate::core::transport::{AudioConstraints, SignalingState};

// =============================================================================
// Error Types
// =============================================================================

/// Why a connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectFailure {
    /// ICE did not reach connected/completed before the deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The relay answered with a non-success status
    #[error("relay returned HTTP {status}: {body}")]
    Relay {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The relay could not be reached
    #[error("network error: {0}")]
    Network(String),

    /// The peer connection reported a failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// The user hung up while the attempt was in flight
    #[error("cancelled by hang-up")]
    Cancelled,
}

/// Errors that can occur during call operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Capture device unavailable or permission denied
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// Local/remote description applied out of the legal order
    #[error("Signaling state error: expected {expected}, found {actual}")]
    SignalingStateError {
        /// State the operation requires
        expected: SignalingState,
        /// State the peer connection reported
        actual: SignalingState,
    },

    /// The relay did not return a usable call identifier
    #[error("Invalid call id from relay: {0:?}")]
    InvalidCallId(Option<String>),

    /// Timeout or transport failure while connecting
    #[error("Connect error: {0}")]
    ConnectError(ConnectFailure),

    /// Automatic reconnection gave up
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made
        attempts: u32,
    },

    /// Operation requires an open peer connection
    #[error("Not connected")]
    NotConnected,

    /// The control channel rejected a frame
    #[error("Control channel error: {0}")]
    ChannelError(String),

    /// Transition rejected by the state table
    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition {
        /// Current state
        from: CallState,
        /// Requested state
        to: CallState,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CallError {
    /// Whether this error feeds the automatic reconnection policy.
    ///
    /// A hang-up during the attempt is excluded: the user asked for the
    /// call to end.
    pub fn triggers_reconnect(&self) -> bool {
        matches!(self, CallError::ConnectError(f) if *f != ConnectFailure::Cancelled)
    }
}

impl From<ConnectFailure> for CallError {
    fn from(failure: ConnectFailure) -> Self {
        CallError::ConnectError(failure)
    }
}

/// Result type for call operations.
pub type CallResult<T> = Result<T, CallError>;

// =============================================================================
// Call State
// =============================================================================

/// Lifecycle state of the single active call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    /// No call in progress
    #[default]
    Idle,
    /// Offer/answer exchange or ICE negotiation in progress
    Connecting,
    /// ICE connected; control channel may still be opening
    Connected,
    /// Releasing resources
    Disconnecting,
}

impl CallState {
    /// Whether `self -> to` is a legal edge.
    ///
    /// A failed attempt leaves `Connecting` through `Disconnecting` so every
    /// teardown takes the same path back to `Idle`.
    pub fn can_transition_to(self, to: CallState) -> bool {
        matches!(
            (self, to),
            (CallState::Idle, CallState::Connecting)
                | (CallState::Connecting, CallState::Connected)
                | (CallState::Connecting, CallState::Disconnecting)
                | (CallState::Connected, CallState::Disconnecting)
                | (CallState::Disconnecting, CallState::Idle)
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "Idle"),
            CallState::Connecting => write!(f, "Connecting"),
            CallState::Connected => write!(f, "Connected"),
            CallState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Snapshot returned by connect/disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// Current call state
    pub state: CallState,
    /// Whether control messages may be sent
    pub usable: bool,
    /// Identifier issued by the relay, if any
    pub call_id: Option<String>,
}

// =============================================================================
// Status Events
// =============================================================================

/// Status events emitted by the call state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum CallStatus {
    /// A connection attempt started
    Connecting,
    /// ICE reached connected/completed
    Connected {
        /// Identifier issued by the relay
        call_id: String,
    },
    /// All resources released, state is `Idle`
    Disconnected,
    /// The usable flag flipped
    UsableChanged(bool),
    /// A reconnect attempt was scheduled
    Reconnecting {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Configured cap
        max_attempts: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// Retries exhausted; explicit user action required
    ReconnectExhausted {
        /// Attempts made
        attempts: u32,
    },
    /// A failure observers should surface
    Error(CallError),
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Connecting => write!(f, "connecting"),
            CallStatus::Connected { call_id } => write!(f, "connected ({call_id})"),
            CallStatus::Disconnected => write!(f, "disconnected"),
            CallStatus::UsableChanged(usable) => write!(f, "usable={usable}"),
            CallStatus::Reconnecting {
                attempt,
                max_attempts,
                delay,
            } => write!(
                f,
                "reconnecting {attempt}/{max_attempts} in {}ms",
                delay.as_millis()
            ),
            CallStatus::ReconnectExhausted { attempts } => {
                write!(f, "reconnect exhausted after {attempts} attempts")
            }
            CallStatus::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Callback type for call status events.
pub type StatusCallback =
    Arc<dyn Fn(CallStatus) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Settings
// =============================================================================

/// Parameters of a call, resolved from the client configuration.
#[derive(Debug, Clone)]
pub struct CallSettings {
    /// Voice requested from the relay
    pub voice: String,
    /// Whether the relay should run input transcription
    pub enable_stt: bool,
    /// Capture constraints for the local microphone
    pub audio: AudioConstraints,
    /// Bound on relay submission plus ICE negotiation
    pub connect_timeout: Duration,
    /// Bound on the best-effort hangup notification
    pub hangup_timeout: Duration,
    /// Session handshake sent once the control channel opens
    pub session: SessionConfig,
    /// Automatic reconnection policy
    pub reconnection: ReconnectionConfig,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            enable_stt: true,
            audio: AudioConstraints::default(),
            connect_timeout: Duration::from_secs(10),
            hangup_timeout: Duration::from_secs(2),
            session: SessionConfig::default(),
            reconnection: ReconnectionConfig::default(),
        }
    }
}
