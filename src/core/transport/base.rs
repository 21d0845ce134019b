//! Base traits and types for the media transport.
//!
//! The transport owns the capture track and the peer connection. The call
//! state machine drives it one step at a time so each step can fail into
//! its own error kind.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::core::call::CallResult;

/// Label of the control data channel.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// Default capture sample rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

// =============================================================================
// Sub-states
// =============================================================================

/// ICE connection state as observed by the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceState {
    /// Media can flow.
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, IceState::Connected | IceState::Completed)
    }

    /// The path is gone and will not come back on its own.
    #[inline]
    pub fn is_lost(&self) -> bool {
        matches!(
            self,
            IceState::Disconnected | IceState::Failed | IceState::Closed
        )
    }
}

impl fmt::Display for IceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IceState::New => "new",
            IceState::Checking => "checking",
            IceState::Connected => "connected",
            IceState::Completed => "completed",
            IceState::Disconnected => "disconnected",
            IceState::Failed => "failed",
            IceState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Control channel ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Offer/answer signaling state of the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::HaveLocalPranswer => "have-local-pranswer",
            SignalingState::HaveRemotePranswer => "have-remote-pranswer",
            SignalingState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Audio
// =============================================================================

/// Capture constraints for the local microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Channel count; only mono is supported
    pub channels: u16,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

impl AudioConstraints {
    /// Samples in one 20ms frame.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate / 50) as usize * self.channels as usize
    }
}

/// Handle to a live capture track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAudioTrack {
    /// Track identifier
    pub id: String,
    /// Capture sample rate in Hz
    pub sample_rate: u32,
}

// =============================================================================
// Events
// =============================================================================

/// Events raised by the transport's network callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// ICE connection state changed
    IceStateChanged(IceState),
    /// Control channel ready state changed
    ControlChannelStateChanged(ChannelState),
    /// One inbound control frame, undecoded
    ControlMessage(String),
    /// First remote audio packet arrived
    RemoteAudioStarted,
    /// The peer connection failed
    Failed(String),
}

/// Sender half handed to the transport on `open`.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

// =============================================================================
// Transport Trait
// =============================================================================

/// Media plane of one call: capture track, audio sender, control channel.
///
/// Every method takes `&self`; implementations hold their peer connection
/// behind interior mutability because network callbacks share it.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Acquire a mono capture stream.
    ///
    /// Returns the existing track when one is already live.
    /// Fails with `CallError::DeviceError` when no device is available.
    async fn acquire_local_audio(
        &self,
        constraints: &AudioConstraints,
    ) -> CallResult<LocalAudioTrack>;

    /// The live capture track, if any.
    fn local_audio(&self) -> Option<LocalAudioTrack>;

    /// Create the peer connection with exactly one audio sender (bound to an
    /// idle outbound track that carries no frames until a capture track is
    /// attached) and the ordered, reliable control channel.
    async fn open(&self, events: TransportEventSender) -> CallResult<()>;

    /// Create the offer, set it as the local description and return the
    /// complete SDP.
    async fn create_offer(&self) -> CallResult<String>;

    /// Current signaling state; `Closed` when no peer connection exists.
    fn signaling_state(&self) -> SignalingState;

    /// Apply the remote answer.
    async fn apply_answer(&self, sdp: &str) -> CallResult<()>;

    /// Route a capture track into the single audio sender.
    ///
    /// `None` stops transmission entirely; no frames are sent. Toggling
    /// never adds or replaces the sender.
    async fn attach_to_sender(&self, track: Option<&LocalAudioTrack>) -> CallResult<()>;

    /// Identity of the audio sender created by `open`.
    fn sender_id(&self) -> Option<String>;

    /// Number of audio senders on the peer connection.
    async fn sender_count(&self) -> usize;

    /// Send one text frame on the control channel.
    async fn send_control(&self, text: &str) -> CallResult<()>;

    /// Stop local tracks, close the channel and the peer connection.
    /// Safe to call repeatedly.
    async fn close(&self);
}
