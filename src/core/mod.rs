pub mod call;
pub mod control;
pub mod relay;
pub mod session;
pub mod transport;
pub mod turn;

// Re-export commonly used types for convenience
pub use call::{
    CallError, CallResult, CallSettings, CallState, CallStateMachine, CallStatus,
    ConnectFailure, Readiness, ReconnectionConfig, StatusCallback,
};

pub use control::{ClientEvent, ControlCodec, ServerEvent, SessionConfig};

pub use relay::{HttpRelayConfig, HttpSignalingRelay, OfferRequest, RelayAnswer, SignalingRelay};

pub use session::{SessionCommand, SessionHandle, VoiceSession};

pub use transport::{
    AudioConstraints, CaptureSource, MediaTransport, NoCapture, PlaybackSink, WavCapture,
    WavRecorder, WebRtcConfig, WebRtcTransport,
};

pub use turn::{TranscriptResult, TranscriptRole, TurnCoordinator, TurnPhase};
