//! Control channel codec and message types.
//!
//! The control channel is an ordered, reliable data channel on the same
//! peer connection as the audio. It carries the session handshake, VAD and
//! transcription events, and the response lifecycle.

mod codec;
pub mod messages;

pub use codec::ControlCodec;
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, ResponseRef,
    ServerEvent, SessionConfig, TurnDetection,
};
