//! Media transport: peer connection, audio sender and control channel.

pub mod audio;
mod base;
mod webrtc;

pub use audio::{CaptureSource, CaptureStream, NoCapture, PlaybackSink, WavCapture, WavRecorder};
pub use base::{
    AudioConstraints, CONTROL_CHANNEL_LABEL, ChannelState, DEFAULT_SAMPLE_RATE, IceState,
    LocalAudioTrack, MediaTransport, SignalingState, TransportEvent, TransportEventSender,
};
pub use webrtc::{DEFAULT_ICE_SERVER, WebRtcConfig, WebRtcTransport};
