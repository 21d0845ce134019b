//! Signaling relay client.
//!
//! The relay accepts the local SDP offer over plain HTTP, forwards it to
//! the AI service and returns the SDP answer plus an opaque call id.

mod base;
mod client;

pub use base::{
    CALL_ID_HEADER, DEFAULT_CALLS_PATH, OfferRequest, RelayAnswer, SESSION_ID_HEADER,
    SignalingRelay, parse_call_id,
};
pub use client::{HttpRelayConfig, HttpSignalingRelay, SDP_CONTENT_TYPE};
