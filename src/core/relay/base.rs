//! Signaling relay interface.

use async_trait::async_trait;

use crate::core::call::{CallError, CallResult};

/// Response header carrying the call identifier.
pub const CALL_ID_HEADER: &str = "X-Call-Id";

/// Older relays only send the session header.
pub const SESSION_ID_HEADER: &str = "X-Session-Id";

/// Default path of the offer endpoint.
pub const DEFAULT_CALLS_PATH: &str = "/api/realtime/calls";

/// Offer submitted to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferRequest {
    /// Complete local SDP
    pub sdp: String,
    /// Voice selection
    pub voice: String,
    /// Whether the relay should run input transcription
    pub enable_stt: bool,
}

/// Relay answer to a submitted offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAnswer {
    /// Remote SDP
    pub sdp: String,
    /// Identifier used for hangup
    pub call_id: String,
}

/// The relay that forwards the offer to the AI service.
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Submit the local offer and return the remote answer.
    async fn submit_offer(&self, offer: &OfferRequest) -> CallResult<RelayAnswer>;

    /// Notify the relay that the call ended. Best effort.
    async fn hangup(&self, call_id: &str) -> CallResult<()>;
}

/// Validate the call identifier header.
///
/// Rejects a missing or blank value and the last segment of the offer
/// endpoint's own path (a relay that echoes its route is misconfigured).
pub fn parse_call_id(raw: Option<&str>, calls_path: &str) -> CallResult<String> {
    let Some(raw) = raw else {
        return Err(CallError::InvalidCallId(None));
    };

    let id = raw.trim();
    let endpoint_segment = calls_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    if id.is_empty() || id == endpoint_segment || id.contains('/') {
        return Err(CallError::InvalidCallId(Some(raw.to_string())));
    }

    Ok(id.to_string())
}
