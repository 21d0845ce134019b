//! HTTP client for the signaling relay.
//!
//! The offer is POSTed as a raw `application/sdp` body; the answer comes
//! back as the raw response body with the call identifier in a header.

use async_trait::async_trait;
use http::header::{CONTENT_TYPE, HeaderMap};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::base::{
    CALL_ID_HEADER, OfferRequest, RelayAnswer, SESSION_ID_HEADER, SignalingRelay, parse_call_id,
};
use crate::core::call::{CallError, CallResult, ConnectFailure};

/// Content type of session-description payloads.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

const USER_AGENT: &str = concat!("voice-call/", env!("CARGO_PKG_VERSION"));

/// Longest response body kept in a relay error.
const MAX_ERROR_BODY: usize = 512;

/// Relay endpoint configuration.
#[derive(Debug, Clone)]
pub struct HttpRelayConfig {
    /// Base address, e.g. `http://127.0.0.1:8000`
    pub base_url: String,
    /// Offer endpoint path, e.g. `/api/realtime/calls`
    pub calls_path: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

/// Relay client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSignalingRelay {
    config: HttpRelayConfig,
    calls_url: Url,
    http_client: Client,
}

impl HttpSignalingRelay {
    pub fn new(config: HttpRelayConfig) -> CallResult<Self> {
        let calls_url = Url::parse(&config.base_url)
            .and_then(|base| base.join(&config.calls_path))
            .map_err(|e| {
                CallError::InvalidConfiguration(format!(
                    "Invalid relay address {}{}: {e}",
                    config.base_url, config.calls_path
                ))
            })?;

        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                CallError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            calls_url,
            http_client,
        })
    }

    /// Offer endpoint with query parameters applied.
    pub fn offer_url(&self, offer: &OfferRequest) -> Url {
        let mut url = self.calls_url.clone();
        url.query_pairs_mut()
            .append_pair("voice", &offer.voice)
            .append_pair("enable_stt", if offer.enable_stt { "true" } else { "false" });
        url
    }

    /// Hangup endpoint for a call.
    pub fn hangup_url(&self, call_id: &str) -> CallResult<Url> {
        let mut url = self.calls_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CallError::InvalidConfiguration(format!(
                    "Relay address cannot carry a path: {}",
                    self.calls_url
                ))
            })?
            .pop_if_empty()
            .push(call_id)
            .push("hangup");
        Ok(url)
    }

    fn call_id_from(&self, headers: &HeaderMap) -> CallResult<String> {
        let raw = headers
            .get(CALL_ID_HEADER)
            .or_else(|| headers.get(SESSION_ID_HEADER))
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        parse_call_id(raw.as_deref(), &self.config.calls_path)
    }
}

#[async_trait]
impl SignalingRelay for HttpSignalingRelay {
    async fn submit_offer(&self, offer: &OfferRequest) -> CallResult<RelayAnswer> {
        let url = self.offer_url(offer);
        debug!("Submitting offer ({} bytes) to {}", offer.sdp.len(), url);

        let response = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer.sdp.clone())
            .send()
            .await
            .map_err(|e| ConnectFailure::Network(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectFailure::Network(format!("Failed to read answer: {e}")))?;

        if !status.is_success() {
            warn!("Relay rejected offer: HTTP {}", status);
            return Err(ConnectFailure::Relay {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            }
            .into());
        }

        let call_id = self.call_id_from(&headers)?;

        if body.trim().is_empty() {
            return Err(ConnectFailure::Relay {
                status: status.as_u16(),
                body: "empty answer".to_string(),
            }
            .into());
        }

        info!("Relay answered call {} ({} bytes)", call_id, body.len());
        Ok(RelayAnswer { sdp: body, call_id })
    }

    async fn hangup(&self, call_id: &str) -> CallResult<()> {
        let url = self.hangup_url(call_id)?;
        let response = self
            .http_client
            .post(url)
            .send()
            .await
            .map_err(|e| ConnectFailure::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!("Relay hung up call {}", call_id);
        } else {
            // Already gone on the relay side; nothing left to release.
            debug!("Relay hangup for {} returned HTTP {}", call_id, status);
        }
        Ok(())
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
