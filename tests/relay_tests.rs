//! Signaling relay tests against a mock HTTP server.

mod mocks;

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voice_call::core::call::{CallError, CallSettings, CallState, CallStateMachine, ConnectFailure};
use voice_call::core::relay::{
    DEFAULT_CALLS_PATH, HttpRelayConfig, HttpSignalingRelay, OfferRequest, SignalingRelay,
};

use mocks::MockTransport;

const OFFER_SDP: &str = "v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\ns=-\r\n";
const ANSWER_SDP: &str = "v=0\r\no=- 99 2 IN IP4 10.0.0.1\r\ns=-\r\n";

fn relay_for(server: &MockServer) -> HttpSignalingRelay {
    HttpSignalingRelay::new(HttpRelayConfig {
        base_url: server.uri(),
        calls_path: DEFAULT_CALLS_PATH.to_string(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn offer() -> OfferRequest {
    OfferRequest {
        sdp: OFFER_SDP.to_string(),
        voice: "alloy".to_string(),
        enable_stt: true,
    }
}

#[tokio::test]
async fn test_submit_offer_returns_answer_and_call_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEFAULT_CALLS_PATH))
        .and(query_param("voice", "alloy"))
        .and(query_param("enable_stt", "true"))
        .and(header("content-type", "application/sdp"))
        .and(body_string(OFFER_SDP))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Call-Id", "abc123")
                .set_body_string(ANSWER_SDP),
        )
        .expect(1)
        .mount(&server)
        .await;

    let answer = assert_ok!(relay_for(&server).submit_offer(&offer()).await);
    assert_eq!(answer.call_id, "abc123");
    assert_eq!(answer.sdp, ANSWER_SDP);
}

#[tokio::test]
async fn test_session_header_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEFAULT_CALLS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Session-Id", "sess_42")
                .set_body_string(ANSWER_SDP),
        )
        .mount(&server)
        .await;

    let answer = assert_ok!(relay_for(&server).submit_offer(&offer()).await);
    assert_eq!(answer.call_id, "sess_42");
}

#[tokio::test]
async fn test_endpoint_segment_call_id_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEFAULT_CALLS_PATH))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Call-Id", "calls")
                .set_body_string(ANSWER_SDP),
        )
        .mount(&server)
        .await;

    let err = assert_err!(relay_for(&server).submit_offer(&offer()).await);
    assert_eq!(err, CallError::InvalidCallId(Some("calls".to_string())));
}

#[tokio::test]
async fn test_missing_call_id_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEFAULT_CALLS_PATH))
        .respond_with(ResponseTemplate::new(201).set_body_string(ANSWER_SDP))
        .mount(&server)
        .await;

    let err = assert_err!(relay_for(&server).submit_offer(&offer()).await);
    assert_eq!(err, CallError::InvalidCallId(None));
}

#[tokio::test]
async fn test_relay_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEFAULT_CALLS_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream timeout"))
        .mount(&server)
        .await;

    let err = assert_err!(relay_for(&server).submit_offer(&offer()).await);
    assert_eq!(
        err,
        CallError::ConnectError(ConnectFailure::Relay {
            status: 502,
            body: "upstream timeout".to_string(),
        })
    );
    assert!(err.triggers_reconnect());
}

#[tokio::test]
async fn test_empty_answer_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEFAULT_CALLS_PATH))
        .respond_with(ResponseTemplate::new(201).insert_header("X-Call-Id", "abc123"))
        .mount(&server)
        .await;

    let err = assert_err!(relay_for(&server).submit_offer(&offer()).await);
    assert!(matches!(
        err,
        CallError::ConnectError(ConnectFailure::Relay { .. })
    ));
}

#[tokio::test]
async fn test_unreachable_relay_is_network_error() {
    let relay = HttpSignalingRelay::new(HttpRelayConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        calls_path: DEFAULT_CALLS_PATH.to_string(),
        request_timeout: Duration::from_secs(2),
    })
    .unwrap();

    let err = assert_err!(relay.submit_offer(&offer()).await);
    assert!(matches!(
        err,
        CallError::ConnectError(ConnectFailure::Network(_))
    ));
}

#[tokio::test]
async fn test_hangup_posts_to_call_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/realtime/calls/abc123/hangup"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(relay_for(&server).hangup("abc123").await);
}

#[tokio::test]
async fn test_hangup_of_unknown_call_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert_ok!(relay_for(&server).hangup("gone").await);
}

#[tokio::test]
async fn test_call_over_http_relay_notifies_hangup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEFAULT_CALLS_PATH))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Call-Id", "call_7")
                .set_body_string(ANSWER_SDP),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/realtime/calls/call_7/hangup"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Arc::new(MockTransport::new());
    let mut machine = CallStateMachine::new(
        transport,
        Arc::new(relay_for(&server)),
        CallSettings::default(),
    );

    let readiness = assert_ok!(machine.connect().await);
    assert_eq!(readiness.state, CallState::Connected);
    assert_eq!(readiness.call_id.as_deref(), Some("call_7"));

    let readiness = machine.disconnect().await;
    assert_eq!(readiness.state, CallState::Idle);

    server.verify().await;
}
