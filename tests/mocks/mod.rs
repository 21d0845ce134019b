//! Scripted media transport and signaling relay.
//!
//! Both record every call made against them so tests can assert on the
//! exact sequence of sender swaps, control frames and relay requests.

// Not every test binary uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use voice_call::core::call::{CallError, CallResult, CallStatus, ConnectFailure, StatusCallback};
use voice_call::core::relay::{OfferRequest, RelayAnswer, SignalingRelay};
use voice_call::core::transport::{
    AudioConstraints, ChannelState, IceState, LocalAudioTrack, MediaTransport, SignalingState,
    TransportEvent, TransportEventSender,
};

pub const MOCK_SENDER_ID: &str = "audio-sender-0";

// =============================================================================
// Transport
// =============================================================================

#[derive(Default)]
struct TransportState {
    events: Option<TransportEventSender>,
    local: Option<LocalAudioTrack>,
    acquire_error: Option<String>,
    open: bool,
    signaling: SignalingState,
    offer_state: Option<SignalingState>,
    attach_calls: Vec<Option<String>>,
    sent: Vec<String>,
    fail_control: bool,
    tracks_created: u32,
    opens: usize,
    closes: usize,
}

/// In-memory [`MediaTransport`].
///
/// With `auto_connect` (the default) applying the answer opens the control
/// channel and then reports ICE connected.
pub struct MockTransport {
    state: Mutex<TransportState>,
    auto_connect: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransportState::default()),
            auto_connect: true,
        }
    }

    /// Leave ICE and the control channel to the test.
    pub fn manual() -> Self {
        Self {
            auto_connect: false,
            ..Self::new()
        }
    }

    /// Make every capture request fail with a device error.
    pub fn fail_acquire(&self, reason: &str) {
        self.state.lock().acquire_error = Some(reason.to_string());
    }

    pub fn allow_acquire(&self) {
        self.state.lock().acquire_error = None;
    }

    /// Signaling state reported after `create_offer`.
    pub fn set_offer_state(&self, state: SignalingState) {
        self.state.lock().offer_state = Some(state);
    }

    pub fn fail_control(&self, fail: bool) {
        self.state.lock().fail_control = fail;
    }

    /// Push an event as if a network callback fired.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.state.lock().events {
            let _ = events.send(event);
        }
    }

    pub fn emit_frame(&self, frame: &str) {
        self.emit(TransportEvent::ControlMessage(frame.to_string()));
    }

    pub fn attach_calls(&self) -> Vec<Option<String>> {
        self.state.lock().attach_calls.clone()
    }

    pub fn sent_frames(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// `type` of every frame sent on the control channel.
    pub fn sent_types(&self) -> Vec<String> {
        self.sent_frames()
            .iter()
            .filter_map(|frame| serde_json::from_str::<Value>(frame).ok())
            .filter_map(|value| value.get("type").and_then(Value::as_str).map(String::from))
            .collect()
    }

    pub fn count_sent(&self, event_type: &str) -> usize {
        self.sent_types().iter().filter(|t| *t == event_type).count()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn acquire_local_audio(
        &self,
        constraints: &AudioConstraints,
    ) -> CallResult<LocalAudioTrack> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.acquire_error {
            return Err(CallError::DeviceError(reason.clone()));
        }
        if let Some(track) = &state.local {
            return Ok(track.clone());
        }
        state.tracks_created += 1;
        let track = LocalAudioTrack {
            id: format!("mic-{}", state.tracks_created),
            sample_rate: constraints.sample_rate,
        };
        state.local = Some(track.clone());
        Ok(track)
    }

    fn local_audio(&self) -> Option<LocalAudioTrack> {
        self.state.lock().local.clone()
    }

    async fn open(&self, events: TransportEventSender) -> CallResult<()> {
        let mut state = self.state.lock();
        state.events = Some(events);
        state.open = true;
        state.signaling = SignalingState::Stable;
        state.opens += 1;
        Ok(())
    }

    async fn create_offer(&self) -> CallResult<String> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(CallError::NotConnected);
        }
        state.signaling = state.offer_state.unwrap_or(SignalingState::HaveLocalOffer);
        Ok("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mock offer\r\n".to_string())
    }

    fn signaling_state(&self) -> SignalingState {
        let state = self.state.lock();
        if state.open {
            state.signaling
        } else {
            SignalingState::Closed
        }
    }

    async fn apply_answer(&self, _sdp: &str) -> CallResult<()> {
        let mut state = self.state.lock();
        state.signaling = SignalingState::Stable;
        if self.auto_connect
            && let Some(events) = &state.events
        {
            let _ = events.send(TransportEvent::ControlChannelStateChanged(ChannelState::Open));
            let _ = events.send(TransportEvent::IceStateChanged(IceState::Connected));
        }
        Ok(())
    }

    async fn attach_to_sender(&self, track: Option<&LocalAudioTrack>) -> CallResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(CallError::NotConnected);
        }
        state.attach_calls.push(track.map(|t| t.id.clone()));
        Ok(())
    }

    fn sender_id(&self) -> Option<String> {
        self.state
            .lock()
            .open
            .then(|| MOCK_SENDER_ID.to_string())
    }

    async fn sender_count(&self) -> usize {
        usize::from(self.state.lock().open)
    }

    async fn send_control(&self, text: &str) -> CallResult<()> {
        let mut state = self.state.lock();
        if state.fail_control {
            return Err(CallError::ChannelError("channel closed".to_string()));
        }
        state.sent.push(text.to_string());
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.closes += 1;
        state.events = None;
        state.local = None;
        state.open = false;
    }
}

// =============================================================================
// Relay
// =============================================================================

/// Scripted [`SignalingRelay`]. Queued results are used first, then the
/// fallback.
pub struct MockRelay {
    script: Mutex<VecDeque<CallResult<RelayAnswer>>>,
    fallback: Mutex<CallResult<RelayAnswer>>,
    delay: Mutex<Option<Duration>>,
    offers: Mutex<Vec<OfferRequest>>,
    hangups: Mutex<Vec<String>>,
    submits: AtomicUsize,
}

impl MockRelay {
    pub fn answering(call_id: &str) -> Self {
        Self::with_fallback(Ok(answer(call_id)))
    }

    pub fn failing(error: CallError) -> Self {
        Self::with_fallback(Err(error))
    }

    fn with_fallback(fallback: CallResult<RelayAnswer>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            delay: Mutex::new(None),
            offers: Mutex::new(Vec::new()),
            hangups: Mutex::new(Vec::new()),
            submits: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, result: CallResult<RelayAnswer>) {
        self.script.lock().push_back(result);
    }

    pub fn set_fallback(&self, result: CallResult<RelayAnswer>) {
        *self.fallback.lock() = result;
    }

    /// Hold every offer this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn offers(&self) -> Vec<OfferRequest> {
        self.offers.lock().clone()
    }

    pub fn hangups(&self) -> Vec<String> {
        self.hangups.lock().clone()
    }
}

#[async_trait]
impl SignalingRelay for MockRelay {
    async fn submit_offer(&self, offer: &OfferRequest) -> CallResult<RelayAnswer> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.offers.lock().push(offer.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().clone())
    }

    async fn hangup(&self, call_id: &str) -> CallResult<()> {
        self.hangups.lock().push(call_id.to_string());
        Ok(())
    }
}

pub fn answer(call_id: &str) -> RelayAnswer {
    RelayAnswer {
        sdp: "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=mock answer\r\n".to_string(),
        call_id: call_id.to_string(),
    }
}

pub fn relay_error(status: u16) -> CallError {
    CallError::ConnectError(ConnectFailure::Relay {
        status,
        body: "upstream unavailable".to_string(),
    })
}

// =============================================================================
// Status Recording
// =============================================================================

pub type StatusLog = Arc<Mutex<Vec<CallStatus>>>;

/// A status callback that appends to a shared log.
pub fn status_recorder() -> (StatusCallback, StatusLog) {
    let log: StatusLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback: StatusCallback = Arc::new(move |status: CallStatus| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().push(status);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    (callback, log)
}
