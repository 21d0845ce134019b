//! The call state machine.
//!
//! Owns the single active call: drives the transport through the
//! offer/answer exchange, tracks the ICE and control channel sub-states,
//! computes `usable`, and runs the reconnection policy. All mutation happens
//! through `&mut self` on one task; network callbacks reach it only as
//! [`TransportEvent`]s pulled by [`CallStateMachine::next_input`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{
    CallError, CallResult, CallSettings, CallState, CallStatus, ConnectFailure, Readiness,
    StatusCallback,
};
use super::reconnect::{HangupSignal, ReconnectPolicy, RetryDecision};
use crate::core::control::{ClientEvent, ControlCodec, ServerEvent};
use crate::core::relay::{OfferRequest, SignalingRelay};
use crate::core::transport::{
    ChannelState, IceState, MediaTransport, SignalingState, TransportEvent,
};

/// Progress of the `session.update` handshake for the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    /// Not sent yet, or re-armed by an error after an ack
    Pending,
    /// Sent, waiting for `session.updated`
    Sent,
    /// Acknowledged by the remote service
    Acked,
    /// An error arrived before the resend was acknowledged
    Exhausted,
}

/// One unit of work for [`CallStateMachine::handle_input`].
#[derive(Debug)]
pub enum MachineInput {
    /// A transport event, or `None` when the event stream closed
    Transport(Option<TransportEvent>),
    /// The scheduled reconnect delay elapsed
    ReconnectDue,
}

/// Lifecycle owner of the single active call.
pub struct CallStateMachine {
    transport: Arc<dyn MediaTransport>,
    relay: Arc<dyn SignalingRelay>,
    settings: CallSettings,
    codec: ControlCodec,

    state: CallState,
    call_id: Option<String>,
    ice: IceState,
    channel: ChannelState,
    session_ready: bool,
    usable: bool,
    handshake: Handshake,

    mic_enabled: bool,
    paused: bool,
    /// Whether the sender currently carries the capture track; `None` when
    /// no peer connection exists
    attached: Option<bool>,

    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    backlog: VecDeque<ServerEvent>,

    policy: ReconnectPolicy,
    hangup: HangupSignal,
    reconnect_at: Option<Instant>,
    status_callback: Option<StatusCallback>,
}

impl CallStateMachine {
    pub fn new(
        transport: Arc<dyn MediaTransport>,
        relay: Arc<dyn SignalingRelay>,
        settings: CallSettings,
    ) -> Self {
        let policy = ReconnectPolicy::new(settings.reconnection.clone());
        Self {
            transport,
            relay,
            settings,
            codec: ControlCodec::new(),
            state: CallState::Idle,
            call_id: None,
            ice: IceState::New,
            channel: ChannelState::Connecting,
            session_ready: false,
            usable: false,
            handshake: Handshake::Pending,
            mic_enabled: true,
            paused: false,
            attached: None,
            events: None,
            backlog: VecDeque::new(),
            policy,
            hangup: HangupSignal::new(),
            reconnect_at: None,
            status_callback: None,
        }
    }

    /// Register the status observer.
    pub fn on_status(&mut self, callback: StatusCallback) {
        self.status_callback = Some(callback);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> CallState {
        self.state
    }

    /// `ice ready && channel open && session ready`, while connected.
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    pub fn ice_state(&self) -> IceState {
        self.ice
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel
    }

    pub fn session_ready(&self) -> bool {
        self.session_ready
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.policy.attempts()
    }

    /// Whether a reconnect timer is armed.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_at.is_some()
    }

    pub fn settings(&self) -> &CallSettings {
        &self.settings
    }

    /// Shared hang-up flag. Raising it aborts an in-flight connect attempt.
    pub fn hangup_signal(&self) -> HangupSignal {
        self.hangup.clone()
    }

    pub fn readiness(&self) -> Readiness {
        Readiness {
            state: self.state,
            usable: self.usable,
            call_id: self.call_id.clone(),
        }
    }

    // =========================================================================
    // Connect / Disconnect
    // =========================================================================

    /// Start a call. A no-op returning the current readiness unless `Idle`.
    ///
    /// Re-arms the hang-up flag and gives the reconnection policy a fresh
    /// budget: this is the explicit user restart.
    pub async fn connect(&mut self) -> CallResult<Readiness> {
        if self.state != CallState::Idle {
            debug!("connect() ignored in state {}", self.state);
            return Ok(self.readiness());
        }

        self.hangup.rearm();
        self.policy.reset();
        self.reconnect_at = None;
        self.attempt_connect().await
    }

    /// End the call. Always raises the hang-up flag and cancels a pending
    /// reconnect; releases resources unless already `Idle`/`Disconnecting`.
    pub async fn disconnect(&mut self) -> Readiness {
        self.hangup.hang_up();
        self.reconnect_at = None;
        self.policy.cancel();

        match self.state {
            CallState::Idle | CallState::Disconnecting => {
                debug!("disconnect() ignored in state {}", self.state);
            }
            CallState::Connecting | CallState::Connected => {
                info!("Disconnecting call {:?}", self.call_id);
                self.teardown().await;
            }
        }
        self.readiness()
    }

    async fn attempt_connect(&mut self) -> CallResult<Readiness> {
        self.transition(CallState::Connecting)?;
        self.emit(CallStatus::Connecting).await;

        match self.establish().await {
            Ok(call_id) => {
                self.transition(CallState::Connected)?;
                info!("Call {} connected (ICE {})", call_id, self.ice);
                self.emit(CallStatus::Connected { call_id }).await;
                self.refresh_usable().await;
                self.maybe_send_handshake().await;
                Ok(self.readiness())
            }
            Err(e) => {
                warn!("Connection attempt failed: {}", e);
                self.emit(CallStatus::Error(e.clone())).await;
                self.teardown().await;
                if e.triggers_reconnect() {
                    self.schedule_reconnect().await;
                }
                Err(e)
            }
        }
    }

    /// The connect sequence. Each step short-circuits into its own error
    /// kind; the caller turns any error into a teardown.
    async fn establish(&mut self) -> CallResult<String> {
        let token = self.hangup.token();
        let limit = self.settings.connect_timeout;
        let deadline = Instant::now() + limit;

        self.transport.close().await;
        self.attached = None;

        if self.mic_enabled
            && let Err(e) = self
                .transport
                .acquire_local_audio(&self.settings.audio)
                .await
        {
            warn!("Continuing without local audio: {}", e);
            self.emit(CallStatus::Error(e)).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.open(tx).await?;
        self.events = Some(rx);
        self.attached = Some(false);
        self.sync_outbound().await;

        let offer = guarded(deadline, limit, &token, self.transport.create_offer()).await?;
        self.expect_signaling(SignalingState::HaveLocalOffer)?;

        let request = OfferRequest {
            sdp: offer,
            voice: self.settings.voice.clone(),
            enable_stt: self.settings.enable_stt,
        };
        let answer = guarded(deadline, limit, &token, self.relay.submit_offer(&request)).await?;

        if token.is_cancelled() {
            return Err(ConnectFailure::Cancelled.into());
        }
        self.expect_signaling(SignalingState::HaveLocalOffer)?;
        self.transport.apply_answer(&answer.sdp).await?;
        self.call_id = Some(answer.call_id.clone());
        debug!("Answer applied for call {}", answer.call_id);

        self.await_ice(deadline, limit, &token).await?;
        Ok(answer.call_id)
    }

    fn expect_signaling(&self, expected: SignalingState) -> CallResult<()> {
        let actual = self.transport.signaling_state();
        if actual != expected {
            error!("Signaling state is {}, expected {}", actual, expected);
            return Err(CallError::SignalingStateError { expected, actual });
        }
        Ok(())
    }

    async fn await_ice(
        &mut self,
        deadline: Instant,
        limit: Duration,
        token: &CancellationToken,
    ) -> CallResult<()> {
        loop {
            if self.ice.is_ready() {
                return Ok(());
            }
            let Some(events) = self.events.as_mut() else {
                return Err(ConnectFailure::Transport("event stream closed".to_string()).into());
            };

            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ConnectFailure::Cancelled.into()),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ConnectFailure::Timeout(limit).into());
                }
                event = events.recv() => event,
            };

            match event {
                None => {
                    return Err(
                        ConnectFailure::Transport("event stream closed".to_string()).into(),
                    );
                }
                Some(TransportEvent::Failed(reason)) => {
                    return Err(ConnectFailure::Transport(reason).into());
                }
                Some(TransportEvent::IceStateChanged(state)) => {
                    debug!("ICE {} while connecting", state);
                    self.ice = state;
                    if matches!(state, IceState::Failed | IceState::Closed) {
                        return Err(ConnectFailure::Transport(format!("ICE {state}")).into());
                    }
                }
                Some(other) => self.absorb(other),
            }
        }
    }

    /// Release everything the call owns and return to `Idle`.
    async fn teardown(&mut self) {
        if let Err(e) = self.transition(CallState::Disconnecting) {
            debug!("Teardown skipped: {}", e);
            return;
        }
        self.refresh_usable().await;

        if let Some(call_id) = self.call_id.take() {
            self.notify_hangup(&call_id).await;
        }
        self.transport.close().await;

        self.events = None;
        self.backlog.clear();
        self.ice = IceState::New;
        self.channel = ChannelState::Connecting;
        self.session_ready = false;
        self.handshake = Handshake::Pending;
        self.attached = None;

        if let Err(e) = self.transition(CallState::Idle) {
            error!("Teardown could not reach Idle: {}", e);
        }
        info!("Call resources released");
        self.emit(CallStatus::Disconnected).await;
    }

    async fn notify_hangup(&self, call_id: &str) {
        match tokio::time::timeout(self.settings.hangup_timeout, self.relay.hangup(call_id)).await
        {
            Ok(Ok(())) => debug!("Relay notified of hangup for {}", call_id),
            Ok(Err(e)) => warn!("Hangup notification for {} failed: {}", call_id, e),
            Err(_) => warn!(
                "Hangup notification for {} timed out after {:?}",
                call_id, self.settings.hangup_timeout
            ),
        }
    }

    fn transition(&mut self, to: CallState) -> CallResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(CallError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        debug!("Call state {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    /// Wait for the next transport event or reconnect deadline.
    ///
    /// Cancel-safe: nothing is consumed unless this future completes.
    pub async fn next_input(&mut self) -> MachineInput {
        let reconnect_at = self.reconnect_at;
        let events = self.events.as_mut();

        tokio::select! {
            event = async {
                match events {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => MachineInput::Transport(event),
            _ = async {
                match reconnect_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => MachineInput::ReconnectDue,
        }
    }

    /// Apply one input. Returns the decoded control events that are now
    /// ready for the turn coordinator, in arrival order.
    pub async fn handle_input(&mut self, input: MachineInput) -> Vec<ServerEvent> {
        match input {
            MachineInput::Transport(Some(event)) => self.on_transport_event(event).await,
            MachineInput::Transport(None) => {
                self.events = None;
                if self.state == CallState::Connected {
                    self.on_transport_lost("transport event stream closed".to_string())
                        .await;
                }
            }
            MachineInput::ReconnectDue => self.on_reconnect_due().await,
        }
        self.drain_events()
    }

    /// Control events decoded but not yet handed out.
    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        self.backlog.drain(..).collect()
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IceStateChanged(state) => {
                debug!("ICE {} -> {}", self.ice, state);
                self.ice = state;
                if self.state == CallState::Connected && state.is_lost() {
                    self.on_transport_lost(format!("ICE {state}")).await;
                    return;
                }
            }
            TransportEvent::ControlChannelStateChanged(state) => {
                debug!("Control channel {} -> {}", self.channel, state);
                self.channel = state;
                if self.state == CallState::Connected && state == ChannelState::Closed {
                    self.on_transport_lost("control channel closed".to_string())
                        .await;
                    return;
                }
            }
            TransportEvent::Failed(reason) => {
                if self.state == CallState::Connected {
                    self.on_transport_lost(reason).await;
                    return;
                }
                debug!("Ignoring transport failure in state {}: {}", self.state, reason);
            }
            other => self.absorb(other),
        }
        self.refresh_usable().await;
        self.maybe_send_handshake().await;
    }

    /// Record events that never change the call state.
    fn absorb(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ControlChannelStateChanged(state) => self.channel = state,
            TransportEvent::ControlMessage(frame) => {
                if let Some(decoded) = self.codec.decode(&frame) {
                    self.backlog.push_back(decoded);
                }
            }
            TransportEvent::RemoteAudioStarted => info!("Remote audio flowing"),
            TransportEvent::IceStateChanged(state) => self.ice = state,
            TransportEvent::Failed(reason) => debug!("Transport failure absorbed: {}", reason),
        }
    }

    async fn on_transport_lost(&mut self, reason: String) {
        warn!("Transport lost on call {:?}: {}", self.call_id, reason);
        let error = CallError::ConnectError(ConnectFailure::Transport(reason));
        self.emit(CallStatus::Error(error)).await;
        self.teardown().await;
        self.schedule_reconnect().await;
    }

    // =========================================================================
    // Reconnection
    // =========================================================================

    async fn schedule_reconnect(&mut self) {
        if self.hangup.is_hung_up() {
            debug!("User hung up, not reconnecting");
            return;
        }

        match self.policy.schedule() {
            RetryDecision::Retry { attempt, delay } => {
                let max_attempts = self.policy.config().max_attempts;
                info!(
                    "Scheduling reconnect attempt {}/{} in {:?}",
                    attempt, max_attempts, delay
                );
                self.reconnect_at = Some(Instant::now() + delay);
                self.emit(CallStatus::Reconnecting {
                    attempt,
                    max_attempts,
                    delay,
                })
                .await;
            }
            RetryDecision::Exhausted { attempts } => {
                error!("Reconnect attempts exhausted after {}", attempts);
                self.emit(CallStatus::ReconnectExhausted { attempts }).await;
                self.emit(CallStatus::Error(CallError::ReconnectExhausted { attempts }))
                    .await;
            }
            RetryDecision::AlreadyPending => debug!("Reconnect already scheduled"),
            RetryDecision::Disabled => debug!("Reconnection disabled"),
        }
    }

    async fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        self.policy.fire();

        if self.hangup.is_hung_up() || self.state != CallState::Idle {
            debug!(
                "Dropping reconnect (hung up: {}, state: {})",
                self.hangup.is_hung_up(),
                self.state
            );
            return;
        }

        info!("Reconnect attempt {}", self.policy.attempts());
        if self.attempt_connect().await.is_ok() {
            info!("Reconnected, pause={} mic={}", self.paused, self.mic_enabled);
            self.policy.reset();
        }
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Update the session-ready flag from the handshake outcome.
    pub async fn set_session_ready(&mut self, ready: bool) {
        self.session_ready = ready;
        self.handshake = match (ready, self.handshake) {
            (true, _) => Handshake::Acked,
            (false, Handshake::Acked) => Handshake::Pending,
            (false, Handshake::Sent) => Handshake::Exhausted,
            (false, other) => other,
        };
        self.refresh_usable().await;
        self.maybe_send_handshake().await;
    }

    async fn refresh_usable(&mut self) {
        let usable = self.state == CallState::Connected
            && self.ice.is_ready()
            && self.channel == ChannelState::Open
            && self.session_ready;
        if usable != self.usable {
            self.usable = usable;
            info!("Call usable: {}", usable);
            self.emit(CallStatus::UsableChanged(usable)).await;
        }
    }

    async fn maybe_send_handshake(&mut self) {
        if self.handshake != Handshake::Pending
            || self.state != CallState::Connected
            || !self.ice.is_ready()
            || self.channel != ChannelState::Open
        {
            return;
        }

        let event = ClientEvent::SessionUpdate {
            session: self.settings.session.clone(),
        };
        let frame = match self.codec.encode(&event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode session handshake: {}", e);
                return;
            }
        };
        match self.transport.send_control(&frame).await {
            Ok(()) => {
                self.handshake = Handshake::Sent;
                info!("Session handshake sent");
            }
            Err(e) => warn!("Failed to send session handshake: {}", e),
        }
    }

    /// Send one control event. Requires `usable`; failures are logged and
    /// reported as `false`.
    pub async fn send_control(&self, event: &ClientEvent) -> bool {
        if !self.usable {
            debug!("Dropping {}: call not usable", event.event_type());
            return false;
        }

        let frame = match self.codec.encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode {}: {}", event.event_type(), e);
                return false;
            }
        };
        match self.transport.send_control(&frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {}: {}", event.event_type(), e);
                false
            }
        }
    }

    // =========================================================================
    // Outbound Audio
    // =========================================================================

    /// Set the user pause flag. Persists across reconnects.
    pub async fn set_paused(&mut self, paused: bool) {
        if self.paused == paused {
            return;
        }
        info!("Pause {}", if paused { "on" } else { "off" });
        self.paused = paused;
        self.sync_outbound().await;
    }

    /// Enable or disable the microphone. Enabling acquires capture when the
    /// call has none; a `DeviceError` is surfaced and returned.
    pub async fn set_mic_enabled(&mut self, enabled: bool) -> CallResult<()> {
        self.mic_enabled = enabled;

        if enabled && self.state == CallState::Connected && self.transport.local_audio().is_none()
        {
            if let Err(e) = self
                .transport
                .acquire_local_audio(&self.settings.audio)
                .await
            {
                warn!("Microphone unavailable: {}", e);
                self.emit(CallStatus::Error(e.clone())).await;
                return Err(e);
            }
        }

        self.sync_outbound().await;
        Ok(())
    }

    /// Make the single sender carry the capture track iff the mic is on and
    /// the call is not paused.
    async fn sync_outbound(&mut self) {
        if self.attached.is_none() {
            return;
        }

        let track = if self.mic_enabled && !self.paused {
            self.transport.local_audio()
        } else {
            None
        };
        let desired = track.is_some();
        if self.attached == Some(desired) {
            return;
        }

        match self.transport.attach_to_sender(track.as_ref()).await {
            Ok(()) => {
                debug!("Audio sender {}", if desired { "attached" } else { "detached" });
                self.attached = Some(desired);
            }
            Err(e) => warn!("Failed to update audio sender: {}", e),
        }
    }

    async fn emit(&self, status: CallStatus) {
        if let Some(callback) = &self.status_callback {
            callback(status).await;
        }
    }
}

/// Run one connect step under the attempt deadline and the hang-up token.
async fn guarded<T>(
    deadline: Instant,
    limit: Duration,
    token: &CancellationToken,
    step: impl Future<Output = CallResult<T>>,
) -> CallResult<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ConnectFailure::Cancelled.into()),
        result = tokio::time::timeout_at(deadline, step) => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(ConnectFailure::Timeout(limit).into()),
        },
    }
}
