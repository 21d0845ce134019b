//! Voice session driver.
//!
//! Runs the call state machine and the turn coordinator on one task.
//! Commands arrive from cloneable [`SessionHandle`]s; transport events,
//! reconnect timers and the response debounce timer are multiplexed in
//! [`VoiceSession::step`].

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::call::{
    CallError, CallResult, CallState, CallStateMachine, HangupSignal, StatusCallback,
};
use crate::core::control::{ClientEvent, ConversationItem, ServerEvent};
use crate::core::turn::{
    PhaseCallback, TranscriptCallback, TurnAction, TurnContext, TurnCoordinator,
    TurnErrorCallback, TurnEvent, TurnPhase,
};

/// User commands processed by the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    SetPaused(bool),
    SetMicEnabled(bool),
    /// Send a typed user message and request a response
    SendText(String),
    /// Disconnect and stop the session task
    Shutdown,
}

/// Cloneable handle to a running [`VoiceSession`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    hangup: HangupSignal,
}

impl SessionHandle {
    fn send(&self, command: SessionCommand) -> CallResult<()> {
        self.commands
            .send(command)
            .map_err(|_| CallError::NotConnected)
    }

    pub fn connect(&self) -> CallResult<()> {
        self.send(SessionCommand::Connect)
    }

    /// Raise the hang-up flag now, then queue the disconnect.
    ///
    /// A connect attempt in flight is cancelled at its next suspension point
    /// and no scheduled reconnect will run.
    pub fn hang_up(&self) -> CallResult<()> {
        self.hangup.hang_up();
        self.send(SessionCommand::Disconnect)
    }

    pub fn set_paused(&self, paused: bool) -> CallResult<()> {
        self.send(SessionCommand::SetPaused(paused))
    }

    pub fn set_mic_enabled(&self, enabled: bool) -> CallResult<()> {
        self.send(SessionCommand::SetMicEnabled(enabled))
    }

    pub fn send_text(&self, text: impl Into<String>) -> CallResult<()> {
        self.send(SessionCommand::SendText(text.into()))
    }

    pub fn shutdown(&self) -> CallResult<()> {
        self.hangup.hang_up();
        self.send(SessionCommand::Shutdown)
    }
}

#[derive(Default)]
struct Observers {
    phase: Option<PhaseCallback>,
    transcript: Option<TranscriptCallback>,
    error: Option<TurnErrorCallback>,
}

/// Owner of one call and its turn-taking.
pub struct VoiceSession {
    machine: CallStateMachine,
    turns: TurnCoordinator,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    observers: Observers,
}

impl VoiceSession {
    pub fn new(machine: CallStateMachine, response_debounce: Duration) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            commands: tx,
            hangup: machine.hangup_signal(),
        };
        let session = Self {
            machine,
            turns: TurnCoordinator::new(response_debounce),
            commands: rx,
            observers: Observers::default(),
        };
        (session, handle)
    }

    /// Register a callback for call status events.
    pub fn on_status(&mut self, callback: StatusCallback) {
        self.machine.on_status(callback);
    }

    /// Register a callback for turn phase changes.
    pub fn on_phase(&mut self, callback: PhaseCallback) {
        self.observers.phase = Some(callback);
    }

    /// Register a callback for user and assistant transcripts.
    pub fn on_transcript(&mut self, callback: TranscriptCallback) {
        self.observers.transcript = Some(callback);
    }

    /// Register a callback for errors reported by the remote service.
    pub fn on_error(&mut self, callback: TurnErrorCallback) {
        self.observers.error = Some(callback);
    }

    pub fn machine(&self) -> &CallStateMachine {
        &self.machine
    }

    pub fn phase(&self) -> TurnPhase {
        self.turns.phase()
    }

    pub fn response_in_flight(&self) -> bool {
        self.turns.response_in_flight()
    }

    /// Process inputs until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Voice session started");
        while self.step().await {}
        self.machine.disconnect().await;
        info!("Voice session stopped");
    }

    /// Wait for and process one input. Returns false when the session
    /// should stop.
    pub async fn step(&mut self) -> bool {
        let response_deadline = self.turns.response_deadline();

        tokio::select! {
            command = self.commands.recv() => match command {
                Some(command) => {
                    if !self.handle_command(command).await {
                        return false;
                    }
                }
                None => {
                    debug!("All session handles dropped");
                    return false;
                }
            },
            input = self.machine.next_input() => {
                let events = self.machine.handle_input(input).await;
                self.dispatch(events).await;
            }
            _ = sleep_until_opt(response_deadline) => {
                let actions = self.turns.on_response_timer(self.context());
                self.run_actions(actions).await;
            }
        }

        self.settle_turns().await;
        true
    }

    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        debug!("Session command: {:?}", command);
        match command {
            SessionCommand::Connect => {
                if let Err(e) = self.machine.connect().await {
                    debug!("Connect failed: {}", e);
                }
                let events = self.machine.drain_events();
                self.dispatch(events).await;
            }
            SessionCommand::Disconnect => {
                self.machine.disconnect().await;
            }
            SessionCommand::SetPaused(paused) => {
                self.machine.set_paused(paused).await;
                let actions = self.turns.on_pause_changed(paused);
                self.run_actions(actions).await;
            }
            SessionCommand::SetMicEnabled(enabled) => {
                if let Err(e) = self.machine.set_mic_enabled(enabled).await {
                    debug!("Microphone toggle failed: {}", e);
                }
            }
            SessionCommand::SendText(text) => {
                let event = ClientEvent::ConversationItemCreate {
                    item: ConversationItem::user_text(text),
                };
                if self.machine.send_control(&event).await {
                    let actions = self.turns.request_response(self.context());
                    self.run_actions(actions).await;
                } else {
                    warn!("Dropping typed message: call not usable");
                }
            }
            SessionCommand::Shutdown => {
                self.machine.disconnect().await;
                return false;
            }
        }
        true
    }

    fn context(&self) -> TurnContext {
        TurnContext {
            usable: self.machine.is_usable(),
            paused: self.machine.is_paused(),
        }
    }

    async fn dispatch(&mut self, events: Vec<ServerEvent>) {
        for event in events {
            let Some(turn_event) = TurnEvent::from_server_event(&event) else {
                continue;
            };
            let actions = self.turns.handle(self.context(), &turn_event);
            self.run_actions(actions).await;
        }
    }

    async fn run_actions(&mut self, actions: Vec<TurnAction>) {
        for action in actions {
            match action {
                TurnAction::SetSessionReady(ready) => self.machine.set_session_ready(ready).await,
                TurnAction::EnterPhase(phase) => self.notify_phase(phase).await,
                TurnAction::CreateResponse => {
                    if !self.machine.send_control(&ClientEvent::ResponseCreate).await {
                        warn!("response.create not sent; clearing in-flight");
                        for follow in self.turns.abandon_response() {
                            if let TurnAction::EnterPhase(phase) = follow {
                                self.notify_phase(phase).await;
                            }
                        }
                    }
                }
                TurnAction::ScheduleResponse(delay) => {
                    debug!("Response creation scheduled in {:?}", delay);
                }
                TurnAction::MarkResponseInFlight | TurnAction::SettleResponse => {}
                TurnAction::SurfaceError(message) => {
                    warn!("Remote error: {}", message);
                    if let Some(callback) = &self.observers.error {
                        callback(message).await;
                    }
                }
                TurnAction::EmitTranscript(transcript) => {
                    if let Some(callback) = &self.observers.transcript {
                        callback(transcript).await;
                    }
                }
            }
        }
    }

    /// A call that is not connected has no turn in progress.
    async fn settle_turns(&mut self) {
        if self.machine.state() != CallState::Connected && self.turns.reset() {
            self.notify_phase(TurnPhase::Idle).await;
        }
    }

    async fn notify_phase(&self, phase: TurnPhase) {
        debug!("Turn phase -> {}", phase);
        if let Some(callback) = &self.observers.phase {
            callback(phase).await;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
