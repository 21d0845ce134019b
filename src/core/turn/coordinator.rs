//! Turn coordinator.
//!
//! [`plan`] is a pure table from (bookkeeping, context, event) to actions.
//! [`TurnCoordinator`] evaluates it, applies the bookkeeping half of the
//! result to itself and hands the full list back to the caller, which runs
//! the side effects (sending `response.create`, notifying observers).
//!
//! At most one response is in flight: a creation trigger is dropped while
//! one is requested, created or scheduled, and only `response.done`, an
//! `error` or a pause clears that.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::base::{TurnAction, TurnContext, TurnEvent, TurnPhase};

/// Snapshot of the coordinator's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TurnBook {
    /// Current phase
    pub phase: TurnPhase,
    /// A response was requested or created and has not completed
    pub in_flight: bool,
    /// A debounced response creation is waiting to fire
    pub scheduled: bool,
    /// Delay between end of speech and `response.create`
    pub debounce: Duration,
}

impl TurnBook {
    fn response_blocked(&self) -> bool {
        self.in_flight || self.scheduled
    }
}

fn enter(book: &TurnBook, phase: TurnPhase, actions: &mut Vec<TurnAction>) {
    if book.phase != phase {
        actions.push(TurnAction::EnterPhase(phase));
    }
}

fn trigger_response(book: &TurnBook, actions: &mut Vec<TurnAction>) {
    if book.response_blocked() {
        return;
    }
    if book.debounce.is_zero() {
        actions.push(TurnAction::CreateResponse);
    } else {
        actions.push(TurnAction::ScheduleResponse(book.debounce));
    }
}

/// Actions for one control event.
pub fn plan(book: &TurnBook, ctx: TurnContext, event: &TurnEvent) -> Vec<TurnAction> {
    let mut actions = Vec::new();
    let vad_allowed = ctx.usable && !ctx.paused;

    match event {
        TurnEvent::SessionAck => {
            actions.push(TurnAction::SetSessionReady(true));
        }
        TurnEvent::SpeechStarted => {
            if vad_allowed {
                enter(book, TurnPhase::Listening, &mut actions);
            }
        }
        TurnEvent::SpeechStopped | TurnEvent::BufferCommitted => {
            if vad_allowed {
                enter(book, TurnPhase::Thinking, &mut actions);
                trigger_response(book, &mut actions);
            }
        }
        TurnEvent::ResponseCreated { .. } => {
            enter(book, TurnPhase::Speaking, &mut actions);
            actions.push(TurnAction::MarkResponseInFlight);
        }
        TurnEvent::ResponseDone { .. } => {
            actions.push(TurnAction::SettleResponse);
            enter(book, TurnPhase::Idle, &mut actions);
        }
        TurnEvent::Error { message } => {
            actions.push(TurnAction::SetSessionReady(false));
            actions.push(TurnAction::SettleResponse);
            enter(book, TurnPhase::Idle, &mut actions);
            actions.push(TurnAction::SurfaceError(message.clone()));
        }
        TurnEvent::Transcript(transcript) => {
            actions.push(TurnAction::EmitTranscript(transcript.clone()));
        }
    }

    actions
}

/// Owner of the turn phase and response bookkeeping.
#[derive(Debug, Clone)]
pub struct TurnCoordinator {
    book: TurnBook,
    deadline: Option<Instant>,
}

impl TurnCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            book: TurnBook {
                debounce,
                ..Default::default()
            },
            deadline: None,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.book.phase
    }

    pub fn response_in_flight(&self) -> bool {
        self.book.in_flight
    }

    pub fn book(&self) -> TurnBook {
        self.book
    }

    /// When the debounced response creation fires.
    pub fn response_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Evaluate one event.
    pub fn handle(&mut self, ctx: TurnContext, event: &TurnEvent) -> Vec<TurnAction> {
        let actions = plan(&self.book, ctx, event);
        if !actions.is_empty() {
            debug!("Turn event {:?} -> {:?}", event, actions);
        }
        self.apply(&actions);
        actions
    }

    /// The debounce deadline passed.
    pub fn on_response_timer(&mut self, ctx: TurnContext) -> Vec<TurnAction> {
        if self.deadline.take().is_none() {
            return Vec::new();
        }
        self.book.scheduled = false;

        if !ctx.usable || ctx.paused || self.book.in_flight {
            debug!("Dropping debounced response (usable={}, paused={})", ctx.usable, ctx.paused);
            return Vec::new();
        }
        let actions = vec![TurnAction::CreateResponse];
        self.apply(&actions);
        actions
    }

    /// A response requested outside VAD, e.g. after a typed message.
    pub fn request_response(&mut self, ctx: TurnContext) -> Vec<TurnAction> {
        if !ctx.usable || self.book.response_blocked() {
            return Vec::new();
        }
        let mut actions = Vec::new();
        enter(&self.book, TurnPhase::Thinking, &mut actions);
        actions.push(TurnAction::CreateResponse);
        self.apply(&actions);
        actions
    }

    /// `response.create` could not be sent.
    pub fn abandon_response(&mut self) -> Vec<TurnAction> {
        let mut actions = vec![TurnAction::SettleResponse];
        enter(&self.book, TurnPhase::Idle, &mut actions);
        self.apply(&actions);
        actions
    }

    /// Pause flag changed. Pausing drops any queued or in-flight
    /// bookkeeping so resuming starts clean.
    pub fn on_pause_changed(&mut self, paused: bool) -> Vec<TurnAction> {
        if !paused {
            return Vec::new();
        }
        let mut actions = vec![TurnAction::SettleResponse];
        enter(&self.book, TurnPhase::Idle, &mut actions);
        self.apply(&actions);
        actions
    }

    /// Back to `Idle` with no bookkeeping. Returns true if the phase changed.
    pub fn reset(&mut self) -> bool {
        let changed = self.book.phase != TurnPhase::Idle;
        self.book.phase = TurnPhase::Idle;
        self.book.in_flight = false;
        self.book.scheduled = false;
        self.deadline = None;
        changed
    }

    fn apply(&mut self, actions: &[TurnAction]) {
        for action in actions {
            match action {
                TurnAction::EnterPhase(phase) => self.book.phase = *phase,
                TurnAction::CreateResponse | TurnAction::MarkResponseInFlight => {
                    self.book.in_flight = true;
                    self.book.scheduled = false;
                    self.deadline = None;
                }
                TurnAction::ScheduleResponse(delay) => {
                    self.book.scheduled = true;
                    self.deadline = Some(Instant::now() + *delay);
                }
                TurnAction::SettleResponse => {
                    self.book.in_flight = false;
                    self.book.scheduled = false;
                    self.deadline = None;
                }
                TurnAction::SetSessionReady(_)
                | TurnAction::SurfaceError(_)
                | TurnAction::EmitTranscript(_) => {}
            }
        }
    }
}
