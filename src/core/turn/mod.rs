//! Turn-taking: derives the UI phase and response-creation triggers from
//! control channel events, respecting the pause flag.

mod base;
mod coordinator;

pub use base::{
    PhaseCallback, TranscriptCallback, TranscriptResult, TranscriptRole, TurnAction,
    TurnContext, TurnErrorCallback, TurnEvent, TurnPhase,
};
pub use coordinator::{TurnBook, TurnCoordinator, plan};
