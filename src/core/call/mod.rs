//! Call lifecycle: state table, readiness and reconnection.

mod base;
mod machine;
mod reconnect;

pub use base::{
    CallError, CallResult, CallSettings, CallState, CallStatus, ConnectFailure, Readiness,
    StatusCallback,
};
pub use machine::{CallStateMachine, MachineInput};
pub use reconnect::{HangupSignal, ReconnectPolicy, ReconnectionConfig, RetryDecision};
