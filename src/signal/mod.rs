//! Entry signal generation from structure events
//!
//! - Phase state machine sequencing CHoCH, MSS, entry zone and trigger
//! - Entry zone selection, trigger detection and stop/target placement

pub mod config;
pub mod entry;
pub mod state_machine;

pub use config::StateMachineConfig;
pub use entry::EntryTrigger;
pub use state_machine::{
    EntryDetails, EntrySignalStateMachine, LtfData, Phase, SignalConditions, StateTransitionRecord,
    TransitionResult,
};
