// Library crate - incremental market structure analysis and entry signals

pub mod aggregate;
pub mod config;
pub mod data;
pub mod pipeline;
pub mod signal;
pub mod structure;
pub mod types;

// Re-export commonly used types
pub use aggregate::CandleAggregator;
pub use config::EngineConfig;
pub use pipeline::{EntrySignal, SignalPipeline};
pub use signal::{EntrySignalStateMachine, LtfData, Phase, StateMachineConfig, TransitionResult};
pub use structure::{AnalyzerConfig, StructureAnalyzer, StructureEvents, StructureShiftEvent};
pub use types::*;
