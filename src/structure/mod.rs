//! Structure analysis - swings, structural shifts and supply/demand zones
//!
//! This module contains the per-timeframe analysis components:
//! - Bounded candle buffer with stable logical indices
//! - Swing detection with causal back-references
//! - CHoCH / MSS / BOS classification
//! - Fair value gap and order block tracking
//! - The incremental analyzer tying them together

pub mod analyzer;
pub mod buffer;
pub mod config;
pub mod shift;
pub mod swing;
pub mod zones;

// Re-export commonly used types
pub use analyzer::{EngineState, StructureAnalyzer, StructureEvents};
pub use buffer::CandleBuffer;
pub use config::AnalyzerConfig;
pub use shift::{ChochRef, PendingReversal, ShiftDetail, ShiftOrigin, ShiftState, StructureShiftEvent};
pub use swing::{Swing, SwingId, SwingKind, SwingLink, SwingTracker};
pub use zones::{FilledRejection, Zone, ZoneId, ZoneKind, ZoneTracker};
