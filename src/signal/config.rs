//! Configuration for the entry signal state machine

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    /// CHoCH waits this long for its MSS (default: 1 hour)
    pub choch_validity_ms: i64,
    /// Confirmed structure stays tradeable this long (default: 2 hours)
    pub mss_validity_ms: i64,
    /// Time allowed for price to trigger inside the entry zone (default: 30 min)
    pub entry_window_ms: i64,
    /// Quiet period after a signal (default: 15 min)
    pub cooldown_ms: i64,
    /// Max distance from price to the nearest zone edge (points, default: 50.0)
    pub max_entry_distance: f64,
    /// Only order blocks qualify as entry zones
    pub require_order_block: bool,
    /// Only FVGs qualify (with `require_order_block`: an OB overlapping an FVG)
    pub require_fvg: bool,
    /// MSS/BOS without a prior CHoCH must score above this (default: 0.6)
    pub min_structure_confidence: f64,
    /// Rejection wick must be at least this share of the body (default: 0.5)
    pub rejection_wick_ratio: f64,
    /// Transition history entries kept (default: 100)
    pub max_history: usize,
    /// Recent swing levels kept as targets (default: 20)
    pub max_liquidity_levels: usize,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            choch_validity_ms: 3_600_000,  // 1 hour
            mss_validity_ms: 7_200_000,    // 2 hours
            entry_window_ms: 1_800_000,    // 30 minutes
            cooldown_ms: 900_000,          // 15 minutes
            max_entry_distance: 50.0,
            require_order_block: false,
            require_fvg: false,
            min_structure_confidence: 0.6,
            rejection_wick_ratio: 0.5,
            max_history: 100,
            max_liquidity_levels: 20,
        }
    }
}

impl StateMachineConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("choch_validity_ms", self.choch_validity_ms),
            ("mss_validity_ms", self.mss_validity_ms),
            ("entry_window_ms", self.entry_window_ms),
            ("cooldown_ms", self.cooldown_ms),
        ] {
            if value <= 0 {
                bail!("{} must be positive, got {}", name, value);
            }
        }
        if !(self.max_entry_distance >= 0.0) {
            bail!("max_entry_distance must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.min_structure_confidence) {
            bail!("min_structure_confidence must be within 0..=1");
        }
        if !(self.rejection_wick_ratio >= 0.0) {
            bail!("rejection_wick_ratio must be non-negative");
        }
        if self.max_history == 0 || self.max_liquidity_levels == 0 {
            bail!("history and liquidity bounds must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StateMachineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_window() {
        let config = StateMachineConfig {
            entry_window_ms: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("entry_window_ms"));
    }

    #[test]
    fn test_rejects_confidence_out_of_range() {
        let config = StateMachineConfig {
            min_structure_confidence: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
