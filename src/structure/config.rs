//! Configuration for the structure analyzer

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Configuration for one timeframe's structure analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Candles required on each side of a swing (default: 3)
    pub swing_lookback: usize,
    /// Minimum gap for an FVG, also the minimum order-block impulse move (points, default: 1.0)
    pub min_fvg_size: f64,
    /// Minimum candle range for a swing candidate (points, default: 0.5)
    pub min_swing_size: f64,
    /// Close distance beyond a level to count as a break (points, default: 2.0)
    pub break_confirmation: f64,
    /// Candle ring buffer capacity (default: 500)
    pub max_buffer_size: usize,
    /// FVGs older than this many candles are evicted (default: 100)
    pub max_fvg_age: u32,
    /// Order blocks older than this many candles are evicted (default: 100)
    pub max_ob_age: u32,
    /// Swing highs / swing lows retained per type (default: 50)
    pub max_swings: usize,
    /// Swings retained in the chronological sequence for causal lookup (default: 100)
    pub max_swing_sequence: usize,
    /// Active FVGs / order blocks retained per kind (default: 30)
    pub max_active_zones: usize,
    /// Filled-then-rejected FVGs waiting for a consumer (default: 10)
    pub max_rejections: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            swing_lookback: 3,
            min_fvg_size: 1.0,
            min_swing_size: 0.5,
            break_confirmation: 2.0,
            max_buffer_size: 500,
            max_fvg_age: 100,
            max_ob_age: 100,
            max_swings: 50,
            max_swing_sequence: 100,
            max_active_zones: 30,
            max_rejections: 10,
        }
    }
}

impl AnalyzerConfig {
    /// Break distance at which a CHoCH is promoted straight to a shift
    pub fn displacement_threshold(&self) -> f64 {
        self.break_confirmation * 3.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.swing_lookback == 0 {
            bail!("swing_lookback must be at least 1");
        }
        // Swing check needs lookback candles on both sides, FVG/OB scans need 3..=6
        let min_buffer = (2 * self.swing_lookback + 1).max(7);
        if self.max_buffer_size < min_buffer {
            bail!(
                "max_buffer_size {} too small for swing_lookback {} (need >= {})",
                self.max_buffer_size,
                self.swing_lookback,
                min_buffer
            );
        }
        if !(self.min_fvg_size > 0.0) {
            bail!("min_fvg_size must be positive");
        }
        if !(self.min_swing_size >= 0.0) {
            bail!("min_swing_size must be non-negative");
        }
        if !(self.break_confirmation >= 0.0) {
            bail!("break_confirmation must be non-negative");
        }
        if self.max_swings == 0 || self.max_swing_sequence == 0 {
            bail!("swing bounds must be positive");
        }
        if self.max_active_zones == 0 || self.max_rejections == 0 {
            bail!("zone bounds must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = AnalyzerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.displacement_threshold(), 6.0);
    }

    #[test]
    fn test_rejects_small_buffer() {
        let config = AnalyzerConfig {
            swing_lookback: 10,
            max_buffer_size: 15,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_fvg_size() {
        let config = AnalyzerConfig {
            min_fvg_size: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AnalyzerConfig =
            serde_json::from_str(r#"{"swing_lookback": 5, "break_confirmation": 1.5}"#).unwrap();
        assert_eq!(config.swing_lookback, 5);
        assert_eq!(config.break_confirmation, 1.5);
        assert_eq!(config.max_buffer_size, 500);
    }
}
