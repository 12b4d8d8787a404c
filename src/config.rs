//! Combined engine configuration, loadable from JSON

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::signal::StateMachineConfig;
use crate::structure::AnalyzerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Applied to both the HTF and LTF analyzers
    pub analyzer: AnalyzerConfig,
    pub state_machine: StateMachineConfig,
    /// Higher timeframe width in minutes (default: 15)
    pub htf_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            state_machine: StateMachineConfig::default(),
            htf_minutes: 15,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: EngineConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.analyzer.validate().context("invalid analyzer config")?;
        self.state_machine.validate().context("invalid state machine config")?;
        if self.htf_minutes == 0 {
            bail!("htf_minutes must be at least 1");
        }
        Ok(())
    }
}
