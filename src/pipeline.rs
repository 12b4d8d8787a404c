//! Multi-timeframe signal pipeline
//!
//! Wires one higher-timeframe analyzer (bias), one lower-timeframe analyzer
//! (entry zones) and the entry state machine. For every LTF candle:
//! 1. Aggregate into the HTF bucket; a completed HTF candle is analyzed first
//! 2. Analyze the LTF candle
//! 3. Run the state machine on the HTF events with the LTF candle and zones
//!
//! The same path serves live streaming and batch replay.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::CandleAggregator;
use crate::config::EngineConfig;
use crate::signal::{EntrySignalStateMachine, EntryTrigger, LtfData, TransitionResult};
use crate::structure::{StructureAnalyzer, StructureEvents, StructureShiftEvent, Zone};
use crate::types::{Candle, Direction};

/// Order-ready signal built when the state machine fires
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySignal {
    pub id: Uuid,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trigger: EntryTrigger,
    pub zone: Zone,
    pub timestamp: i64,
    /// Points between entry and stop
    pub risk: f64,
    /// Points between entry and target
    pub reward: f64,
    pub risk_reward: Option<f64>,
}

impl EntrySignal {
    pub fn side(&self) -> &'static str {
        match self.direction {
            Direction::Bullish => "long",
            Direction::Bearish => "short",
        }
    }
}

/// Everything one LTF candle produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStep {
    pub htf_events: Option<StructureEvents>,
    pub ltf_events: StructureEvents,
    pub transition: TransitionResult,
    pub signal: Option<EntrySignal>,
}

/// Running counters for a replay
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub ltf_candles: u64,
    pub htf_candles: u64,
    pub chochs: u64,
    pub shifts: u64,
    pub bos: u64,
    pub transitions: u64,
    pub signals: u64,
}

impl RunStats {
    fn record(&mut self, step: &PipelineStep) {
        self.ltf_candles += 1;
        if let Some(events) = &step.htf_events {
            self.htf_candles += 1;
            match &events.shift {
                Some(StructureShiftEvent::Choch(_)) => self.chochs += 1,
                Some(StructureShiftEvent::Mss { .. }) => self.shifts += 1,
                Some(StructureShiftEvent::Bos(_)) => self.bos += 1,
                None => {}
            }
        }
        if step.transition.transitioned {
            self.transitions += 1;
        }
        if step.signal.is_some() {
            self.signals += 1;
        }
    }
}

pub struct SignalPipeline {
    htf: StructureAnalyzer,
    ltf: StructureAnalyzer,
    aggregator: CandleAggregator,
    state_machine: EntrySignalStateMachine,
    stats: RunStats,
}

impl SignalPipeline {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            htf: StructureAnalyzer::new(config.analyzer.clone())?,
            ltf: StructureAnalyzer::new(config.analyzer.clone())?,
            aggregator: CandleAggregator::from_minutes(config.htf_minutes),
            state_machine: EntrySignalStateMachine::new(config.state_machine.clone())?,
            stats: RunStats::default(),
        })
    }

    pub fn process_candle(&mut self, candle: &Candle) -> PipelineStep {
        // HTF must be advanced before the state machine sees this LTF candle
        let htf_events = self
            .aggregator
            .push(candle)
            .map(|htf_candle| self.htf.process_candle(&htf_candle));

        let ltf_events = self.ltf.process_candle(candle);

        let fvgs = self.ltf.active_fvgs();
        let order_blocks = self.ltf.active_order_blocks();
        let ltf = LtfData {
            candle,
            fvgs: &fvgs,
            order_blocks: &order_blocks,
        };

        let no_events = StructureEvents::default();
        let transition = self
            .state_machine
            .process(htf_events.as_ref().unwrap_or(&no_events), &ltf, candle.timestamp);

        let signal = if transition.signal_ready {
            self.build_signal(&transition, candle.timestamp)
        } else {
            None
        };

        let step = PipelineStep {
            htf_events,
            ltf_events,
            transition,
            signal,
        };
        self.stats.record(&step);
        step
    }

    fn build_signal(&self, transition: &TransitionResult, timestamp: i64) -> Option<EntrySignal> {
        let details = transition.entry_details.as_ref()?;
        let conditions = self.state_machine.get_signal_conditions();
        let (Some(direction), Some(stop_loss), Some(take_profit)) =
            (conditions.htf_bias, conditions.stop_level, conditions.target_level)
        else {
            warn!("Signal ready without bias/stop/target: {}", transition.reason);
            return None;
        };

        let entry_price = details.entry_price;
        let (risk, reward) = match direction {
            Direction::Bullish => (entry_price - stop_loss, take_profit - entry_price),
            Direction::Bearish => (stop_loss - entry_price, entry_price - take_profit),
        };
        let risk_reward = (risk > 0.0).then(|| reward / risk);

        let signal = EntrySignal {
            id: Uuid::new_v4(),
            direction,
            entry_price,
            stop_loss,
            take_profit,
            trigger: details.trigger,
            zone: details.entry_zone.clone(),
            timestamp,
            risk,
            reward,
            risk_reward,
        };
        info!(
            "SIGNAL {} {} @ {:.2} | stop {:.2} | target {:.2} | R:R {}",
            signal.side(),
            signal.trigger,
            entry_price,
            stop_loss,
            take_profit,
            risk_reward.map_or("n/a".to_string(), |rr| format!("{:.2}", rr))
        );
        Some(signal)
    }

    /// Clear all analyzers, the aggregator and the state machine
    pub fn reset(&mut self) {
        self.htf.reset();
        self.ltf.reset();
        self.aggregator.reset();
        self.state_machine.reset();
        self.stats = RunStats::default();
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn htf(&self) -> &StructureAnalyzer {
        &self.htf
    }

    pub fn ltf(&self) -> &StructureAnalyzer {
        &self.ltf
    }

    pub fn state_machine(&self) -> &EntrySignalStateMachine {
        &self.state_machine
    }
}

/// Result of replaying one candle series
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub signals: Vec<EntrySignal>,
    pub stats: RunStats,
}

/// Replay a full candle series through a fresh pipeline
pub fn replay(candles: &[Candle], config: &EngineConfig) -> Result<ReplayOutcome> {
    let mut pipeline = SignalPipeline::new(config)?;
    let signals = candles
        .iter()
        .filter_map(|c| pipeline.process_candle(c).signal)
        .collect();
    Ok(ReplayOutcome {
        signals,
        stats: pipeline.stats().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Phase;
    use crate::types::test_support::candle;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_walk(seed: u64, n: usize) -> Vec<Candle> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut price: f64 = 18_000.0;
        (0..n)
            .map(|i| {
                let open = price;
                let close = open + rng.gen_range(-8.0..8.0);
                let high = open.max(close) + rng.gen_range(0.0..3.0);
                let low = open.min(close) - rng.gen_range(0.0..3.0);
                price = close;
                candle(i as i64, open, high, low, close)
            })
            .collect()
    }

    fn config() -> EngineConfig {
        EngineConfig {
            htf_minutes: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_htf_candles_follow_buckets() {
        let mut pipeline = SignalPipeline::new(&config()).unwrap();
        let mut htf_steps = Vec::new();
        for (i, c) in random_walk(1, 23).iter().enumerate() {
            if pipeline.process_candle(c).htf_events.is_some() {
                htf_steps.push(i);
            }
        }
        assert_eq!(htf_steps, vec![5, 10, 15, 20]);
        assert_eq!(pipeline.stats().htf_candles, 4);
        assert_eq!(pipeline.stats().ltf_candles, 23);
    }

    #[test]
    fn test_signals_have_stop_behind_entry() {
        let mut total = 0;
        for seed in 0..4 {
            let outcome = replay(&random_walk(seed, 20_000), &config()).unwrap();
            assert_eq!(outcome.stats.signals as usize, outcome.signals.len());
            for signal in &outcome.signals {
                assert!(signal.risk > 0.0, "stop must sit behind entry: {:?}", signal);
                assert!(signal.reward > 0.0, "target must sit past entry: {:?}", signal);
                assert!(signal.risk_reward.is_some());
                match signal.direction {
                    Direction::Bullish => assert!(signal.stop_loss < signal.entry_price),
                    Direction::Bearish => assert!(signal.stop_loss > signal.entry_price),
                }
            }
            total += outcome.signals.len();
        }
        assert!(total > 0);
    }

    #[test]
    fn test_replay_is_deterministic_and_reset_matches() {
        let candles = random_walk(42, 5_000);
        let strip = |signals: Vec<EntrySignal>| -> Vec<(i64, f64, f64, f64)> {
            signals
                .into_iter()
                .map(|s| (s.timestamp, s.entry_price, s.stop_loss, s.take_profit))
                .collect()
        };

        let first = replay(&candles, &config()).unwrap();
        let second = replay(&candles, &config()).unwrap();
        assert_eq!(first.stats, second.stats);

        let mut pipeline = SignalPipeline::new(&config()).unwrap();
        for c in &candles[..1_000] {
            pipeline.process_candle(c);
        }
        pipeline.reset();
        assert_eq!(pipeline.state_machine().phase(), Phase::Scanning);
        let third: Vec<_> = candles.iter().filter_map(|c| pipeline.process_candle(c).signal).collect();

        assert_eq!(pipeline.stats(), &first.stats);
        let reference = strip(first.signals);
        assert_eq!(reference, strip(second.signals));
        assert_eq!(reference, strip(third));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            htf_minutes: 0,
            ..Default::default()
        };
        assert!(SignalPipeline::new(&config).is_err());
    }
}
