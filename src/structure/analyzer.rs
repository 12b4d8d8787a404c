//! Per-timeframe incremental structure analyzer
//!
//! One `StructureAnalyzer` per timeframe. Each `process_candle` call does
//! O(lookback) work: one swing check at the newly bracketed candle, the
//! shift classifier cascade on the close, a three-candle FVG scan, a bounded
//! order-block look-back and one pass over the (bounded) active zones.

use anyhow::Result;
use serde::Serialize;

use super::buffer::CandleBuffer;
use super::config::AnalyzerConfig;
use super::shift::{PendingReversal, ShiftContext, ShiftState, StructureShiftEvent};
use super::swing::{Swing, SwingTracker};
use super::zones::{FilledRejection, Zone, ZoneId, ZoneTracker};
use crate::types::{Candle, Direction};

/// Everything one candle produced
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructureEvents {
    pub timestamp: i64,
    pub new_swings: Vec<Swing>,
    /// The winning classifier event for this candle, if any
    pub shift: Option<StructureShiftEvent>,
    /// New FVGs and order blocks
    pub new_zones: Vec<Zone>,
    pub filled_rejections: Vec<FilledRejection>,
    /// Trend after this candle
    pub trend: Option<Direction>,
}

impl StructureEvents {
    /// Confirmed shift of any origin (MSS or BOS)
    pub fn structure_shift(&self) -> Option<&StructureShiftEvent> {
        self.shift.as_ref().filter(|e| e.is_confirmed())
    }

    pub fn choch(&self) -> Option<&StructureShiftEvent> {
        self.shift
            .as_ref()
            .filter(|e| matches!(e, StructureShiftEvent::Choch(_)))
    }

    pub fn mss(&self) -> Option<&StructureShiftEvent> {
        self.shift
            .as_ref()
            .filter(|e| matches!(e, StructureShiftEvent::Mss { .. }))
    }

    pub fn bos(&self) -> Option<&StructureShiftEvent> {
        self.shift
            .as_ref()
            .filter(|e| matches!(e, StructureShiftEvent::Bos(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.new_swings.is_empty()
            && self.shift.is_none()
            && self.new_zones.is_empty()
            && self.filled_rejections.is_empty()
    }
}

/// All mutable state of one timeframe
#[derive(Debug, Clone)]
pub struct EngineState {
    pub candles: CandleBuffer,
    pub swings: SwingTracker,
    pub zones: ZoneTracker,
    pub structure: ShiftState,
    pub last_timestamp: Option<i64>,
}

impl EngineState {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            candles: CandleBuffer::new(config.max_buffer_size),
            swings: SwingTracker::new(config.max_swings, config.max_swing_sequence),
            zones: ZoneTracker::new(),
            structure: ShiftState::default(),
            last_timestamp: None,
        }
    }

    /// Advance this state by one candle.
    ///
    /// Panics if the candle is not strictly later than the previous one.
    pub fn process_candle(&mut self, config: &AnalyzerConfig, candle: &Candle) -> StructureEvents {
        if let Some(last) = self.last_timestamp {
            assert!(
                candle.timestamp > last,
                "candle at {} is not after previous candle at {}",
                candle.timestamp,
                last
            );
        }
        self.last_timestamp = Some(candle.timestamp);

        if self.candles.push(*candle) > 0 {
            self.swings.discard_trimmed(self.candles.base());
        }

        let new_swings = self
            .swings
            .detect(&self.candles, config.swing_lookback, config.min_swing_size);

        let shift = self.structure.evaluate(&ShiftContext {
            close: candle.close,
            timestamp: candle.timestamp,
            swings: &self.swings,
            config,
        });

        // Existing zones see this candle before new ones are added
        let filled_rejections = self.zones.update(candle, config);

        let mut new_zones = Vec::new();
        if let Some(fvg) = self.zones.scan_fvg(&self.candles, config) {
            new_zones.push(fvg);
        }
        if let Some(ob) = self.zones.scan_order_block(&self.candles, config) {
            new_zones.push(ob);
        }

        StructureEvents {
            timestamp: candle.timestamp,
            new_swings,
            shift,
            new_zones,
            filled_rejections,
            trend: self.structure.trend,
        }
    }
}

pub struct StructureAnalyzer {
    config: AnalyzerConfig,
    state: EngineState,
}

impl StructureAnalyzer {
    /// Create an analyzer after validating the config
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;
        let state = EngineState::new(&config);
        Ok(Self { config, state })
    }

    pub fn process_candle(&mut self, candle: &Candle) -> StructureEvents {
        self.state.process_candle(&self.config, candle)
    }

    /// Clear all state for a new run
    pub fn reset(&mut self) {
        self.state = EngineState::new(&self.config);
    }

    /// Take a filled-then-rejected FVG record off the queue, at most once
    pub fn consume_rejection(&mut self, id: ZoneId) -> Option<FilledRejection> {
        self.state.zones.consume_rejection(id)
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn trend(&self) -> Option<Direction> {
        self.state.structure.trend
    }

    pub fn pending_reversal(&self) -> Option<&PendingReversal> {
        self.state.structure.pending_reversal.as_ref()
    }

    pub fn active_fvgs(&self) -> Vec<Zone> {
        self.state.zones.fvgs().iter().cloned().collect()
    }

    pub fn active_order_blocks(&self) -> Vec<Zone> {
        self.state.zones.order_blocks().iter().cloned().collect()
    }

    pub fn pending_rejections(&self) -> impl Iterator<Item = &FilledRejection> {
        self.state.zones.rejections()
    }

    pub fn swings(&self) -> &SwingTracker {
        &self.state.swings
    }

    pub fn candles(&self) -> &CandleBuffer {
        &self.state.candles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::swing::SwingKind;
    use crate::structure::zones::ZoneKind;
    use crate::types::test_support::{bar, body, candle};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn analyzer(lookback: usize, break_confirmation: f64) -> StructureAnalyzer {
        StructureAnalyzer::new(AnalyzerConfig {
            swing_lookback: lookback,
            break_confirmation,
            ..Default::default()
        })
        .unwrap()
    }

    /// Downtrend of 20 candles: a lower high at 7 and 16, a lower low at 12
    fn downtrend() -> Vec<Candle> {
        let pattern: [(f64, f64); 20] = [
            (210.0, 204.0),
            (208.0, 202.0),
            (206.0, 200.0),
            (204.0, 198.0),
            (202.0, 196.0),
            (200.0, 194.0),
            (203.0, 197.0),
            (206.0, 200.0), // lower high
            (203.0, 197.0),
            (200.0, 194.0),
            (197.0, 191.0),
            (194.0, 188.0),
            (191.0, 185.0), // swing low
            (194.0, 188.0),
            (196.0, 190.0),
            (198.0, 192.0),
            (199.0, 193.0), // lower high
            (196.0, 190.0),
            (193.0, 187.0),
            (190.0, 184.0),
        ];
        pattern
            .iter()
            .enumerate()
            .map(|(i, &(h, l))| bar(i as i64, h, l))
            .collect()
    }

    #[test]
    fn test_downtrend_then_bullish_choch_and_shift() {
        let mut analyzer = analyzer(3, 2.0);
        let shifts: Vec<_> = downtrend()
            .iter()
            .filter_map(|c| analyzer.process_candle(c).shift)
            .map(|e| e.kind())
            .collect();
        // CHoCH below 194 at candle 11, confirmed at 12
        assert_eq!(shifts, vec!["bearish_choch", "bearish_shift"]);
        assert_eq!(analyzer.trend(), Some(Direction::Bearish));

        // Final low at 21 (created by the 199 high), then a rally toward 199
        let tail = [
            bar(20, 187.0, 181.0),
            bar(21, 186.0, 178.0), // swing low
            bar(22, 190.0, 182.0),
            bar(23, 194.0, 186.0),
            bar(24, 197.0, 191.0),
        ];
        let mut lows = Vec::new();
        let mut choch = None;
        for c in tail {
            let events = analyzer.process_candle(&c);
            lows.extend(events.new_swings.iter().filter(|s| s.kind == SwingKind::Low).cloned());
            if let Some(e) = events.choch() {
                choch = Some(e.clone());
            }
        }
        assert_eq!(lows.len(), 1);
        assert_eq!(lows[0].price, 178.0);
        let creator = lows[0].creating_swing.unwrap();
        assert_eq!(creator.price, 199.0);
        assert!(choch.is_none());

        // Close 5 above the creating high (>= 2, < 6)
        let events = analyzer.process_candle(&candle(25, 197.0, 205.0, 196.0, 204.0));
        let e = events.choch().expect("bullish choch");
        assert_eq!(e.kind(), "bullish_choch");
        assert_eq!(e.level(), 199.0);
        assert!(analyzer.pending_reversal().is_some());
        assert_eq!(analyzer.trend(), Some(Direction::Bearish));

        let events = analyzer.process_candle(&candle(26, 204.0, 206.0, 201.5, 202.0));
        let e = events.structure_shift().expect("bullish shift");
        assert_eq!(e.kind(), "bullish_shift");
        assert_eq!(analyzer.trend(), Some(Direction::Bullish));
        assert!(analyzer.pending_reversal().is_none());
    }

    #[test]
    fn test_displacement_close_confirms_immediately() {
        let mut analyzer = analyzer(3, 2.0);
        for c in downtrend() {
            analyzer.process_candle(&c);
        }
        for c in [
            bar(20, 187.0, 181.0),
            bar(21, 186.0, 178.0),
            bar(22, 190.0, 182.0),
            bar(23, 194.0, 186.0),
            bar(24, 197.0, 191.0),
        ] {
            analyzer.process_candle(&c);
        }
        let events = analyzer.process_candle(&candle(25, 197.0, 210.0, 196.0, 208.0));
        assert!(events.choch().is_none());
        let e = events.structure_shift().expect("shift");
        assert_eq!(e.kind(), "bullish_shift");
        assert!(analyzer.pending_reversal().is_none());
        assert_eq!(analyzer.trend(), Some(Direction::Bullish));
    }

    #[test]
    fn test_order_block_scenario() {
        let mut analyzer = StructureAnalyzer::new(AnalyzerConfig {
            min_fvg_size: 3.0,
            ..Default::default()
        })
        .unwrap();
        analyzer.process_candle(&body(0, 94.0, 98.0, 0.5));
        analyzer.process_candle(&candle(1, 99.0, 100.0, 96.0, 97.0));

        let mut reported = Vec::new();
        for c in [body(2, 97.0, 101.0, 0.5), body(3, 101.0, 106.0, 0.5), body(4, 106.0, 112.0, 0.5)] {
            let events = analyzer.process_candle(&c);
            reported.extend(events.new_zones.into_iter().filter(|z| z.kind == ZoneKind::OrderBlock));
        }
        assert_eq!(reported.len(), 1);
        let obs = analyzer.active_order_blocks();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].direction, Direction::Bullish);
        assert_eq!((obs[0].high, obs[0].low), (100.0, 96.0));
    }

    #[test]
    #[should_panic(expected = "not after previous candle")]
    fn test_out_of_order_candle_panics() {
        let mut analyzer = analyzer(3, 2.0);
        analyzer.process_candle(&bar(5, 10.0, 9.0));
        analyzer.process_candle(&bar(4, 10.0, 9.0));
    }

    fn random_walk(seed: u64, n: usize) -> Vec<Candle> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut price: f64 = 20_000.0;
        (0..n)
            .map(|i| {
                let open = price;
                let close = open + rng.gen_range(-12.0..12.0);
                let high = open.max(close) + rng.gen_range(0.0..4.0);
                let low = open.min(close) - rng.gen_range(0.0..4.0);
                price = close;
                candle(i as i64, open, high, low, close)
            })
            .collect()
    }

    #[test]
    fn test_reset_replay_is_identical() {
        let candles = random_walk(7, 1_500);
        let mut fresh = analyzer(3, 2.0);
        let first: Vec<_> = candles.iter().map(|c| fresh.process_candle(c)).collect();

        fresh.reset();
        let second: Vec<_> = candles.iter().map(|c| fresh.process_candle(c)).collect();

        let mut other = analyzer(3, 2.0);
        let third: Vec<_> = candles.iter().map(|c| other.process_candle(c)).collect();

        assert_eq!(first, second);
        assert_eq!(first, third);
        assert!(first.iter().any(|e| e.shift.is_some()));
    }

    #[test]
    fn test_memory_stays_bounded() {
        let config = AnalyzerConfig {
            max_buffer_size: 64,
            ..Default::default()
        };
        let mut analyzer = StructureAnalyzer::new(config.clone()).unwrap();
        for c in random_walk(11, 5_000) {
            analyzer.process_candle(&c);
            assert!(analyzer.candles().len() <= config.max_buffer_size);
            assert!(analyzer.swings().highs().count() <= config.max_swings);
            assert!(analyzer.swings().lows().count() <= config.max_swings);
            assert!(analyzer.swings().sequence_len() <= config.max_swing_sequence);
            assert!(analyzer.active_fvgs().len() <= config.max_active_zones);
            assert!(analyzer.active_order_blocks().len() <= config.max_active_zones);
            assert!(analyzer.pending_rejections().count() <= config.max_rejections);
            let base = analyzer.candles().base();
            assert!(analyzer.swings().highs().all(|s| s.bar_index >= base));
        }
    }

    #[test]
    fn test_creating_swing_property_on_random_walk() {
        let mut analyzer = analyzer(2, 2.0);
        let mut confirmed: Vec<Swing> = Vec::new();
        for c in random_walk(3, 2_000) {
            let events = analyzer.process_candle(&c);
            for swing in events.new_swings {
                let expected = confirmed
                    .iter()
                    .rev()
                    .find(|s| s.kind == swing.kind.opposite())
                    .map(|s| s.id);
                assert_eq!(swing.creating_swing.map(|l| l.id), expected);
                if let Some(link) = swing.creating_swing {
                    assert_eq!(link.kind, swing.kind.opposite());
                }
                confirmed.push(swing);
            }
        }
        assert!(confirmed.len() > 100);
    }

    #[test]
    fn test_zone_age_monotonic() {
        let mut analyzer = analyzer(3, 2.0);
        let mut previous: Vec<Zone> = Vec::new();
        for c in random_walk(5, 2_000) {
            analyzer.process_candle(&c);
            let current: Vec<Zone> = analyzer
                .active_fvgs()
                .into_iter()
                .chain(analyzer.active_order_blocks())
                .collect();
            for zone in &current {
                if let Some(before) = previous.iter().find(|z| z.id == zone.id) {
                    assert_eq!(zone.age, before.age + 1);
                    assert!(!zone.filled);
                }
            }
            previous = current;
        }
    }

    #[test]
    fn test_swing_reported_once_at_lookback() {
        let mut analyzer = analyzer(3, 2.0);
        let mut seen = std::collections::HashSet::new();
        for (n, c) in random_walk(9, 800).iter().enumerate() {
            for swing in analyzer.process_candle(c).new_swings {
                assert_eq!(swing.bar_index + 3, n as u64);
                assert!(seen.insert((swing.bar_index, swing.kind)));
            }
        }
    }

    #[test]
    fn test_consume_rejection_via_analyzer() {
        let mut analyzer = analyzer(3, 2.0);
        let mut found = None;
        for c in random_walk(21, 3_000) {
            let events = analyzer.process_candle(&c);
            if let Some(r) = events.filled_rejections.first() {
                found = Some(r.zone.id);
                break;
            }
        }
        let id = found.expect("random walk should reject at least one FVG");
        assert!(analyzer.consume_rejection(id).is_some());
        assert!(analyzer.consume_rejection(id).is_none());
    }
}
