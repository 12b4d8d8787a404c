//! Structural shift classification: CHoCH, MSS, fallback shift and BOS
//!
//! Classifiers run in a fixed priority order on every candle close and the
//! first one to produce an event wins:
//! 1. CHoCH - break of the level that created the latest opposing swing,
//!    against the current trend. Breaks of 3x the confirmation distance are
//!    promoted straight to a confirmed shift (displacement).
//! 2. MSS - a later close beyond a pending CHoCH confirms it; a close back
//!    past the causal swing invalidates it instead.
//! 3. Fallback - while swings have no resolvable creator, a direct break of
//!    the latest swing sets the trend.
//! 4. BOS - continuation break of a new swing extreme in the trend direction.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::config::AnalyzerConfig;
use super::swing::{SwingKind, SwingLink, SwingTracker};
use crate::types::Direction;

/// How a market structure shift was confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftOrigin {
    /// CHoCH followed by a confirming close
    Confirmation,
    /// CHoCH break large enough to skip confirmation
    Displacement,
    /// Direct break of the latest swing before causal swings exist
    Fallback,
}

/// Fields shared by every structure event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftDetail {
    pub direction: Direction,
    /// Price level that was broken
    pub level: f64,
    /// Timestamp of the breaking candle
    pub timestamp: i64,
    /// Swing the move originates from (invalidation reference, stop anchor)
    pub causal_swing: Option<SwingLink>,
    /// Price span between the two swings that define the move
    pub impulse_range: f64,
    /// Close distance beyond the level
    pub break_distance: f64,
}

/// Reference to the CHoCH an MSS confirms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChochRef {
    pub level: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructureShiftEvent {
    /// Change of character, unconfirmed
    Choch(ShiftDetail),
    /// Confirmed market structure shift (trend change)
    Mss {
        #[serde(flatten)]
        detail: ShiftDetail,
        origin: ShiftOrigin,
        confirms: Option<ChochRef>,
    },
    /// Break of structure in the trend direction
    Bos(ShiftDetail),
}

impl StructureShiftEvent {
    pub fn detail(&self) -> &ShiftDetail {
        match self {
            StructureShiftEvent::Choch(d) | StructureShiftEvent::Bos(d) => d,
            StructureShiftEvent::Mss { detail, .. } => detail,
        }
    }

    pub fn direction(&self) -> Direction {
        self.detail().direction
    }

    pub fn level(&self) -> f64 {
        self.detail().level
    }

    /// Whether the event changes or extends the trend (MSS or BOS)
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, StructureShiftEvent::Choch(_))
    }

    /// Quality score used by consumers that act on a shift without a prior CHoCH
    pub fn confidence(&self) -> f64 {
        match self {
            StructureShiftEvent::Choch(_) => 0.4,
            StructureShiftEvent::Mss { origin, .. } => match origin {
                ShiftOrigin::Displacement => 0.9,
                ShiftOrigin::Confirmation => 0.8,
                ShiftOrigin::Fallback => 0.5,
            },
            StructureShiftEvent::Bos(_) => 0.7,
        }
    }

    /// Event name in the `bullish_choch` / `bearish_shift` / `bullish_bos` style
    pub fn kind(&self) -> &'static str {
        match (self, self.direction()) {
            (StructureShiftEvent::Choch(_), Direction::Bullish) => "bullish_choch",
            (StructureShiftEvent::Choch(_), Direction::Bearish) => "bearish_choch",
            (StructureShiftEvent::Mss { .. }, Direction::Bullish) => "bullish_shift",
            (StructureShiftEvent::Mss { .. }, Direction::Bearish) => "bearish_shift",
            (StructureShiftEvent::Bos(_), Direction::Bullish) => "bullish_bos",
            (StructureShiftEvent::Bos(_), Direction::Bearish) => "bearish_bos",
        }
    }
}

/// A detected CHoCH waiting for confirmation or invalidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReversal {
    pub direction: Direction,
    pub level: f64,
    pub timestamp: i64,
    /// Swing the reversal leg starts from; a close back past it invalidates
    pub causal_swing: SwingLink,
    pub impulse_range: f64,
}

/// Trend and break bookkeeping for one timeframe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShiftState {
    pub trend: Option<Direction>,
    pub last_bullish_break: Option<f64>,
    pub last_bearish_break: Option<f64>,
    pub pending_reversal: Option<PendingReversal>,
}

/// Inputs one classifier needs for the current candle
pub struct ShiftContext<'a> {
    pub close: f64,
    pub timestamp: i64,
    pub swings: &'a SwingTracker,
    pub config: &'a AnalyzerConfig,
}

type Classifier = fn(&mut ShiftState, &ShiftContext<'_>) -> Option<StructureShiftEvent>;

/// Priority order; the first classifier returning an event wins the candle
const CLASSIFIERS: [Classifier; 4] = [
    ShiftState::classify_choch,
    ShiftState::classify_confirmation,
    ShiftState::classify_fallback,
    ShiftState::classify_bos,
];

impl ShiftState {
    /// Run the classifier cascade for one candle close
    pub fn evaluate(&mut self, ctx: &ShiftContext<'_>) -> Option<StructureShiftEvent> {
        CLASSIFIERS.iter().find_map(|classify| classify(self, ctx))
    }

    fn last_break(&self, direction: Direction) -> Option<f64> {
        match direction {
            Direction::Bullish => self.last_bullish_break,
            Direction::Bearish => self.last_bearish_break,
        }
    }

    /// Apply a confirmed shift: trend, dedup marker, pending cleared
    fn confirm(&mut self, direction: Direction, level: f64) {
        self.trend = Some(direction);
        match direction {
            Direction::Bullish => self.last_bullish_break = Some(level),
            Direction::Bearish => self.last_bearish_break = Some(level),
        }
        self.pending_reversal = None;
    }

    pub fn classify_choch(&mut self, ctx: &ShiftContext<'_>) -> Option<StructureShiftEvent> {
        [Direction::Bullish, Direction::Bearish]
            .into_iter()
            .find_map(|direction| self.choch_for(direction, ctx))
    }

    fn choch_for(&mut self, direction: Direction, ctx: &ShiftContext<'_>) -> Option<StructureShiftEvent> {
        if self.trend == Some(direction) {
            return None;
        }

        // Bullish: the high that created the latest swing low, and vice versa
        let origin_kind = match direction {
            Direction::Bullish => SwingKind::Low,
            Direction::Bearish => SwingKind::High,
        };
        let origin = ctx.swings.latest(origin_kind)?;
        let creator = origin.creating_swing?;
        let level = creator.price;

        let distance = beyond(direction, ctx.close, level);
        if distance <= ctx.config.break_confirmation {
            return None;
        }
        if self.last_break(direction) == Some(level) {
            return None;
        }
        if let Some(pending) = &self.pending_reversal {
            if pending.direction == direction && pending.level == level {
                return None;
            }
        }

        let detail = ShiftDetail {
            direction,
            level,
            timestamp: ctx.timestamp,
            causal_swing: Some(origin.link()),
            impulse_range: (level - origin.price).abs(),
            break_distance: distance,
        };

        if distance >= ctx.config.displacement_threshold() {
            info!(
                "{} displacement through {:.2} ({:.2} pts) - shift confirmed",
                direction, level, distance
            );
            self.confirm(direction, level);
            return Some(StructureShiftEvent::Mss {
                detail,
                origin: ShiftOrigin::Displacement,
                confirms: None,
            });
        }

        info!("{} CHoCH at {:.2} (close {:.2})", direction, level, ctx.close);
        self.pending_reversal = Some(PendingReversal {
            direction,
            level,
            timestamp: ctx.timestamp,
            causal_swing: origin.link(),
            impulse_range: detail.impulse_range,
        });
        Some(StructureShiftEvent::Choch(detail))
    }

    pub fn classify_confirmation(&mut self, ctx: &ShiftContext<'_>) -> Option<StructureShiftEvent> {
        let pending = self.pending_reversal.clone()?;
        let direction = pending.direction;

        let distance = beyond(direction, ctx.close, pending.level);
        if distance > ctx.config.break_confirmation {
            info!(
                "{} MSS confirmed at {:.2} (CHoCH @ {})",
                direction, pending.level, pending.timestamp
            );
            self.confirm(direction, pending.level);
            return Some(StructureShiftEvent::Mss {
                detail: ShiftDetail {
                    direction,
                    level: pending.level,
                    timestamp: ctx.timestamp,
                    causal_swing: Some(pending.causal_swing),
                    impulse_range: pending.impulse_range,
                    break_distance: distance,
                },
                origin: ShiftOrigin::Confirmation,
                confirms: Some(ChochRef {
                    level: pending.level,
                    timestamp: pending.timestamp,
                }),
            });
        }

        if beyond(direction.opposite(), ctx.close, pending.causal_swing.price) > 0.0 {
            info!(
                "{} CHoCH at {:.2} invalidated: close {:.2} back past {:.2}",
                direction, pending.level, ctx.close, pending.causal_swing.price
            );
            self.pending_reversal = None;
        }
        None
    }

    pub fn classify_fallback(&mut self, ctx: &ShiftContext<'_>) -> Option<StructureShiftEvent> {
        [Direction::Bullish, Direction::Bearish]
            .into_iter()
            .find_map(|direction| self.fallback_for(direction, ctx))
    }

    fn fallback_for(&mut self, direction: Direction, ctx: &ShiftContext<'_>) -> Option<StructureShiftEvent> {
        if self.trend == Some(direction) {
            return None;
        }

        let (origin_kind, target_kind) = match direction {
            Direction::Bullish => (SwingKind::Low, SwingKind::High),
            Direction::Bearish => (SwingKind::High, SwingKind::Low),
        };
        // Only while the causal level cannot be resolved
        if ctx
            .swings
            .latest(origin_kind)
            .is_some_and(|s| s.creating_swing.is_some())
        {
            return None;
        }

        let target = ctx.swings.latest(target_kind)?;
        let level = target.price;
        let distance = beyond(direction, ctx.close, level);
        if distance <= ctx.config.break_confirmation || self.last_break(direction) == Some(level) {
            return None;
        }

        let origin = ctx.swings.latest(origin_kind);
        info!("{} structure shift (fallback) through {:.2}", direction, level);
        self.confirm(direction, level);
        Some(StructureShiftEvent::Mss {
            detail: ShiftDetail {
                direction,
                level,
                timestamp: ctx.timestamp,
                causal_swing: origin.map(|s| s.link()),
                impulse_range: origin.map_or(0.0, |s| (level - s.price).abs()),
                break_distance: distance,
            },
            origin: ShiftOrigin::Fallback,
            confirms: None,
        })
    }

    pub fn classify_bos(&mut self, ctx: &ShiftContext<'_>) -> Option<StructureShiftEvent> {
        let direction = self.trend?;
        let (target_kind, origin_kind) = match direction {
            Direction::Bullish => (SwingKind::High, SwingKind::Low),
            Direction::Bearish => (SwingKind::Low, SwingKind::High),
        };

        let target = ctx.swings.latest(target_kind)?;
        let level = target.price;
        // Must extend beyond the previous break in this direction
        if let Some(previous) = self.last_break(direction) {
            if beyond(direction, level, previous) <= 0.0 {
                return None;
            }
        }
        let distance = beyond(direction, ctx.close, level);
        if distance <= ctx.config.break_confirmation {
            return None;
        }

        let origin = ctx.swings.latest(origin_kind);
        info!("{} BOS through {:.2}", direction, level);
        self.confirm(direction, level);
        Some(StructureShiftEvent::Bos(ShiftDetail {
            direction,
            level,
            timestamp: ctx.timestamp,
            causal_swing: origin.map(|s| s.link()),
            impulse_range: origin.map_or(0.0, |s| (level - s.price).abs()),
            break_distance: distance,
        }))
    }
}

/// Signed distance of `price` beyond `level` in `direction` (positive = broken)
fn beyond(direction: Direction, price: f64, level: f64) -> f64 {
    match direction {
        Direction::Bullish => price - level,
        Direction::Bearish => level - price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::buffer::CandleBuffer;
    use crate::types::test_support::bar;

    /// Swing tracker holding: high 120 (id0) -> low 100 (id1, created by 120)
    fn swings_with_low() -> SwingTracker {
        let mut buffer = CandleBuffer::new(100);
        let mut tracker = SwingTracker::new(10, 20);
        let data = [
            (110.0, 105.0),
            (115.0, 108.0),
            (120.0, 112.0),
            (116.0, 109.0),
            (112.0, 104.0),
            (108.0, 100.0),
            (110.0, 103.0),
            (112.0, 105.0),
        ];
        for (i, (h, l)) in data.into_iter().enumerate() {
            buffer.push(bar(i as i64, h, l));
            tracker.detect(&buffer, 2, 0.5);
        }
        assert_eq!(tracker.latest_low().map(|s| s.price), Some(100.0));
        tracker
    }

    fn ctx<'a>(close: f64, swings: &'a SwingTracker, config: &'a AnalyzerConfig) -> ShiftContext<'a> {
        ShiftContext {
            close,
            timestamp: 1_000,
            swings,
            config,
        }
    }

    fn bearish_state() -> ShiftState {
        ShiftState {
            trend: Some(Direction::Bearish),
            ..Default::default()
        }
    }

    #[test]
    fn test_choch_then_confirmation() {
        let swings = swings_with_low();
        let config = AnalyzerConfig::default();
        let mut state = bearish_state();

        let event = state.evaluate(&ctx(123.0, &swings, &config)).unwrap();
        assert_eq!(event.kind(), "bullish_choch");
        assert_eq!(event.level(), 120.0);
        assert_eq!(event.detail().impulse_range, 20.0);
        assert_eq!(state.trend, Some(Direction::Bearish));
        assert!(state.pending_reversal.is_some());

        // Same level does not fire a second CHoCH
        assert!(state.evaluate(&ctx(121.0, &swings, &config)).is_none());

        let event = state.evaluate(&ctx(122.5, &swings, &config)).unwrap();
        assert_eq!(event.kind(), "bullish_shift");
        match &event {
            StructureShiftEvent::Mss { origin, confirms, .. } => {
                assert_eq!(*origin, ShiftOrigin::Confirmation);
                assert_eq!(confirms.map(|c| c.level), Some(120.0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(state.trend, Some(Direction::Bullish));
        assert_eq!(state.last_bullish_break, Some(120.0));
        assert!(state.pending_reversal.is_none());
    }

    #[test]
    fn test_displacement_skips_confirmation() {
        let swings = swings_with_low();
        let config = AnalyzerConfig::default();
        let mut state = bearish_state();

        let event = state.evaluate(&ctx(126.0, &swings, &config)).unwrap();
        assert_eq!(event.kind(), "bullish_shift");
        assert!(matches!(
            event,
            StructureShiftEvent::Mss {
                origin: ShiftOrigin::Displacement,
                ..
            }
        ));
        assert!(state.pending_reversal.is_none());
        assert_eq!(state.trend, Some(Direction::Bullish));
    }

    #[test]
    fn test_pending_invalidated_below_causal_swing() {
        let swings = swings_with_low();
        let config = AnalyzerConfig::default();
        let mut state = bearish_state();

        state.evaluate(&ctx(123.0, &swings, &config)).unwrap();
        assert!(state.evaluate(&ctx(110.0, &swings, &config)).is_none());
        assert!(state.pending_reversal.is_some());
        assert!(state.evaluate(&ctx(99.0, &swings, &config)).is_none());
        assert!(state.pending_reversal.is_none());
        assert_eq!(state.trend, Some(Direction::Bearish));
    }

    #[test]
    fn test_small_break_is_ignored() {
        let swings = swings_with_low();
        let config = AnalyzerConfig::default();
        let mut state = bearish_state();
        assert!(state.evaluate(&ctx(122.0, &swings, &config)).is_none());
        assert!(state.pending_reversal.is_none());
    }

    #[test]
    fn test_bos_requires_trend_and_new_extreme() {
        let swings = swings_with_low();
        let config = AnalyzerConfig::default();

        // Bearish trend: break of the 100 low is a continuation
        let mut state = ShiftState {
            trend: Some(Direction::Bearish),
            last_bearish_break: Some(104.0),
            ..Default::default()
        };
        let event = state.evaluate(&ctx(97.0, &swings, &config)).unwrap();
        assert_eq!(event.kind(), "bearish_bos");
        assert_eq!(state.last_bearish_break, Some(100.0));

        // Already broken at that level: no repeat
        assert!(state.evaluate(&ctx(96.0, &swings, &config)).is_none());

        // A low above the last break is not beyond it
        let mut state = ShiftState {
            trend: Some(Direction::Bearish),
            last_bearish_break: Some(95.0),
            ..Default::default()
        };
        assert!(state.evaluate(&ctx(97.0, &swings, &config)).is_none());
    }

    #[test]
    fn test_fallback_without_creating_swing() {
        let mut buffer = CandleBuffer::new(100);
        let mut tracker = SwingTracker::new(10, 20);
        for (i, (h, l)) in [(110.0, 105.0), (115.0, 108.0), (120.0, 112.0), (116.0, 109.0), (112.0, 106.0)]
            .into_iter()
            .enumerate()
        {
            buffer.push(bar(i as i64, h, l));
            tracker.detect(&buffer, 2, 0.5);
        }
        assert!(tracker.latest_low().is_none());
        let config = AnalyzerConfig::default();
        let mut state = ShiftState::default();

        let event = state.evaluate(&ctx(123.0, &tracker, &config)).unwrap();
        assert!(matches!(
            event,
            StructureShiftEvent::Mss {
                origin: ShiftOrigin::Fallback,
                ..
            }
        ));
        assert_eq!(state.trend, Some(Direction::Bullish));
        assert_eq!(state.last_bullish_break, Some(120.0));
    }
}
