//! Entry zone selection, trigger detection and stop/target placement

use serde::{Deserialize, Serialize};

use super::config::StateMachineConfig;
use crate::structure::{ShiftDetail, SwingKind, SwingLink, Zone, ZoneId};
use crate::types::{Candle, Direction};

/// What made the candle in the zone an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryTrigger {
    /// Wick rejection off the zone with a close in the bias direction
    Rejection,
    /// Close in the bias direction inside the zone
    ZoneEntry,
}

impl std::fmt::Display for EntryTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryTrigger::Rejection => write!(f, "rejection"),
            EntryTrigger::ZoneEntry => write!(f, "zone_entry"),
        }
    }
}

/// Pick the entry zone for `bias` from the LTF zone inventory.
///
/// Order blocks are preferred over FVGs. Only unfilled zones of the bias
/// direction that price has not already run through, within
/// `max_entry_distance` and not in `excluded`, qualify. Among candidates the
/// nearest wins, the most recent on ties.
pub fn select_entry_zone(
    bias: Direction,
    price: f64,
    fvgs: &[Zone],
    order_blocks: &[Zone],
    excluded: &[ZoneId],
    config: &StateMachineConfig,
) -> Option<Zone> {
    let eligible = |zone: &&Zone| {
        zone.direction == bias
            && !zone.filled
            && !excluded.contains(&zone.id)
            && on_entry_side(bias, price, zone)
            && zone.distance_to(price) <= config.max_entry_distance
    };

    let obs: Vec<&Zone> = order_blocks.iter().filter(eligible).collect();
    let gaps: Vec<&Zone> = fvgs.iter().filter(eligible).collect();

    match (config.require_order_block, config.require_fvg) {
        (true, true) => nearest(
            obs.into_iter()
                .filter(|ob| gaps.iter().any(|fvg| fvg.overlaps(ob))),
            price,
        ),
        (true, false) => nearest(obs.into_iter(), price),
        (false, true) => nearest(gaps.into_iter(), price),
        (false, false) => nearest(obs.into_iter(), price).or_else(|| nearest(gaps.into_iter(), price)),
    }
}

/// Price must still be on the side the pullback comes from
fn on_entry_side(bias: Direction, price: f64, zone: &Zone) -> bool {
    match bias {
        Direction::Bullish => price >= zone.low,
        Direction::Bearish => price <= zone.high,
    }
}

fn nearest<'a>(zones: impl Iterator<Item = &'a Zone>, price: f64) -> Option<Zone> {
    zones
        .min_by(|a, b| {
            a.distance_to(price)
                .total_cmp(&b.distance_to(price))
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        })
        .cloned()
}

/// Check whether `candle` triggers an entry at `zone`
pub fn detect_trigger(candle: &Candle, zone: &Zone, bias: Direction, wick_ratio: f64) -> Option<EntryTrigger> {
    match bias {
        Direction::Bullish => {
            if candle.low > zone.high || candle.close <= zone.low || !candle.is_bullish() {
                return None;
            }
            if candle.lower_wick() >= wick_ratio * candle.body() {
                Some(EntryTrigger::Rejection)
            } else if candle.close <= zone.high {
                Some(EntryTrigger::ZoneEntry)
            } else {
                None
            }
        }
        Direction::Bearish => {
            if candle.high < zone.low || candle.close >= zone.high || !candle.is_bearish() {
                return None;
            }
            if candle.upper_wick() >= wick_ratio * candle.body() {
                Some(EntryTrigger::Rejection)
            } else if candle.close >= zone.low {
                Some(EntryTrigger::ZoneEntry)
            } else {
                None
            }
        }
    }
}

/// Protective stop beyond both the structure's causal swing and the zone
pub fn stop_level(bias: Direction, structure: &ShiftDetail, zone: &Zone) -> f64 {
    let anchor = match (bias, structure.causal_swing) {
        (_, Some(swing)) => swing.price,
        (Direction::Bullish, None) => structure.level - structure.impulse_range,
        (Direction::Bearish, None) => structure.level + structure.impulse_range,
    };
    match bias {
        Direction::Bullish => anchor.min(zone.low),
        Direction::Bearish => anchor.max(zone.high),
    }
}

/// Nearest resting liquidity past `from` in the bias direction, else a measured move from it.
///
/// `from` is the zone's far edge when the zone is selected and the further of
/// that edge and the entry price once a trigger fires, so the target is never
/// behind the entry.
pub fn target_level<'a>(
    bias: Direction,
    structure: &ShiftDetail,
    zone: &Zone,
    from: f64,
    liquidity: impl Iterator<Item = &'a SwingLink>,
) -> f64 {
    let measured = structure.impulse_range.max(zone.size);
    match bias {
        Direction::Bullish => liquidity
            .filter(|s| s.kind == SwingKind::High && s.price > from)
            .map(|s| s.price)
            .min_by(f64::total_cmp)
            .unwrap_or(from + measured),
        Direction::Bearish => liquidity
            .filter(|s| s.kind == SwingKind::Low && s.price < from)
            .map(|s| s.price)
            .max_by(f64::total_cmp)
            .unwrap_or(from - measured),
    }
}

/// Where the target is measured from: the zone's far edge, or `price` if beyond it
pub fn target_origin(bias: Direction, zone: &Zone, price: Option<f64>) -> f64 {
    match (bias, price) {
        (Direction::Bullish, Some(p)) => zone.high.max(p),
        (Direction::Bearish, Some(p)) => zone.low.min(p),
        (Direction::Bullish, None) => zone.high,
        (Direction::Bearish, None) => zone.low,
    }
}
