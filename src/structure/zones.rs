//! Supply/demand zone tracking: fair value gaps and order blocks
//!
//! Zones age by one candle per update and are evicted once filled (FVG),
//! mitigated (order block) or older than their max age. An FVG that is filled
//! but closes back on its favourable side of the midpoint is queued as a
//! filled-then-rejected record until a consumer takes it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::buffer::CandleBuffer;
use super::config::AnalyzerConfig;
use crate::types::{Candle, Direction};

/// Maximum candles in an order-block impulse (including one tolerated counter candle)
const MAX_IMPULSE_CANDLES: usize = 5;

/// Counter candle body must be below this share of the impulse so far to be tolerated
const EMBEDDED_BODY_RATIO: f64 = 0.3;

/// Stable zone handle, unique per analyzer run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    FairValueGap,
    OrderBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub kind: ZoneKind,
    pub direction: Direction,
    /// Top of the zone
    pub high: f64,
    /// Bottom of the zone
    pub low: f64,
    pub midpoint: f64,
    pub size: f64,
    /// Timestamp of the candle the zone sits on (FVG middle candle, OB candle)
    pub timestamp: i64,
    /// Timestamp of the candle that completed the detection
    pub created_at: i64,
    /// Candles processed since creation
    pub age: u32,
    /// Filled (FVG) or mitigated (order block)
    pub filled: bool,
}

impl Zone {
    fn new(id: ZoneId, kind: ZoneKind, direction: Direction, high: f64, low: f64, timestamp: i64, created_at: i64) -> Self {
        Self {
            id,
            kind,
            direction,
            high,
            low,
            midpoint: (high + low) / 2.0,
            size: high - low,
            timestamp,
            created_at,
            age: 0,
            filled: false,
        }
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }

    /// Distance from price to the nearest zone edge (0 inside the zone)
    pub fn distance_to(&self, price: f64) -> f64 {
        if price > self.high {
            price - self.high
        } else if price < self.low {
            self.low - price
        } else {
            0.0
        }
    }

    pub fn overlaps(&self, other: &Zone) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    /// Whether a candle has traded back into the zone from its origin side
    fn is_revisited_by(&self, candle: &Candle) -> bool {
        match self.direction {
            Direction::Bullish => candle.low <= self.high,
            Direction::Bearish => candle.high >= self.low,
        }
    }
}

/// An FVG that was filled but rejected (closed back past its midpoint)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilledRejection {
    pub zone: Zone,
    pub close: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct ZoneTracker {
    fvgs: VecDeque<Zone>,
    order_blocks: VecDeque<Zone>,
    rejections: VecDeque<FilledRejection>,
    next_id: u64,
    /// Source candle of the last order block per direction (bullish, bearish)
    last_ob_source: [Option<i64>; 2],
}

impl Default for ZoneTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneTracker {
    pub fn new() -> Self {
        Self {
            fvgs: VecDeque::new(),
            order_blocks: VecDeque::new(),
            rejections: VecDeque::new(),
            next_id: 0,
            last_ob_source: [None, None],
        }
    }

    fn allocate_id(&mut self) -> ZoneId {
        let id = ZoneId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Age every active zone by one candle, apply fills/mitigations and evict.
    /// Returns the filled-then-rejected records produced by this candle.
    pub fn update(&mut self, candle: &Candle, config: &AnalyzerConfig) -> Vec<FilledRejection> {
        let mut rejected = Vec::new();

        for fvg in self.fvgs.iter_mut() {
            fvg.age += 1;
            if fvg.filled || !fvg.is_revisited_by(candle) {
                continue;
            }
            fvg.filled = true;
            let held = match fvg.direction {
                Direction::Bullish => candle.close > fvg.midpoint,
                Direction::Bearish => candle.close < fvg.midpoint,
            };
            debug!(
                "{} FVG {:.2}-{:.2} filled (rejected: {})",
                fvg.direction, fvg.low, fvg.high, held
            );
            if held {
                rejected.push(FilledRejection {
                    zone: fvg.clone(),
                    close: candle.close,
                    timestamp: candle.timestamp,
                });
            }
        }

        for ob in self.order_blocks.iter_mut() {
            ob.age += 1;
            if !ob.filled && ob.is_revisited_by(candle) {
                ob.filled = true;
                debug!("{} order block {:.2}-{:.2} mitigated", ob.direction, ob.low, ob.high);
            }
        }

        self.fvgs.retain(|z| !z.filled && z.age <= config.max_fvg_age);
        self.order_blocks.retain(|z| !z.filled && z.age <= config.max_ob_age);

        for record in &rejected {
            self.rejections.push_back(record.clone());
            if self.rejections.len() > config.max_rejections {
                self.rejections.pop_front();
            }
        }

        rejected
    }

    /// Check the last three candles for a fair value gap
    pub fn scan_fvg(&mut self, buffer: &CandleBuffer, config: &AnalyzerConfig) -> Option<Zone> {
        let (first, middle, last) = (buffer.from_end(2)?, buffer.from_end(1)?, buffer.from_end(0)?);

        let bullish_gap = last.low - first.high;
        let bearish_gap = first.low - last.high;

        let (direction, high, low, gap) = if middle.is_bullish() && bullish_gap >= config.min_fvg_size {
            (Direction::Bullish, last.low, first.high, bullish_gap)
        } else if middle.is_bearish() && bearish_gap >= config.min_fvg_size {
            (Direction::Bearish, first.low, last.high, bearish_gap)
        } else {
            return None;
        };

        let (timestamp, created_at) = (middle.timestamp, last.timestamp);
        let id = self.allocate_id();
        let zone = Zone::new(id, ZoneKind::FairValueGap, direction, high, low, timestamp, created_at);
        debug!("{} FVG {:.2}-{:.2} ({:.2} pts)", direction, low, high, gap);

        push_bounded(&mut self.fvgs, zone.clone(), config.max_active_zones);
        Some(zone)
    }

    /// Look back from the newest candle for an impulse and the counter candle before it
    pub fn scan_order_block(&mut self, buffer: &CandleBuffer, config: &AnalyzerConfig) -> Option<Zone> {
        let current = *buffer.from_end(0)?;
        let direction = current.direction()?;

        let mut accumulated: f64 = 0.0;
        let mut impulse_len = 0usize;
        let mut tolerated = false;
        let mut start = current;
        let mut n = 0usize;

        let block = loop {
            let candle = *buffer.from_end(n)?;

            if candle.direction() == Some(direction) {
                if impulse_len == MAX_IMPULSE_CANDLES {
                    return None;
                }
                accumulated += candle.body();
                impulse_len += 1;
                start = candle;
                n += 1;
                continue;
            }

            // One small counter candle may sit inside the impulse, as long as
            // the impulse continues on its other side
            let continues = buffer
                .from_end(n + 1)
                .is_some_and(|prev| prev.direction() == Some(direction));
            if !tolerated
                && continues
                && impulse_len < MAX_IMPULSE_CANDLES
                && candle.body() < accumulated * EMBEDDED_BODY_RATIO
            {
                tolerated = true;
                impulse_len += 1;
                n += 1;
                continue;
            }

            if candle.direction() != Some(direction.opposite()) {
                return None;
            }
            break candle;
        };

        let impulse_move = match direction {
            Direction::Bullish => current.close - start.open,
            Direction::Bearish => start.open - current.close,
        };
        if impulse_move < config.min_fvg_size {
            return None;
        }

        let slot = match direction {
            Direction::Bullish => 0,
            Direction::Bearish => 1,
        };
        if self.last_ob_source[slot] == Some(block.timestamp) {
            return None;
        }
        self.last_ob_source[slot] = Some(block.timestamp);

        let id = self.allocate_id();
        let zone = Zone::new(
            id,
            ZoneKind::OrderBlock,
            direction,
            block.high,
            block.low,
            block.timestamp,
            current.timestamp,
        );
        debug!(
            "{} order block {:.2}-{:.2} ({} candle impulse, {:.2} pts)",
            direction, block.low, block.high, impulse_len, impulse_move
        );

        push_bounded(&mut self.order_blocks, zone.clone(), config.max_active_zones);
        Some(zone)
    }

    /// Remove and return a queued filled-then-rejected record by zone id
    pub fn consume_rejection(&mut self, id: ZoneId) -> Option<FilledRejection> {
        let position = self.rejections.iter().position(|r| r.zone.id == id)?;
        self.rejections.remove(position)
    }

    pub fn fvgs(&self) -> &VecDeque<Zone> {
        &self.fvgs
    }

    pub fn order_blocks(&self) -> &VecDeque<Zone> {
        &self.order_blocks
    }

    pub fn rejections(&self) -> impl Iterator<Item = &FilledRejection> {
        self.rejections.iter()
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

fn push_bounded(list: &mut VecDeque<Zone>, zone: Zone, max: usize) {
    list.push_back(zone);
    while list.len() > max {
        list.pop_front();
    }
}
