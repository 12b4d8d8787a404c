//! Swing point detection with causal back-references
//!
//! A swing high is a candle whose high strictly exceeds the highs of the
//! `lookback` candles on each side; a swing low is the mirror on lows. Each
//! candle is checked exactly once, when it becomes fully bracketed.
//!
//! Every confirmed swing records the most recent opposite-type swing before it
//! in the chronological sequence (`creating_swing`): the extreme that started
//! the leg which produced this swing.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::buffer::CandleBuffer;

/// Stable swing handle, unique per analyzer run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SwingId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

impl SwingKind {
    pub fn opposite(self) -> Self {
        match self {
            SwingKind::High => SwingKind::Low,
            SwingKind::Low => SwingKind::High,
        }
    }
}

/// Weak reference to a swing: its handle plus the immutable fields needed
/// for level tests, so it stays usable after the swing itself is evicted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingLink {
    pub id: SwingId,
    pub kind: SwingKind,
    pub price: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swing {
    pub id: SwingId,
    pub kind: SwingKind,
    pub price: f64,
    pub timestamp: i64,
    /// Logical candle index, stable across buffer trims
    pub bar_index: u64,
    pub creating_swing: Option<SwingLink>,
}

impl Swing {
    pub fn link(&self) -> SwingLink {
        SwingLink {
            id: self.id,
            kind: self.kind,
            price: self.price,
            timestamp: self.timestamp,
        }
    }
}

/// Bounded swing inventory plus the chronological sequence used for causal lookup
#[derive(Debug, Clone)]
pub struct SwingTracker {
    highs: VecDeque<Swing>,
    lows: VecDeque<Swing>,
    sequence: VecDeque<SwingLink>,
    next_id: u64,
    max_swings: usize,
    max_sequence: usize,
}

impl SwingTracker {
    pub fn new(max_swings: usize, max_sequence: usize) -> Self {
        Self {
            highs: VecDeque::with_capacity(max_swings + 1),
            lows: VecDeque::with_capacity(max_swings + 1),
            sequence: VecDeque::with_capacity(max_sequence + 1),
            next_id: 0,
            max_swings,
            max_sequence,
        }
    }

    /// Check the candle at `len - 1 - lookback`, which the newest candle has
    /// just bracketed. Returns the swings confirmed there (high first).
    ///
    /// Panics if a retained swing's candle has already been trimmed from
    /// `buffer`, i.e. `discard_trimmed` was skipped after a trim.
    pub fn detect(&mut self, buffer: &CandleBuffer, lookback: usize, min_swing_size: f64) -> Vec<Swing> {
        // Lists are chronological, so checking the oldest of each is enough
        for oldest in [self.highs.front(), self.lows.front()].into_iter().flatten() {
            assert!(
                oldest.bar_index >= buffer.base(),
                "swing {:?} at index {} precedes buffer base {}",
                oldest.id,
                oldest.bar_index,
                buffer.base()
            );
        }

        let len = buffer.len();
        if len < 2 * lookback + 1 {
            return Vec::new();
        }

        let position = len - 1 - lookback;
        let Some(candidate) = buffer.at(position).copied() else {
            return Vec::new();
        };

        // Degenerate near-flat candles never form swings
        if candidate.range() < min_swing_size {
            return Vec::new();
        }

        let neighbours = (position - lookback..position).chain(position + 1..=position + lookback);
        let mut is_high = true;
        let mut is_low = true;
        for p in neighbours {
            let Some(other) = buffer.at(p) else {
                return Vec::new();
            };
            if other.high >= candidate.high {
                is_high = false;
            }
            if other.low <= candidate.low {
                is_low = false;
            }
            if !is_high && !is_low {
                return Vec::new();
            }
        }

        let bar_index = buffer.base() + position as u64;
        let mut confirmed = Vec::with_capacity(2);
        if is_high {
            confirmed.push(self.confirm(SwingKind::High, candidate.high, candidate.timestamp, bar_index));
        }
        if is_low {
            confirmed.push(self.confirm(SwingKind::Low, candidate.low, candidate.timestamp, bar_index));
        }
        confirmed
    }

    fn confirm(&mut self, kind: SwingKind, price: f64, timestamp: i64, bar_index: u64) -> Swing {
        let creating_swing = self
            .sequence
            .iter()
            .rev()
            .find(|link| link.kind == kind.opposite())
            .copied();

        let swing = Swing {
            id: SwingId(self.next_id),
            kind,
            price,
            timestamp,
            bar_index,
            creating_swing,
        };
        self.next_id += 1;

        debug!(
            "Swing {:?} confirmed: {:.2} @ {} (created by {:?})",
            kind,
            price,
            timestamp,
            creating_swing.map(|c| c.price)
        );

        let list = match kind {
            SwingKind::High => &mut self.highs,
            SwingKind::Low => &mut self.lows,
        };
        list.push_back(swing.clone());
        if list.len() > self.max_swings {
            list.pop_front();
        }

        self.sequence.push_back(swing.link());
        if self.sequence.len() > self.max_sequence {
            self.sequence.pop_front();
        }

        swing
    }

    /// Drop every swing whose candle fell out of the buffer (index < base).
    /// Returns the number of swings discarded.
    pub fn discard_trimmed(&mut self, base: u64) -> usize {
        let before = self.highs.len() + self.lows.len();
        self.highs.retain(|s| s.bar_index >= base);
        self.lows.retain(|s| s.bar_index >= base);
        let discarded = before - (self.highs.len() + self.lows.len());

        if discarded > 0 {
            let (highs, lows) = (&self.highs, &self.lows);
            self.sequence.retain(|link| {
                let list = match link.kind {
                    SwingKind::High => highs,
                    SwingKind::Low => lows,
                };
                list.iter().any(|s| s.id == link.id)
            });
        }
        discarded
    }

    pub fn latest(&self, kind: SwingKind) -> Option<&Swing> {
        match kind {
            SwingKind::High => self.highs.back(),
            SwingKind::Low => self.lows.back(),
        }
    }

    pub fn latest_high(&self) -> Option<&Swing> {
        self.highs.back()
    }

    pub fn latest_low(&self) -> Option<&Swing> {
        self.lows.back()
    }

    pub fn highs(&self) -> impl Iterator<Item = &Swing> {
        self.highs.iter()
    }

    pub fn lows(&self) -> impl Iterator<Item = &Swing> {
        self.lows.iter()
    }

    /// Chronological swing sequence (oldest first)
    pub fn sequence(&self) -> impl Iterator<Item = &SwingLink> {
        self.sequence.iter()
    }

    pub fn sequence_len(&self) -> usize {
        self.sequence.len()
    }

    /// Resolve a handle to a retained swing
    pub fn find(&self, id: SwingId) -> Option<&Swing> {
        self.highs
            .iter()
            .chain(self.lows.iter())
            .find(|s| s.id == id)
    }

    pub fn clear(&mut self) {
        self.highs.clear();
        self.lows.clear();
        self.sequence.clear();
        self.next_id = 0;
    }
}
