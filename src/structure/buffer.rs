//! Bounded candle ring buffer with stable logical indices
//!
//! Every candle ever pushed gets a monotonically increasing logical index.
//! The buffer only keeps the most recent `capacity` candles; a logical index
//! maps to a buffer position as `index - base` while it is still retained.

use std::collections::VecDeque;

use crate::types::Candle;

#[derive(Debug, Clone)]
pub struct CandleBuffer {
    candles: VecDeque<Candle>,
    capacity: usize,
    /// Logical index of the oldest retained candle
    base: u64,
}

impl CandleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity + 1),
            capacity,
            base: 0,
        }
    }

    /// Append a candle, trimming the oldest ones past capacity.
    /// Returns the number of candles trimmed.
    pub fn push(&mut self, candle: Candle) -> usize {
        self.candles.push_back(candle);
        let mut trimmed = 0;
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
            self.base += 1;
            trimmed += 1;
        }
        trimmed
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Logical index of the oldest retained candle
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Logical index of the newest candle
    pub fn latest_index(&self) -> Option<u64> {
        if self.candles.is_empty() {
            None
        } else {
            Some(self.base + self.candles.len() as u64 - 1)
        }
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Candle `n` positions back from the newest (0 = newest)
    pub fn from_end(&self, n: usize) -> Option<&Candle> {
        let len = self.candles.len();
        if n >= len {
            return None;
        }
        self.candles.get(len - 1 - n)
    }

    /// Candle at a buffer position (0 = oldest retained)
    pub fn at(&self, position: usize) -> Option<&Candle> {
        self.candles.get(position)
    }

    /// Buffer position for a logical index, `None` once it has been trimmed
    pub fn position_of(&self, index: u64) -> Option<usize> {
        if index < self.base {
            return None;
        }
        let position = (index - self.base) as usize;
        (position < self.candles.len()).then_some(position)
    }

    pub fn get(&self, index: u64) -> Option<&Candle> {
        self.position_of(index).and_then(|p| self.candles.get(p))
    }

    pub fn clear(&mut self) {
        self.candles.clear();
        self.base = 0;
    }
}
