//! Timeframe aggregation - fold lower-timeframe candles into fixed-width buckets

use crate::types::Candle;

/// Candle builder for one bucket
#[derive(Debug, Clone)]
struct BucketBuilder {
    start: i64,
    candle: Candle,
}

impl BucketBuilder {
    fn new(start: i64, first: &Candle) -> Self {
        Self {
            start,
            candle: Candle { timestamp: start, ..*first },
        }
    }

    fn add(&mut self, candle: &Candle) {
        self.candle.high = self.candle.high.max(candle.high);
        self.candle.low = self.candle.low.min(candle.low);
        self.candle.close = candle.close;
        self.candle.volume += candle.volume;
    }
}

/// Aggregates candles into `width_ms` buckets aligned to the epoch.
///
/// A bucket is emitted when the first candle of a later bucket arrives, so
/// the higher-timeframe candle is only seen once it is complete.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    width_ms: i64,
    current: Option<BucketBuilder>,
}

impl CandleAggregator {
    pub fn new(width_ms: i64) -> Self {
        assert!(width_ms > 0, "aggregation width must be positive");
        Self { width_ms, current: None }
    }

    pub fn from_minutes(minutes: u32) -> Self {
        Self::new(i64::from(minutes) * 60_000)
    }

    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    fn bucket_start(&self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(self.width_ms)
    }

    /// Add a candle; returns the previous bucket if this candle starts a new one
    pub fn push(&mut self, candle: &Candle) -> Option<Candle> {
        let start = self.bucket_start(candle.timestamp);

        match &mut self.current {
            Some(builder) if builder.start == start => {
                builder.add(candle);
                None
            }
            Some(builder) => {
                let completed = builder.candle;
                self.current = Some(BucketBuilder::new(start, candle));
                Some(completed)
            }
            None => {
                self.current = Some(BucketBuilder::new(start, candle));
                None
            }
        }
    }

    /// Take the in-progress bucket, if any
    pub fn flush(&mut self) -> Option<Candle> {
        self.current.take().map(|b| b.candle)
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}
