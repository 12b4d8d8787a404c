//! Candle loading from CSV files (plain or zstd-compressed) and JSON-lines output
//!
//! Expected header: `timestamp,open,high,low,close,volume`. Timestamps may be
//! epoch seconds, epoch milliseconds or RFC3339. Rows that are out of order or
//! have inconsistent OHLC are skipped with a warning so the analyzer only ever
//! sees well-formed, strictly increasing candles.

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::types::Candle;

/// Epoch values below this are taken as seconds (year ~5138 in seconds)
const EPOCH_SECONDS_LIMIT: i64 = 100_000_000_000;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

fn is_zst(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zst")
}

/// Load candles from a CSV or `.csv.zst` file
pub fn load_candles(path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

    let reader: Box<dyn Read> = if is_zst(path) {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        Box::new(decoder)
    } else {
        Box::new(file)
    };

    let candles = parse_candles(BufReader::new(reader))
        .with_context(|| format!("Failed to read candles from {:?}", path))?;
    debug!("Loaded {} candles from {:?}", candles.len(), path);
    Ok(candles)
}

/// Parse candles from CSV, skipping out-of-order and malformed OHLC rows
pub fn parse_candles<R: Read>(reader: R) -> Result<Vec<Candle>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut candles: Vec<Candle> = Vec::new();
    let mut skipped = 0u64;

    for (line, result) in csv_reader.deserialize().enumerate() {
        let row: CsvRow = result.with_context(|| format!("Failed to parse CSV row {}", line + 1))?;
        let timestamp = parse_timestamp(&row.timestamp)?;
        let candle = Candle::new(timestamp, row.open, row.high, row.low, row.close, row.volume);

        if let Some(prev) = candles.last() {
            if candle.timestamp <= prev.timestamp {
                warn!(
                    "Skipping row {}: timestamp {} not after {}",
                    line + 1,
                    candle.timestamp,
                    prev.timestamp
                );
                skipped += 1;
                continue;
            }
        }
        if !is_consistent(&candle) {
            warn!(
                "Skipping row {}: inconsistent OHLC {}/{}/{}/{}",
                line + 1,
                candle.open,
                candle.high,
                candle.low,
                candle.close
            );
            skipped += 1;
            continue;
        }
        candles.push(candle);
    }

    if skipped > 0 {
        debug!("Skipped {} malformed rows", skipped);
    }
    Ok(candles)
}

fn is_consistent(c: &Candle) -> bool {
    [c.open, c.high, c.low, c.close, c.volume].iter().all(|v| v.is_finite())
        && c.low <= c.open.min(c.close)
        && c.open.max(c.close) <= c.high
}

/// Parse epoch seconds, epoch milliseconds or an RFC3339 timestamp into epoch ms
pub fn parse_timestamp(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(if value.abs() < EPOCH_SECONDS_LIMIT { value * 1000 } else { value });
    }
    if let Ok(value) = raw.parse::<f64>() {
        if value.is_finite() {
            let ms = if value.abs() < EPOCH_SECONDS_LIMIT as f64 { value * 1000.0 } else { value };
            return Ok(ms.round() as i64);
        }
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.timestamp_millis()),
        Err(e) => bail!("Failed to parse timestamp {:?}: {}", raw, e),
    }
}

/// Open a JSON-lines sink; `.zst` paths are zstd-compressed
pub fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create file: {:?}", path))?;

    if is_zst(path) {
        let encoder = zstd::stream::Encoder::new(file, 3)
            .with_context(|| format!("Failed to create zstd encoder for: {:?}", path))?;
        Ok(Box::new(BufWriter::new(encoder.auto_finish())))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Write one value as a JSON line
pub fn write_json_line<W: Write + ?Sized, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    Ok(())
}
