//! Market data module for the NSE cash segment.
//!
//! Provides the core OHLCV types, the per-symbol daily cache, and the
//! bhavcopy ingestion pipeline. External services (bhavcopy archive,
//! broker quotes, tick stream) sit behind traits in [`provider`].

pub mod bhavcopy;
pub mod cache;
pub mod provider;

pub use bhavcopy::{BhavcopyIngestor, BhavcopyProvider, BhavcopyRow, IngestConfig, IngestSummary};
pub use cache::{SymbolCache, UpsertOutcome};
pub use provider::{
    resolve_previous_close, PrevClose, PrevCloseSource, ProviderError, QuoteProvider, TickSource,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Core Data Types
// ============================================================================

/// A single daily OHLCV bar, keyed by NSE settlement date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    /// Trading date (the date NSE published settlement)
    pub date: NaiveDate,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Traded volume (shares)
    pub volume: u64,
}

impl DailyBar {
    /// Check the OHLC ordering invariant:
    /// `low <= min(open, close) <= max(open, close) <= high`, all positive.
    pub fn is_valid(&self) -> bool {
        self.open > 0.0
            && self.high > 0.0
            && self.low > 0.0
            && self.close > 0.0
            && self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
    }

    /// Check if this is a bearish (red) bar
    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    /// Check if this is a bullish (green) bar
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    /// Full daily range (high - low)
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Candle body as a fraction of the close: `|open - close| / close`
    pub fn body_pct(&self) -> f64 {
        if self.close > 0.0 {
            (self.open - self.close).abs() / self.close
        } else {
            0.0
        }
    }

    /// Absolute intraday move as a fraction of the open: `|close - open| / open`
    pub fn move_pct(&self) -> f64 {
        if self.open > 0.0 {
            (self.close - self.open).abs() / self.open
        } else {
            0.0
        }
    }
}

/// A single intraday (1-minute) OHLCV bar, used for volume-profile work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinuteBar {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// One streamed price tick.
///
/// `day_volume` is the cumulative traded volume for the session as reported
/// by the feed, when present. Feeds are allowed to reset this mid-session;
/// consumers must guard against negative increments.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub day_volume: Option<u64>,
}

/// Last-traded-price snapshot from the quote service.
///
/// Pre-market snapshots may carry no open/high/low yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtpQuote {
    /// Last traded price
    pub ltp: f64,
    /// Previous close, when the service reports it
    pub cp: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<u64>,
}

// ============================================================================
// Bhavcopy Day Slice
// ============================================================================

/// One day of settlement data: symbol -> bar, all sharing one settlement
/// date. Built by the ingestor per call and discarded after ingest.
#[derive(Debug, Clone)]
pub struct DaySlice {
    /// The settlement date shared by every bar in the slice
    pub settlement_date: NaiveDate,
    /// Per-symbol bars, sorted by symbol
    pub bars: BTreeMap<String, DailyBar>,
}

impl DaySlice {
    /// Number of symbols in the slice
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Whether the slice carries no symbols
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> DailyBar {
        DailyBar {
            date: NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1_000_000,
        }
    }

    #[test]
    fn test_bar_validity() {
        assert!(bar(100.0, 105.0, 98.0, 103.0).is_valid());
        // high below close
        assert!(!bar(100.0, 101.0, 98.0, 103.0).is_valid());
        // low above open
        assert!(!bar(100.0, 105.0, 101.0, 103.0).is_valid());
        // non-positive price
        assert!(!bar(0.0, 105.0, 98.0, 103.0).is_valid());
    }

    #[test]
    fn test_bar_helpers() {
        let b = bar(100.0, 110.0, 95.0, 105.0);
        assert!(b.is_green());
        assert!(!b.is_red());
        assert!((b.range() - 15.0).abs() < 1e-9);
        assert!((b.body_pct() - 5.0 / 105.0).abs() < 1e-9);
        assert!((b.move_pct() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_day_slice_len() {
        let mut bars = BTreeMap::new();
        bars.insert("RELIANCE".to_string(), bar(100.0, 105.0, 98.0, 103.0));
        let slice = DaySlice {
            settlement_date: NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
            bars,
        };
        assert_eq!(slice.len(), 1);
        assert!(!slice.is_empty());
    }
}
