//! External service boundary for quotes and streaming ticks.
//!
//! The broker SDK and the NSE archive are collaborators, not part of this
//! crate: everything they do is reached through the traits here, so the
//! scanner and the live engine can be driven by fakes in tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{DailyBar, LtpQuote, MinuteBar, SymbolCache, Tick};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors raised at the external-service boundary.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network error (connection failed, timeout, 5xx)
    #[error("network error: {0}")]
    Network(String),
    /// Authentication error (invalid or expired token)
    #[error("authentication error: {0}")]
    Auth(String),
    /// Rate limit exceeded
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },
    /// No data exists for the requested symbol/date
    #[error("data not available: {0}")]
    DataNotAvailable(String),
    /// Stream disconnected mid-session
    #[error("stream disconnected: {0}")]
    Disconnected(String),
    /// Invalid request parameters (unknown instrument, 4xx)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Check if the error is transient and worth retrying with backoff.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Disconnected(_)
        )
    }
}

// ============================================================================
// Quote Provider
// ============================================================================

/// Broker-side quote service: historical candles, LTP snapshots,
/// pre-open auction prices, instrument-key lookup.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// EOD close of the prior trading day, as the service reports it.
    async fn get_previous_close(&self, symbol: &str) -> Result<f64, ProviderError>;

    /// Daily candles for a date range, ascending by date.
    async fn get_historical_daily(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, ProviderError>;

    /// 1-minute candles for one session, ascending by timestamp.
    async fn get_intraday_minute(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Vec<MinuteBar>, ProviderError>;

    /// Broker instrument key for a symbol.
    async fn get_instrument_key(&self, symbol: &str) -> Result<String, ProviderError>;

    /// Last-traded-price snapshot. Pre-market snapshots may omit OHLC.
    async fn get_ltp(&self, symbol: &str) -> Result<LtpQuote, ProviderError>;

    /// Pre-open indicative equilibrium price, if published yet.
    async fn get_pre_open_iep(&self, symbol: &str) -> Result<Option<f64>, ProviderError>;
}

// ============================================================================
// Tick Source
// ============================================================================

/// Streaming tick feed. The dispatcher owns membership and reconnection;
/// implementations only need to expose the raw stream operations.
#[async_trait]
pub trait TickSource: Send {
    /// (Re-)establish the stream connection.
    async fn connect(&mut self) -> Result<(), ProviderError>;

    /// Request ticks for the given symbols. Idempotent on the wire.
    async fn subscribe(&mut self, symbols: &[String]) -> Result<(), ProviderError>;

    /// Stop ticks for the given symbols. Best effort; late ticks may
    /// still arrive due to upstream latency.
    async fn unsubscribe(&mut self, symbols: &[String]) -> Result<(), ProviderError>;

    /// Next tick in stream-arrival order. `Ok(None)` means the stream
    /// ended cleanly (session over / explicit stop).
    async fn next_tick(&mut self) -> Result<Option<Tick>, ProviderError>;
}

// ============================================================================
// Previous-Close Resolution
// ============================================================================

/// Which route produced a previous-close value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrevCloseSource {
    /// `cp` field of the LTP snapshot
    Ltp,
    /// Last bar of a historical daily range call
    Historical,
    /// Latest bar in the local symbol cache
    Cache,
}

/// A previous close together with the route that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrevClose {
    pub value: f64,
    pub source: PrevCloseSource,
}

/// Resolve the previous close through the single ordered fallback:
/// LTP `cp` -> historical daily -> local cache.
///
/// The routes disagree during non-trading periods, so the winning source
/// is recorded on the result and logged.
pub async fn resolve_previous_close<Q: QuoteProvider + ?Sized>(
    quotes: &Q,
    cache: &SymbolCache,
    symbol: &str,
    today: NaiveDate,
) -> Result<PrevClose, ProviderError> {
    match quotes.get_ltp(symbol).await {
        Ok(LtpQuote { cp: Some(cp), .. }) if cp > 0.0 => {
            debug!(symbol, cp, "Previous close from LTP snapshot");
            return Ok(PrevClose {
                value: cp,
                source: PrevCloseSource::Ltp,
            });
        }
        Ok(_) => debug!(symbol, "LTP snapshot carried no previous close"),
        Err(e) => debug!(symbol, error = %e, "LTP route failed"),
    }

    let from = today - chrono::Duration::days(10);
    match quotes.get_historical_daily(symbol, from, today).await {
        Ok(bars) => {
            if let Some(last) = bars.iter().rev().find(|b| b.date < today) {
                debug!(symbol, close = last.close, "Previous close from historical range");
                return Ok(PrevClose {
                    value: last.close,
                    source: PrevCloseSource::Historical,
                });
            }
        }
        Err(e) => debug!(symbol, error = %e, "Historical route failed"),
    }

    if let Some(series) = cache.load(symbol) {
        if let Some(last) = series.iter().rev().find(|b| b.date < today) {
            debug!(symbol, close = last.close, "Previous close from cache");
            return Ok(PrevClose {
                value: last.close,
                source: PrevCloseSource::Cache,
            });
        }
    }

    Err(ProviderError::DataNotAvailable(format!(
        "no previous close for {symbol} via ltp/historical/cache"
    )))
}

// ============================================================================
// Tests
// ============================================================================
