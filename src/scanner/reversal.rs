//! Reversal setup detection.
//!
//! Looks for an N-day decline whose red/green shape matches the period
//! rule, deep enough and liquid enough to trade the snap-back. All accepted
//! periods are evaluated and the largest decline wins.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Rejection, TrendContext};
use crate::data::DailyBar;
use crate::indicators;

// ============================================================================
// Params
// ============================================================================

/// Which period range the analyzer tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalProfile {
    /// Periods 3..=8
    Standard,
    /// Periods 3..=15; the 9..=15 tail adds a green-day cap and requires
    /// the window to open red
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReversalParams {
    /// Minimum decline over the window, fraction of the first open
    #[serde(default = "default_min_decline_pct")]
    pub min_decline_pct: f64,
    /// Volume at least one in-window bar must reach
    #[serde(default = "default_min_window_volume")]
    pub min_window_volume: u64,
    #[serde(default = "default_profile")]
    pub profile: ReversalProfile,
}

fn default_min_decline_pct() -> f64 {
    0.10
}
fn default_min_window_volume() -> u64 {
    1_000_000
}
fn default_profile() -> ReversalProfile {
    ReversalProfile::Standard
}

impl Default for ReversalParams {
    fn default() -> Self {
        Self {
            min_decline_pct: default_min_decline_pct(),
            min_window_volume: default_min_window_volume(),
            profile: default_profile(),
        }
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// An accepted decline with the winning period and its trend context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalCandidate {
    pub symbol: String,
    pub scan_date: NaiveDate,
    /// Latest close
    pub close: f64,
    /// Latest MA-20, when the series is long enough
    pub sma20: Option<f64>,
    /// Signed distance of the close from the MA, fraction of the close
    pub dist_to_ma_pct: Option<f64>,
    /// Distance of the close above the rolling 20-day low, fraction of
    /// that low
    pub dist_from_low_pct: Option<f64>,
    /// Winning window length in bars
    pub period: usize,
    /// (first_open - last_close) / first_open over the window
    pub decline_pct: f64,
    pub red_days: usize,
    pub green_days: usize,
    /// MA-20 slope at the window start
    pub trend: TrendContext,
}

// ============================================================================
// Analyzer
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ReversalAnalyzer {
    params: ReversalParams,
}

impl ReversalAnalyzer {
    pub fn new(params: ReversalParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ReversalParams {
        &self.params
    }

    /// Try every period in the profile's range against the tail of the
    /// series; the accepted period with the largest decline wins.
    pub fn analyze(
        &self,
        symbol: &str,
        series: &[DailyBar],
    ) -> Result<ReversalCandidate, Rejection> {
        let max_period = match self.params.profile {
            ReversalProfile::Standard => 8,
            ReversalProfile::Extended => 15,
        };
        if series.len() < 3 {
            return Err(Rejection::new(
                symbol,
                format!("insufficient history: {} bars < 3", series.len()),
            ));
        }

        let mut best: Option<ReversalCandidate> = None;
        let mut last_reason = String::from("no period matched");

        for period in 3..=max_period.min(series.len()) {
            match self.try_period(symbol, series, period) {
                Ok(candidate) => {
                    let better = best
                        .as_ref()
                        .map_or(true, |b| candidate.decline_pct > b.decline_pct);
                    if better {
                        best = Some(candidate);
                    }
                }
                Err(reason) => last_reason = format!("period {period}: {reason}"),
            }
        }

        best.map(|mut c| {
            let sma20 = indicators::ma_20(series).last().copied().flatten();
            c.sma20 = sma20;
            c.dist_to_ma_pct = sma20.map(|m| indicators::dist_to_ma_pct(c.close, m));
            c.dist_from_low_pct = indicators::distance_from_low(series);
            c
        })
        .ok_or_else(|| Rejection::new(symbol, last_reason))
    }

    fn try_period(
        &self,
        symbol: &str,
        series: &[DailyBar],
        period: usize,
    ) -> Result<ReversalCandidate, String> {
        let window = &series[series.len() - period..];
        let red_days = window.iter().filter(|b| b.is_red()).count();
        let green_days = period - red_days;

        let shape_ok = match period {
            3 => red_days == 3,
            4 | 5 => red_days > green_days,
            6..=8 => red_days + 1 > green_days,
            9..=15 => red_days + 1 > green_days && green_days <= 3 && window[0].is_red(),
            _ => false,
        };
        if !shape_ok {
            return Err(format!("shape {red_days}r/{green_days}g not accepted"));
        }

        let first_open = window[0].open;
        let last_close = window[period - 1].close;
        if first_open <= 0.0 {
            return Err("non-positive window open".to_string());
        }
        let decline_pct = (first_open - last_close) / first_open;
        if decline_pct < self.params.min_decline_pct {
            return Err(format!(
                "decline {:.1}% < required {:.1}%",
                decline_pct * 100.0,
                self.params.min_decline_pct * 100.0
            ));
        }

        if !window
            .iter()
            .any(|b| b.volume >= self.params.min_window_volume)
        {
            return Err("no in-window bar meets the volume floor".to_string());
        }

        let trend = self.classify_trend(symbol, series, period);
        Ok(ReversalCandidate {
            symbol: symbol.to_string(),
            scan_date: window[period - 1].date,
            close: last_close,
            // MA context over the full series is attached in analyze
            sma20: None,
            dist_to_ma_pct: None,
            dist_from_low_pct: None,
            period,
            decline_pct,
            red_days,
            green_days,
            trend,
        })
    }

    /// MA-20 slope at the window start: compare against the MA five bars
    /// earlier. Undefined history defaults to a downtrend.
    fn classify_trend(&self, symbol: &str, series: &[DailyBar], period: usize) -> TrendContext {
        let ma = indicators::ma_20(series);
        let ws = series.len() - period;
        let at_start = ma.get(ws).copied().flatten();
        let earlier = ws.checked_sub(5).and_then(|i| ma.get(i).copied().flatten());
        match (at_start, earlier) {
            (Some(a), Some(b)) if a > b => TrendContext::Uptrend,
            (Some(_), Some(_)) => TrendContext::Downtrend,
            _ => {
                debug!(symbol, period, "MA undefined at window start, defaulting to downtrend");
                TrendContext::Downtrend
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
