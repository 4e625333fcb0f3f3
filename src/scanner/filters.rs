//! Stage filters applied before pattern analysis.
//!
//! Each gate is deterministic over the bar series it is handed. Gates are
//! run cheapest first by the orchestrator; a symbol leaves the pipeline at
//! the first gate it fails.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::data::DailyBar;
use crate::indicators;

// ============================================================================
// Filter Params
// ============================================================================

/// Gate thresholds. One record per scan type, immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Lowest acceptable close
    #[serde(default = "default_min_price")]
    pub min_price: f64,
    /// Highest acceptable close
    #[serde(default = "default_max_price")]
    pub max_price: f64,
    /// ADR-14 floor, percent of close
    #[serde(default = "default_min_adr_pct")]
    pub min_adr_pct: f64,
    /// Liquidity lookback in bars
    #[serde(default = "default_liquidity_lookback")]
    pub liquidity_lookback: usize,
    /// Qualifying days needed within the lookback
    #[serde(default = "default_liquidity_min_days")]
    pub liquidity_min_days: usize,
    /// Volume a qualifying day must reach
    #[serde(default = "default_liquidity_min_volume")]
    pub liquidity_min_volume: u64,
    /// Intraday move a qualifying day must reach, fraction of open
    #[serde(default = "default_liquidity_min_move")]
    pub liquidity_min_move: f64,
}

fn default_min_price() -> f64 {
    100.0
}
fn default_max_price() -> f64 {
    2000.0
}
fn default_min_adr_pct() -> f64 {
    3.0
}
fn default_liquidity_lookback() -> usize {
    30
}
fn default_liquidity_min_days() -> usize {
    2
}
fn default_liquidity_min_volume() -> u64 {
    1_000_000
}
fn default_liquidity_min_move() -> f64 {
    0.05
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            max_price: default_max_price(),
            min_adr_pct: default_min_adr_pct(),
            liquidity_lookback: default_liquidity_lookback(),
            liquidity_min_days: default_liquidity_min_days(),
            liquidity_min_volume: default_liquidity_min_volume(),
            liquidity_min_move: default_liquidity_min_move(),
        }
    }
}

// ============================================================================
// Filter Engine
// ============================================================================

/// Runs the stage gates against one symbol's series.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterEngine {
    params: FilterParams,
}

impl FilterEngine {
    pub fn new(params: FilterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// Price band on the latest close, inclusive at both edges.
    pub fn base_accept(&self, bars: &[DailyBar]) -> bool {
        match bars.last() {
            Some(last) => {
                last.close >= self.params.min_price && last.close <= self.params.max_price
            }
            None => false,
        }
    }

    /// Enough bursty days recently: at least `liquidity_min_days` bars in
    /// the last `liquidity_lookback` with volume and intraday move both
    /// over threshold on the same bar.
    pub fn liquidity_accept(&self, bars: &[DailyBar]) -> bool {
        let start = bars.len().saturating_sub(self.params.liquidity_lookback);
        let qualifying = bars[start..]
            .iter()
            .filter(|b| {
                b.volume >= self.params.liquidity_min_volume
                    && b.move_pct() >= self.params.liquidity_min_move
            })
            .count();
        trace!(qualifying, "Liquidity gate");
        qualifying >= self.params.liquidity_min_days
    }

    /// ADR-14 at or above the configured floor.
    pub fn adr_accept(&self, bars: &[DailyBar]) -> bool {
        indicators::adr_pct(bars).is_some_and(|pct| pct >= self.params.min_adr_pct)
    }

    /// Rising MA-20: needs at least 25 bars, latest MA strictly above the
    /// max of the previous five MA values.
    pub fn rising_ma_accept(&self, bars: &[DailyBar]) -> bool {
        indicators::rising_ma(bars)
    }
}

// ============================================================================
// Tests
// ============================================================================
