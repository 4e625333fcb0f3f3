//! Continuation setup detection.
//!
//! Three-phase zig-zag over the last 80 bars: an impulse high (phase 1),
//! a pullback trough closing under the 20-day MA (phase 2), and a recovery
//! to a lower high resting near the rising MA (phase 3). The latest bar is
//! the phase-3 gate; every rejection names the earliest unmet condition.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::Rejection;
use crate::data::DailyBar;
use crate::indicators;

const WINDOW: usize = 80;
const MIN_BARS: usize = 50;

// ============================================================================
// Params
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContinuationParams {
    /// Max distance of the latest close above MA-20, fraction of the close.
    /// Clamped into 0..=0.20 on construction.
    #[serde(default = "default_near_ma_threshold")]
    pub near_ma_threshold: f64,
    /// Max body of the latest candle, fraction of its close
    #[serde(default = "default_max_body_pct")]
    pub max_body_pct: f64,
}

fn default_near_ma_threshold() -> f64 {
    0.05
}
fn default_max_body_pct() -> f64 {
    0.03
}

impl Default for ContinuationParams {
    fn default() -> Self {
        Self {
            near_ma_threshold: default_near_ma_threshold(),
            max_body_pct: default_max_body_pct(),
        }
    }
}

impl ContinuationParams {
    /// Build with the threshold clamped into its valid range.
    pub fn new(near_ma_threshold: f64, max_body_pct: f64) -> Self {
        Self {
            near_ma_threshold: near_ma_threshold.clamp(0.0, 0.20),
            max_body_pct,
        }
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// An accepted continuation setup with the geometry that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationCandidate {
    pub symbol: String,
    pub scan_date: NaiveDate,
    /// Latest close
    pub close: f64,
    /// Latest MA-20 value
    pub sma20: f64,
    /// Impulse high before the pullback
    pub phase1_high: f64,
    /// Pullback trough low
    pub phase2_low: f64,
    /// Recovery high, strictly below phase1_high
    pub phase3_high: f64,
    /// phase1_high - phase2_low
    pub depth: f64,
    /// Depth as a fraction of phase1_high
    pub depth_pct: f64,
    /// ADR-14 as percent of the latest close
    pub adr_pct: f64,
    /// Latest close's distance above MA-20, fraction of the close
    pub dist_to_ma_pct: f64,
}

// ============================================================================
// Analyzer
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuationAnalyzer {
    params: ContinuationParams,
}

impl ContinuationAnalyzer {
    pub fn new(params: ContinuationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ContinuationParams {
        &self.params
    }

    /// Run the geometry on one symbol's series. `series` must end at the
    /// scan date; analysis uses the last 80 bars.
    pub fn analyze(
        &self,
        symbol: &str,
        series: &[DailyBar],
    ) -> Result<ContinuationCandidate, Rejection> {
        if series.len() < MIN_BARS {
            return Err(Rejection::new(
                symbol,
                format!("insufficient history: {} bars < {MIN_BARS}", series.len()),
            ));
        }

        let start = series.len().saturating_sub(WINDOW);
        let window = &series[start..];
        // MA from the full series, so the first window bars carry values
        let ma_full = indicators::ma_20(series);
        let ma = &ma_full[start..];
        let last = window.len() - 1;
        let last_bar = &window[last];

        // Step 1: latest-bar gate.
        let Some(last_ma) = ma[last] else {
            return Err(Rejection::new(symbol, "MA undefined at latest bar"));
        };
        if last_bar.close <= last_ma {
            return Err(Rejection::new(
                symbol,
                format!("close {:.2} not above MA {:.2}", last_bar.close, last_ma),
            ));
        }
        let dist = indicators::dist_to_ma_pct(last_bar.close, last_ma);
        if dist > self.params.near_ma_threshold {
            return Err(Rejection::new(
                symbol,
                format!(
                    "too far above MA: {:.1}% > {:.1}%",
                    dist * 100.0,
                    self.params.near_ma_threshold * 100.0
                ),
            ));
        }
        if !indicators::rising_ma(window) {
            return Err(Rejection::new(symbol, "MA not rising"));
        }
        let body = last_bar.body_pct();
        if body >= self.params.max_body_pct {
            return Err(Rejection::new(
                symbol,
                format!(
                    "body too large: {:.1}% >= {:.1}%",
                    body * 100.0,
                    self.params.max_body_pct * 100.0
                ),
            ));
        }

        // Step 2: last close strictly below the MA is the pullback trough bar.
        let t_below = (0..last)
            .rev()
            .find(|&i| matches!(ma[i], Some(m) if window[i].close < m));
        let Some(t_below) = t_below else {
            return Err(Rejection::new(symbol, "no pullback below MA in window"));
        };

        // Step 3: recovery starts at the first close back above the MA.
        let recovery_start = (t_below + 1..=last)
            .find(|&i| matches!(ma[i], Some(m) if window[i].close > m));
        let Some(recovery_start) = recovery_start else {
            return Err(Rejection::new(symbol, "no recovery above MA after pullback"));
        };

        // Step 4: phase-3 high over the recovery segment.
        let phase3_high = window[recovery_start..=last]
            .iter()
            .map(|b| b.high)
            .fold(f64::MIN, f64::max);

        // Step 5: phase-1 high among pre-trough closes above the MA.
        let mut phase1_high = f64::MIN;
        let mut t_ph1 = None;
        for i in 0..=t_below {
            if matches!(ma[i], Some(m) if window[i].close > m) && window[i].high > phase1_high {
                phase1_high = window[i].high;
                t_ph1 = Some(i);
            }
        }
        let Some(t_ph1) = t_ph1 else {
            return Err(Rejection::new(symbol, "no impulse leg above MA before pullback"));
        };

        // Step 6: phase-2 low among below-MA closes after the impulse high.
        let phase2_low = window[t_ph1 + 1..=t_below]
            .iter()
            .zip(&ma[t_ph1 + 1..=t_below])
            .filter(|(b, m)| matches!(m, Some(m) if b.close < *m))
            .map(|(b, _)| b.low)
            .fold(f64::MAX, f64::min);
        if phase2_low == f64::MAX {
            return Err(Rejection::new(symbol, "no below-MA bar after impulse high"));
        }

        // Step 7: pullback depth against the current ADR.
        let Some(adr_abs) = indicators::adr_14(window) else {
            return Err(Rejection::new(symbol, "ADR undefined"));
        };
        let depth = phase1_high - phase2_low;
        if depth < adr_abs {
            return Err(Rejection::new(
                symbol,
                format!("depth {depth:.2} < required {adr_abs:.2}"),
            ));
        }

        // Step 8: the recovery must not exceed the impulse high.
        if phase3_high >= phase1_high {
            return Err(Rejection::new(
                symbol,
                format!("lower high: recovery {phase3_high:.2} >= impulse {phase1_high:.2}"),
            ));
        }

        let adr_pct = indicators::adr_pct(window).unwrap_or(0.0);
        trace!(symbol, phase1_high, phase2_low, phase3_high, "Continuation geometry accepted");
        Ok(ContinuationCandidate {
            symbol: symbol.to_string(),
            scan_date: last_bar.date,
            close: last_bar.close,
            sma20: last_ma,
            phase1_high,
            phase2_low,
            phase3_high,
            depth,
            depth_pct: depth / phase1_high,
            adr_pct,
            dist_to_ma_pct: dist,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
