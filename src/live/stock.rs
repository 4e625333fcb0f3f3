//! Per-symbol qualification and position state.
//!
//! One `LiveStock` per watchlist symbol, advanced only by the session loop.
//! Every transition method checks the state it expects; a call arriving in
//! the wrong state is a programming error and deactivates the symbol rather
//! than corrupting the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::StrategyClass;

// ============================================================================
// Live Params
// ============================================================================

/// Qualification and position thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveParams {
    /// Minimum gap up for continuation, fraction of previous close
    #[serde(default = "default_gap_floor")]
    pub gap_floor: f64,
    /// Maximum gap up; oversized gaps are rejected
    #[serde(default = "default_gap_ceiling")]
    pub gap_ceiling: f64,
    /// Reject when the day's low drops this far below the open
    #[serde(default = "default_low_violation_pct")]
    pub low_violation_pct: f64,
    /// Required cumulative volume, fraction of the 20-day median
    #[serde(default = "default_volume_ratio")]
    pub volume_ratio: f64,
    /// Initial stop distance below the entry price
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    /// Unrealized gain that moves the stop to breakeven
    #[serde(default = "default_breakeven_trigger_pct")]
    pub breakeven_trigger_pct: f64,
}

fn default_gap_floor() -> f64 {
    0.003
}
fn default_gap_ceiling() -> f64 {
    0.05
}
fn default_low_violation_pct() -> f64 {
    0.01
}
fn default_volume_ratio() -> f64 {
    0.075
}
fn default_stop_loss_pct() -> f64 {
    0.04
}
fn default_breakeven_trigger_pct() -> f64 {
    0.05
}

impl Default for LiveParams {
    fn default() -> Self {
        Self {
            gap_floor: default_gap_floor(),
            gap_ceiling: default_gap_ceiling(),
            low_violation_pct: default_low_violation_pct(),
            volume_ratio: default_volume_ratio(),
            stop_loss_pct: default_stop_loss_pct(),
            breakeven_trigger_pct: default_breakeven_trigger_pct(),
        }
    }
}

// ============================================================================
// Live State
// ============================================================================

/// Qualification progress of one symbol through the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveState {
    Created,
    OpenKnown,
    GapOk,
    LowOk,
    VolOk,
    Qualified,
    Armed,
    Entered,
    Closed,
    Rejected,
}

impl LiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::OpenKnown => "open_known",
            Self::GapOk => "gap_ok",
            Self::LowOk => "low_ok",
            Self::VolOk => "vol_ok",
            Self::Qualified => "qualified",
            Self::Armed => "armed",
            Self::Entered => "entered",
            Self::Closed => "closed",
            Self::Rejected => "rejected",
        }
    }
}

// ============================================================================
// Live Stock
// ============================================================================

/// One watchlist symbol's intraday record.
#[derive(Debug, Clone)]
pub struct LiveStock {
    pub symbol: String,
    pub strategy: StrategyClass,
    pub state: LiveState,
    params: LiveParams,

    /// Prior-day close resolved at prep time
    pub previous_close: f64,
    /// 20-day median volume, the ratio check denominator
    pub volume_baseline: f64,
    /// Prior-day value area high; only continuation symbols carry one
    pub vah: Option<f64>,

    pub open_price: Option<f64>,
    pub current_price: f64,
    pub daily_high: f64,
    pub daily_low: f64,
    /// Session volume built from non-negative feed increments
    pub cumulative_volume: u64,
    last_day_volume: u64,

    pub low_violation_checked: bool,
    pub volume_validated: bool,

    /// Intraday high captured at entry-decision time; breakout trigger
    pub entry_high: Option<f64>,
    pub entry_price: Option<f64>,
    pub entry_time: Option<DateTime<Utc>>,
    pub entry_sl: Option<f64>,

    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub rejection_reason: Option<String>,
}

impl LiveStock {
    pub fn new(
        symbol: impl Into<String>,
        strategy: StrategyClass,
        previous_close: f64,
        volume_baseline: f64,
        params: LiveParams,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            strategy,
            state: LiveState::Created,
            params,
            previous_close,
            volume_baseline,
            vah: None,
            open_price: None,
            current_price: 0.0,
            daily_high: 0.0,
            daily_low: f64::MAX,
            cumulative_volume: 0,
            last_day_volume: 0,
            low_violation_checked: false,
            volume_validated: false,
            entry_high: None,
            entry_price: None,
            entry_time: None,
            entry_sl: None,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            rejection_reason: None,
        }
    }

    /// Still in play: not rejected and not closed.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, LiveState::Rejected | LiveState::Closed)
    }

    pub fn is_entered(&self) -> bool {
        self.state == LiveState::Entered
    }

    // ------------------------------------------------------------------
    // Qualification transitions
    // ------------------------------------------------------------------

    /// Record the opening price (IEP or first trade).
    pub fn set_open_price(&mut self, open: f64) {
        if self.state != LiveState::Created {
            return self.internal_error("set_open_price");
        }
        self.open_price = Some(open);
        self.current_price = open;
        self.daily_high = open;
        self.daily_low = open;
        self.state = LiveState::OpenKnown;
    }

    /// Gap rule per strategy class. Continuation needs the open inside
    /// [floor, ceiling] above the previous close; reversal_down needs a
    /// gap down; reversal_up a gap up.
    pub fn validate_gap(&mut self) {
        if self.state != LiveState::OpenKnown {
            return self.internal_error("validate_gap");
        }
        let Some(open) = self.open_price else {
            return self.internal_error("validate_gap without open");
        };
        if self.previous_close <= 0.0 {
            return self.reject("no previous close");
        }
        let gap = (open - self.previous_close) / self.previous_close;

        let ok = match self.strategy {
            StrategyClass::Continuation => {
                gap >= self.params.gap_floor && gap <= self.params.gap_ceiling
            }
            StrategyClass::ReversalUp => gap > 0.0 && gap <= self.params.gap_ceiling,
            StrategyClass::ReversalDown => gap < 0.0,
        };
        if ok {
            debug!(symbol = %self.symbol, gap_pct = gap * 100.0, "Gap accepted");
            self.state = LiveState::GapOk;
        } else {
            self.reject(format!("gap {:.2}% outside band", gap * 100.0));
        }
    }

    /// Watch-window low rule: the day's low must not break 1% under the
    /// open. Called per tick until the entry boundary passes.
    pub fn check_low(&mut self) {
        if !matches!(self.state, LiveState::GapOk | LiveState::LowOk) {
            return self.internal_error("check_low");
        }
        let Some(open) = self.open_price else {
            return self.internal_error("check_low without open");
        };
        if self.daily_low < open * (1.0 - self.params.low_violation_pct) {
            let depth = (open - self.daily_low) / open * 100.0;
            self.reject(format!("low violation: {depth:.2}% below open"));
        }
    }

    /// Mark the watch window over without a low violation.
    pub fn finish_low_watch(&mut self) {
        if self.state != LiveState::GapOk {
            return self.internal_error("finish_low_watch");
        }
        self.low_violation_checked = true;
        self.state = LiveState::LowOk;
    }

    /// Volume rule at the decision boundary: session volume must reach
    /// the configured fraction of the 20-day median.
    pub fn validate_volume(&mut self) {
        if self.state != LiveState::LowOk {
            return self.internal_error("validate_volume");
        }
        if self.volume_baseline <= 0.0 {
            return self.reject("no volume baseline");
        }
        let ratio = self.cumulative_volume as f64 / self.volume_baseline;
        if ratio >= self.params.volume_ratio {
            self.volume_validated = true;
            self.state = LiveState::VolOk;
        } else {
            self.reject(format!(
                "volume ratio {:.1}% < {:.1}%",
                ratio * 100.0,
                self.params.volume_ratio * 100.0
            ));
        }
    }

    /// Value-area rule, continuation only: the open must sit at or above
    /// the prior day's VAH. Other strategies pass through.
    pub fn validate_vah(&mut self) {
        if self.state != LiveState::VolOk {
            return self.internal_error("validate_vah");
        }
        if self.strategy == StrategyClass::Continuation {
            let Some(vah) = self.vah else {
                return self.reject("no volume profile");
            };
            let Some(open) = self.open_price else {
                return self.internal_error("validate_vah without open");
            };
            if open < vah {
                return self.reject(format!("open {open:.2} below VAH {vah:.2}"));
            }
        }
        self.state = LiveState::Qualified;
    }

    /// Arm the breakout trigger at the intraday high seen so far.
    pub fn prepare_entry(&mut self) {
        if self.state != LiveState::Qualified {
            return self.internal_error("prepare_entry");
        }
        self.entry_high = Some(self.daily_high);
        self.state = LiveState::Armed;
        info!(symbol = %self.symbol, entry_high = self.daily_high, "Armed for breakout");
    }

    // ------------------------------------------------------------------
    // Tick updates and position management
    // ------------------------------------------------------------------

    /// Fold one tick into the running day stats. Feed volume is cumulative
    /// and may reset; only non-negative increments count.
    pub fn on_tick(&mut self, price: f64, day_volume: Option<u64>) {
        if !self.is_active() || price <= 0.0 {
            return;
        }
        self.current_price = price;
        if price > self.daily_high {
            self.daily_high = price;
        }
        if price < self.daily_low {
            self.daily_low = price;
        }
        if let Some(v) = day_volume {
            if v >= self.last_day_volume {
                self.cumulative_volume += v - self.last_day_volume;
                self.last_day_volume = v;
            } else {
                debug!(symbol = %self.symbol, reported = v, seen = self.last_day_volume,
                       "Feed volume went backwards, increment dropped");
                self.last_day_volume = v;
            }
        }
    }

    /// Breakout check for an armed symbol. Entering sets the stop 4%
    /// under the entry price, which keeps it strictly below the price.
    pub fn try_breakout(&mut self, price: f64, ts: DateTime<Utc>) -> bool {
        if self.state != LiveState::Armed {
            self.internal_error("try_breakout");
            return false;
        }
        let Some(entry_high) = self.entry_high else {
            self.internal_error("try_breakout without trigger");
            return false;
        };
        if price <= entry_high {
            return false;
        }
        self.entry_price = Some(price);
        self.entry_time = Some(ts);
        self.entry_sl = Some(price * (1.0 - self.params.stop_loss_pct));
        self.state = LiveState::Entered;
        info!(symbol = %self.symbol, entry = price, sl = self.entry_sl.unwrap_or(0.0), "Entered");
        true
    }

    /// Trailing rule for an entered position: at +5% unrealized the stop
    /// moves to breakeven and never comes back down.
    pub fn update_trailing(&mut self, price: f64) {
        if self.state != LiveState::Entered {
            return self.internal_error("update_trailing");
        }
        let (Some(entry), Some(sl)) = (self.entry_price, self.entry_sl) else {
            return self.internal_error("update_trailing without entry");
        };
        let gain = (price - entry) / entry;
        if gain >= self.params.breakeven_trigger_pct && sl < entry {
            self.entry_sl = Some(entry);
            info!(symbol = %self.symbol, "Stop trailed to breakeven");
        }
    }

    /// Stop check for an entered position. Returns true when it closed.
    pub fn check_stop(&mut self, price: f64, ts: DateTime<Utc>) -> bool {
        if self.state != LiveState::Entered {
            self.internal_error("check_stop");
            return false;
        }
        let Some(sl) = self.entry_sl else {
            self.internal_error("check_stop without stop");
            return false;
        };
        if price <= sl {
            self.close(price, ts, "stop loss");
            return true;
        }
        false
    }

    /// Close an entered position at `price`.
    pub fn close(&mut self, price: f64, ts: DateTime<Utc>, reason: &str) {
        if self.state != LiveState::Entered {
            return self.internal_error("close");
        }
        self.exit_price = Some(price);
        self.exit_time = Some(ts);
        self.exit_reason = Some(reason.to_string());
        self.state = LiveState::Closed;
        info!(symbol = %self.symbol, exit = price, reason, "Position closed");
    }

    /// Realized gain of a closed position, fraction of entry.
    pub fn pnl_pct(&self) -> Option<f64> {
        let entry = self.entry_price?;
        let exit = self.exit_price?;
        Some((exit - entry) / entry)
    }

    /// Drop the symbol from play with a diagnostic reason.
    pub fn reject(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(symbol = %self.symbol, reason = %reason, "Rejected");
        self.rejection_reason = Some(reason);
        self.state = LiveState::Rejected;
    }

    /// A transition arrived in a state that cannot accept it.
    fn internal_error(&mut self, op: &str) {
        error!(symbol = %self.symbol, state = self.state.as_str(), op,
               "Transition called out of order");
        self.rejection_reason = Some("internal".to_string());
        self.state = LiveState::Rejected;
    }
}

// ============================================================================
// Tests
// ============================================================================
