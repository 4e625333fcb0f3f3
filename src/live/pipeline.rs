//! Session coordinator.
//!
//! Sequences each watchlist symbol through gap, low-watch, volume and
//! value-area checks, arms a capped number of qualified symbols, and
//! manages entries and exits until session end. Phase boundaries are
//! explicit method calls so the session loop (and tests) own the clock.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::dispatcher::TickDispatcher;
use super::stock::{LiveParams, LiveState, LiveStock};
use super::trade_log::{TradeLog, TradeRecord};
use super::volume_profile::build_volume_profile;
use super::StrategyClass;
use crate::data::{resolve_previous_close, QuoteProvider, SymbolCache, Tick, TickSource};
use crate::indicators;

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Most symbols armed per session
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Median-volume baseline window in bars
    #[serde(default = "default_baseline_window")]
    pub baseline_window: usize,
    #[serde(default)]
    pub live: LiveParams,
}

fn default_max_positions() -> usize {
    2
}
fn default_baseline_window() -> usize {
    20
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            baseline_window: default_baseline_window(),
            live: LiveParams::default(),
        }
    }
}

// ============================================================================
// Session Phase / Summary
// ============================================================================

/// Where the session clock currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Market open through the entry-decision boundary
    Watch,
    /// Entry-decision boundary through session end
    Trading,
}

/// Counts reported after a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub watched: usize,
    pub rejected: usize,
    pub armed: usize,
    pub entered: usize,
    pub trades: Vec<TradeRecord>,
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct QualificationPipeline {
    config: PipelineConfig,
    stocks: HashMap<String, LiveStock>,
    trade_log: TradeLog,
    reported_inactive: HashSet<String>,
}

impl QualificationPipeline {
    pub fn new(config: PipelineConfig, trade_log: TradeLog) -> Self {
        Self {
            config,
            stocks: HashMap::new(),
            trade_log,
            reported_inactive: HashSet::new(),
        }
    }

    pub fn stock(&self, symbol: &str) -> Option<&LiveStock> {
        self.stocks.get(symbol)
    }

    /// Symbols still in play.
    pub fn active_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .stocks
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.symbol.clone())
            .collect();
        out.sort();
        out
    }

    // ------------------------------------------------------------------
    // Prep (before pre-open)
    // ------------------------------------------------------------------

    /// Build the per-symbol records: previous close via the fallback
    /// chain, the median-volume baseline from the cache, and the prior-day
    /// value area for continuation symbols. A symbol whose prep fails is
    /// skipped, not fatal.
    pub async fn prepare<Q: QuoteProvider>(
        &mut self,
        quotes: &Q,
        cache: &SymbolCache,
        watchlist: &[(String, StrategyClass)],
        session_date: NaiveDate,
    ) -> Result<()> {
        for (symbol, strategy) in watchlist {
            let prev_close = match resolve_previous_close(quotes, cache, symbol, session_date).await
            {
                Ok(pc) => {
                    debug!(symbol, source = ?pc.source, "Previous close resolved");
                    pc.value
                }
                Err(e) => {
                    warn!(symbol, error = %e, "No previous close, symbol skipped");
                    continue;
                }
            };

            let series = cache.range(symbol, None, session_date);
            let history: Vec<_> = series
                .into_iter()
                .filter(|b| b.date < session_date)
                .collect();
            let Some(baseline) = indicators::median_volume(&history, self.config.baseline_window)
            else {
                warn!(symbol, "Not enough history for a volume baseline, symbol skipped");
                continue;
            };

            let mut stock = LiveStock::new(
                symbol.clone(),
                *strategy,
                prev_close,
                baseline,
                self.config.live,
            );

            if *strategy == StrategyClass::Continuation {
                let Some(prev_day) = history.last().map(|b| b.date) else {
                    continue;
                };
                match quotes.get_intraday_minute(symbol, prev_day).await {
                    Ok(bars) => match build_volume_profile(&bars) {
                        Some(profile) => {
                            debug!(symbol, vah = profile.vah, poc = profile.poc, "Value area built");
                            stock.vah = Some(profile.vah);
                        }
                        None => warn!(symbol, "Empty volume profile, VAH gate will reject"),
                    },
                    Err(e) => warn!(symbol, error = %e, "Minute data unavailable, VAH gate will reject"),
                }
            }

            self.stocks.insert(symbol.clone(), stock);
        }
        info!(prepared = self.stocks.len(), "Watchlist prepared");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase boundaries
    // ------------------------------------------------------------------

    /// Pre-open batch: fetch the indicative equilibrium price, set it as
    /// the open and run the gap rule. Returns the first unsubscription
    /// batch (gap failures).
    pub async fn apply_pre_open<Q: QuoteProvider>(&mut self, quotes: &Q) -> Vec<String> {
        let mut symbols: Vec<String> = self.stocks.keys().cloned().collect();
        symbols.sort();

        for symbol in &symbols {
            let iep = match quotes.get_pre_open_iep(symbol).await {
                Ok(Some(iep)) if iep > 0.0 => iep,
                Ok(_) => {
                    if let Some(stock) = self.stocks.get_mut(symbol) {
                        stock.reject("no pre-open price");
                    }
                    continue;
                }
                Err(e) => {
                    warn!(symbol, error = %e, "IEP fetch failed");
                    if let Some(stock) = self.stocks.get_mut(symbol) {
                        stock.reject("no pre-open price");
                    }
                    continue;
                }
            };
            if let Some(stock) = self.stocks.get_mut(symbol) {
                stock.set_open_price(iep);
                stock.validate_gap();
            }
        }

        let dropped = self.drained_inactive();
        info!(dropped = dropped.len(), "Pre-open gap pass done");
        dropped
    }

    /// One tick. Guarded by `is_active`; the work depends on the phase
    /// and the symbol's state.
    pub fn handle_tick(&mut self, tick: &Tick, phase: SessionPhase) {
        let Some(stock) = self.stocks.get_mut(&tick.symbol) else {
            return;
        };
        if !stock.is_active() {
            return;
        }
        stock.on_tick(tick.price, tick.day_volume);

        match phase {
            SessionPhase::Watch => {
                if stock.state == LiveState::GapOk {
                    stock.check_low();
                }
            }
            SessionPhase::Trading => match stock.state {
                LiveState::Armed => {
                    stock.try_breakout(tick.price, tick.timestamp);
                }
                LiveState::Entered => {
                    stock.update_trailing(tick.price);
                    if stock.check_stop(tick.price, tick.timestamp) {
                        self.log_close(&tick.symbol);
                    }
                }
                _ => {}
            },
        }
    }

    /// Entry-decision boundary: finish the low watch, decide volume and
    /// value area, then arm up to `max_positions` qualifiers. Returns the
    /// second unsubscription batch.
    pub fn on_entry_decision(&mut self) -> Vec<String> {
        let mut symbols: Vec<String> = self.stocks.keys().cloned().collect();
        symbols.sort();

        let mut armed = 0usize;
        for symbol in &symbols {
            let Some(stock) = self.stocks.get_mut(symbol) else {
                continue;
            };
            if stock.state != LiveState::GapOk {
                continue;
            }
            stock.finish_low_watch();
            stock.validate_volume();
            if !stock.is_active() {
                continue;
            }
            stock.validate_vah();
            if !stock.is_active() {
                continue;
            }
            if armed < self.config.max_positions {
                stock.prepare_entry();
                armed += 1;
            } else {
                stock.reject("daily position cap reached");
            }
        }

        let dropped = self.drained_inactive();
        info!(armed, dropped = dropped.len(), "Entry decision pass done");
        dropped
    }

    /// Session end: entered positions close at their last price.
    pub fn on_session_end(&mut self, ts: DateTime<Utc>) {
        let symbols: Vec<String> = self.stocks.keys().cloned().collect();
        for symbol in symbols {
            let Some(stock) = self.stocks.get_mut(&symbol) else {
                continue;
            };
            if stock.state == LiveState::Entered {
                let last = stock.current_price;
                stock.close(last, ts, "session end");
                self.log_close(&symbol);
            }
        }
        info!("Session ended");
    }

    /// Counts over the final state of every symbol.
    pub fn summary(&self) -> Result<SessionSummary> {
        let mut summary = SessionSummary {
            watched: self.stocks.len(),
            ..Default::default()
        };
        for stock in self.stocks.values() {
            match stock.state {
                LiveState::Rejected => summary.rejected += 1,
                LiveState::Armed => summary.armed += 1,
                LiveState::Entered | LiveState::Closed => summary.entered += 1,
                _ => {}
            }
        }
        summary.trades = self.trade_log.read_all().context("reading trade log")?;
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Session loop
    // ------------------------------------------------------------------

    /// Drive a full session over the dispatcher: watch window until
    /// `entry_decision_in`, trading until `session_end_in` (both measured
    /// from now), then close out. The loop owns all state; timers and
    /// ticks interleave on one task.
    pub async fn run_session<S: TickSource>(
        &mut self,
        dispatcher: &mut TickDispatcher<S>,
        entry_decision_in: Duration,
        session_end_in: Duration,
    ) -> Result<SessionSummary> {
        let decision_at = tokio::time::Instant::now() + entry_decision_in;
        let end_at = tokio::time::Instant::now() + session_end_in;
        let mut phase = SessionPhase::Watch;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(decision_at), if phase == SessionPhase::Watch => {
                    let dropped = self.on_entry_decision();
                    dispatcher.unsubscribe(&dropped).await;
                    phase = SessionPhase::Trading;
                }
                _ = tokio::time::sleep_until(end_at) => {
                    break;
                }
                tick = dispatcher.next() => {
                    match tick {
                        Ok(Some(tick)) => self.handle_tick(&tick, phase),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "Stream lost for good");
                            break;
                        }
                    }
                }
            }
        }

        self.on_session_end(Utc::now());
        self.summary()
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    /// Symbols that went inactive and have not been reported yet.
    fn drained_inactive(&mut self) -> Vec<String> {
        let mut dropped: Vec<String> = self
            .stocks
            .values()
            .filter(|s| s.state == LiveState::Rejected)
            .map(|s| s.symbol.clone())
            .filter(|s| self.reported_inactive.insert(s.clone()))
            .collect();
        dropped.sort();
        dropped
    }

    fn log_close(&mut self, symbol: &str) {
        let Some(stock) = self.stocks.get(symbol) else {
            return;
        };
        match TradeRecord::from_closed(stock) {
            Some(record) => {
                if let Err(e) = self.trade_log.append(&record) {
                    warn!(symbol, error = %e, "Trade log append failed");
                }
            }
            None => warn!(symbol, "Closed position missing entry or exit fields"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn log(dir: &tempfile::TempDir) -> TradeLog {
        TradeLog::new(dir.path(), "2026-01-09".parse().unwrap()).unwrap()
    }

    fn pipeline_with(
        dir: &tempfile::TempDir,
        entries: Vec<(&str, StrategyClass, f64, Option<f64>)>,
    ) -> QualificationPipeline {
        let mut p = QualificationPipeline::new(PipelineConfig::default(), log(dir));
        for (symbol, strategy, prev_close, vah) in entries {
            let mut stock = LiveStock::new(
                symbol,
                strategy,
                prev_close,
                1_000_000.0,
                LiveParams::default(),
            );
            stock.vah = vah;
            p.stocks.insert(symbol.to_string(), stock);
        }
        p
    }

    fn tick(symbol: &str, price: f64, volume: Option<u64>) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 9, 9, 30, 0).unwrap(),
            day_volume: volume,
        }
    }

    fn open_and_gap(p: &mut QualificationPipeline, symbol: &str, open: f64) {
        let stock = p.stocks.get_mut(symbol).unwrap();
        stock.set_open_price(open);
        stock.validate_gap();
    }

    #[test]
    fn test_full_qualification_and_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline_with(
            &dir,
            vec![("TCS", StrategyClass::Continuation, 100.0, Some(102.5))],
        );
        open_and_gap(&mut p, "TCS", 103.1);

        // watch window: volume builds, no low violation
        p.handle_tick(&tick("TCS", 103.5, Some(80_000)), SessionPhase::Watch);
        p.handle_tick(&tick("TCS", 104.25, Some(85_000)), SessionPhase::Watch);

        let dropped = p.on_entry_decision();
        assert!(dropped.is_empty());
        assert_eq!(p.stock("TCS").unwrap().state, LiveState::Armed);
        assert_eq!(p.stock("TCS").unwrap().entry_high, Some(104.25));

        // breakout above the armed high
        p.handle_tick(&tick("TCS", 104.30, Some(90_000)), SessionPhase::Trading);
        assert_eq!(p.stock("TCS").unwrap().state, LiveState::Entered);

        // session end closes at last price and logs the trade
        p.on_session_end(Utc.with_ymd_and_hms(2026, 1, 9, 15, 15, 0).unwrap());
        let summary = p.summary().unwrap();
        assert_eq!(summary.entered, 1);
        assert_eq!(summary.trades.len(), 1);
        assert_eq!(summary.trades[0].reason, "session end");
    }

    #[test]
    fn test_position_cap_arms_only_first_qualifiers() {
        let dir = tempfile::tempdir().unwrap();
        let names = ["AAA", "BBB", "CCC"];
        let mut p = pipeline_with(
            &dir,
            names
                .iter()
                .map(|n| (*n, StrategyClass::ReversalUp, 100.0, None))
                .collect(),
        );
        for n in names {
            open_and_gap(&mut p, n, 101.0);
            p.handle_tick(&tick(n, 101.2, Some(100_000)), SessionPhase::Watch);
        }

        let dropped = p.on_entry_decision();
        // cap is 2: the alphabetically-last qualifier is dropped
        assert_eq!(dropped, vec!["CCC"]);
        assert_eq!(p.stock("AAA").unwrap().state, LiveState::Armed);
        assert_eq!(p.stock("BBB").unwrap().state, LiveState::Armed);
        assert_eq!(p.stock("CCC").unwrap().state, LiveState::Rejected);
    }

    #[test]
    fn test_low_violation_drops_symbol_in_watch() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline_with(
            &dir,
            vec![("TCS", StrategyClass::Continuation, 100.0, Some(102.5))],
        );
        open_and_gap(&mut p, "TCS", 103.1);

        // dips more than 1% under the open
        p.handle_tick(&tick("TCS", 101.9, Some(50_000)), SessionPhase::Watch);
        assert_eq!(p.stock("TCS").unwrap().state, LiveState::Rejected);

        // later ticks are ignored
        p.handle_tick(&tick("TCS", 110.0, Some(900_000)), SessionPhase::Watch);
        assert_eq!(p.stock("TCS").unwrap().state, LiveState::Rejected);
    }

    #[test]
    fn test_stop_loss_close_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline_with(
            &dir,
            vec![("TCS", StrategyClass::ReversalUp, 100.0, None)],
        );
        open_and_gap(&mut p, "TCS", 101.0);
        p.handle_tick(&tick("TCS", 101.5, Some(100_000)), SessionPhase::Watch);
        p.on_entry_decision();
        p.handle_tick(&tick("TCS", 101.6, None), SessionPhase::Trading);
        assert!(p.stock("TCS").unwrap().is_entered());

        // straight through the 4% stop
        p.handle_tick(&tick("TCS", 97.0, None), SessionPhase::Trading);
        let summary = p.summary().unwrap();
        assert_eq!(summary.trades.len(), 1);
        assert_eq!(summary.trades[0].reason, "stop loss");
        assert!(summary.trades[0].pnl_pct < 0.0);
    }
}
