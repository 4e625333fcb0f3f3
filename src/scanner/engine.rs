//! Scan orchestration.
//!
//! Walks every cached symbol through the stage gates and the pattern
//! analyzer for one trading day, reporting progress as it goes. Parameter
//! changes rebuild the engine; a running scan always sees one consistent
//! parameter set.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::continuation::{ContinuationAnalyzer, ContinuationCandidate, ContinuationParams};
use super::filters::{FilterEngine, FilterParams};
use super::reversal::{ReversalAnalyzer, ReversalCandidate, ReversalParams};
use super::ScanType;
use crate::data::SymbolCache;

// ============================================================================
// Progress Events
// ============================================================================

/// Progress notifications emitted during a scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanProgress {
    /// The trading day the scan settled on, emitted first
    Date(NaiveDate),
    /// Percentage of the candidate set processed so far
    Percent(u8),
}

impl fmt::Display for ScanProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(d) => write!(f, "SCAN_DATE:{d}"),
            Self::Percent(p) => write!(f, "{p}%"),
        }
    }
}

// ============================================================================
// Scan Report
// ============================================================================

/// Counts for one completed scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub scan_type: ScanType,
    pub scan_date: NaiveDate,
    /// Symbols carrying the scan date that entered the pipeline
    pub scanned: usize,
    /// Symbols dropped by a stage gate
    pub gated: usize,
    /// Symbols the analyzer declined
    pub rejected: usize,
}

// ============================================================================
// Engine
// ============================================================================

/// One engine per parameter set. `with_*` constructors return a new engine
/// so in-flight scans never observe a half-updated configuration.
pub struct ScannerEngine {
    cache: Arc<SymbolCache>,
    filters: FilterEngine,
    continuation: ContinuationAnalyzer,
    reversal: ReversalAnalyzer,
}

impl ScannerEngine {
    pub fn new(cache: Arc<SymbolCache>) -> Self {
        Self {
            cache,
            filters: FilterEngine::default(),
            continuation: ContinuationAnalyzer::default(),
            reversal: ReversalAnalyzer::default(),
        }
    }

    /// New engine with different stage-gate thresholds.
    pub fn with_filter_params(&self, params: FilterParams) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            filters: FilterEngine::new(params),
            continuation: self.continuation,
            reversal: self.reversal,
        }
    }

    /// New engine with different continuation geometry thresholds.
    pub fn with_continuation_params(&self, params: ContinuationParams) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            filters: self.filters,
            continuation: ContinuationAnalyzer::new(params),
            reversal: self.reversal,
        }
    }

    /// New engine with different reversal thresholds.
    pub fn with_reversal_params(&self, params: ReversalParams) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            filters: self.filters,
            continuation: self.continuation,
            reversal: ReversalAnalyzer::new(params),
        }
    }

    /// Continuation scan for `date` (latest cached trading day when `None`).
    pub fn scan_continuation(
        &self,
        date: Option<NaiveDate>,
        mut progress: impl FnMut(ScanProgress),
    ) -> Result<(Vec<ContinuationCandidate>, ScanReport)> {
        let (scan_date, symbols) = self.resolve_scan_day(date)?;
        progress(ScanProgress::Date(scan_date));

        let mut candidates = Vec::new();
        let mut report = ScanReport {
            scan_type: ScanType::Continuation,
            scan_date,
            scanned: symbols.len(),
            gated: 0,
            rejected: 0,
        };

        for (i, symbol) in symbols.iter().enumerate() {
            let series = self.cache.range(symbol, None, scan_date);
            if !(self.filters.base_accept(&series)
                && self.filters.liquidity_accept(&series)
                && self.filters.adr_accept(&series)
                && self.filters.rising_ma_accept(&series))
            {
                report.gated += 1;
            } else {
                match self.continuation.analyze(symbol, &series) {
                    Ok(c) => candidates.push(c),
                    Err(r) => {
                        debug!(symbol = %r.symbol, reason = %r.reason, "Continuation rejected");
                        report.rejected += 1;
                    }
                }
            }
            emit_percent(&mut progress, i + 1, symbols.len());
        }

        candidates.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        info!(
            %scan_date,
            scanned = report.scanned,
            hits = candidates.len(),
            "Continuation scan complete"
        );
        Ok((candidates, report))
    }

    /// Reversal scan for `date` (latest cached trading day when `None`).
    pub fn scan_reversal(
        &self,
        date: Option<NaiveDate>,
        mut progress: impl FnMut(ScanProgress),
    ) -> Result<(Vec<ReversalCandidate>, ScanReport)> {
        let (scan_date, symbols) = self.resolve_scan_day(date)?;
        progress(ScanProgress::Date(scan_date));

        let mut candidates = Vec::new();
        let mut report = ScanReport {
            scan_type: ScanType::Reversal,
            scan_date,
            scanned: symbols.len(),
            gated: 0,
            rejected: 0,
        };

        for (i, symbol) in symbols.iter().enumerate() {
            let series = self.cache.range(symbol, None, scan_date);
            if !(self.filters.base_accept(&series)
                && self.filters.liquidity_accept(&series)
                && self.filters.adr_accept(&series))
            {
                report.gated += 1;
            } else {
                match self.reversal.analyze(symbol, &series) {
                    Ok(c) => candidates.push(c),
                    Err(r) => {
                        debug!(symbol = %r.symbol, reason = %r.reason, "Reversal rejected");
                        report.rejected += 1;
                    }
                }
            }
            emit_percent(&mut progress, i + 1, symbols.len());
        }

        candidates.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        info!(
            %scan_date,
            scanned = report.scanned,
            hits = candidates.len(),
            "Reversal scan complete"
        );
        Ok((candidates, report))
    }

    /// Settle the trading day and the symbols that carry it.
    fn resolve_scan_day(&self, date: Option<NaiveDate>) -> Result<(NaiveDate, Vec<String>)> {
        let all = self.cache.list_symbols()?;
        let scan_date = match date {
            Some(d) => d,
            None => match all.iter().filter_map(|s| self.cache.latest_date(s)).max() {
                Some(d) => d,
                None => bail!("no cached data"),
            },
        };
        let symbols: Vec<String> = all
            .into_iter()
            .filter(|s| {
                self.cache
                    .range(s, Some(scan_date), scan_date)
                    .iter()
                    .any(|b| b.date == scan_date)
            })
            .collect();
        Ok((scan_date, symbols))
    }
}

/// Emit a percentage event at every tenth of the candidate set.
fn emit_percent(progress: &mut impl FnMut(ScanProgress), done: usize, total: usize) {
    if total == 0 {
        return;
    }
    let pct = (done * 100 / total) as u8;
    let prev = ((done - 1) * 100 / total) as u8;
    if pct / 10 > prev / 10 || done == total {
        progress(ScanProgress::Percent(pct));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DailyBar;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    /// Liquid declining series that the reversal scan should flag.
    fn declining_series(end: NaiveDate) -> Vec<DailyBar> {
        let mut bars = Vec::new();
        // 30-day liquid base around 500 with two bursty days
        for i in 0..30i64 {
            let burst = i == 5 || i == 12;
            let close: f64 = if burst { 530.0 } else { 500.0 };
            bars.push(DailyBar {
                date: end - chrono::Duration::days(33 - i),
                open: 500.0,
                high: close.max(500.0) + 12.0,
                low: close.min(500.0) - 12.0,
                close,
                volume: if burst { 1_500_000 } else { 900_000 },
            });
        }
        // three red bars into the scan date: 500 -> 440
        for (j, (open, close)) in [(500.0, 480.0), (480.0, 460.0), (460.0, 440.0)]
            .iter()
            .enumerate()
        {
            bars.push(DailyBar {
                date: end - chrono::Duration::days(2 - j as i64),
                open: *open,
                high: open + 2.0,
                low: close - 2.0,
                close: *close,
                volume: 1_500_000,
            });
        }
        bars
    }

    #[test]
    fn test_reversal_scan_autodetects_latest_day() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SymbolCache::new(dir.path()).unwrap());
        let end = d("2026-01-09");
        cache.save("AXISBANK", &declining_series(end)).unwrap();
        // stale symbol not carrying the latest day
        cache
            .save("STALE", &declining_series(d("2026-01-02")))
            .unwrap();

        let engine = ScannerEngine::new(Arc::clone(&cache));
        let mut events = Vec::new();
        let (candidates, report) = engine
            .scan_reversal(None, |p| events.push(p))
            .unwrap();

        assert_eq!(events[0], ScanProgress::Date(end));
        assert_eq!(report.scanned, 1);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "AXISBANK");
        // a 33-bar series carries MA and rolling-low context
        assert!(candidates[0].sma20.is_some());
        assert!(candidates[0].dist_from_low_pct.is_some());
        assert!(matches!(events.last(), Some(ScanProgress::Percent(100))));
    }

    #[test]
    fn test_scan_fails_on_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SymbolCache::new(dir.path()).unwrap());
        let engine = ScannerEngine::new(cache);
        assert!(engine.scan_reversal(None, |_| {}).is_err());
    }

    #[test]
    fn test_gate_short_circuit_counts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SymbolCache::new(dir.path()).unwrap());
        let end = d("2026-01-09");
        // price 50: outside the band, must be gated before analysis
        let cheap: Vec<DailyBar> = declining_series(end)
            .into_iter()
            .map(|b| DailyBar {
                open: b.open / 10.0,
                high: b.high / 10.0,
                low: b.low / 10.0,
                close: b.close / 10.0,
                ..b
            })
            .collect();
        cache.save("PENNY", &cheap).unwrap();

        let engine = ScannerEngine::new(cache);
        let (candidates, report) = engine.scan_reversal(Some(end), |_| {}).unwrap();
        assert!(candidates.is_empty());
        assert_eq!(report.gated, 1);
        assert_eq!(report.rejected, 0);
    }

    #[test]
    fn test_with_params_rebuilds_engine() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SymbolCache::new(dir.path()).unwrap());
        let engine = ScannerEngine::new(cache);
        let widened = engine.with_filter_params(FilterParams {
            max_price: 5000.0,
            ..Default::default()
        });
        // original untouched
        assert!((engine.filters.params().max_price - 2000.0).abs() < 1e-9);
        assert!((widened.filters.params().max_price - 5000.0).abs() < 1e-9);
    }
}
