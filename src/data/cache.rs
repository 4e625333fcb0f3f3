//! Per-symbol daily bar cache.
//!
//! Each symbol owns one JSON artifact (`{SYMBOL}.json`) under the cache
//! directory, so a corrupt or partial file degrades exactly one symbol.
//! File stems containing `_` are reserved for non-symbol caches and are
//! never listed as symbols.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::DailyBar;

// ============================================================================
// Upsert Outcome
// ============================================================================

/// What a single-bar upsert did to the stored series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The date was new; the bar was appended into sorted position
    Inserted,
    /// The date existed and the stored bar differed; it was replaced
    Replaced,
    /// The date existed with an identical bar; nothing changed
    Unchanged,
}

// ============================================================================
// Symbol Cache
// ============================================================================

/// File-backed store of daily series, one artifact per symbol.
pub struct SymbolCache {
    dir: PathBuf,
}

impl SymbolCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn artifact_path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.json"))
    }

    /// Load the full series for a symbol, ascending by date.
    ///
    /// Unknown symbol reads as no data. A corrupt artifact is logged and
    /// also reads as no data; other symbols are unaffected.
    pub fn load(&self, symbol: &str) -> Option<Vec<DailyBar>> {
        let path = self.artifact_path(symbol);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(symbol, error = %e, "Failed to read cache artifact");
                return None;
            }
        };
        match serde_json::from_str::<Vec<DailyBar>>(&raw) {
            Ok(mut bars) => {
                bars.sort_by_key(|b| b.date);
                bars.dedup_by_key(|b| b.date);
                Some(bars)
            }
            Err(e) => {
                warn!(symbol, error = %e, "Corrupt cache artifact, treating as empty");
                None
            }
        }
    }

    /// Persist the full series for a symbol, replacing any prior artifact.
    ///
    /// The series is normalized (sorted, unique dates) before writing.
    pub fn save(&self, symbol: &str, bars: &[DailyBar]) -> Result<()> {
        let mut sorted: Vec<DailyBar> = bars.to_vec();
        sorted.sort_by_key(|b| b.date);
        sorted.dedup_by_key(|b| b.date);

        let path = self.artifact_path(symbol);
        let json = serde_json::to_string(&sorted)
            .with_context(|| format!("failed to serialize series for {symbol}"))?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(symbol, bars = sorted.len(), "Saved cache artifact");
        Ok(())
    }

    /// Merge one bar into a symbol's series by date. An incoming bar for
    /// an existing date replaces the stored bar; the result stays strictly
    /// sorted with unique dates.
    pub fn upsert(&self, symbol: &str, bar: DailyBar) -> Result<UpsertOutcome> {
        let mut by_date: BTreeMap<NaiveDate, DailyBar> = self
            .load(symbol)
            .unwrap_or_default()
            .into_iter()
            .map(|b| (b.date, b))
            .collect();

        let outcome = match by_date.insert(bar.date, bar) {
            None => UpsertOutcome::Inserted,
            Some(prev) if prev == bar => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Replaced,
        };

        if outcome != UpsertOutcome::Unchanged {
            let bars: Vec<DailyBar> = by_date.into_values().collect();
            self.save(symbol, &bars)?;
        }
        Ok(outcome)
    }

    /// Merge a batch of bars into a symbol's series with one artifact read
    /// and at most one write. Returns how many bars were inserted or
    /// replaced; an all-duplicate batch leaves the artifact untouched.
    pub fn upsert_many(&self, symbol: &str, bars: &[DailyBar]) -> Result<usize> {
        let mut by_date: BTreeMap<NaiveDate, DailyBar> = self
            .load(symbol)
            .unwrap_or_default()
            .into_iter()
            .map(|b| (b.date, b))
            .collect();

        let mut changed = 0;
        for bar in bars {
            match by_date.insert(bar.date, *bar) {
                Some(prev) if prev == *bar => {}
                _ => changed += 1,
            }
        }

        if changed > 0 {
            let merged: Vec<DailyBar> = by_date.into_values().collect();
            self.save(symbol, &merged)?;
        }
        Ok(changed)
    }

    /// Bars within `[from, to]` inclusive; `from = None` means the full
    /// prefix through `to`. Unknown symbol yields an empty series.
    pub fn range(&self, symbol: &str, from: Option<NaiveDate>, to: NaiveDate) -> Vec<DailyBar> {
        self.load(symbol)
            .unwrap_or_default()
            .into_iter()
            .filter(|b| b.date <= to && from.map_or(true, |f| b.date >= f))
            .collect()
    }

    /// Most recent stored date for a symbol, if any.
    pub fn latest_date(&self, symbol: &str) -> Option<NaiveDate> {
        self.load(symbol)?.last().map(|b| b.date)
    }

    /// Every symbol with an artifact, sorted. Stems containing `_` are
    /// reserved for auxiliary caches and skipped.
    pub fn list_symbols(&self) -> Result<Vec<String>> {
        let mut symbols = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read cache dir {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.contains('_') {
                continue;
            }
            symbols.push(stem.to_string());
        }
        symbols.sort();
        Ok(symbols)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: &str, close: f64, volume: u64) -> DailyBar {
        DailyBar {
            date: date.parse().unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume,
        }
    }

    #[test]
    fn test_save_load_round_trip_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();

        // out of order on purpose
        let bars = vec![
            bar("2026-01-08", 102.0, 500_000),
            bar("2026-01-06", 100.0, 400_000),
            bar("2026-01-07", 101.0, 450_000),
        ];
        cache.save("RELIANCE", &bars).unwrap();

        let loaded = cache.load("RELIANCE").unwrap();
        let dates: Vec<_> = loaded.iter().map(|b| b.date.to_string()).collect();
        assert_eq!(dates, vec!["2026-01-06", "2026-01-07", "2026-01-08"]);
        assert!(cache.load("NOSUCH").is_none());
    }

    #[test]
    fn test_upsert_insert_replace_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();

        let b1 = bar("2026-01-06", 100.0, 400_000);
        assert_eq!(cache.upsert("TCS", b1).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(cache.upsert("TCS", b1).unwrap(), UpsertOutcome::Unchanged);

        let corrected = bar("2026-01-06", 100.5, 410_000);
        assert_eq!(
            cache.upsert("TCS", corrected).unwrap(),
            UpsertOutcome::Replaced
        );
        let loaded = cache.load("TCS").unwrap();
        assert_eq!(loaded.len(), 1);
        assert!((loaded[0].close - 100.5).abs() < 1e-9);
    }

    #[test]
    fn test_upsert_many_single_write_merge() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();

        let batch = vec![bar("2026-01-06", 100.0, 400_000), bar("2026-01-07", 101.0, 420_000)];
        assert_eq!(cache.upsert_many("TCS", &batch).unwrap(), 2);

        // identical batch changes nothing
        assert_eq!(cache.upsert_many("TCS", &batch).unwrap(), 0);

        // one corrected bar counts once and replaces in place
        let corrected = vec![bar("2026-01-06", 100.0, 400_000), bar("2026-01-07", 101.5, 425_000)];
        assert_eq!(cache.upsert_many("TCS", &corrected).unwrap(), 1);

        let loaded = cache.load("TCS").unwrap();
        assert_eq!(loaded.len(), 2);
        assert!((loaded[1].close - 101.5).abs() < 1e-9);
    }

    #[test]
    fn test_range_open_prefix_and_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();
        cache
            .save(
                "INFY",
                &[
                    bar("2026-01-05", 99.0, 1),
                    bar("2026-01-06", 100.0, 1),
                    bar("2026-01-07", 101.0, 1),
                ],
            )
            .unwrap();

        let to = "2026-01-06".parse().unwrap();
        let full_prefix = cache.range("INFY", None, to);
        assert_eq!(full_prefix.len(), 2);

        let from = "2026-01-06".parse().unwrap();
        let bounded = cache.range("INFY", Some(from), "2026-01-07".parse().unwrap());
        assert_eq!(bounded.len(), 2);
        assert_eq!(bounded[0].date, from);

        assert!(cache.range("NOSUCH", None, to).is_empty());
    }

    #[test]
    fn test_corrupt_artifact_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();
        cache.save("GOOD", &[bar("2026-01-06", 100.0, 1)]).unwrap();
        fs::write(dir.path().join("BAD.json"), "{not json").unwrap();

        assert!(cache.load("BAD").is_none());
        assert_eq!(cache.load("GOOD").unwrap().len(), 1);
    }

    #[test]
    fn test_list_symbols_skips_reserved_stems() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();
        cache.save("TCS", &[bar("2026-01-06", 100.0, 1)]).unwrap();
        cache.save("RELIANCE", &[bar("2026-01-06", 100.0, 1)]).unwrap();
        fs::write(dir.path().join("scan_meta.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(cache.list_symbols().unwrap(), vec!["RELIANCE", "TCS"]);
    }

    #[test]
    fn test_latest_date() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();
        assert!(cache.latest_date("TCS").is_none());
        cache
            .save(
                "TCS",
                &[bar("2026-01-06", 100.0, 1), bar("2026-01-07", 101.0, 1)],
            )
            .unwrap();
        assert_eq!(
            cache.latest_date("TCS").unwrap(),
            "2026-01-07".parse::<NaiveDate>().unwrap()
        );
    }
}
