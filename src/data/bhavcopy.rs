//! NSE bhavcopy ingestion.
//!
//! The archive itself is an external collaborator behind [`BhavcopyProvider`];
//! this module owns retry, schema decoding (UDiFF and legacy), row
//! validation, per-symbol upserts, and the post-ingest verification pass.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::{SymbolCache, UpsertOutcome};
use super::provider::ProviderError;
use super::{DailyBar, DaySlice};

// ============================================================================
// Provider Trait
// ============================================================================

/// Source of raw bhavcopy CSV for one settlement date.
#[async_trait]
pub trait BhavcopyProvider: Send + Sync {
    /// Raw CSV text of the day's bhavcopy, either schema.
    async fn fetch_csv(&self, date: NaiveDate) -> Result<String, ProviderError>;
}

// ============================================================================
// Row Schemas
// ============================================================================

/// A decoded bhavcopy row, schema-normalized. `date` is the trade date
/// the archive itself stamped on the row; the legacy schema carries none.
#[derive(Debug, Clone, PartialEq)]
pub struct BhavcopyRow {
    pub symbol: String,
    pub series: String,
    pub date: Option<NaiveDate>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// UDiFF common bhavcopy schema (post-2024 archive format).
#[derive(Debug, Deserialize)]
struct UdiffRecord {
    #[serde(rename = "TradDt")]
    trad_dt: NaiveDate,
    #[serde(rename = "TckrSymb")]
    symbol: String,
    #[serde(rename = "SctySrs")]
    series: String,
    #[serde(rename = "OpnPric")]
    open: f64,
    #[serde(rename = "HghPric")]
    high: f64,
    #[serde(rename = "LwPric")]
    low: f64,
    #[serde(rename = "ClsPric")]
    close: f64,
    #[serde(rename = "TtlTradgVol")]
    volume: u64,
}

/// Legacy equity bhavcopy schema.
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    #[serde(rename = "SYMBOL")]
    symbol: String,
    #[serde(rename = "SERIES")]
    series: String,
    #[serde(rename = "OPEN")]
    open: f64,
    #[serde(rename = "HIGH")]
    high: f64,
    #[serde(rename = "LOW")]
    low: f64,
    #[serde(rename = "CLOSE")]
    close: f64,
    #[serde(rename = "TOTTRDQTY")]
    volume: u64,
}

// ============================================================================
// Ingest Config / Summary
// ============================================================================

/// Retry knobs for the archive fetch.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Fetch attempts before the day is reported as skipped
    pub max_retries: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Outcome counts for one `ingest_day` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    /// EQ rows decoded from the archive
    pub downloaded: usize,
    /// Symbols whose cached series changed (inserted or replaced)
    pub updated: usize,
    /// Symbols already carrying an identical bar for the date
    pub skipped: usize,
    /// Invalid rows dropped plus per-symbol persistence failures
    pub errors: usize,
    /// Symbols confirmed to carry the settlement date after ingest
    pub verified: usize,
    /// `verified / downloaded`, 1.0 when nothing was downloaded
    pub verified_ratio: f64,
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloaded={} updated={} skipped={} errors={} verified={} ({:.1}%)",
            self.downloaded,
            self.updated,
            self.skipped,
            self.errors,
            self.verified,
            self.verified_ratio * 100.0
        )
    }
}

// ============================================================================
// Ingestor
// ============================================================================

/// Pulls one day of settlement data into the symbol cache.
pub struct BhavcopyIngestor<P: BhavcopyProvider> {
    provider: P,
    config: IngestConfig,
}

impl<P: BhavcopyProvider> BhavcopyIngestor<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: IngestConfig::default(),
        }
    }

    pub fn with_config(provider: P, config: IngestConfig) -> Self {
        Self { provider, config }
    }

    /// Ingest one settlement date: fetch with retry, decode, validate,
    /// upsert per symbol, then verify. Re-runs are idempotent; a corrected
    /// row replaces the stored bar on the second pass.
    pub async fn ingest_day(&self, cache: &SymbolCache, date: NaiveDate) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();

        let csv_text = match self.fetch_with_retry(date).await {
            Ok(text) => text,
            Err(e) => {
                warn!(%date, error = %e, "Bhavcopy fetch exhausted retries, day skipped");
                summary.skipped = 1;
                summary.verified_ratio = 1.0;
                return Ok(summary);
            }
        };

        let (slice, dropped) = parse_day(&csv_text, date);
        let settlement = slice.settlement_date;
        summary.downloaded = slice.len();
        summary.errors += dropped;
        if settlement != date {
            info!(requested = %date, %settlement, "Archive normalized the settlement date");
        }
        info!(%settlement, rows = slice.len(), dropped, "Decoded bhavcopy");

        // One symbol's failure must not stop the rest of the slice.
        let mut ingested: Vec<&str> = Vec::with_capacity(slice.len());
        for (symbol, bar) in &slice.bars {
            match cache.upsert(symbol, *bar) {
                Ok(UpsertOutcome::Inserted) | Ok(UpsertOutcome::Replaced) => {
                    summary.updated += 1;
                    ingested.push(symbol);
                }
                Ok(UpsertOutcome::Unchanged) => {
                    summary.skipped += 1;
                    ingested.push(symbol);
                }
                Err(e) => {
                    warn!(symbol, error = %e, "Upsert failed, continuing with remaining symbols");
                    summary.errors += 1;
                }
            }
        }

        // Verification: the settlement date must now be readable back.
        for symbol in &ingested {
            let present = cache
                .range(symbol, Some(settlement), settlement)
                .iter()
                .any(|b| b.date == settlement);
            if present {
                summary.verified += 1;
            } else {
                warn!(symbol, %settlement, "Verification missed settlement date");
            }
        }
        summary.verified_ratio = if summary.downloaded == 0 {
            1.0
        } else {
            summary.verified as f64 / summary.downloaded as f64
        };

        info!(%settlement, %summary, "Ingest complete");
        Ok(summary)
    }

    /// Ingest every date in `[from, to]` inclusive, accumulating bars per
    /// symbol so each cache artifact is read and written once for the
    /// whole range. A day whose fetch exhausts retries is skipped; the
    /// remaining days still land.
    pub async fn ingest_range(
        &self,
        cache: &SymbolCache,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        let mut per_symbol: BTreeMap<String, Vec<DailyBar>> = BTreeMap::new();

        let mut day = from;
        while day <= to {
            match self.fetch_with_retry(day).await {
                Ok(csv_text) => {
                    let (slice, dropped) = parse_day(&csv_text, day);
                    summary.downloaded += slice.len();
                    summary.errors += dropped;
                    debug!(settlement = %slice.settlement_date, rows = slice.len(), dropped, "Decoded bhavcopy");
                    for (symbol, bar) in slice.bars {
                        per_symbol.entry(symbol).or_default().push(bar);
                    }
                }
                Err(e) => {
                    warn!(date = %day, error = %e, "Bhavcopy fetch exhausted retries, day skipped");
                    summary.skipped += 1;
                }
            }
            day = day + chrono::Duration::days(1);
        }

        for (symbol, bars) in &per_symbol {
            match cache.upsert_many(symbol, bars) {
                Ok(changed) => {
                    summary.updated += changed;
                    summary.skipped += bars.len() - changed;
                }
                Err(e) => {
                    warn!(symbol, error = %e, "Batch upsert failed, continuing with remaining symbols");
                    summary.errors += bars.len();
                    continue;
                }
            }
            let stored = cache.load(symbol).unwrap_or_default();
            let all_present = bars
                .iter()
                .all(|b| stored.iter().any(|s| s.date == b.date));
            if all_present {
                summary.verified += bars.len();
            } else {
                warn!(symbol, "Verification missed a settlement date in the range");
            }
        }

        summary.verified_ratio = if summary.downloaded == 0 {
            1.0
        } else {
            summary.verified as f64 / summary.downloaded as f64
        };

        info!(%from, %to, %summary, "Range ingest complete");
        Ok(summary)
    }

    async fn fetch_with_retry(&self, date: NaiveDate) -> Result<String, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.fetch_csv(date).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_recoverable() && attempt < self.config.max_retries => {
                    debug!(%date, attempt, error = %e, "Bhavcopy fetch failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a raw bhavcopy into a day slice, keeping only valid EQ rows.
/// Returns the slice and the count of rows dropped as invalid.
///
/// UDiFF rows carry their own `TradDt`; the slice takes its settlement
/// date from the first decoded row and rows stamped with a different
/// date are dropped. The legacy schema carries no date column, so the
/// requested `date` stands in.
pub fn parse_day(csv_text: &str, date: NaiveDate) -> (DaySlice, usize) {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(csv_text.as_bytes());

    let udiff = reader
        .headers()
        .map(|h| h.iter().any(|col| col == "TckrSymb"))
        .unwrap_or(false);

    let rows: Vec<Option<BhavcopyRow>> = if udiff {
        reader
            .deserialize::<UdiffRecord>()
            .map(|r| {
                r.ok().map(|u| BhavcopyRow {
                    symbol: u.symbol,
                    series: u.series,
                    date: Some(u.trad_dt),
                    open: u.open,
                    high: u.high,
                    low: u.low,
                    close: u.close,
                    volume: u.volume,
                })
            })
            .collect()
    } else {
        reader
            .deserialize::<LegacyRecord>()
            .map(|r| {
                r.ok().map(|l| BhavcopyRow {
                    symbol: l.symbol,
                    series: l.series,
                    date: None,
                    open: l.open,
                    high: l.high,
                    low: l.low,
                    close: l.close,
                    volume: l.volume,
                })
            })
            .collect()
    };

    let mut bars = BTreeMap::new();
    let mut dropped = 0;
    let mut settlement: Option<NaiveDate> = None;

    for record in rows {
        let Some(row) = record else {
            dropped += 1;
            continue;
        };
        if row.series != "EQ" {
            continue;
        }
        let row_date = row.date.unwrap_or(date);
        let slice_date = *settlement.get_or_insert(row_date);
        if row_date != slice_date {
            dropped += 1;
            continue;
        }
        let bar = DailyBar {
            date: row_date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        };
        if !bar.is_valid() {
            dropped += 1;
            continue;
        }
        bars.insert(row.symbol, bar);
    }

    (
        DaySlice {
            settlement_date: settlement.unwrap_or(date),
            bars,
        },
        dropped,
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    const UDIFF_CSV: &str = "\
TradDt,BizDt,Sgmt,Src,FinInstrmTp,SctySrs,TckrSymb,OpnPric,HghPric,LwPric,ClsPric,TtlTradgVol
2026-01-06,2026-01-06,CM,NSE,STK,EQ,RELIANCE,1200.00,1215.50,1195.00,1210.25,4500000
2026-01-06,2026-01-06,CM,NSE,STK,BE,ILLIQ,50.00,51.00,49.50,50.25,1200
2026-01-06,2026-01-06,CM,NSE,STK,EQ,TCS,4100.00,4150.00,4080.00,4120.00,900000
2026-01-06,2026-01-06,CM,NSE,STK,EQ,BADROW,100.00,99.00,98.00,103.00,5000
";

    const LEGACY_CSV: &str = "\
SYMBOL,SERIES,OPEN,HIGH,LOW,CLOSE,LAST,PREVCLOSE,TOTTRDQTY,TOTTRDVAL
INFY,EQ,1500.00,1520.00,1490.00,1510.00,1510.00,1495.00,2000000,3020000000
JUNK,EQ,0.00,10.00,5.00,8.00,8.00,8.00,100,800
WIPRO,BE,300.00,305.00,298.00,302.00,302.00,299.00,50000,15100000
";

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_udiff_keeps_eq_drops_invalid() {
        let (slice, dropped) = parse_day(UDIFF_CSV, d("2026-01-06"));
        // BADROW violates high >= close, BE series silently filtered
        assert_eq!(slice.len(), 2);
        assert_eq!(dropped, 1);
        assert!(slice.bars.contains_key("RELIANCE"));
        assert!(slice.bars.contains_key("TCS"));
        assert_eq!(slice.bars["RELIANCE"].volume, 4_500_000);
    }

    #[test]
    fn test_udiff_settlement_date_comes_from_trad_dt() {
        // requested the 7th, but the archive rows are stamped the 6th
        let (slice, dropped) = parse_day(UDIFF_CSV, d("2026-01-07"));
        assert_eq!(slice.settlement_date, d("2026-01-06"));
        assert_eq!(dropped, 1);
        assert!(slice.bars.values().all(|b| b.date == d("2026-01-06")));
    }

    #[test]
    fn test_parse_legacy_schema() {
        let (slice, dropped) = parse_day(LEGACY_CSV, d("2026-01-06"));
        assert_eq!(slice.len(), 1);
        assert_eq!(dropped, 1); // JUNK has zero open
        assert!((slice.bars["INFY"].close - 1510.0).abs() < 1e-9);
    }

    /// Provider that fails recoverably a fixed number of times first.
    struct FlakyProvider {
        failures: AtomicU32,
        csv: String,
    }

    #[async_trait]
    impl BhavcopyProvider for FlakyProvider {
        async fn fetch_csv(&self, _date: NaiveDate) -> Result<String, ProviderError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::Network("503".into()));
            }
            Ok(self.csv.clone())
        }
    }

    #[tokio::test]
    async fn test_ingest_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();
        let provider = FlakyProvider {
            failures: AtomicU32::new(2),
            csv: UDIFF_CSV.to_string(),
        };
        let ingestor = BhavcopyIngestor::with_config(
            provider,
            IngestConfig {
                max_retries: 3,
                retry_delay: Duration::from_millis(1),
            },
        );

        let summary = ingestor.ingest_day(&cache, d("2026-01-06")).await.unwrap();
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.verified, 2);
        assert!((summary.verified_ratio - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ingest_verifies_against_normalized_date() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();
        let provider = FlakyProvider {
            failures: AtomicU32::new(0),
            csv: UDIFF_CSV.to_string(),
        };
        let ingestor = BhavcopyIngestor::new(provider);

        // request the 7th; the archive answers with the 6th's slice
        let summary = ingestor.ingest_day(&cache, d("2026-01-07")).await.unwrap();
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.verified, 2);
        assert_eq!(cache.latest_date("RELIANCE"), Some(d("2026-01-06")));
    }

    #[tokio::test]
    async fn test_ingest_reruns_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();
        let provider = FlakyProvider {
            failures: AtomicU32::new(0),
            csv: LEGACY_CSV.to_string(),
        };
        let ingestor = BhavcopyIngestor::new(provider);

        let first = ingestor.ingest_day(&cache, d("2026-01-06")).await.unwrap();
        assert_eq!(first.updated, 1);
        assert_eq!(first.skipped, 0);

        let second = ingestor.ingest_day(&cache, d("2026-01-06")).await.unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.verified, 1);
    }

    #[tokio::test]
    async fn test_ingest_exhausted_retries_reports_skip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();
        let provider = FlakyProvider {
            failures: AtomicU32::new(10),
            csv: String::new(),
        };
        let ingestor = BhavcopyIngestor::with_config(
            provider,
            IngestConfig {
                max_retries: 3,
                retry_delay: Duration::from_millis(1),
            },
        );

        let summary = ingestor.ingest_day(&cache, d("2026-01-06")).await.unwrap();
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.skipped, 1);
    }

    /// Provider backed by a fixed per-date archive; absent dates are holidays.
    struct ArchiveByDate {
        days: HashMap<NaiveDate, String>,
    }

    #[async_trait]
    impl BhavcopyProvider for ArchiveByDate {
        async fn fetch_csv(&self, date: NaiveDate) -> Result<String, ProviderError> {
            self.days
                .get(&date)
                .cloned()
                .ok_or_else(|| ProviderError::DataNotAvailable(date.to_string()))
        }
    }

    #[tokio::test]
    async fn test_ingest_range_batches_per_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SymbolCache::new(dir.path()).unwrap();

        let mut days = HashMap::new();
        days.insert(d("2026-01-06"), LEGACY_CSV.to_string());
        // the 7th is a holiday; the 8th closes a touch higher
        days.insert(d("2026-01-08"), LEGACY_CSV.replace("1510.00", "1512.00"));
        let ingestor = BhavcopyIngestor::new(ArchiveByDate { days });

        let summary = ingestor
            .ingest_range(&cache, d("2026-01-06"), d("2026-01-08"))
            .await
            .unwrap();
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.skipped, 1); // the holiday
        assert_eq!(summary.errors, 2); // JUNK's zero open, both days
        assert_eq!(summary.verified, 2);
        assert!((summary.verified_ratio - 1.0).abs() < 1e-9);

        let infy = cache.load("INFY").unwrap();
        assert_eq!(infy.len(), 2);
        assert!((infy[1].close - 1512.0).abs() < 1e-9);

        // a rerun changes nothing and reports the duplicates as skipped
        let rerun = ingestor
            .ingest_range(&cache, d("2026-01-06"), d("2026-01-08"))
            .await
            .unwrap();
        assert_eq!(rerun.updated, 0);
        assert_eq!(rerun.skipped, 3); // holiday plus two duplicate bars
        assert_eq!(rerun.verified, 2);
    }
}
