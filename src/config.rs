//! Application configuration.
//!
//! One JSON document covering the cache location, scan thresholds, live
//! session thresholds and the session timetable. Every field has a
//! default, so an empty `{}` file is a valid configuration.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::live::pipeline::PipelineConfig;
use crate::scanner::{ContinuationParams, FilterParams, ReversalParams};

// ============================================================================
// Session Times
// ============================================================================

/// NSE session timetable, exchange-local wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTimes {
    /// Pre-open IEP batch fetch
    #[serde(default = "default_pre_open_fetch")]
    pub pre_open_fetch: NaiveTime,
    #[serde(default = "default_market_open")]
    pub market_open: NaiveTime,
    /// End of the low-watch window; volume, VAH and arming decided here
    #[serde(default = "default_entry_decision")]
    pub entry_decision: NaiveTime,
    /// Remaining positions close at this boundary
    #[serde(default = "default_session_end")]
    pub session_end: NaiveTime,
}

fn default_pre_open_fetch() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 14, 30).expect("valid time")
}
fn default_market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 15, 0).expect("valid time")
}
fn default_entry_decision() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 20, 0).expect("valid time")
}
fn default_session_end() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 15, 0).expect("valid time")
}

impl Default for SessionTimes {
    fn default() -> Self {
        Self {
            pre_open_fetch: default_pre_open_fetch(),
            market_open: default_market_open(),
            entry_decision: default_entry_decision(),
            session_end: default_session_end(),
        }
    }
}

// ============================================================================
// App Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Per-symbol cache artifacts live here
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Watchlists and paper-trade CSVs live here
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Bhavcopy fetch attempts before a day is skipped
    #[serde(default = "default_ingest_retries")]
    pub ingest_retries: u32,
    /// Seconds between fetch attempts
    #[serde(default = "default_ingest_retry_delay_secs")]
    pub ingest_retry_delay_secs: u64,

    #[serde(default)]
    pub filters: FilterParams,
    #[serde(default)]
    pub continuation: ContinuationParams,
    #[serde(default)]
    pub reversal: ReversalParams,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub session_times: SessionTimes,
}

fn default_cache_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ma-trader")
        .join("cache")
}

fn default_output_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ma-trader")
        .join("output")
}

fn default_ingest_retries() -> u32 {
    3
}
fn default_ingest_retry_delay_secs() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            output_dir: default_output_dir(),
            ingest_retries: default_ingest_retries(),
            ingest_retry_delay_secs: default_ingest_retry_delay_secs(),
            filters: FilterParams::default(),
            continuation: ContinuationParams::default(),
            reversal: ReversalParams::default(),
            pipeline: PipelineConfig::default(),
            session_times: SessionTimes::default(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file; missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Write the current configuration out, pretty-printed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write config {}", path.display()))
    }

    /// Retry knobs in the shape the ingestor wants.
    pub fn ingest_config(&self) -> crate::data::IngestConfig {
        crate::data::IngestConfig {
            max_retries: self.ingest_retries,
            retry_delay: std::time::Duration::from_secs(self.ingest_retry_delay_secs),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.ingest_retries, 3);
        assert!((config.filters.min_price - 100.0).abs() < 1e-9);
        assert!((config.pipeline.live.gap_floor - 0.003).abs() < 1e-12);
        assert_eq!(
            config.session_times.market_open,
            NaiveTime::from_hms_opt(9, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_partial_override_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "ingest_retries": 5, "filters": { "max_price": 5000.0 } }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.ingest_retries, 5);
        assert!((config.filters.max_price - 5000.0).abs() < 1e-9);
        // untouched fields keep defaults
        assert!((config.filters.min_price - 100.0).abs() < 1e-9);

        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
