//! Paper-trade log.
//!
//! Append-only CSV, one file per session date. Records are written at
//! position close; a crash mid-session loses at most the open position.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use super::stock::LiveStock;

// ============================================================================
// Record
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Long,
}

/// One completed paper trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    /// Realized gain, percent of entry
    pub pnl_pct: f64,
    pub reason: String,
}

impl TradeRecord {
    /// Build a record from a closed position. `None` if the stock never
    /// entered or never exited.
    pub fn from_closed(stock: &LiveStock) -> Option<Self> {
        Some(Self {
            trade_id: Uuid::new_v4(),
            symbol: stock.symbol.clone(),
            side: TradeSide::Long,
            entry_time: stock.entry_time?,
            entry_price: stock.entry_price?,
            exit_time: stock.exit_time?,
            exit_price: stock.exit_price?,
            pnl_pct: stock.pnl_pct()? * 100.0,
            reason: stock.exit_reason.clone().unwrap_or_default(),
        })
    }
}

// ============================================================================
// Log
// ============================================================================

/// CSV writer for one session's trades.
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    /// Log file for `date` under `dir` (created if needed).
    pub fn new(dir: impl AsRef<Path>, date: NaiveDate) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create trade log dir {}", dir.display()))?;
        Ok(Self {
            path: dir.join(format!("trades_{date}.csv")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, writing the header on first use.
    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        let fresh = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open trade log {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);
        writer
            .serialize(record)
            .context("failed to serialize trade record")?;
        writer.flush().context("failed to flush trade log")?;
        info!(symbol = %record.symbol, pnl_pct = record.pnl_pct, reason = %record.reason,
              "Trade logged");
        Ok(())
    }

    /// Read the session's records back.
    pub fn read_all(&self) -> Result<Vec<TradeRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("failed to read trade log {}", self.path.display()))?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row.context("malformed trade log row")?);
        }
        Ok(records)
    }
}

// ============================================================================
// Tests
// ============================================================================
