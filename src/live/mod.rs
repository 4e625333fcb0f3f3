//! Live session: per-symbol qualification state, tick dispatch, the
//! phase-driven pipeline, and the paper-trade log.

pub mod dispatcher;
pub mod pipeline;
pub mod stock;
pub mod trade_log;
pub mod volume_profile;

pub use dispatcher::TickDispatcher;
pub use pipeline::{PipelineConfig, QualificationPipeline, SessionSummary};
pub use stock::{LiveParams, LiveState, LiveStock};
pub use trade_log::{TradeLog, TradeRecord, TradeSide};
pub use volume_profile::{build_volume_profile, VolumeProfile};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::scanner::ScanType;

// ============================================================================
// Strategy Class
// ============================================================================

/// How a watchlist symbol is expected to behave at the open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyClass {
    /// Gap up within band, ride the trend
    Continuation,
    /// Post-decline gap up, momentum snap-back
    ReversalUp,
    /// Post-decline gap down, continuation short context
    ReversalDown,
}

impl StrategyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continuation => "continuation",
            Self::ReversalUp => "reversal_up",
            Self::ReversalDown => "reversal_down",
        }
    }
}

impl fmt::Display for StrategyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Watchlist
// ============================================================================

/// Scan output handed to the live session: one symbol per line on disk,
/// one file per scan type and date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watchlist {
    pub symbols: Vec<String>,
}

impl Watchlist {
    pub fn new(mut symbols: Vec<String>) -> Self {
        symbols.sort();
        symbols.dedup();
        Self { symbols }
    }

    /// Conventional file name for a scan's output.
    pub fn file_name(scan_type: ScanType, date: chrono::NaiveDate) -> String {
        format!("{scan_type}_{date}.txt")
    }

    /// Write the list, one symbol per line.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let body = self.symbols.join("\n");
        std::fs::write(path, body)
            .with_context(|| format!("failed to write watchlist {}", path.display()))
    }

    /// Read a list back, skipping blank lines and surrounding whitespace.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read watchlist {}", path.display()))?;
        let symbols = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self::new(symbols))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
