//! EOD scanner: candidate records, filters, pattern analyzers, orchestrator.

pub mod continuation;
pub mod engine;
pub mod filters;
pub mod reversal;

pub use continuation::{ContinuationAnalyzer, ContinuationCandidate, ContinuationParams};
pub use engine::{ScanProgress, ScanReport, ScannerEngine};
pub use filters::{FilterEngine, FilterParams};
pub use reversal::{ReversalAnalyzer, ReversalCandidate, ReversalParams, ReversalProfile};

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Scan Type
// ============================================================================

/// The two EOD scans the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Continuation,
    Reversal,
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuation => write!(f, "continuation"),
            Self::Reversal => write!(f, "reversal"),
        }
    }
}

// ============================================================================
// Trend Context
// ============================================================================

/// MA-20 slope at the start of a reversal window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendContext {
    /// Decline inside a rising MA: potential pullback-buy setup
    Uptrend,
    /// Decline inside a falling MA: continuation-short setup
    Downtrend,
}

// ============================================================================
// Rejection
// ============================================================================

/// Why an analyzer declined a symbol. Carries the earliest unmet condition
/// so scan diagnostics read as a single reason per symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub symbol: String,
    pub reason: String,
}

impl Rejection {
    pub fn new(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.symbol, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_type_display() {
        assert_eq!(ScanType::Continuation.to_string(), "continuation");
        assert_eq!(ScanType::Reversal.to_string(), "reversal");
    }

    #[test]
    fn test_rejection_display() {
        let r = Rejection::new("TCS", "no pullback below MA in window");
        assert_eq!(r.to_string(), "TCS: no pullback below MA in window");
    }
}
