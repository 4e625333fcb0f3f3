//! MA Trader Library
//!
//! EOD equity screener and intraday paper-trading engine for the NSE cash
//! market. The screener ingests daily bhavcopies into a per-symbol cache
//! and flags two setups: MA-pullback continuations and N-day decline
//! reversals. The live engine takes those watchlists through a gap /
//! low-watch / volume / value-area qualification funnel, arms breakout
//! triggers and paper-trades them with a trailing stop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            ma-trader                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐   ┌────────────────┐   ┌──────────────────┐  │
//! │  │  Data Layer   │   │  EOD Scanner   │   │  Live Session    │  │
//! │  │  cache /      │──▶│  filters /     │──▶│  dispatcher /    │  │
//! │  │  bhavcopy     │   │  analyzers     │   │  pipeline        │  │
//! │  └───────────────┘   └────────────────┘   └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Continuation setup
//! - **Phase 1**: impulse leg making the window high above a rising MA-20
//! - **Phase 2**: pullback closing below the MA, at least one ADR deep
//! - **Phase 3**: recovery to a lower high resting near the MA
//!
//! ## Reversal setup
//! - N consecutive-ish red days (shape rules per window length)
//! - Total decline of 10%+ with in-window liquidity
//! - Traded long on a gap up (`reversal_up`) or tracked short-context on
//!   a gap down (`reversal_down`)
//!
//! ## Session funnel
//! - Pre-open IEP sets the open; gap band decides who stays subscribed
//! - Watch window rejects lows >1% under the open
//! - Volume and prior-day value-area checks at the entry boundary
//! - Breakout above the armed high enters; 4% stop, breakeven trail at +5%

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod data;
pub mod indicators;
pub mod live;
pub mod scanner;

pub use config::AppConfig;
