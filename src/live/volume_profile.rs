//! Previous-day volume profile.
//!
//! Builds a fixed-width price histogram from 1-minute bars, spreading each
//! bar's volume evenly across the bins its [low, high] span covers. The
//! value area grows greedily outward from the point of control until it
//! holds 70% of traded volume.

use crate::data::MinuteBar;

/// Histogram bin width in price units.
pub const BIN_WIDTH: f64 = 0.05;
/// Share of total volume the value area must cover.
pub const VALUE_AREA_PCT: f64 = 0.70;

/// Value-area summary of one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeProfile {
    /// Price level of the highest-volume bin
    pub poc: f64,
    /// Upper edge of the value area
    pub vah: f64,
    /// Lower edge of the value area
    pub val: f64,
}

/// Build the profile from one session of minute bars. Returns `None` when
/// the bars carry no volume or no valid price span.
pub fn build_volume_profile(bars: &[MinuteBar]) -> Option<VolumeProfile> {
    let lo = bars
        .iter()
        .filter(|b| b.low > 0.0)
        .map(|b| b.low)
        .fold(f64::MAX, f64::min);
    let hi = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    if lo == f64::MAX || hi < lo {
        return None;
    }

    let bin_count = ((hi - lo) / BIN_WIDTH).floor() as usize + 1;
    let mut bins = vec![0.0f64; bin_count];
    let mut total = 0.0f64;

    for bar in bars {
        if bar.volume == 0 || bar.low <= 0.0 || bar.high < bar.low {
            continue;
        }
        let first = ((bar.low - lo) / BIN_WIDTH).floor() as usize;
        let last = (((bar.high - lo) / BIN_WIDTH).floor() as usize).min(bin_count - 1);
        let span = (last - first + 1) as f64;
        let share = bar.volume as f64 / span;
        for bin in &mut bins[first..=last] {
            *bin += share;
        }
        total += bar.volume as f64;
    }
    if total <= 0.0 {
        return None;
    }

    // POC: argmax bin. Ties resolve to the highest-priced bin.
    let poc_idx = bins
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)?;

    // Greedy expansion: at each step take whichever neighbor bin holds
    // more volume until the area covers the target share.
    let mut low_idx = poc_idx;
    let mut high_idx = poc_idx;
    let mut covered = bins[poc_idx];
    let target = total * VALUE_AREA_PCT;
    while covered < target && (low_idx > 0 || high_idx < bin_count - 1) {
        let below = low_idx.checked_sub(1).map(|i| bins[i]);
        let above = (high_idx + 1 < bin_count).then(|| bins[high_idx + 1]);
        match (below, above) {
            (Some(b), Some(a)) if b >= a => {
                low_idx -= 1;
                covered += b;
            }
            (_, Some(a)) => {
                high_idx += 1;
                covered += a;
            }
            (Some(b), None) => {
                low_idx -= 1;
                covered += b;
            }
            (None, None) => break,
        }
    }

    let bin_price = |i: usize| lo + i as f64 * BIN_WIDTH;
    Some(VolumeProfile {
        poc: bin_price(poc_idx),
        vah: bin_price(high_idx) + BIN_WIDTH,
        val: bin_price(low_idx),
    })
}

// ============================================================================
// Tests
// ============================================================================
