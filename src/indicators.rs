//! Indicator engine.
//!
//! Pure functions over daily bar slices. Vector forms return one value per
//! input bar with `None` until the window fills; scalar forms read the
//! latest bar. Nothing here touches I/O or the clock.

use crate::data::DailyBar;

/// Simple moving average of closes, window 20.
pub fn ma_20(bars: &[DailyBar]) -> Vec<Option<f64>> {
    sma(bars, 20)
}

/// SMA of closes over an arbitrary window.
pub fn sma(bars: &[DailyBar], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if window == 0 || bars.len() < window {
        return out;
    }
    let mut sum: f64 = bars[..window].iter().map(|b| b.close).sum();
    out[window - 1] = Some(sum / window as f64);
    for i in window..bars.len() {
        sum += bars[i].close - bars[i - window].close;
        out[i] = Some(sum / window as f64);
    }
    out
}

/// Max of the 5 MA-20 values immediately before the last bar.
/// `None` when fewer than 25 bars.
pub fn ma_20_prev_max_5(bars: &[DailyBar]) -> Option<f64> {
    if bars.len() < 25 {
        return None;
    }
    let ma = ma_20(bars);
    let n = ma.len();
    ma[n - 6..n - 1]
        .iter()
        .copied()
        .collect::<Option<Vec<f64>>>()
        .map(|vals| vals.into_iter().fold(f64::MIN, f64::max))
}

/// Rising MA: the latest MA-20 strictly exceeds the max of the previous 5.
pub fn rising_ma(bars: &[DailyBar]) -> bool {
    let Some(prev_max) = ma_20_prev_max_5(bars) else {
        return false;
    };
    match ma_20(bars).last().copied().flatten() {
        Some(current) => current > prev_max,
        None => false,
    }
}

/// Latest close strictly above the latest MA-20.
pub fn above_ma(bars: &[DailyBar]) -> bool {
    match (bars.last(), ma_20(bars).last().copied().flatten()) {
        (Some(last), Some(ma)) => last.close > ma,
        _ => false,
    }
}

/// Signed distance of a price from a MA, as a fraction of the price.
pub fn dist_to_ma_pct(price: f64, ma: f64) -> f64 {
    if price > 0.0 {
        (price - ma) / price
    } else {
        0.0
    }
}

/// High minus low, per bar.
pub fn daily_range(bars: &[DailyBar]) -> Vec<f64> {
    bars.iter().map(|b| b.range()).collect()
}

/// Average daily range over the last 14 bars. `None` below 14 bars.
pub fn adr_14(bars: &[DailyBar]) -> Option<f64> {
    if bars.len() < 14 {
        return None;
    }
    let tail = &bars[bars.len() - 14..];
    Some(tail.iter().map(|b| b.range()).sum::<f64>() / 14.0)
}

/// ADR-14 as a percentage of the latest close. `None` below 14 bars
/// or on a non-positive close.
pub fn adr_pct(bars: &[DailyBar]) -> Option<f64> {
    let adr = adr_14(bars)?;
    let close = bars.last()?.close;
    if close > 0.0 {
        Some(adr / close * 100.0)
    } else {
        None
    }
}

/// Candle body of the latest bar as a fraction of its close.
pub fn body_pct(bars: &[DailyBar]) -> Option<f64> {
    bars.last().map(|b| b.body_pct())
}

/// Rolling 20-bar low of the lows, per bar. `None` until the window fills.
pub fn rolling_low_20(bars: &[DailyBar]) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if bars.len() < 20 {
        return out;
    }
    for i in 19..bars.len() {
        out[i] = bars[i - 19..=i].iter().map(|b| b.low).reduce(f64::min);
    }
    out
}

/// Distance of the latest close from the rolling 20-bar low, as a fraction
/// of that low.
pub fn distance_from_low(bars: &[DailyBar]) -> Option<f64> {
    let low = rolling_low_20(bars).last().copied().flatten()?;
    let close = bars.last()?.close;
    if low > 0.0 {
        Some((close - low) / low)
    } else {
        None
    }
}

/// Median volume over the last `window` bars. `None` when fewer bars exist.
/// Even-length windows take the mean of the two middle values.
pub fn median_volume(bars: &[DailyBar], window: usize) -> Option<f64> {
    if window == 0 || bars.len() < window {
        return None;
    }
    let mut vols: Vec<u64> = bars[bars.len() - window..]
        .iter()
        .map(|b| b.volume)
        .collect();
    vols.sort_unstable();
    let mid = vols.len() / 2;
    if vols.len() % 2 == 1 {
        Some(vols[mid] as f64)
    } else {
        Some((vols[mid - 1] + vols[mid]) as f64 / 2.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(closes: &[f64]) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| DailyBar {
                date: start + chrono::Duration::days(i as i64),
                open: c,
                high: c + 2.0,
                low: c - 2.0,
                close: c,
                volume: 1_000_000 + i as u64,
            })
            .collect()
    }

    #[test]
    fn test_sma_window_alignment() {
        let bars = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let ma = sma(&bars, 3);
        assert_eq!(ma[0], None);
        assert_eq!(ma[1], None);
        assert!((ma[2].unwrap() - 2.0).abs() < 1e-9);
        assert!((ma[4].unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_rising_ma_strict() {
        // 25 equal closes: flat MA, prev max == current, must NOT be rising
        let flat = series(&vec![100.0; 25]);
        assert!(!rising_ma(&flat));

        // climbing closes: MA rises every bar
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let climbing = series(&closes);
        assert!(rising_ma(&climbing));
        assert!(above_ma(&climbing));

        // too few bars
        assert!(!rising_ma(&series(&vec![100.0; 24])));
    }

    #[test]
    fn test_adr_and_pct() {
        // every bar has range 4.0
        let bars = series(&vec![100.0; 20]);
        assert!((adr_14(&bars).unwrap() - 4.0).abs() < 1e-9);
        assert!((adr_pct(&bars).unwrap() - 4.0).abs() < 1e-9);
        assert!(adr_14(&series(&vec![100.0; 13])).is_none());
    }

    #[test]
    fn test_rolling_low_and_distance() {
        let closes: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        let bars = series(&closes);
        let lows = rolling_low_20(&bars);
        assert_eq!(lows[18], None);
        // last window covers closes 105..=124, lows -2
        assert!((lows.last().unwrap().unwrap() - 103.0).abs() < 1e-9);

        let dist = distance_from_low(&bars).unwrap();
        assert!((dist - (124.0 - 103.0) / 103.0).abs() < 1e-9);
    }

    #[test]
    fn test_median_volume() {
        let mut bars = series(&vec![100.0; 5]);
        for (i, v) in [10u64, 50, 20, 40, 30].iter().enumerate() {
            bars[i].volume = *v;
        }
        assert!((median_volume(&bars, 5).unwrap() - 30.0).abs() < 1e-9);
        assert!((median_volume(&bars[..4].to_vec(), 4).unwrap() - 30.0).abs() < 1e-9);
        assert!(median_volume(&bars, 6).is_none());
    }

    #[test]
    fn test_dist_to_ma_pct() {
        assert!((dist_to_ma_pct(105.0, 100.0) - 5.0 / 105.0).abs() < 1e-9);
        assert!((dist_to_ma_pct(95.0, 100.0) + 5.0 / 95.0).abs() < 1e-9);
        assert_eq!(dist_to_ma_pct(0.0, 100.0), 0.0);
        // a close sitting 5 points above a MA of 100 measures under the
        // 0.05 gate once the close is the denominator
        assert!(dist_to_ma_pct(105.0, 100.0) < 0.05);
    }
}
