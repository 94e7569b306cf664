//! Indicator engine - pure functions over candle windows
//!
//! No I/O, no side effects. Takes an ordered (oldest → newest) candle window
//! and returns an indicator snapshot, or `None` when the window is too short.
//!
//! Indicators:
//! - EMA (SMA-seeded, multiplier `k = 2/(period+1)`)
//! - RSI (Wilder smoothing, seed = simple average of the first `period`
//!   deltas)
//! - Volume spike ratio (last 5 buckets vs the 30-bucket baseline before
//!   them)
//! - Bullish cross flag (short EMA crosses above the long EMA on the last
//!   bar)

use super::types::{Candle, IndicatorSnapshot};

/// Number of trailing buckets summed for the spike numerator
const SPIKE_RECENT_BUCKETS: usize = 5;
/// Number of baseline buckets averaged for the spike denominator
const SPIKE_BASELINE_BUCKETS: usize = 30;

/// Indicator engine parameters
///
/// Construction asserts `min_window >= ema_long + 2`: the cross check reads
/// the long EMA at the last two indices, and with a window right at the
/// minimum both values must already be defined.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorParams {
    pub ema_short: usize,
    pub ema_long: usize,
    pub rsi_period: usize,
    pub min_window: usize,
}

impl IndicatorParams {
    pub fn new(ema_short: usize, ema_long: usize, rsi_period: usize, min_window: usize) -> Self {
        assert!(ema_short >= 1 && ema_long > ema_short, "EMA periods must satisfy 1 <= short < long");
        assert!(rsi_period >= 2, "RSI period must be at least 2");
        assert!(
            min_window >= ema_long + 2,
            "min_window ({}) must be at least ema_long + 2 ({}) for the cross check",
            min_window,
            ema_long + 2
        );
        assert!(
            min_window >= SPIKE_RECENT_BUCKETS + SPIKE_BASELINE_BUCKETS,
            "min_window ({}) must cover the {} spike buckets",
            min_window,
            SPIKE_RECENT_BUCKETS + SPIKE_BASELINE_BUCKETS
        );
        Self { ema_short, ema_long, rsi_period, min_window }
    }
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self::new(9, 21, 14, 40)
    }
}

/// Exponential moving average over a price series.
///
/// Seeded with the SMA of the first `period` values, placed at index
/// `period - 1` of the input; the returned vector is the aligned tail
/// (`result[0]` corresponds to input index `period - 1`). Returns an empty
/// vector if the series is shorter than `period`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);

    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;

    let mut result = Vec::with_capacity(values.len() - period + 1);
    result.push(seed);

    for &value in &values[period..] {
        let prev = result[result.len() - 1];
        result.push(value * k + prev * (1.0 - k));
    }

    result
}

/// Relative Strength Index with Wilder smoothing.
///
/// Average gain/loss over the first `period` deltas seeded as a simple
/// average, then smoothed with `avg' = (avg * (period - 1) + new) / period`.
/// Returns `None` when there are fewer than `period + 1` closes. When the
/// average loss is zero the RSI is 100 by definition.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period].iter().filter(|&&d| d > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = deltas[..period].iter().filter(|&&d| d < 0.0).map(|d| -d).sum::<f64>()
        / period as f64;

    for &delta in &deltas[period..] {
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Volume spike ratio: sum of the last 5 bucket volumes over 5x the average
/// of the 30 buckets preceding them.
///
/// Returns 0.0 when the baseline average is zero (no baseline activity is
/// "no spike", not an error) or when the series is too short.
pub fn volume_spike(volumes: &[f64]) -> f64 {
    let needed = SPIKE_RECENT_BUCKETS + SPIKE_BASELINE_BUCKETS;
    if volumes.len() < needed {
        return 0.0;
    }

    let n = volumes.len();
    let recent: f64 = volumes[n - SPIKE_RECENT_BUCKETS..].iter().sum();
    let baseline = &volumes[n - needed..n - SPIKE_RECENT_BUCKETS];
    let baseline_avg: f64 = baseline.iter().sum::<f64>() / SPIKE_BASELINE_BUCKETS as f64;

    if baseline_avg == 0.0 {
        return 0.0;
    }

    recent / (baseline_avg * SPIKE_RECENT_BUCKETS as f64)
}

/// Compute an indicator snapshot from an ordered candle window.
///
/// `candles` must be ordered oldest → newest. Returns `None` when the window
/// holds fewer than `params.min_window` candles; that is the caller's cue to
/// wait for more data, not an error.
pub fn compute(candles: &[Candle], params: &IndicatorParams) -> Option<IndicatorSnapshot> {
    if candles.len() < params.min_window {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let ema_short_series = ema(&closes, params.ema_short);
    let ema_long_series = ema(&closes, params.ema_long);

    // min_window >= ema_long + 2 guarantees both series have >= 2 points
    let s_len = ema_short_series.len();
    let l_len = ema_long_series.len();
    if s_len < 2 || l_len < 2 {
        return None;
    }

    let ema_short_last = ema_short_series[s_len - 1];
    let ema_short_prev = ema_short_series[s_len - 2];
    let ema_long_last = ema_long_series[l_len - 1];
    let ema_long_prev = ema_long_series[l_len - 2];

    let bullish_cross = ema_short_prev <= ema_long_prev && ema_short_last > ema_long_last;

    let rsi_value = rsi(&closes, params.rsi_period)?;

    Some(IndicatorSnapshot {
        ema_short: ema_short_last,
        ema_long: ema_long_last,
        rsi: rsi_value,
        volume_spike: volume_spike(&volumes),
        bullish_cross,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles_from(closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .zip(volumes.iter())
            .enumerate()
            .map(|(i, (&close, &volume))| Candle {
                mint: "test_mint".to_string(),
                bucket_ts: 1_700_000_000 + (i as i64) * 60,
                open: close,
                high: close,
                low: close,
                close,
                volume,
            })
            .collect()
    }

    #[test]
    fn test_ema_constant_series_equals_constant() {
        // SMA seed of a constant series is the constant, and every
        // subsequent EMA step keeps it there
        let series = vec![2.5; 30];
        let result = ema(&series, 9);
        assert_eq!(result.len(), 30 - 9 + 1);
        for value in result {
            assert!((value - 2.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_ema_too_short_returns_empty() {
        assert!(ema(&[1.0, 2.0], 9).is_empty());
    }

    #[test]
    fn test_ema_seed_is_sma() {
        let series = vec![1.0, 2.0, 3.0, 4.0];
        let result = ema(&series, 3);
        // seed at index 2 = (1+2+3)/3
        assert!((result[0] - 2.0).abs() < 1e-12);
        // next: 4*0.5 + 2*0.5 = 3.0 (k = 2/4)
        assert!((result[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..30).map(|i| 1.0 + i as f64 * 0.01).collect();
        let value = rsi(&closes, 14).unwrap();
        assert_eq!(value, 100.0);
    }

    #[test]
    fn test_rsi_all_losses_approaches_0() {
        let closes: Vec<f64> = (0..30).map(|i| 10.0 - i as f64 * 0.01).collect();
        let value = rsi(&closes, 14).unwrap();
        assert!(value < 1e-9, "all-loss RSI should be ~0, got {}", value);
    }

    #[test]
    fn test_rsi_bounded() {
        // Noisy series stays within [0, 100]
        let closes: Vec<f64> = (0..60)
            .map(|i| 1.0 + ((i * 7919) % 13) as f64 * 0.003 - ((i * 104729) % 7) as f64 * 0.002)
            .collect();
        let value = rsi(&closes, 14).unwrap();
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_rsi_insufficient_data() {
        assert!(rsi(&[1.0; 14], 14).is_none());
    }

    #[test]
    fn test_volume_spike_flat_volume_is_1() {
        let volumes = vec![100.0; 40];
        let ratio = volume_spike(&volumes);
        assert!((ratio - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_volume_spike_4x() {
        let mut volumes = vec![100.0; 35];
        volumes.extend(vec![400.0; 5]);
        let ratio = volume_spike(&volumes);
        assert!((ratio - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_volume_spike_zero_baseline_is_0() {
        let mut volumes = vec![0.0; 35];
        volumes.extend(vec![500.0; 5]);
        assert_eq!(volume_spike(&volumes), 0.0);
    }

    #[test]
    fn test_compute_short_window_returns_none() {
        let closes = vec![1.0; 39];
        let volumes = vec![10.0; 39];
        let candles = candles_from(&closes, &volumes);
        assert!(compute(&candles, &IndicatorParams::default()).is_none());
    }

    #[test]
    fn test_compute_flat_series_no_cross() {
        let closes = vec![1.0; 40];
        let volumes = vec![10.0; 40];
        let candles = candles_from(&closes, &volumes);
        let snapshot = compute(&candles, &IndicatorParams::default()).unwrap();
        // Equal EMAs on both bars: prev <= but last is not strictly greater
        assert!(!snapshot.bullish_cross);
        assert!((snapshot.volume_spike - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_compute_detects_bullish_cross() {
        // Long decline pulls EMA9 below EMA21, then a sharp reversal on the
        // last bar pushes EMA9 back above it
        let mut closes: Vec<f64> = (0..39).map(|i| 2.0 - i as f64 * 0.02).collect();
        closes.push(3.5);
        let volumes = vec![10.0; 40];
        let candles = candles_from(&closes, &volumes);

        let snapshot = compute(&candles, &IndicatorParams::default()).unwrap();
        assert!(snapshot.bullish_cross, "expected cross, got {:?}", snapshot);
        assert!(snapshot.ema_short > snapshot.ema_long);
    }

    #[test]
    fn test_compute_exact_min_window_has_defined_emas() {
        // Window exactly at the minimum: cross comparison must still read
        // two defined points of the long EMA
        let closes: Vec<f64> = (0..40).map(|i| 1.0 + i as f64 * 0.001).collect();
        let volumes = vec![10.0; 40];
        let candles = candles_from(&closes, &volumes);
        assert!(compute(&candles, &IndicatorParams::default()).is_some());
    }
}
