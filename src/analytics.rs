//! Analytics Engine
//!
//! On-demand pair-trading statistics over two aligned bar series: hedge
//! ratio regression (OLS / Huber / Theil-Sen), spread construction, rolling
//! z-score and correlation, and an augmented Dickey-Fuller stationarity
//! test with AIC lag selection.
//!
//! Numeric policy: insufficient data is never an error. Under-window
//! rolling positions, degenerate regressions and too-short ADF inputs all
//! degrade to defined zero/default values so callers can distinguish
//! "insufficient" from "computed" without an error channel.

use crate::models::{AdfResult, Bar, Config, PairSnapshot, Timeframe};
use chrono::Utc;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

/// Hedge ratio estimator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegressionMethod {
    #[default]
    Ols,
    Huber,
    TheilSen,
}

impl RegressionMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ols" => Some(Self::Ols),
            "huber" => Some(Self::Huber),
            "theil_sen" | "theilsen" => Some(Self::TheilSen),
            _ => None,
        }
    }
}

/// Point-in-time price observation: (timestamp_ms, value).
pub type SeriesPoint = (i64, f64);

pub struct AnalyticsEngine {
    zscore_window: usize,
    correlation_window: usize,
    adf_significance: f64,
}

impl AnalyticsEngine {
    pub fn new(zscore_window: usize, correlation_window: usize, adf_significance: f64) -> Self {
        Self {
            zscore_window,
            correlation_window,
            adf_significance,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.zscore_window,
            config.correlation_window,
            config.adf_significance,
        )
    }

    /// Compute the full pair snapshot. Returns `None` only when either
    /// input series is empty; every other degenerate case yields defined
    /// zero/default sub-results.
    pub fn compute_pair_analytics(
        &self,
        symbol_a: &str,
        symbol_b: &str,
        timeframe: Timeframe,
        series_a: &[SeriesPoint],
        series_b: &[SeriesPoint],
        window: Option<usize>,
        method: RegressionMethod,
    ) -> Option<PairSnapshot> {
        if series_a.is_empty() || series_b.is_empty() {
            return None;
        }

        let z_window = window.unwrap_or(self.zscore_window).max(1);
        let corr_window = window.unwrap_or(self.correlation_window).max(1);

        let (ts, a, b) = align_series(series_a, series_b);

        let (hedge_ratio, r_squared, intercept) = hedge_ratio(&a, &b, method);

        let spread_vals: Vec<f64> = a
            .iter()
            .zip(b.iter())
            .map(|(&ya, &yb)| ya - hedge_ratio * yb)
            .collect();

        let z_vals = rolling_zscore(&spread_vals, z_window);
        let corr_vals = rolling_correlation(&a, &b, corr_window);
        let adf = adf_test(&spread_vals, self.adf_significance);

        let (spread_mean, spread_std, spread_current) = if spread_vals.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let mean = spread_vals.iter().copied().mean();
            let std = if spread_vals.len() > 1 {
                spread_vals.iter().copied().std_dev()
            } else {
                0.0
            };
            (mean, std, *spread_vals.last().unwrap_or(&0.0))
        };

        let zip_ts = |vals: Vec<f64>| -> Vec<SeriesPoint> {
            ts.iter().copied().zip(vals).collect()
        };

        debug!(
            pair = %format!("{}_{}", symbol_a, symbol_b),
            aligned = ts.len(),
            hedge_ratio,
            r_squared,
            "Pair analytics computed"
        );

        Some(PairSnapshot {
            symbol_pair: format!("{}_{}", symbol_a, symbol_b),
            timeframe,
            computed_at_ms: Utc::now().timestamp_millis(),
            hedge_ratio,
            r_squared,
            intercept,
            spread: zip_ts(spread_vals),
            z_score: zip_ts(z_vals),
            correlation: zip_ts(corr_vals),
            adf,
            spread_mean,
            spread_std,
            spread_current,
        })
    }
}

/// Extract (timestamp, close) points from a bar series.
pub fn close_series(bars: &[Bar]) -> Vec<SeriesPoint> {
    bars.iter().map(|b| (b.bucket_ts_ms, b.close)).collect()
}

/// Inner-join two timestamp-sorted series on common timestamps.
pub fn align_series(
    a: &[SeriesPoint],
    b: &[SeriesPoint],
) -> (Vec<i64>, Vec<f64>, Vec<f64>) {
    let mut ts = Vec::new();
    let mut ya = Vec::new();
    let mut yb = Vec::new();

    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                ts.push(a[i].0);
                ya.push(a[i].1);
                yb.push(b[j].1);
                i += 1;
                j += 1;
            }
        }
    }

    (ts, ya, yb)
}

// =============================================================================
// HEDGE RATIO REGRESSION
// =============================================================================

/// Regress y on x with the selected estimator.
/// Returns (hedge_ratio, r_squared, intercept); fewer than 2 aligned points
/// or a degenerate regressor yields (0, 0, 0).
pub fn hedge_ratio(y: &[f64], x: &[f64], method: RegressionMethod) -> (f64, f64, f64) {
    if y.len() < 2 || x.len() < 2 || y.len() != x.len() {
        return (0.0, 0.0, 0.0);
    }

    let fit = match method {
        RegressionMethod::Ols => ols(y, x),
        RegressionMethod::Huber => huber(y, x),
        RegressionMethod::TheilSen => theil_sen(y, x),
    };

    let Some((slope, intercept)) = fit else {
        warn!(?method, "Hedge ratio regression degenerate, returning zeros");
        return (0.0, 0.0, 0.0);
    };

    let r2 = r_squared(y, x, slope, intercept);
    (slope, r2, intercept)
}

fn r_squared(y: &[f64], x: &[f64], slope: f64, intercept: f64) -> f64 {
    let mean_y = y.iter().sum::<f64>() / y.len() as f64;
    let ss_res: f64 = y
        .iter()
        .zip(x.iter())
        .map(|(&yi, &xi)| {
            let r = yi - (slope * xi + intercept);
            r * r
        })
        .sum();
    let ss_tot: f64 = y.iter().map(|&yi| (yi - mean_y) * (yi - mean_y)).sum();
    if ss_tot == 0.0 {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    }
}

fn ols(y: &[f64], x: &[f64]) -> Option<(f64, f64)> {
    weighted_ols(y, x, None)
}

fn weighted_ols(y: &[f64], x: &[f64], w: Option<&[f64]>) -> Option<(f64, f64)> {
    let n = y.len();
    let weight = |i: usize| w.map(|w| w[i]).unwrap_or(1.0);

    let sw: f64 = (0..n).map(weight).sum();
    if sw <= 0.0 {
        return None;
    }
    let mx: f64 = (0..n).map(|i| weight(i) * x[i]).sum::<f64>() / sw;
    let my: f64 = (0..n).map(|i| weight(i) * y[i]).sum::<f64>() / sw;

    let sxx: f64 = (0..n).map(|i| weight(i) * (x[i] - mx) * (x[i] - mx)).sum();
    let sxy: f64 = (0..n).map(|i| weight(i) * (x[i] - mx) * (y[i] - my)).sum();

    if sxx.abs() < 1e-12 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    if slope.is_finite() && intercept.is_finite() {
        Some((slope, intercept))
    } else {
        None
    }
}

/// Huber robust regression via iteratively reweighted least squares.
fn huber(y: &[f64], x: &[f64]) -> Option<(f64, f64)> {
    const TUNING: f64 = 1.345;
    const MAX_ITER: usize = 50;
    const TOL: f64 = 1e-8;

    let (mut slope, mut intercept) = ols(y, x)?;

    for _ in 0..MAX_ITER {
        let residuals: Vec<f64> = y
            .iter()
            .zip(x.iter())
            .map(|(&yi, &xi)| yi - (slope * xi + intercept))
            .collect();

        // MAD-based scale estimate.
        let mut abs_res: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
        let scale = median_of(&mut abs_res) / 0.6745;
        if scale < 1e-12 {
            break;
        }

        let cutoff = TUNING * scale;
        let weights: Vec<f64> = residuals
            .iter()
            .map(|r| {
                let a = r.abs();
                if a <= cutoff {
                    1.0
                } else {
                    cutoff / a
                }
            })
            .collect();

        let (next_slope, next_intercept) = weighted_ols(y, x, Some(&weights))?;
        let delta = (next_slope - slope).abs() + (next_intercept - intercept).abs();
        slope = next_slope;
        intercept = next_intercept;
        if delta < TOL {
            break;
        }
    }

    Some((slope, intercept))
}

/// Theil-Sen estimator: median of pairwise slopes.
fn theil_sen(y: &[f64], x: &[f64]) -> Option<(f64, f64)> {
    let n = y.len();
    let mut slopes = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[j] - x[i];
            if dx.abs() > 1e-12 {
                slopes.push((y[j] - y[i]) / dx);
            }
        }
    }
    if slopes.is_empty() {
        return None;
    }

    let slope = median_of(&mut slopes);
    let mut offsets: Vec<f64> = y
        .iter()
        .zip(x.iter())
        .map(|(&yi, &xi)| yi - slope * xi)
        .collect();
    let intercept = median_of(&mut offsets);
    Some((slope, intercept))
}

fn median_of(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

// =============================================================================
// ROLLING STATISTICS
// =============================================================================

/// Rolling z-score with sample std over a trailing window (current value
/// included). Positions with fewer than `window` observations, or with zero
/// rolling std, are 0 -- never NaN.
pub fn rolling_zscore(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if n < window {
        return vec![0.0; n];
    }

    let mut out = vec![0.0; n];
    for i in (window - 1)..n {
        let slice = &values[i + 1 - window..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
            / (window as f64 - 1.0).max(1.0);
        let std = var.sqrt();
        if std > 1e-12 {
            out[i] = (values[i] - mean) / std;
        }
    }
    out
}

/// Rolling Pearson correlation of two equal-length series; same zero-fill
/// policy as [`rolling_zscore`].
pub fn rolling_correlation(a: &[f64], b: &[f64], window: usize) -> Vec<f64> {
    let n = a.len().min(b.len());
    let mut out = vec![0.0; n];
    if n < window {
        return out;
    }

    for i in (window - 1)..n {
        let sa = &a[i + 1 - window..=i];
        let sb = &b[i + 1 - window..=i];
        let ma = sa.iter().sum::<f64>() / window as f64;
        let mb = sb.iter().sum::<f64>() / window as f64;

        let mut cov = 0.0;
        let mut va = 0.0;
        let mut vb = 0.0;
        for k in 0..window {
            let da = sa[k] - ma;
            let db = sb[k] - mb;
            cov += da * db;
            va += da * da;
            vb += db * db;
        }

        let denom = (va * vb).sqrt();
        if denom > 1e-12 {
            out[i] = cov / denom;
        }
    }
    out
}

// =============================================================================
// AUGMENTED DICKEY-FULLER TEST
// =============================================================================

/// ADF unit-root test with constant term and automatic lag order by AIC
/// (maxlag = 12*(n/100)^0.25). Series shorter than 10 observations
/// short-circuits to the skipped result; so does any solver failure.
pub fn adf_test(series: &[f64], significance: f64) -> AdfResult {
    if series.len() < 10 {
        return AdfResult::skipped();
    }

    match adf_regression(series) {
        Some((statistic, nobs)) => {
            let pvalue = mackinnon_pvalue(statistic);
            AdfResult {
                statistic,
                pvalue,
                critical_values: mackinnon_critical_values(nobs),
                is_stationary: pvalue < significance,
            }
        }
        None => {
            debug!("ADF regression degenerate, reporting non-stationary");
            AdfResult::skipped()
        }
    }
}

/// Returns (t-statistic of the lagged-level coefficient, regression nobs).
fn adf_regression(series: &[f64]) -> Option<(f64, usize)> {
    let n = series.len();
    let diff: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    // Schwert rule of thumb, bounded so the common AIC sample stays sane.
    let mut maxlag = (12.0 * (n as f64 / 100.0).powf(0.25)).floor() as usize;
    maxlag = maxlag.min(diff.len().saturating_sub(4) / 2);

    // Pick lag order on a common sample (rows starting at maxlag).
    let mut best: Option<(usize, f64)> = None;
    for lag in 0..=maxlag {
        let (_, _, ssr, nrows, ncols) = fit_adf(series, &diff, lag, maxlag)?;
        if nrows <= ncols {
            continue;
        }
        let aic = nrows as f64 * (ssr / nrows as f64).max(1e-300).ln() + 2.0 * ncols as f64;
        if best.map(|(_, b)| aic < b).unwrap_or(true) {
            best = Some((lag, aic));
        }
    }
    let (lag, _) = best?;

    // Refit with the chosen lag on its full usable sample.
    let (tstat, _, _, nrows, _) = fit_adf(series, &diff, lag, lag)?;
    Some((tstat, nrows))
}

/// OLS fit of dy_t = c + rho*y_{t-1} + sum phi_i dy_{t-i}, rows starting at
/// `start_lag`. Returns (t-stat of rho, rho, ssr, nrows, ncols).
fn fit_adf(
    series: &[f64],
    diff: &[f64],
    lag: usize,
    start_lag: usize,
) -> Option<(f64, f64, f64, usize, usize)> {
    let nrows = diff.len().checked_sub(start_lag)?;
    let ncols = lag + 2;
    if nrows <= ncols {
        return None;
    }

    let mut x = DMatrix::zeros(nrows, ncols);
    let mut y = DVector::zeros(nrows);
    for (row, t) in (start_lag..diff.len()).enumerate() {
        y[row] = diff[t];
        x[(row, 0)] = 1.0;
        x[(row, 1)] = series[t];
        for k in 1..=lag {
            x[(row, k + 1)] = diff[t - k];
        }
    }

    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;
    let xtx_inv = xtx.try_inverse()?;
    let beta = &xtx_inv * xty;

    let residuals = &y - &x * &beta;
    let ssr: f64 = residuals.iter().map(|r| r * r).sum();
    let dof = nrows - ncols;
    let sigma2 = ssr / dof as f64;
    let se = (sigma2 * xtx_inv[(1, 1)]).sqrt();
    if !se.is_finite() || se <= 0.0 {
        return None;
    }

    let tstat = beta[1] / se;
    if !tstat.is_finite() {
        return None;
    }
    Some((tstat, beta[1], ssr, nrows, ncols))
}

// MacKinnon (1994) response-surface p-value for the constant-only case.
const TAU_STAR_C: f64 = -1.61;
const TAU_MIN_C: f64 = -18.83;
const TAU_MAX_C: f64 = 2.74;
const TAU_C_SMALLP: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_C_LARGEP: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

fn mackinnon_pvalue(statistic: f64) -> f64 {
    if statistic > TAU_MAX_C {
        return 1.0;
    }
    if statistic < TAU_MIN_C {
        return 0.0;
    }

    let z = if statistic <= TAU_STAR_C {
        polyval(&TAU_C_SMALLP, statistic)
    } else {
        polyval(&TAU_C_LARGEP, statistic)
    };

    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(z),
        Err(_) => 1.0,
    }
}

// MacKinnon (2010) finite-sample critical value surface, constant case.
const CRIT_C: [(&str, [f64; 4]); 3] = [
    ("1%", [-3.43035, -6.5393, -16.786, -79.433]),
    ("5%", [-2.86154, -2.8903, -4.234, -40.040]),
    ("10%", [-2.56677, -1.5384, -2.809, 0.0]),
];

fn mackinnon_critical_values(nobs: usize) -> Vec<(String, f64)> {
    let n = nobs as f64;
    CRIT_C
        .iter()
        .map(|(label, b)| {
            let cv = b[0] + b[1] / n + b[2] / (n * n) + b[3] / (n * n * n);
            (label.to_string(), cv)
        })
        .collect()
}

/// Evaluate a polynomial with ascending-order coefficients.
fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs
        .iter()
        .rev()
        .fold(0.0, |acc, &c| acc * x + c)
}

// =============================================================================
// SINGLE-SERIES SUPPLEMENTS
// =============================================================================

/// Descriptive statistics over a close-price series.
#[derive(Debug, Clone, Default)]
pub struct BasicStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub current: f64,
    pub return_mean: f64,
    pub return_std: f64,
    /// Annualized log-return volatility (252 periods).
    pub volatility: f64,
}

pub fn basic_stats(closes: &[f64]) -> Option<BasicStats> {
    if closes.is_empty() {
        return None;
    }

    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();

    let (return_mean, return_std) = if returns.len() > 1 {
        (returns.iter().copied().mean(), returns.iter().copied().std_dev())
    } else {
        (0.0, 0.0)
    };

    Some(BasicStats {
        mean: closes.iter().copied().mean(),
        std: if closes.len() > 1 {
            closes.iter().copied().std_dev()
        } else {
            0.0
        },
        min: closes.iter().copied().fold(f64::INFINITY, f64::min),
        max: closes.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        current: *closes.last()?,
        return_mean,
        return_std,
        volatility: return_std * (252.0f64).sqrt(),
    })
}

/// Volume-based liquidity metrics over a bar series.
#[derive(Debug, Clone, Default)]
pub struct LiquidityMetrics {
    pub avg_volume: f64,
    pub volume_std: f64,
    pub total_volume: f64,
    pub avg_dollar_volume: f64,
    /// Linear trend slope of volume over the bar index.
    pub volume_trend: f64,
}

pub fn liquidity_metrics(bars: &[Bar]) -> Option<LiquidityMetrics> {
    if bars.is_empty() {
        return None;
    }

    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let dollar: Vec<f64> = bars.iter().map(|b| b.volume * b.close).collect();

    let volume_trend = if volumes.len() > 1 {
        let idx: Vec<f64> = (0..volumes.len()).map(|i| i as f64).collect();
        ols(&volumes, &idx).map(|(slope, _)| slope).unwrap_or(0.0)
    } else {
        0.0
    };

    Some(LiquidityMetrics {
        avg_volume: volumes.iter().copied().mean(),
        volume_std: if volumes.len() > 1 {
            volumes.iter().copied().std_dev()
        } else {
            0.0
        },
        total_volume: volumes.iter().sum(),
        avg_dollar_volume: dollar.iter().copied().mean(),
        volume_trend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn series(vals: &[f64]) -> Vec<SeriesPoint> {
        vals.iter()
            .enumerate()
            .map(|(i, &v)| (i as i64 * 1000, v))
            .collect()
    }

    #[test]
    fn regression_method_parse_accepts_known_names() {
        assert_eq!(RegressionMethod::parse("ols"), Some(RegressionMethod::Ols));
        assert_eq!(RegressionMethod::parse(" Huber "), Some(RegressionMethod::Huber));
        assert_eq!(RegressionMethod::parse("theil_sen"), Some(RegressionMethod::TheilSen));
        assert_eq!(RegressionMethod::parse("theilsen"), Some(RegressionMethod::TheilSen));
        assert_eq!(RegressionMethod::parse("lasso"), None);
    }

    #[test]
    fn ols_recovers_noise_free_line() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.0 * xi + 5.0).collect();

        let (slope, r2, intercept) = hedge_ratio(&y, &x, RegressionMethod::Ols);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 5.0).abs() < 1e-9);
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn huber_recovers_noise_free_line() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.0 * xi + 5.0).collect();

        let (slope, _, intercept) = hedge_ratio(&y, &x, RegressionMethod::Huber);
        assert!((slope - 2.0).abs() < 1e-6);
        assert!((intercept - 5.0).abs() < 1e-6);
    }

    #[test]
    fn theil_sen_shrugs_off_an_outlier() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|&xi| 2.0 * xi + 5.0).collect();
        y[25] = 1e6;

        let (slope, _, _) = hedge_ratio(&y, &x, RegressionMethod::TheilSen);
        assert!((slope - 2.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_regressions_return_zeros() {
        // Fewer than 2 points.
        assert_eq!(hedge_ratio(&[1.0], &[1.0], RegressionMethod::Ols), (0.0, 0.0, 0.0));
        // Constant regressor has no defined slope.
        let y = vec![1.0, 2.0, 3.0];
        let x = vec![5.0, 5.0, 5.0];
        assert_eq!(hedge_ratio(&y, &x, RegressionMethod::Ols), (0.0, 0.0, 0.0));
        assert_eq!(hedge_ratio(&y, &x, RegressionMethod::TheilSen), (0.0, 0.0, 0.0));
    }

    #[test]
    fn r_squared_zero_when_target_is_flat() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y = vec![3.0; 20];
        let (slope, r2, _) = hedge_ratio(&y, &x, RegressionMethod::Ols);
        assert!(slope.abs() < 1e-12);
        assert_eq!(r2, 0.0);
    }

    #[test]
    fn zscore_short_series_is_all_zero() {
        let vals = vec![1.0, 2.0, 3.0];
        assert_eq!(rolling_zscore(&vals, 5), vec![0.0; 3]);
    }

    #[test]
    fn zscore_flat_series_is_zero_not_nan() {
        let vals = vec![7.0; 40];
        let z = rolling_zscore(&vals, 10);
        assert!(z.iter().all(|v| *v == 0.0 && v.is_finite()));
    }

    #[test]
    fn zscore_under_window_prefix_is_zero() {
        let vals: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let z = rolling_zscore(&vals, 10);
        assert!(z[..9].iter().all(|v| *v == 0.0));
        assert!(z[9..].iter().all(|v| *v != 0.0));
    }

    #[test]
    fn correlation_under_window_is_zero() {
        let a: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let b = a.clone();
        assert_eq!(rolling_correlation(&a, &b, 10), vec![0.0; 5]);
    }

    #[test]
    fn correlation_of_identical_series_is_one() {
        let a: Vec<f64> = (0..30).map(|i| (i as f64).sin()).collect();
        let corr = rolling_correlation(&a, &a, 10);
        for v in &corr[9..] {
            assert!((v - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn spread_matches_identity_on_common_timestamps() {
        let engine = AnalyticsEngine::new(5, 5, 0.05);
        let a: Vec<SeriesPoint> = (0..30).map(|i| (i as i64 * 1000, 100.0 + i as f64)).collect();
        // b is missing every third timestamp.
        let b: Vec<SeriesPoint> = (0..30)
            .filter(|i| i % 3 != 0)
            .map(|i| (i as i64 * 1000, 50.0 + i as f64 * 0.5))
            .collect();

        let snap = engine
            .compute_pair_analytics("a", "b", Timeframe::S1, &a, &b, None, RegressionMethod::Ols)
            .unwrap();

        assert_eq!(snap.spread.len(), b.len());
        for (k, &(ts, s)) in snap.spread.iter().enumerate() {
            let (bts, bv) = b[k];
            assert_eq!(ts, bts);
            let av = a.iter().find(|&&(t, _)| t == ts).unwrap().1;
            assert!((s - (av - snap.hedge_ratio * bv)).abs() < 1e-9);
        }
    }

    #[test]
    fn empty_series_yields_none() {
        let engine = AnalyticsEngine::new(5, 5, 0.05);
        let a = series(&[1.0, 2.0]);
        assert!(engine
            .compute_pair_analytics("a", "b", Timeframe::S1, &a, &[], None, RegressionMethod::Ols)
            .is_none());
        assert!(engine
            .compute_pair_analytics("a", "b", Timeframe::S1, &[], &a, None, RegressionMethod::Ols)
            .is_none());
    }

    #[test]
    fn disjoint_timestamps_degrade_to_zero_snapshot() {
        let engine = AnalyticsEngine::new(5, 5, 0.05);
        let a: Vec<SeriesPoint> = vec![(0, 1.0), (1000, 2.0)];
        let b: Vec<SeriesPoint> = vec![(500, 1.0), (1500, 2.0)];

        let snap = engine
            .compute_pair_analytics("a", "b", Timeframe::S1, &a, &b, None, RegressionMethod::Ols)
            .unwrap();
        assert_eq!(snap.hedge_ratio, 0.0);
        assert_eq!(snap.r_squared, 0.0);
        assert!(snap.spread.is_empty());
        assert_eq!(snap.spread_current, 0.0);
        assert!(!snap.adf.is_stationary);
    }

    #[test]
    fn adf_short_series_short_circuits() {
        let result = adf_test(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.05);
        assert_eq!(result.statistic, 0.0);
        assert_eq!(result.pvalue, 1.0);
        assert!(result.critical_values.is_empty());
        assert!(!result.is_stationary);
    }

    #[test]
    fn adf_mean_reverting_series_is_stationary() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut x = 0.0f64;
        let series: Vec<f64> = (0..500)
            .map(|_| {
                x = 0.5 * x + rng.gen_range(-1.0..1.0);
                x
            })
            .collect();

        let result = adf_test(&series, 0.05);
        assert!(result.statistic < -3.5, "statistic = {}", result.statistic);
        assert!(result.is_stationary, "pvalue = {}", result.pvalue);
    }

    #[test]
    fn adf_random_walk_is_not_stationary() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut x = 0.0f64;
        let series: Vec<f64> = (0..500)
            .map(|_| {
                x += rng.gen_range(-1.0..1.0);
                x
            })
            .collect();

        let result = adf_test(&series, 0.05);
        assert!(!result.is_stationary, "pvalue = {}", result.pvalue);
    }

    #[test]
    fn mackinnon_pvalue_matches_five_percent_critical_point() {
        // The asymptotic 5% critical value maps to p close to 0.05.
        let p = mackinnon_pvalue(-2.86154);
        assert!((p - 0.05).abs() < 0.005, "p = {}", p);
        assert_eq!(mackinnon_pvalue(3.0), 1.0);
        assert_eq!(mackinnon_pvalue(-20.0), 0.0);
    }

    #[test]
    fn critical_values_are_ordered() {
        let cvs = mackinnon_critical_values(250);
        assert_eq!(cvs.len(), 3);
        assert!(cvs[0].1 < cvs[1].1 && cvs[1].1 < cvs[2].1);
        assert!((cvs[1].1 - (-2.87)).abs() < 0.02);
    }

    #[test]
    fn basic_stats_and_liquidity() {
        let closes = vec![10.0, 11.0, 12.0, 11.5];
        let stats = basic_stats(&closes).unwrap();
        assert_eq!(stats.current, 11.5);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 12.0);

        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                symbol: "x".into(),
                timeframe: Timeframe::S1,
                bucket_ts_ms: i as i64 * 1000,
                open: c,
                high: c,
                low: c,
                close: c,
                volume: (i + 1) as f64,
            })
            .collect();
        let liq = liquidity_metrics(&bars).unwrap();
        assert_eq!(liq.total_volume, 10.0);
        assert!(liq.volume_trend > 0.9 && liq.volume_trend < 1.1);
    }
}
