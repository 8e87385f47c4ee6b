//! Piecewise-linear trend plus Fourier seasonality.
//!
//! The trend is a line whose slope may change at evenly spaced changepoints
//! in the first 80% of the history. Slope changes are ridge-penalised by
//! `1e-4 / changepoint_prior_scale^2` on the scaled series, so a small prior
//! scale gives a stiff trend. Each enabled seasonal component adds `order` sine/cosine pairs of
//! its period. Additive mode fits trend and seasonality jointly;
//! multiplicative mode fits the trend first and then the seasonal factor on
//! `y / trend - 1`.
//!
//! The forecast interval is `yhat +/- z(interval_width) * residual_std`,
//! with `residual_std` taken from the in-sample fit.

use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use flowcast_core::config::{AnomalyConfig, SeasonalityMode};

use super::forecast::{interval_z, ForecastError, ForecastModel, ForecastPoint, Forecaster};
use super::linalg::ridge_solve;

const MS_PER_DAY: f64 = 86_400_000.0;
const MAX_CHANGEPOINTS: usize = 25;
/// Changepoints are placed in this leading fraction of the history.
const CHANGEPOINT_RANGE: f64 = 0.8;
const SEASONALITY_PRIOR_SCALE: f64 = 10.0;
/// Base ridge weight; divided by the squared prior scale of each block.
const PENALTY_BASE: f64 = 1e-4;
/// Keeps the unpenalised intercept/slope system well conditioned.
const PENALTY_FLOOR: f64 = 1e-9;

/// One Fourier seasonal component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seasonality {
    pub name: String,
    pub period_days: f64,
    pub order: usize,
}

impl Seasonality {
    fn new(name: &str, period_days: f64, order: usize) -> Self {
        Self {
            name: name.to_string(),
            period_days,
            order,
        }
    }

    fn push_features(&self, abs_days: f64, out: &mut Vec<f64>) {
        for k in 1..=self.order {
            let angle = 2.0 * PI * k as f64 * abs_days / self.period_days;
            out.push(angle.sin());
            out.push(angle.cos());
        }
    }
}

/// Fits [`SeasonalModel`]s with the configured hyperparameters.
#[derive(Debug, Clone)]
pub struct SeasonalForecaster {
    interval_width: f64,
    changepoint_prior_scale: f64,
    mode: SeasonalityMode,
    candidates: Vec<Seasonality>,
}

impl SeasonalForecaster {
    pub fn new(config: &AnomalyConfig) -> Self {
        let mut candidates = Vec::new();
        if config.daily_seasonality {
            candidates.push(Seasonality::new("daily", 1.0, 4));
        }
        if config.weekly_seasonality {
            candidates.push(Seasonality::new("weekly", 7.0, 3));
        }
        if config.yearly_seasonality {
            candidates.push(Seasonality::new("yearly", 365.25, 10));
        }
        Self {
            interval_width: config.interval_width,
            changepoint_prior_scale: config.changepoint_prior_scale,
            mode: config.seasonality_mode,
            candidates,
        }
    }
}

impl Forecaster for SeasonalForecaster {
    type Model = SeasonalModel;

    fn name(&self) -> &'static str {
        "seasonal-trend"
    }

    fn fit(&self, series: &[(DateTime<Utc>, f64)]) -> Result<SeasonalModel, ForecastError> {
        if series.len() < 2 {
            return Err(ForecastError::TooFewPoints {
                got: series.len(),
                need: 2,
            });
        }
        if let Some((ts, _)) = series.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ForecastError::NonFinite(*ts));
        }

        let n = series.len();
        let t0 = series[0].0;
        let span_days = days_between(t0, series[n - 1].0).max(f64::EPSILON);
        let y_scale = series
            .iter()
            .map(|(_, v)| v.abs())
            .fold(0.0, f64::max);
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };
        let ys: Vec<f64> = series.iter().map(|(_, v)| v / y_scale).collect();

        // A component needs at least one full period of history to be identifiable.
        let seasonalities: Vec<Seasonality> = self
            .candidates
            .iter()
            .filter(|s| span_days >= s.period_days)
            .cloned()
            .collect();

        let n_cp = MAX_CHANGEPOINTS.min(((n - 1) as f64 * CHANGEPOINT_RANGE) as usize);
        let changepoints: Vec<f64> = (1..=n_cp)
            .map(|j| CHANGEPOINT_RANGE * j as f64 / n_cp as f64)
            .collect();

        let mut model = SeasonalModel {
            mode: self.mode,
            t0,
            span_days,
            y_scale,
            changepoints,
            trend_coef: Vec::new(),
            seasonalities,
            seasonal_coef: Vec::new(),
            interval_z: interval_z(self.interval_width),
            residual_std: 0.0,
            training_points: n,
        };

        let trend_rows: Vec<Vec<f64>> = series
            .iter()
            .map(|(ts, _)| model.trend_features(*ts))
            .collect();
        let seasonal_rows: Vec<Vec<f64>> = series
            .iter()
            .map(|(ts, _)| model.seasonal_features(*ts))
            .collect();

        let cp_penalty = PENALTY_BASE / self.changepoint_prior_scale.powi(2);
        let s_penalty = PENALTY_BASE / SEASONALITY_PRIOR_SCALE.powi(2);
        let n_trend = 2 + n_cp;
        let n_seasonal = seasonal_rows.first().map_or(0, |r| r.len());

        let mut trend_penalty = vec![PENALTY_FLOOR; 2];
        trend_penalty.extend(std::iter::repeat(cp_penalty).take(n_cp));

        match self.mode {
            SeasonalityMode::Additive => {
                let rows: Vec<Vec<f64>> = trend_rows
                    .iter()
                    .zip(&seasonal_rows)
                    .map(|(t, s)| t.iter().chain(s).copied().collect())
                    .collect();
                let mut penalty = trend_penalty;
                penalty.extend(std::iter::repeat(s_penalty).take(n_seasonal));
                let beta = ridge_solve(&rows, &ys, &penalty)?;
                model.trend_coef = beta[..n_trend].to_vec();
                model.seasonal_coef = beta[n_trend..].to_vec();
            }
            SeasonalityMode::Multiplicative => {
                model.trend_coef = ridge_solve(&trend_rows, &ys, &trend_penalty)?;
                if n_seasonal > 0 {
                    let (rows, targets): (Vec<Vec<f64>>, Vec<f64>) = trend_rows
                        .iter()
                        .zip(&seasonal_rows)
                        .zip(&ys)
                        .filter_map(|((t, s), y)| {
                            let trend = dot(&model.trend_coef, t);
                            (trend.abs() > 1e-9).then(|| (s.clone(), y / trend - 1.0))
                        })
                        .unzip();
                    model.seasonal_coef = if rows.is_empty() {
                        vec![0.0; n_seasonal]
                    } else {
                        ridge_solve(&rows, &targets, &vec![s_penalty; n_seasonal])?
                    };
                }
            }
        }

        let residuals: Vec<f64> = series
            .iter()
            .map(|(ts, v)| v - model.point(*ts))
            .collect();
        model.residual_std = sample_std(&residuals);

        debug!(
            points = n,
            changepoints = n_cp,
            seasonalities = model.seasonalities.len(),
            residual_std = model.residual_std,
            "seasonal model fitted"
        );
        Ok(model)
    }
}

/// A fitted [`SeasonalForecaster`] model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalModel {
    mode: SeasonalityMode,
    /// First training timestamp; trend time is measured from here.
    t0: DateTime<Utc>,
    span_days: f64,
    y_scale: f64,
    /// Changepoint locations in normalised trend time.
    changepoints: Vec<f64>,
    /// `[intercept, slope, delta_1 .. delta_m]`, in scaled units.
    trend_coef: Vec<f64>,
    seasonalities: Vec<Seasonality>,
    seasonal_coef: Vec<f64>,
    interval_z: f64,
    residual_std: f64,
    training_points: usize,
}

impl SeasonalModel {
    pub fn training_points(&self) -> usize {
        self.training_points
    }

    pub fn seasonalities(&self) -> &[Seasonality] {
        &self.seasonalities
    }

    fn trend_features(&self, ts: DateTime<Utc>) -> Vec<f64> {
        let t = days_between(self.t0, ts) / self.span_days;
        let mut row = Vec::with_capacity(2 + self.changepoints.len());
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));
        row
    }

    fn seasonal_features(&self, ts: DateTime<Utc>) -> Vec<f64> {
        let abs_days = ts.timestamp_millis() as f64 / MS_PER_DAY;
        let mut row = Vec::new();
        for s in &self.seasonalities {
            s.push_features(abs_days, &mut row);
        }
        row
    }

    /// Point forecast in original units.
    fn point(&self, ts: DateTime<Utc>) -> f64 {
        let trend = dot(&self.trend_coef, &self.trend_features(ts));
        let seasonal = dot(&self.seasonal_coef, &self.seasonal_features(ts));
        let scaled = match self.mode {
            SeasonalityMode::Additive => trend + seasonal,
            SeasonalityMode::Multiplicative => trend * (1.0 + seasonal),
        };
        scaled * self.y_scale
    }
}

impl ForecastModel for SeasonalModel {
    fn forecast(&self, timestamps: &[DateTime<Utc>]) -> Vec<ForecastPoint> {
        let half_width = self.interval_z * self.residual_std;
        timestamps
            .iter()
            .map(|&timestamp| {
                let yhat = self.point(timestamp);
                ForecastPoint {
                    timestamp,
                    yhat,
                    yhat_lower: yhat - half_width,
                    yhat_upper: yhat + half_width,
                }
            })
            .collect()
    }

    fn residual_std(&self) -> f64 {
        self.residual_std
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MS_PER_DAY
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn hourly<F: Fn(f64) -> f64>(hours: i64, f: F) -> Vec<(DateTime<Utc>, f64)> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..hours)
            .map(|h| {
                let ts = start + Duration::hours(h);
                (ts, f(h as f64 / 24.0))
            })
            .collect()
    }

    fn config(mode: SeasonalityMode) -> AnomalyConfig {
        AnomalyConfig {
            seasonality_mode: mode,
            daily_seasonality: true,
            weekly_seasonality: false,
            yearly_seasonality: false,
            ..AnomalyConfig::default()
        }
    }

    #[test]
    fn additive_fit_tracks_trend_and_daily_cycle() {
        let truth = |d: f64| 10.0 + 0.1 * d + 2.0 * (2.0 * PI * d).sin();
        let series = hourly(24 * 14, truth);
        let model = SeasonalForecaster::new(&config(SeasonalityMode::Additive))
            .fit(&series)
            .unwrap();

        assert!(model.residual_std() < 0.05, "residual_std = {}", model.residual_std());

        // One day past the end of training.
        let last = series.last().unwrap().0;
        let ts = last + Duration::hours(24);
        let d = days_between(series[0].0, ts);
        let point = model.forecast(&[ts])[0];
        assert!((point.yhat - truth(d)).abs() < 0.2, "yhat {} vs {}", point.yhat, truth(d));
        assert!(point.yhat_lower < point.yhat && point.yhat < point.yhat_upper);
    }

    #[test]
    fn multiplicative_fit_scales_seasonality_with_trend() {
        let truth = |d: f64| (20.0 + 1.0 * d) * (1.0 + 0.1 * (2.0 * PI * d).cos());
        let series = hourly(24 * 10, truth);
        let model = SeasonalForecaster::new(&config(SeasonalityMode::Multiplicative))
            .fit(&series)
            .unwrap();

        for (ts, y) in series.iter().step_by(17) {
            let yhat = model.forecast(&[*ts])[0].yhat;
            assert!((yhat - y).abs() < 0.5, "yhat {} vs {}", yhat, y);
        }
    }

    #[test]
    fn interval_width_follows_config() {
        let series = hourly(48, |d| 5.0 + ((d * 24.0) as i64 % 3) as f64);
        let narrow = SeasonalForecaster::new(&AnomalyConfig {
            interval_width: 0.5,
            ..config(SeasonalityMode::Additive)
        })
        .fit(&series)
        .unwrap();
        let wide = SeasonalForecaster::new(&AnomalyConfig {
            interval_width: 0.99,
            ..config(SeasonalityMode::Additive)
        })
        .fit(&series)
        .unwrap();

        let ts = series[10].0;
        let n = narrow.forecast(&[ts])[0];
        let w = wide.forecast(&[ts])[0];
        assert!(w.yhat_upper - w.yhat_lower > n.yhat_upper - n.yhat_lower);
    }

    #[test]
    fn short_history_skips_long_seasonalities() {
        let series = hourly(12, |d| d);
        let model = SeasonalForecaster::new(&AnomalyConfig {
            weekly_seasonality: true,
            ..config(SeasonalityMode::Additive)
        })
        .fit(&series)
        .unwrap();
        assert!(model.seasonalities().is_empty());
    }

    #[test]
    fn constant_series_has_zero_spread() {
        let series = hourly(30, |_| 7.5);
        let model = SeasonalForecaster::new(&config(SeasonalityMode::Additive))
            .fit(&series)
            .unwrap();
        assert!(model.residual_std() < 1e-6);
        let p = model.forecast(&[series[3].0])[0];
        assert!((p.yhat - 7.5).abs() < 1e-6);
    }

    #[test]
    fn fitting_is_deterministic() {
        let series = hourly(24 * 3, |d| (d * 3.0).sin() + d);
        let forecaster = SeasonalForecaster::new(&config(SeasonalityMode::Additive));
        let a = forecaster.fit(&series).unwrap();
        let b = forecaster.fit(&series).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut series = hourly(5, |d| d);
        series[2].1 = f64::NAN;
        let err = SeasonalForecaster::new(&config(SeasonalityMode::Additive))
            .fit(&series)
            .unwrap_err();
        assert!(matches!(err, ForecastError::NonFinite(_)));
    }

    #[test]
    fn single_point_is_too_few() {
        let series = hourly(1, |d| d);
        let err = SeasonalForecaster::new(&config(SeasonalityMode::Additive))
            .fit(&series)
            .unwrap_err();
        assert!(matches!(err, ForecastError::TooFewPoints { got: 1, need: 2 }));
    }

    #[test]
    fn model_survives_json_roundtrip() {
        let series = hourly(24 * 2, |d| 3.0 + d);
        let model = SeasonalForecaster::new(&config(SeasonalityMode::Additive))
            .fit(&series)
            .unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: SeasonalModel = serde_json::from_str(&json).unwrap();
        let a = back.forecast(&[series[5].0])[0];
        let b = model.forecast(&[series[5].0])[0];
        assert!((a.yhat - b.yhat).abs() < 1e-9);
        assert!((a.yhat_upper - b.yhat_upper).abs() < 1e-9);
        assert_eq!(back.training_points(), 48);
    }
}
