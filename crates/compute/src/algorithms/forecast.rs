//! Forecasting capability used by the trainer and detector.
//!
//! The pipeline only needs two things from a forecasting algorithm: fit a
//! model on a `(timestamp, value)` series, and produce a point forecast with
//! an uncertainty interval for arbitrary timestamps. Anything implementing
//! [`Forecaster`] can be dropped in without touching the pipeline.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Forecast for a single timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("need at least {need} points to fit, got {got}")]
    TooFewPoints { got: usize, need: usize },

    #[error("series contains a non-finite value at {0}")]
    NonFinite(DateTime<Utc>),

    #[error("least-squares system is singular")]
    Singular,

    #[error("model returned {got} forecast points for {expected} timestamps")]
    PointCount { expected: usize, got: usize },
}

/// A fitted, serializable forecasting model.
pub trait ForecastModel: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Forecast each timestamp. Output order matches input order.
    fn forecast(&self, timestamps: &[DateTime<Utc>]) -> Vec<ForecastPoint>;

    /// Standard deviation of the in-sample residuals, fixed at fit time.
    fn residual_std(&self) -> f64;
}

/// Fits [`ForecastModel`]s. Implementations hold only configuration, so one
/// instance can fit many variables concurrently.
pub trait Forecaster: Send + Sync + 'static {
    type Model: ForecastModel;

    /// Short algorithm identifier stored alongside the model.
    fn name(&self) -> &'static str;

    /// Fit a model on a series sorted by timestamp with unique timestamps.
    fn fit(&self, series: &[(DateTime<Utc>, f64)]) -> Result<Self::Model, ForecastError>;
}

/// Two-sided z multiplier for a central interval of the given width,
/// e.g. `0.95 -> 1.96`.
pub fn interval_z(width: f64) -> f64 {
    normal_quantile(0.5 + width / 2.0)
}

/// Inverse CDF of the standard normal distribution (Acklam's rational
/// approximation, relative error below 1.2e-9).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239e0,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838e0,
        -2.549732539343734e0,
        4.374664141464968e0,
        2.938163982698783e0,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996e0,
        3.754408661907416e0,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -normal_quantile(1.0 - p)
    }
}
