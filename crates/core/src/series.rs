use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single measurement of one variable, as read from the input table.
///
/// Identity is `(variable, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub variable: String,
    pub value: f64,
    /// Where the row came from (file name, feed id, ...).
    pub source: String,
}

impl Observation {
    pub fn new(
        variable: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            variable: variable.into(),
            value,
            source: source.into(),
        }
    }
}

/// One scored observation. Append-only once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
    /// `value - yhat`.
    pub residual: f64,
    pub outside_interval: bool,
    pub high_residual: bool,
    /// `outside_interval || high_residual`.
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub variable: String,
    pub prediction_error_pct: f64,
    pub source: String,
    pub processed_at: DateTime<Utc>,
}

impl AnomalyResult {
    /// Idempotency key used by result stores.
    pub fn key(&self) -> (&str, DateTime<Utc>) {
        (self.variable.as_str(), self.timestamp)
    }
}

/// Half-open time window: `after < t <= until`. Missing bounds are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub after: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    /// Everything strictly after `ts`.
    pub fn after(ts: DateTime<Utc>) -> Self {
        Self {
            after: Some(ts),
            until: None,
        }
    }

    pub fn between(after: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { after, until }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.after.map_or(true, |a| ts > a) && self.until.map_or(true, |u| ts <= u)
    }
}
