//! PostgreSQL-backed series store.
//!
//! Input is the long-format observation table (`datetime, variable_name,
//! value, source_file`); output is the result table, unique on
//! `(variable, ds)` so that re-writing a batch is a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, info};

use flowcast_core::config::DatabaseConfig;
use flowcast_core::{AnomalyResult, Observation, TimeRange};

use crate::error::StorageError;
use crate::series::SeriesStore;

/// Rows per INSERT statement (14 binds each, well under the 65535 limit).
const WRITE_CHUNK: usize = 1000;

#[derive(Debug, sqlx::FromRow)]
struct ObservationRow {
    datetime: DateTime<Utc>,
    variable_name: String,
    value: Option<f64>,
    source_file: Option<String>,
}

pub struct PgSeriesStore {
    pool: PgPool,
    input_table: String,
    output_table: String,
}

impl PgSeriesStore {
    /// Connect using the database section of the config.
    ///
    /// Table names are interpolated into SQL, so callers must have run
    /// `Config::validate` first.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StorageError::Unavailable("database url not configured".into()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect(url)
            .await?;
        info!(
            "Series store: postgres {} (input={}, output={})",
            config.redacted_url(),
            config.input_table,
            config.output_table
        );
        Ok(Self::from_pool(pool, &config.input_table, &config.output_table))
    }

    pub fn from_pool(pool: PgPool, input_table: &str, output_table: &str) -> Self {
        Self {
            pool,
            input_table: input_table.to_string(),
            output_table: output_table.to_string(),
        }
    }

    /// Create the input and result tables and their indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let input = &self.input_table;
        let output = &self.output_table;
        let input_idx = input.replace('.', "_");
        let output_idx = output.replace('.', "_");

        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {input} (
                    id BIGSERIAL PRIMARY KEY,
                    datetime TIMESTAMPTZ NOT NULL,
                    variable_name VARCHAR(100) NOT NULL,
                    value DOUBLE PRECISION,
                    source_file VARCHAR(255),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{input_idx}_variable_datetime ON {input} (variable_name, datetime)"),
            format!(
                "CREATE TABLE IF NOT EXISTS {output} (
                    id BIGSERIAL PRIMARY KEY,
                    ds TIMESTAMPTZ NOT NULL,
                    y DOUBLE PRECISION,
                    yhat DOUBLE PRECISION,
                    yhat_lower DOUBLE PRECISION,
                    yhat_upper DOUBLE PRECISION,
                    residual DOUBLE PRECISION,
                    outside_interval BOOLEAN NOT NULL,
                    high_residual BOOLEAN NOT NULL,
                    is_anomaly BOOLEAN NOT NULL,
                    anomaly_score DOUBLE PRECISION,
                    variable VARCHAR(100) NOT NULL,
                    prediction_error_pct DOUBLE PRECISION,
                    source_file VARCHAR(255),
                    processed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    UNIQUE (variable, ds)
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{output_idx}_ds ON {output} (ds)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{output_idx}_is_anomaly ON {output} (is_anomaly)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{output_idx}_anomaly_score ON {output} (anomaly_score)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{output_idx}_processed_at ON {output} (processed_at)"),
        ];

        for sql in &statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        debug!(input = %input, output = %output, "schema ensured");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SeriesStore for PgSeriesStore {
    async fn variables(&self) -> Result<Vec<String>, StorageError> {
        let sql = format!(
            "SELECT DISTINCT variable_name FROM {} ORDER BY variable_name",
            self.input_table
        );
        Ok(sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn fetch(
        &self,
        variable: &str,
        range: TimeRange,
    ) -> Result<Vec<Observation>, StorageError> {
        let sql = format!(
            "SELECT datetime, variable_name, value, source_file
             FROM {}
             WHERE variable_name = $1
               AND ($2::timestamptz IS NULL OR datetime > $2)
               AND ($3::timestamptz IS NULL OR datetime <= $3)
             ORDER BY datetime, id",
            self.input_table
        );
        let rows = sqlx::query_as::<_, ObservationRow>(&sql)
            .bind(variable)
            .bind(range.after)
            .bind(range.until)
            .fetch_all(&self.pool)
            .await?;

        let total = rows.len();
        let observations: Vec<Observation> = rows
            .into_iter()
            .filter_map(|r| {
                Some(Observation {
                    timestamp: r.datetime,
                    variable: r.variable_name,
                    value: r.value?,
                    source: r.source_file.unwrap_or_else(|| "unknown".to_string()),
                })
            })
            .collect();
        if observations.len() < total {
            debug!(
                variable,
                dropped = total - observations.len(),
                "skipped rows with NULL value"
            );
        }
        Ok(observations)
    }

    async fn write_results(&self, results: &[AnomalyResult]) -> Result<u64, StorageError> {
        if results.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for chunk in results.chunks(WRITE_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (ds, y, yhat, yhat_lower, yhat_upper, residual, \
                 outside_interval, high_residual, is_anomaly, anomaly_score, variable, \
                 prediction_error_pct, source_file, processed_at) ",
                self.output_table
            ));
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.timestamp)
                    .push_bind(r.value)
                    .push_bind(r.yhat)
                    .push_bind(r.yhat_lower)
                    .push_bind(r.yhat_upper)
                    .push_bind(r.residual)
                    .push_bind(r.outside_interval)
                    .push_bind(r.high_residual)
                    .push_bind(r.is_anomaly)
                    .push_bind(r.anomaly_score)
                    .push_bind(r.variable.clone())
                    .push_bind(r.prediction_error_pct)
                    .push_bind(r.source.clone())
                    .push_bind(r.processed_at);
            });
            qb.push(" ON CONFLICT (variable, ds) DO NOTHING");
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        debug!(rows = results.len(), inserted, "results written");
        Ok(inserted)
    }

    async fn latest_result(
        &self,
        variable: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let sql = format!("SELECT MAX(ds) FROM {} WHERE variable = $1", self.output_table);
        Ok(sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&sql)
            .bind(variable)
            .fetch_one(&self.pool)
            .await?)
    }
}
