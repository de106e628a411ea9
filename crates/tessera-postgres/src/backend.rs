//! Query execution.
//!
//! The engine only needs three fetch shapes, abstracted by [`Backend`] so
//! documents can be assembled against any row source. [`PgBackend`] runs
//! them on a sqlx pool with timing and slow query logging. Failures are
//! never retried.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool};
use tracing::{debug, instrument, warn};

use crate::db::Query;
use crate::types::row_to_values;
use crate::{Record, Result, SqlValue};

/// Asynchronous row source.
#[async_trait]
pub trait Backend: Send + Sync {
    /// First column of the first row, e.g. a count or `EXISTS`.
    async fn fetch_value(&self, query: &Query) -> Result<SqlValue>;

    async fn fetch_row(&self, query: &Query) -> Result<Option<Record>>;

    async fn fetch_rows(&self, query: &Query) -> Result<Vec<Record>>;
}

/// Configuration for query execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Threshold for slow query logging in milliseconds
    pub slow_query_threshold_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 1000, // 1 second
        }
    }
}

/// [`Backend`] over a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
    config: ExecutorConfig,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(pool: PgPool, config: ExecutorConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn arguments(query: &Query) -> Result<PgArguments> {
        let mut arguments = PgArguments::default();
        for param in &query.params {
            param.bind_to_arguments(&mut arguments)?;
        }
        Ok(arguments)
    }

    fn log_query_completion(&self, sql: &str, elapsed: Duration, rows: usize) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let sql_preview: String = sql.chars().take(100).collect();

        if elapsed_ms >= self.config.slow_query_threshold_ms {
            warn!(
                sql = %sql_preview,
                elapsed_ms = elapsed_ms,
                threshold_ms = self.config.slow_query_threshold_ms,
                rows = rows,
                "Slow query detected"
            );
        } else {
            debug!(
                sql = %sql_preview,
                elapsed_ms = elapsed_ms,
                rows = rows,
                "Query completed"
            );
        }
    }
}

#[async_trait]
impl Backend for PgBackend {
    #[instrument(skip(self, query), fields(sql_preview = %query.sql.chars().take(100).collect::<String>()))]
    async fn fetch_value(&self, query: &Query) -> Result<SqlValue> {
        let start = Instant::now();
        let row = sqlx::query_with(&query.sql, Self::arguments(query)?)
            .fetch_optional(&self.pool)
            .await?;
        self.log_query_completion(&query.sql, start.elapsed(), usize::from(row.is_some()));

        match row {
            Some(row) => Ok(row_to_values(&row)?
                .into_values()
                .next()
                .unwrap_or(SqlValue::Null)),
            None => Ok(SqlValue::Null),
        }
    }

    #[instrument(skip(self, query), fields(sql_preview = %query.sql.chars().take(100).collect::<String>()))]
    async fn fetch_row(&self, query: &Query) -> Result<Option<Record>> {
        let start = Instant::now();
        let row = sqlx::query_with(&query.sql, Self::arguments(query)?)
            .fetch_optional(&self.pool)
            .await?;
        self.log_query_completion(&query.sql, start.elapsed(), usize::from(row.is_some()));

        row.as_ref().map(Record::from_sqlx).transpose()
    }

    #[instrument(skip(self, query), fields(sql_preview = %query.sql.chars().take(100).collect::<String>()))]
    async fn fetch_rows(&self, query: &Query) -> Result<Vec<Record>> {
        let start = Instant::now();
        let rows = sqlx::query_with(&query.sql, Self::arguments(query)?)
            .fetch_all(&self.pool)
            .await?;
        self.log_query_completion(&query.sql, start.elapsed(), rows.len());

        rows.iter().map(Record::from_sqlx).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.slow_query_threshold_ms, 1000);
    }

    #[test]
    fn test_arguments_bind_every_param() {
        let query = Query {
            sql: "SELECT $1, $2, $3".to_string(),
            params: vec![SqlValue::BigInt(1), SqlValue::Null, SqlValue::String("x".to_string())],
        };
        assert!(PgBackend::arguments(&query).is_ok());
    }
}
