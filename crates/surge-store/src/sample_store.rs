use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row, SqlitePool};

use surge_core::{CoreError, CoreResult, RequestSample, SampleStore};

/// SQLite-backed append-only store for request samples.
pub struct SqliteSampleStore {
    pool: SqlitePool,
}

impl SqliteSampleStore {
    /// Creates a new store backed by the provided pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: SqliteRow) -> CoreResult<RequestSample> {
        let completed_at: String = row.get("completed_at");
        let completed_at = DateTime::parse_from_rfc3339(&completed_at)
            .map_err(|err| CoreError::internal(format!("invalid completed_at: {err}")))?
            .with_timezone(&Utc);

        let status_code: i64 = row.get("status_code");

        Ok(RequestSample {
            run_key: row.get("run_key"),
            completed_at,
            latency_ms: row.get("latency_ms"),
            success: row.get("success"),
            status_code: u16::try_from(status_code)
                .map_err(|_| CoreError::internal("status_code stored out of range"))?,
        })
    }
}

#[async_trait::async_trait]
impl SampleStore for SqliteSampleStore {
    async fn append(&self, sample: &RequestSample) -> CoreResult<()> {
        query(
            r"
            INSERT INTO samples (run_key, completed_at, latency_ms, success, status_code)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(sample.run_key)
        .bind(
            sample
                .completed_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        )
        .bind(sample.latency_ms)
        .bind(sample.success)
        .bind(i64::from(sample.status_code))
        .execute(&self.pool)
        .await
        .map_err(|err| CoreError::Storage(err.to_string()))?;

        Ok(())
    }

    async fn for_run(&self, run_key: i64) -> CoreResult<Vec<RequestSample>> {
        // sample_id breaks completion-time ties deterministically in
        // insertion order.
        let rows = query(
            r"
            SELECT run_key, completed_at, latency_ms, success, status_code
              FROM samples
             WHERE run_key = ?1
          ORDER BY completed_at ASC, sample_id ASC
            ",
        )
        .bind(run_key)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| CoreError::Storage(err.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn count_for_run(&self, run_key: i64) -> CoreResult<u64> {
        let row = query("SELECT COUNT(*) AS n FROM samples WHERE run_key = ?1")
            .bind(run_key)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| CoreError::Storage(err.to_string()))?;

        let count: i64 = row.get("n");
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
