use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row, SqlitePool};

use surge_core::{CoreError, CoreResult, RequestMethod, RunDescriptor, RunId, RunStatus, RunStore};

/// SQLite-backed store for run descriptors.
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Creates a new store backed by the provided pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool (useful for composing with other stores).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn map_row(row: SqliteRow) -> CoreResult<RunDescriptor> {
        let run_id: String = row.get("run_id");
        let run_id = RunId::from_str(&run_id)
            .map_err(|err| CoreError::internal(format!("invalid run_id: {err}")))?;

        let method: String = row.get("method");
        let method = RequestMethod::from_str(&method)
            .map_err(|()| CoreError::internal(format!("unknown method `{method}`")))?;

        let status: String = row.get("status");
        let status = RunStatus::from_str(&status)
            .map_err(|()| CoreError::internal(format!("unknown status `{status}`")))?;

        let headers_json: Option<String> = row.get("headers_json");
        let headers: Option<HashMap<String, String>> = match headers_json {
            Some(json) if !json.is_empty() => Some(serde_json::from_str(&json)?),
            _ => None,
        };

        let started_at: String = row.get("started_at");
        let started_at = DateTime::parse_from_rfc3339(&started_at)
            .map_err(|err| CoreError::internal(format!("invalid started_at: {err}")))?
            .with_timezone(&Utc);

        let completed_at: Option<String> = row.get("completed_at");
        let completed_at = match completed_at {
            Some(value) => Some(
                DateTime::parse_from_rfc3339(&value)
                    .map_err(|err| CoreError::internal(format!("invalid completed_at: {err}")))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let users: i64 = row.get("users");
        let ramp_sec: i64 = row.get("ramp_sec");
        let duration_sec: i64 = row.get("duration_sec");
        let requests_per_user: i64 = row.get("requests_per_user");
        let total_requests: i64 = row.get("total_requests");
        let success_count: i64 = row.get("success_count");
        let error_count: i64 = row.get("error_count");

        Ok(RunDescriptor {
            run_key: row.get("run_key"),
            run_id,
            target: row.get("target"),
            mask_target: row.get("mask_target"),
            users: u32::try_from(users)
                .map_err(|_| CoreError::internal("users stored out of range"))?,
            ramp_sec: u32::try_from(ramp_sec)
                .map_err(|_| CoreError::internal("ramp_sec stored out of range"))?,
            duration_sec: u32::try_from(duration_sec)
                .map_err(|_| CoreError::internal("duration_sec stored out of range"))?,
            method,
            body: row.get("body"),
            headers,
            requests_per_user: u32::try_from(requests_per_user)
                .map_err(|_| CoreError::internal("requests_per_user stored out of range"))?,
            error_threshold: row.get("error_threshold"),
            status,
            stopped_by_circuit: row.get("stopped_by_circuit"),
            started_at,
            completed_at,
            total_requests: u64::try_from(total_requests)
                .map_err(|_| CoreError::internal("total_requests stored negative"))?,
            success_count: u64::try_from(success_count)
                .map_err(|_| CoreError::internal("success_count stored negative"))?,
            error_count: u64::try_from(error_count)
                .map_err(|_| CoreError::internal("error_count stored negative"))?,
            avg_latency_ms: row.get("avg_latency_ms"),
            min_latency_ms: row.get("min_latency_ms"),
            max_latency_ms: row.get("max_latency_ms"),
            rps: row.get("rps"),
        })
    }
}

const RUN_COLUMNS: &str = r"
    run_key,
    run_id,
    target,
    mask_target,
    users,
    ramp_sec,
    duration_sec,
    method,
    body,
    headers_json,
    requests_per_user,
    error_threshold,
    status,
    stopped_by_circuit,
    started_at,
    completed_at,
    total_requests,
    success_count,
    error_count,
    avg_latency_ms,
    min_latency_ms,
    max_latency_ms,
    rps
";

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn insert(&self, run: &RunDescriptor) -> CoreResult<i64> {
        let headers_json = match &run.headers {
            Some(headers) if !headers.is_empty() => Some(serde_json::to_string(headers)?),
            _ => None,
        };
        let started_at = run.started_at.to_rfc3339_opts(SecondsFormat::Millis, true);

        let result = query(
            r"
            INSERT INTO runs (
                run_id,
                target,
                mask_target,
                users,
                ramp_sec,
                duration_sec,
                method,
                body,
                headers_json,
                requests_per_user,
                error_threshold,
                status,
                stopped_by_circuit,
                started_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ",
        )
        .bind(run.run_id.to_string())
        .bind(&run.target)
        .bind(run.mask_target)
        .bind(i64::from(run.users))
        .bind(i64::from(run.ramp_sec))
        .bind(i64::from(run.duration_sec))
        .bind(run.method.as_str())
        .bind(&run.body)
        .bind(headers_json)
        .bind(i64::from(run.requests_per_user))
        .bind(run.error_threshold)
        .bind(run.status.as_str())
        .bind(run.stopped_by_circuit)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx_error("run", run.run_id.to_string(), err))?;

        Ok(result.last_insert_rowid())
    }

    async fn finalize(&self, run: &RunDescriptor) -> CoreResult<()> {
        let completed_at = run
            .completed_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true));

        let total = i64::try_from(run.total_requests)
            .map_err(|_| CoreError::internal("total_requests exceeds 63-bit range"))?;
        let success = i64::try_from(run.success_count)
            .map_err(|_| CoreError::internal("success_count exceeds 63-bit range"))?;
        let error = i64::try_from(run.error_count)
            .map_err(|_| CoreError::internal("error_count exceeds 63-bit range"))?;

        let result = query(
            r"
            UPDATE runs
               SET status = ?2,
                   stopped_by_circuit = ?3,
                   completed_at = ?4,
                   total_requests = ?5,
                   success_count = ?6,
                   error_count = ?7,
                   avg_latency_ms = ?8,
                   min_latency_ms = ?9,
                   max_latency_ms = ?10,
                   rps = ?11
             WHERE run_key = ?1
            ",
        )
        .bind(run.run_key)
        .bind(run.status.as_str())
        .bind(run.stopped_by_circuit)
        .bind(completed_at)
        .bind(total)
        .bind(success)
        .bind(error)
        .bind(run.avg_latency_ms)
        .bind(run.min_latency_ms)
        .bind(run.max_latency_ms)
        .bind(run.rps)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx_error("run", run.run_id.to_string(), err))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("run", run.run_id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, run_id: RunId) -> CoreResult<Option<RunDescriptor>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1");
        let row = query(&sql)
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| CoreError::Storage(err.to_string()))?;

        match row {
            Some(row) => Ok(Some(Self::map_row(row)?)),
            None => Ok(None),
        }
    }

    async fn list_recent(&self, limit: u32) -> CoreResult<Vec<RunDescriptor>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY started_at DESC, run_key DESC LIMIT ?1"
        );
        let rows = query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|err| CoreError::Storage(err.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }
}

fn map_sqlx_error(entity: &'static str, id: String, err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            if message.contains("UNIQUE constraint failed") {
                CoreError::already_exists(entity, id)
            } else if message.contains("FOREIGN KEY constraint failed") {
                CoreError::Storage("foreign key constraint failed".to_string())
            } else {
                CoreError::Storage(message)
            }
        }
        other => CoreError::Storage(other.to_string()),
    }
}
