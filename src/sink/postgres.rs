//! Postgres-backed [`LogSink`]: append-only `INSERT` into `request_logs`,
//! retention purge via a single `DELETE ... WHERE ts < $1`.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;

use crate::models::LogRecord;

use super::LogSink;

pub struct PostgresLogSink {
    pool: PgPool,
}

impl PostgresLogSink {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request_logs (
                trace_id          TEXT PRIMARY KEY,
                ts                TIMESTAMPTZ NOT NULL,
                api_key_id        BIGINT,
                api_key_name      TEXT,
                requested_model   TEXT NOT NULL,
                target_model      TEXT,
                provider_id       BIGINT,
                provider_name     TEXT,
                retry_count       INTEGER NOT NULL,
                ttfb_ms           BIGINT,
                total_ms          BIGINT,
                input_tokens      INTEGER NOT NULL,
                output_tokens     INTEGER NOT NULL,
                request_headers   JSONB NOT NULL,
                request_body      JSONB NOT NULL,
                response_status   INTEGER NOT NULL,
                response_body     JSONB,
                error             TEXT,
                stream            BOOLEAN NOT NULL
            );
            CREATE INDEX IF NOT EXISTS request_logs_ts_idx ON request_logs (ts);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LogSink for PostgresLogSink {
    async fn append(&self, record: LogRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO request_logs (
                trace_id, ts, api_key_id, api_key_name, requested_model, target_model,
                provider_id, provider_name, retry_count, ttfb_ms, total_ms,
                input_tokens, output_tokens, request_headers, request_body,
                response_status, response_body, error, stream
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
            "#,
        )
        .bind(record.trace_id)
        .bind(record.ts)
        .bind(record.api_key_id)
        .bind(record.api_key_name)
        .bind(record.requested_model)
        .bind(record.target_model)
        .bind(record.provider_id)
        .bind(record.provider_name)
        .bind(record.retry_count as i32)
        .bind(record.ttfb_ms.map(|v| v as i64))
        .bind(record.total_ms.map(|v| v as i64))
        .bind(record.input_tokens as i32)
        .bind(record.output_tokens as i32)
        .bind(record.request_headers)
        .bind(record.request_body)
        .bind(record.response_status as i32)
        .bind(record.response_body)
        .bind(record.error)
        .bind(record.stream)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_older_than(&self, days: u32) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);
        let result = sqlx::query("DELETE FROM request_logs WHERE ts < $1").bind(cutoff).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
