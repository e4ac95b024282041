//! Persistent priority job queue over SQLite.
//!
//! Jobs survive restarts; a claimed job is flipped back to `queued` at boot
//! so work interrupted by a crash is re-run. Priority is stored inverted, as
//! an ordinal where lower sorts first. That inversion has been relied on by
//! every downstream consumer since the first deployment, so it is kept and
//! pinned by a regression test rather than fixed.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ScrapeError;
use crate::marketplaces::Marketplace;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS scrape_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        product_id TEXT NOT NULL,
        url TEXT NOT NULL,
        marketplace TEXT NOT NULL,
        marketplace_id TEXT NOT NULL DEFAULT '',
        ordinal INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        state TEXT NOT NULL DEFAULT 'queued',
        run_at INTEGER NOT NULL,
        last_error TEXT,
        error_kind TEXT,
        created_at INTEGER NOT NULL,
        failed_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON scrape_jobs (state, run_at, ordinal, id)",
];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub failed_job_retention: u32,
}

/// A claimed job, owned by one worker until completed, retried or failed.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub product_id: String,
    pub url: String,
    pub marketplace: Marketplace,
    pub marketplace_id: String,
    pub attempts: u32,
}

/// What `retry` decided to do with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Requeued { attempt: u32, delay: Duration },
    TerminallyFailed,
}

/// A terminally failed job, kept for diagnostics.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FailedJob {
    pub id: i64,
    pub product_id: String,
    pub url: String,
    pub marketplace: String,
    pub marketplace_id: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub error_kind: Option<String>,
    pub failed_at: Option<i64>,
}

/// Priority to stored ordinal. Higher submitted priority must produce a
/// lower ordinal so it is claimed first.
pub fn ordinal_for(priority: i32) -> i64 {
    -i64::from(priority)
}

pub struct JobQueue {
    pool: SqlitePool,
    policy: RetryPolicy,
}

impl JobQueue {
    /// Open (creating if needed) the queue database and recover jobs that
    /// were mid-flight when the previous process died.
    pub async fn connect(url: &str, policy: RetryPolicy) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid queue database url: {url}"))?
            .create_if_missing(true);
        // A single connection serializes writers, which SQLite wants anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open queue database")?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        let recovered = sqlx::query("UPDATE scrape_jobs SET state = 'queued' WHERE state = 'running'")
            .execute(&pool)
            .await?
            .rows_affected();
        if recovered > 0 {
            info!(recovered, "requeued jobs interrupted by previous shutdown");
        }

        Ok(Self { pool, policy })
    }

    pub async fn enqueue(
        &self,
        product_id: &str,
        url: &str,
        marketplace: Marketplace,
        marketplace_id: &str,
        priority: i32,
    ) -> Result<i64> {
        self.enqueue_with_attempts(product_id, url, marketplace, marketplace_id, priority, 0)
            .await
    }

    /// Enqueue a job whose retry budget is partly spent already. Resubmitted
    /// jobs carry their prior attempt count so they cannot loop forever.
    pub async fn enqueue_with_attempts(
        &self,
        product_id: &str,
        url: &str,
        marketplace: Marketplace,
        marketplace_id: &str,
        priority: i32,
        attempts: u32,
    ) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO scrape_jobs
                 (product_id, url, marketplace, marketplace_id, ordinal, attempts, run_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) RETURNING id",
        )
        .bind(product_id)
        .bind(url)
        .bind(marketplace.as_str())
        .bind(marketplace_id)
        .bind(ordinal_for(priority))
        .bind(i64::from(attempts))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        debug!(job = id, %marketplace, priority, attempts, "job enqueued");
        Ok(id)
    }

    /// Atomically claim the most urgent due job, if any. The claim is a
    /// single statement so concurrent workers can never take the same job.
    pub async fn dequeue(&self) -> Result<Option<Job>> {
        let now = Utc::now().timestamp_millis();
        let row = sqlx::query(
            "UPDATE scrape_jobs SET state = 'running'
             WHERE id = (
                 SELECT id FROM scrape_jobs
                 WHERE state = 'queued' AND run_at <= ?1
                 ORDER BY ordinal ASC, id ASC
                 LIMIT 1
             )
             RETURNING id, product_id, url, marketplace, marketplace_id, attempts",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let marketplace_raw: String = row.get("marketplace");
        let marketplace = Marketplace::from_str(&marketplace_raw)
            .map_err(|e| anyhow::anyhow!("corrupt job row: {e}"))?;
        Ok(Some(Job {
            id: row.get("id"),
            product_id: row.get("product_id"),
            url: row.get("url"),
            marketplace,
            marketplace_id: row.get("marketplace_id"),
            attempts: row.get::<i64, _>("attempts") as u32,
        }))
    }

    /// Remove a successfully processed job.
    pub async fn complete(&self, job: &Job) -> Result<()> {
        sqlx::query("DELETE FROM scrape_jobs WHERE id = ?1")
            .bind(job.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a retryable failure: requeue with exponential backoff, or mark
    /// the job terminally failed once attempts are exhausted.
    pub async fn retry(&self, job: &Job, error: &ScrapeError) -> Result<RetryOutcome> {
        let attempt = job.attempts + 1;
        if attempt >= self.policy.max_attempts {
            warn!(job = job.id, attempt, "attempts exhausted, failing job: {error}");
            self.mark_failed(job, error).await?;
            return Ok(RetryOutcome::TerminallyFailed);
        }

        let delay = self.policy.backoff_base * 2u32.pow(job.attempts);
        let run_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        sqlx::query(
            "UPDATE scrape_jobs
             SET state = 'queued', attempts = ?2, run_at = ?3, last_error = ?4, error_kind = ?5
             WHERE id = ?1",
        )
        .bind(job.id)
        .bind(i64::from(attempt))
        .bind(run_at)
        .bind(error.to_string())
        .bind(error.kind())
        .execute(&self.pool)
        .await?;
        debug!(job = job.id, attempt, delay_ms = delay.as_millis() as u64, "job requeued");
        Ok(RetryOutcome::Requeued { attempt, delay })
    }

    /// Fail a job immediately without consuming retry budget. Used for
    /// errors that no amount of retrying can fix.
    pub async fn fail_permanent(&self, job: &Job, error: &ScrapeError) -> Result<()> {
        warn!(job = job.id, "permanent failure: {error}");
        self.mark_failed(job, error).await
    }

    async fn mark_failed(&self, job: &Job, error: &ScrapeError) -> Result<()> {
        sqlx::query(
            "UPDATE scrape_jobs
             SET state = 'failed', failed_at = ?2, last_error = ?3, error_kind = ?4
             WHERE id = ?1",
        )
        .bind(job.id)
        .bind(Utc::now().timestamp_millis())
        .bind(error.to_string())
        .bind(error.kind())
        .execute(&self.pool)
        .await?;
        self.prune_failed().await
    }

    /// Keep only the most recent failed jobs.
    async fn prune_failed(&self) -> Result<()> {
        sqlx::query(
            "DELETE FROM scrape_jobs WHERE state = 'failed' AND id NOT IN (
                 SELECT id FROM scrape_jobs WHERE state = 'failed'
                 ORDER BY failed_at DESC LIMIT ?1
             )",
        )
        .bind(i64::from(self.policy.failed_job_retention))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent terminal failures, newest first.
    pub async fn failed_jobs(&self, limit: u32) -> Result<Vec<FailedJob>> {
        let rows = sqlx::query_as::<_, FailedJob>(
            "SELECT id, product_id, url, marketplace, marketplace_id, attempts, last_error, error_kind, failed_at
             FROM scrape_jobs WHERE state = 'failed'
             ORDER BY failed_at DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scrape_jobs WHERE state = 'queued'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}
