//! Scheduled hard purge of soft-deleted content. Runs independently of
//! request traffic; because soft-delete markers are monotonic, a sweep can
//! only ever remove rows already marked deleted and past the retention
//! window. User rows are exempt (retained upstream behavior).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use crate::repo::{PurgeStats, Repo, RepoResult};

/// Soft-deleted rows are kept this long before becoming purge-eligible.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
/// Nightly sweep, matching the upstream cron.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// One purge sweep: hard-delete Board and Comment rows whose `deleted_at`
/// lies at or before `now - retention_days`. Idempotent: a second run with
/// no new soft-deletes removes nothing.
pub async fn purge(repo: &dyn Repo, retention_days: i64) -> RepoResult<PurgeStats> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let stats = repo.purge_deleted_before(cutoff).await?;
    info!(
        boards = stats.boards,
        comments = stats.comments,
        %cutoff,
        "purge sweep completed"
    );
    Ok(stats)
}

/// Spawn the detached purge task. Fire-and-forget per cycle: a failed sweep
/// is logged and retried at the next tick, never propagated into request
/// handling.
pub fn spawn(repo: Arc<dyn Repo>, period: Duration, retention_days: i64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = purge(repo.as_ref(), retention_days).await {
                error!("purge sweep failed: {e}");
            }
        }
    })
}
