//! Repository synchronization for git-backed projects.
//!
//! Two state axes live on the project row:
//!
//! * lifecycle `status`: `created -> init`, never backwards. A git project
//!   reaches `init` with its first successful sync.
//! * `sync_status`: `never|succ|fail -> doing -> succ|fail`.
//!
//! Entering `doing` is a single conditional UPDATE that also writes a fresh
//! lease token. Only the holder of that token can record the outcome, so a
//! run that was declared stale and reset cannot overwrite newer state. The
//! fetched snapshot is written in the same transaction that records success;
//! a failed run leaves previously synced phrases untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use super::{
    git::{scan_checkout, RepoSnapshot, RepoSource},
    languages,
    projects,
    storage::CheckoutStore,
};
use crate::{
    config::SyncSettings,
    db::models::{Project, ProjectStatus, SyncStatus},
    error::{AppError, Result},
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("repository unreachable: {0}")]
    Unreachable(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("invalid repository content: {0}")]
    Parse(String),

    #[error("sync timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("sync cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A sync may start unless one is already running.
pub fn can_begin(current: Option<SyncStatus>) -> bool {
    current != Some(SyncStatus::Doing)
}

/// Proof of having moved a project into `doing`.
#[derive(Debug, Clone)]
pub struct SyncLease {
    pub project_id: i64,
    pub token: String,
    pub started_at: DateTime<Utc>,
}

/// Atomically moves a git project into `doing`.
pub async fn begin(pool: &SqlitePool, project_id: i64) -> Result<SyncLease> {
    let lease = SyncLease {
        project_id,
        token: Uuid::new_v4().to_string(),
        started_at: Utc::now(),
    };

    let acquired = sqlx::query(
        r#"
        UPDATE projects
        SET sync_status = ?, sync_token = ?, sync_started_at = ?
        WHERE id = ? AND is_git = 1 AND (sync_status IS NULL OR sync_status <> ?)
        "#,
    )
    .bind(SyncStatus::Doing)
    .bind(&lease.token)
    .bind(lease.started_at)
    .bind(project_id)
    .bind(SyncStatus::Doing)
    .execute(pool)
    .await?
    .rows_affected()
        == 1;

    if acquired {
        tracing::info!(project_id, lease = %lease.token, "sync started");
        return Ok(lease);
    }

    match projects::find_by_id(pool, project_id).await? {
        None => Err(AppError::NotFound("Project not found".to_string())),
        Some(p) if !p.is_git => Err(AppError::Validation(
            "Project is not backed by a git repository".to_string(),
        )),
        Some(_) => Err(AppError::Conflict("Sync already in progress".to_string())),
    }
}

/// Stores `snapshot` and records success. Returns `false`, writing nothing,
/// when the lease is no longer held.
pub async fn complete(pool: &SqlitePool, lease: &SyncLease, snapshot: &RepoSnapshot) -> Result<bool> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let held = sqlx::query(
        r#"
        UPDATE projects
        SET sync_status = ?, sync_message = NULL, sync_token = NULL, synced_at = ?,
            sync_failures = 0, status = MAX(status, ?)
        WHERE id = ? AND sync_token = ? AND sync_status = ?
        "#,
    )
    .bind(SyncStatus::Succ)
    .bind(now)
    .bind(ProjectStatus::Init)
    .bind(lease.project_id)
    .bind(&lease.token)
    .bind(SyncStatus::Doing)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if !held {
        tx.rollback().await?;
        return Ok(false);
    }

    for phrase in &snapshot.phrases {
        let phrase_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO phrases (project_id, key, text, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (project_id, key) DO UPDATE SET text = excluded.text, updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(lease.project_id)
        .bind(&phrase.key)
        .bind(&phrase.text)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for (lang, text) in &phrase.translations {
            sqlx::query(
                r#"
                INSERT INTO translations (phrase_id, lang_code, text, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (phrase_id, lang_code) DO UPDATE SET text = excluded.text, updated_at = excluded.updated_at
                "#,
            )
            .bind(phrase_id)
            .bind(lang)
            .bind(text)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
    }

    // Rows this run did not touch still carry an older updated_at.
    sqlx::query(
        r#"
        DELETE FROM translations
        WHERE updated_at <> ? AND phrase_id IN (SELECT id FROM phrases WHERE project_id = ?)
        "#,
    )
    .bind(now)
    .bind(lease.project_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM phrases WHERE project_id = ? AND updated_at <> ?")
        .bind(lease.project_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        project_id = lease.project_id,
        phrases = snapshot.phrases.len(),
        "sync succeeded"
    );
    Ok(true)
}

/// Records a failed run. Lifecycle status and phrase data are left alone.
pub async fn fail(pool: &SqlitePool, lease: &SyncLease, reason: &str) -> Result<bool> {
    let held = sqlx::query(
        r#"
        UPDATE projects
        SET sync_status = ?, sync_message = ?, sync_token = NULL, synced_at = ?,
            sync_failures = sync_failures + 1
        WHERE id = ? AND sync_token = ? AND sync_status = ?
        "#,
    )
    .bind(SyncStatus::Fail)
    .bind(reason)
    .bind(Utc::now())
    .bind(lease.project_id)
    .bind(&lease.token)
    .bind(SyncStatus::Doing)
    .execute(pool)
    .await?
    .rows_affected()
        == 1;

    if held {
        tracing::warn!(project_id = lease.project_id, reason, "sync failed");
    }
    Ok(held)
}

/// Resets `doing` leases started before `older_than` to `fail`. Returns the
/// number of projects recovered.
pub async fn recover_stale(pool: &SqlitePool, older_than: DateTime<Utc>) -> Result<u64> {
    let running = sqlx::query_as::<_, (i64, Option<String>, Option<DateTime<Utc>>)>(
        "SELECT id, sync_token, sync_started_at FROM projects WHERE sync_status = ?",
    )
    .bind(SyncStatus::Doing)
    .fetch_all(pool)
    .await?;

    let mut recovered = 0;
    for (project_id, token, started_at) in running {
        if started_at.is_some_and(|t| t >= older_than) {
            continue;
        }

        let reset = sqlx::query(
            r#"
            UPDATE projects
            SET sync_status = ?, sync_message = 'sync interrupted', sync_token = NULL,
                synced_at = ?, sync_failures = sync_failures + 1
            WHERE id = ? AND sync_status = ? AND sync_token IS ?
            "#,
        )
        .bind(SyncStatus::Fail)
        .bind(Utc::now())
        .bind(project_id)
        .bind(SyncStatus::Doing)
        .bind(&token)
        .execute(pool)
        .await?
        .rows_affected();

        if reset == 1 {
            tracing::warn!(project_id, "reset stale sync");
            recovered += 1;
        }
    }

    Ok(recovered)
}

/// When the scheduler should next sync `project`, if ever. Consecutive
/// failures back off exponentially from the configured interval, capped at
/// `max_backoff`.
pub fn next_due(project: &Project, max_backoff: Duration) -> Option<DateTime<Utc>> {
    if !project.is_git || project.sync_time <= 0 || !can_begin(project.sync_status) {
        return None;
    }

    let Some(last) = project.synced_at else {
        return Some(project.created_at);
    };

    let exponent = u32::try_from(project.sync_failures.clamp(0, 20)).unwrap_or(20);
    let cap = i64::try_from(max_backoff.as_secs())
        .unwrap_or(i64::MAX)
        .max(project.sync_time);
    let secs = project
        .sync_time
        .saturating_mul(1_i64 << exponent)
        .min(cap);

    // Intervals past the representable range are never due
    chrono::Duration::try_seconds(secs).and_then(|delay| last.checked_add_signed(delay))
}

pub async fn due_projects(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    max_backoff: Duration,
) -> Result<Vec<Project>> {
    let candidates = sqlx::query_as::<_, Project>(
        r#"
        SELECT * FROM projects
        WHERE is_git = 1 AND sync_time > 0 AND (sync_status IS NULL OR sync_status <> ?)
        "#,
    )
    .bind(SyncStatus::Doing)
    .fetch_all(pool)
    .await?;

    Ok(candidates
        .into_iter()
        .filter(|p| next_due(p, max_backoff).is_some_and(|due| due <= now))
        .collect())
}

/// Cancellation handle of a run in this process, tagged with its lease.
struct RunningSync {
    token: String,
    cancel: CancellationToken,
}

/// Runs syncs in the background: one task per run, bounded by a timeout and
/// cancelled on request or on shutdown.
#[derive(Clone)]
pub struct SyncService {
    pool: SqlitePool,
    source: Arc<dyn RepoSource>,
    store: CheckoutStore,
    settings: SyncSettings,
    shutdown: CancellationToken,
    running: Arc<Mutex<HashMap<i64, RunningSync>>>,
    tracker: TaskTracker,
}

impl SyncService {
    pub fn new(
        pool: SqlitePool,
        source: Arc<dyn RepoSource>,
        store: CheckoutStore,
        settings: SyncSettings,
    ) -> Self {
        Self {
            pool,
            source,
            store,
            settings,
            shutdown: CancellationToken::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
        }
    }

    /// Reachability check used when a git project is created.
    pub async fn probe_remote(&self, url: &str, branch: &str) -> Result<()> {
        let probe = tokio::time::timeout(self.settings.timeout, self.source.probe(url, branch))
            .await
            .unwrap_or(Err(SyncError::Timeout(self.settings.timeout)));

        probe.map_err(|e| AppError::Validation(format!("Git repository is not reachable: {e}")))
    }

    /// Starts a background sync. Fails with `Conflict` while one is running.
    pub async fn trigger(&self, project: &Project) -> Result<SyncLease> {
        let lease = begin(&self.pool, project.id).await?;
        let cancel = self.register(&lease).await;
        self.tracker
            .spawn(self.clone().run(project.clone(), lease.clone(), cancel));
        Ok(lease)
    }

    /// Cancels the run this process holds for `project_id`. The run records
    /// `fail`. Returns `false` when nothing is running here.
    pub async fn cancel(&self, project_id: i64) -> bool {
        match self.running.lock().await.get(&project_id) {
            Some(run) => {
                tracing::info!(project_id, lease = %run.token, "sync cancel requested");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn register(&self, lease: &SyncLease) -> CancellationToken {
        let cancel = self.shutdown.child_token();
        self.running.lock().await.insert(
            lease.project_id,
            RunningSync {
                token: lease.token.clone(),
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    async fn unregister(&self, lease: &SyncLease) {
        let mut running = self.running.lock().await;
        if running
            .get(&lease.project_id)
            .is_some_and(|run| run.token == lease.token)
        {
            running.remove(&lease.project_id);
        }
    }

    /// Runs a sync to completion on the current task.
    #[cfg(test)]
    pub async fn sync_now(&self, project: &Project) -> Result<()> {
        let lease = begin(&self.pool, project.id).await?;
        let cancel = self.register(&lease).await;
        self.clone().run(project.clone(), lease, cancel).await;
        Ok(())
    }

    async fn run(self, project: Project, lease: SyncLease, cancel: CancellationToken) {
        let timeout = self.settings.timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            res = tokio::time::timeout(timeout, self.fetch_snapshot(&project, &lease)) => {
                res.unwrap_or(Err(SyncError::Timeout(timeout)))
            }
        };

        let recorded = match outcome {
            Ok(snapshot) => match complete(&self.pool, &lease, &snapshot).await {
                Ok(true) => Ok(()),
                Ok(false) => {
                    tracing::warn!(project_id = project.id, "sync lease lost, snapshot dropped");
                    Ok(())
                }
                Err(e) => fail(&self.pool, &lease, &format!("failed to store snapshot: {e}"))
                    .await
                    .map(|_| ()),
            },
            Err(e) => fail(&self.pool, &lease, &e.to_string()).await.map(|_| ()),
        };

        if let Err(e) = recorded {
            tracing::error!(project_id = project.id, error = %e, "failed to record sync outcome");
        }
        self.unregister(&lease).await;

        self.store
            .discard(&self.store.checkout_path(project.id, &lease.token))
            .await;
    }

    async fn fetch_snapshot(
        &self,
        project: &Project,
        lease: &SyncLease,
    ) -> std::result::Result<RepoSnapshot, SyncError> {
        let dest = self
            .store
            .prepare(project.id, &lease.token)
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;

        self.source
            .fetch(&project.git_url, &project.git_branch, &dest)
            .await?;

        let src = languages::parse_list(&project.src_langs);
        let tgt = languages::parse_list(&project.tgt_langs);
        tokio::task::spawn_blocking(move || scan_checkout(&dest, &src, &tgt))
            .await
            .map_err(|e| SyncError::Parse(format!("scan task failed: {e}")))?
    }

    /// One scheduler pass: recover abandoned leases, then start due syncs.
    pub async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(self.settings.stale_after)
                .unwrap_or_else(|_| chrono::Duration::zero());
        recover_stale(&self.pool, stale_before).await?;

        for project in due_projects(&self.pool, now, self.settings.max_backoff).await? {
            match self.trigger(&project).await {
                Ok(_) | Err(AppError::Conflict(_)) => {}
                Err(e) => {
                    tracing::error!(project_id = project.id, error = %e, "failed to start scheduled sync")
                }
            }
        }
        Ok(())
    }

    pub fn spawn_scheduler(&self) {
        let service = self.clone();
        self.tracker.spawn(async move {
            tracing::info!(
                tick_secs = service.settings.tick.as_secs(),
                "sync scheduler started"
            );
            let mut interval = tokio::time::interval(service.settings.tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = service.tick().await {
                            tracing::error!(error = %e, "sync scheduler pass failed");
                        }
                    }
                    _ = service.shutdown.cancelled() => {
                        tracing::info!("sync scheduler shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Waits for every spawned run to finish.
    #[cfg(test)]
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancels running syncs (they record `fail`) and waits for them.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
