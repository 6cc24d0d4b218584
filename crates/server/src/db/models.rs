use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who a project belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    User = 0,
    Organization = 1,
}

/// Lifecycle of a project. Ordered: a project only ever moves forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Inserted, initialization not done yet.
    Created = 0,
    /// Initialization (first sync for git projects) complete.
    Init = 1,
}

/// Outcome of the most recent repository sync of a git-backed project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Succ = 0,
    Doing = 1,
    Fail = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub bio: String,
    pub github_id: Option<i64>,
    pub prefer_langs: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: i64,
    pub login: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Loaded separately from `organization_members`.
    #[sqlx(skip)]
    #[serde(skip)]
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub owner_id: i64,
    pub owner_kind: OwnerKind,
    pub name: String,
    pub description: String,
    pub is_private: bool,
    pub is_git: bool,
    pub git_url: String,
    pub git_branch: String,
    /// Seconds between scheduled syncs; 0 disables scheduling.
    pub sync_time: i64,
    /// `|`-joined language codes.
    pub src_langs: String,
    pub tgt_langs: String,
    pub status: ProjectStatus,
    pub sync_status: Option<SyncStatus>,
    pub sync_message: Option<String>,
    #[serde(skip_serializing)]
    pub sync_token: Option<String>,
    pub sync_started_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_failures: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
