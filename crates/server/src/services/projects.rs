//! Project validation and persistence.
//!
//! Input is validated here before it reaches the database; the database
//! itself only enforces uniqueness of `(owner_id, owner_kind, name)`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use sqlx::SqlitePool;

use super::{
    git::{validate_git_branch, validate_git_url},
    languages::{self, Language},
};
use crate::{
    db::models::{OwnerKind, Project, ProjectStatus, SyncStatus},
    error::{is_unique_violation, AppError, Result},
};

fn url_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]{1,32}$").expect("valid url name regex"))
}

/// Names appear in URLs: 1-32 characters of `[A-Za-z0-9-]`.
pub fn validate_name(name: &str) -> bool {
    url_name().is_match(name)
}

/// Longest accepted scheduled sync interval: one year, in seconds.
pub const MAX_SYNC_TIME: i64 = 365 * 24 * 60 * 60;

/// A project as submitted for creation.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub owner_id: i64,
    pub owner_kind: OwnerKind,
    pub name: String,
    pub description: String,
    pub is_private: bool,
    pub is_git: bool,
    pub git_url: String,
    pub git_branch: String,
    pub sync_time: i64,
    pub src_langs: String,
    pub tgt_langs: String,
}

impl NewProject {
    /// Checks everything that can be checked without I/O. Reachability of
    /// the git remote is probed separately by the caller.
    pub fn validate(&self) -> Result<()> {
        if !validate_name(&self.name) {
            return Err(AppError::Validation("Invalid project name".to_string()));
        }

        let src = languages::parse_list(&self.src_langs);
        if src.is_empty() {
            return Err(AppError::Validation(
                "Source languages cannot be empty".to_string(),
            ));
        }
        if !languages::validate_all(&src) {
            return Err(AppError::Validation("Invalid source language".to_string()));
        }
        if !languages::validate_all(&languages::parse_list(&self.tgt_langs)) {
            return Err(AppError::Validation("Invalid target language".to_string()));
        }

        if self.is_git {
            if !validate_git_url(&self.git_url) {
                return Err(AppError::Validation("Invalid git URL".to_string()));
            }
            if !validate_git_branch(&self.git_branch) {
                return Err(AppError::Validation("Invalid git branch".to_string()));
            }
        }

        if self.sync_time < 0 {
            return Err(AppError::Validation(
                "Sync interval cannot be negative".to_string(),
            ));
        }
        if self.sync_time > MAX_SYNC_TIME {
            return Err(AppError::Validation("Sync interval is too long".to_string()));
        }

        Ok(())
    }

    /// Git fields carry no meaning on plain projects; drop them.
    fn normalized(mut self) -> Self {
        if !self.is_git {
            self.git_url.clear();
            self.git_branch.clear();
            self.sync_time = 0;
        }
        self
    }
}

/// Response view of a project with decoded language lists.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub id: i64,
    pub owner_id: i64,
    pub owner_kind: OwnerKind,
    pub name: String,
    pub description: String,
    pub is_private: bool,
    pub is_git: bool,
    pub git_url: String,
    pub git_branch: String,
    pub sync_time: i64,
    pub src_langs: Vec<Language>,
    pub tgt_langs: Vec<Language>,
    pub status: ProjectStatus,
    pub sync_status: Option<SyncStatus>,
    pub sync_message: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Project> for ProjectInfo {
    fn from(p: Project) -> Self {
        Self {
            src_langs: languages::parse_list(&p.src_langs),
            tgt_langs: languages::parse_list(&p.tgt_langs),
            id: p.id,
            owner_id: p.owner_id,
            owner_kind: p.owner_kind,
            name: p.name,
            description: p.description,
            is_private: p.is_private,
            is_git: p.is_git,
            git_url: p.git_url,
            git_branch: p.git_branch,
            sync_time: p.sync_time,
            status: p.status,
            sync_status: p.sync_status,
            sync_message: p.sync_message,
            synced_at: p.synced_at,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhraseInfo {
    pub key: String,
    pub text: String,
    pub translations: BTreeMap<String, String>,
}

/// Inserts a validated project. The lookup beforehand only fails fast; the
/// unique index decides between concurrent creators.
pub async fn create(pool: &SqlitePool, project: NewProject) -> Result<Project> {
    let project = project.normalized();

    if find_by_owner_and_name(
        pool,
        project.owner_id,
        project.owner_kind,
        &project.name,
        true,
    )
    .await?
    .is_some()
    {
        return Err(AppError::Duplicate("Project already exists".to_string()));
    }

    let now = Utc::now();
    // Committed before returning, so other pooled connections see the row.
    let mut tx = pool.begin().await?;
    let created = sqlx::query_as::<_, Project>(
        r#"
        INSERT INTO projects (
            owner_id, owner_kind, name, description, is_private, is_git,
            git_url, git_branch, sync_time, src_langs, tgt_langs, status,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(project.owner_id)
    .bind(project.owner_kind)
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.is_private)
    .bind(project.is_git)
    .bind(&project.git_url)
    .bind(&project.git_branch)
    .bind(project.sync_time)
    .bind(&project.src_langs)
    .bind(&project.tgt_langs)
    .bind(ProjectStatus::Created)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Duplicate("Project already exists".to_string())
        } else {
            AppError::Database(e)
        }
    })?;
    tx.commit().await?;

    tracing::info!(
        project_id = created.id,
        owner_id = created.owner_id,
        name = %created.name,
        is_git = created.is_git,
        "project created"
    );

    Ok(created)
}

/// With `include_private == false` a private project behaves as absent.
pub async fn find_by_owner_and_name(
    pool: &SqlitePool,
    owner_id: i64,
    owner_kind: OwnerKind,
    name: &str,
    include_private: bool,
) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>(
        r#"
        SELECT * FROM projects
        WHERE owner_id = ? AND owner_kind = ? AND name = ? AND (? OR is_private = 0)
        "#,
    )
    .bind(owner_id)
    .bind(owner_kind)
    .bind(name)
    .bind(include_private)
    .fetch_optional(pool)
    .await?;
    Ok(project)
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(project)
}

pub async fn find_by_owner(
    pool: &SqlitePool,
    owner_id: i64,
    owner_kind: OwnerKind,
    include_private: bool,
) -> Result<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>(
        r#"
        SELECT * FROM projects
        WHERE owner_id = ? AND owner_kind = ? AND (? OR is_private = 0)
        ORDER BY updated_at DESC, id DESC
        "#,
    )
    .bind(owner_id)
    .bind(owner_kind)
    .bind(include_private)
    .fetch_all(pool)
    .await?;
    Ok(projects)
}

/// `created -> init` for plain projects. Git projects initialize through
/// their first successful sync.
pub async fn initialize(pool: &SqlitePool, project: &Project) -> Result<Project> {
    if project.is_git {
        return Err(AppError::Validation(
            "Git projects are initialized by their first sync".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let updated = sqlx::query_as::<_, Project>(
        "UPDATE projects SET status = MAX(status, ?), updated_at = ? WHERE id = ? RETURNING *",
    )
    .bind(ProjectStatus::Init)
    .bind(Utc::now())
    .bind(project.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;
    tx.commit().await?;

    Ok(updated)
}

pub async fn list_phrases(pool: &SqlitePool, project_id: i64) -> Result<Vec<PhraseInfo>> {
    let rows = sqlx::query_as::<_, (i64, String, String, Option<String>, Option<String>)>(
        r#"
        SELECT p.id, p.key, p.text, t.lang_code, t.text
        FROM phrases p
        LEFT JOIN translations t ON t.phrase_id = p.id
        WHERE p.project_id = ?
        ORDER BY p.key ASC, t.lang_code ASC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    let mut phrases: Vec<(i64, PhraseInfo)> = Vec::new();
    for (id, key, text, lang, translation) in rows {
        if phrases.last().map(|(last, _)| *last) != Some(id) {
            phrases.push((
                id,
                PhraseInfo {
                    key,
                    text,
                    translations: BTreeMap::new(),
                },
            ));
        }
        if let (Some(lang), Some(translation), Some((_, phrase))) =
            (lang, translation, phrases.last_mut())
        {
            phrase.translations.insert(lang, translation);
        }
    }

    Ok(phrases.into_iter().map(|(_, p)| p).collect())
}
