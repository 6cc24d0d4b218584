use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::{Project, SyncStatus},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::{
        identity::{self, Owner},
        permissions,
        projects::{self, NewProject, PhraseInfo, ProjectInfo},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_project))
        .route("/:owner", get(list_projects))
        .route("/:owner/:name", get(get_project))
        .route("/:owner/:name/init", post(init_project))
        .route("/:owner/:name/sync", post(sync_project))
        .route("/:owner/:name/sync/cancel", post(cancel_sync))
        .route("/:owner/:name/phrases", get(list_phrases))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_git: bool,
    #[serde(default)]
    pub git_url: String,
    #[serde(default)]
    pub git_branch: String,
    /// Seconds between scheduled syncs, 0 for manual only.
    #[serde(default)]
    pub sync_time: i64,
    /// `|`-joined language codes.
    pub src_langs: String,
    #[serde(default)]
    pub tgt_langs: String,
}

#[derive(Debug, Serialize)]
pub struct SyncStarted {
    pub sync_status: SyncStatus,
    pub started_at: DateTime<Utc>,
}

async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectInfo>)> {
    let owner = identity::find_user_by_id(&state.db.pool, user.id)
        .await?
        .map(Owner::User)
        .ok_or(AppError::Unauthorized)?;

    create_for_owner(&state, &owner, body).await
}

/// Validates, probes the remote of git projects, then inserts.
pub(crate) async fn create_for_owner(
    state: &AppState,
    owner: &Owner,
    body: CreateProjectRequest,
) -> Result<(StatusCode, Json<ProjectInfo>)> {
    let new_project = NewProject {
        owner_id: owner.id(),
        owner_kind: owner.kind(),
        name: body.name,
        description: body.description,
        is_private: body.is_private,
        is_git: body.is_git,
        git_url: body.git_url,
        git_branch: body.git_branch,
        sync_time: body.sync_time,
        src_langs: body.src_langs,
        tgt_langs: body.tgt_langs,
    };
    new_project.validate()?;

    if new_project.is_git && state.config.git_verify_remote {
        state
            .sync
            .probe_remote(&new_project.git_url, &new_project.git_branch)
            .await?;
    }

    let project = projects::create(&state.db.pool, new_project).await?;
    Ok((StatusCode::CREATED, Json(project.into())))
}

/// Loads a project the way `requester` sees it: private projects outside
/// their namespace are reported as missing.
async fn load_project(
    state: &AppState,
    owner_name: &str,
    name: &str,
    requester: Option<i64>,
) -> Result<(Owner, Project)> {
    let owner = identity::resolve_owner(&state.db.pool, owner_name).await?;
    let include_private = permissions::has_view_access(requester, &owner);

    let project = projects::find_by_owner_and_name(
        &state.db.pool,
        owner.id(),
        owner.kind(),
        name,
        include_private,
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    Ok((owner, project))
}

async fn load_managed_project(
    state: &AppState,
    owner_name: &str,
    name: &str,
    user: &AuthUser,
) -> Result<Project> {
    let (owner, project) = load_project(state, owner_name, name, Some(user.id)).await?;
    if !permissions::can_manage(user.id, &owner) {
        return Err(AppError::Forbidden("Permission denied".to_string()));
    }
    Ok(project)
}

async fn list_projects(
    State(state): State<AppState>,
    requester: Option<AuthUser>,
    Path(owner_name): Path<String>,
) -> Result<Json<Vec<ProjectInfo>>> {
    let owner = identity::resolve_owner(&state.db.pool, &owner_name).await?;
    let include_private = permissions::has_view_access(requester.map(|r| r.id), &owner);

    let projects =
        projects::find_by_owner(&state.db.pool, owner.id(), owner.kind(), include_private).await?;
    Ok(Json(projects.into_iter().map(ProjectInfo::from).collect()))
}

async fn get_project(
    State(state): State<AppState>,
    requester: Option<AuthUser>,
    Path((owner_name, name)): Path<(String, String)>,
) -> Result<Json<ProjectInfo>> {
    let (_, project) = load_project(&state, &owner_name, &name, requester.map(|r| r.id)).await?;
    Ok(Json(project.into()))
}

async fn init_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path((owner_name, name)): Path<(String, String)>,
) -> Result<Json<ProjectInfo>> {
    let project = load_managed_project(&state, &owner_name, &name, &user).await?;
    let project = projects::initialize(&state.db.pool, &project).await?;

    tracing::info!(project_id = project.id, "project initialized");
    Ok(Json(project.into()))
}

async fn sync_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path((owner_name, name)): Path<(String, String)>,
) -> Result<(StatusCode, Json<SyncStarted>)> {
    let project = load_managed_project(&state, &owner_name, &name, &user).await?;
    let lease = state.sync.trigger(&project).await?;

    tracing::info!(project_id = project.id, requested_by = %user.login, "sync requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(SyncStarted {
            sync_status: SyncStatus::Doing,
            started_at: lease.started_at,
        }),
    ))
}

/// Stops the sync running for the project in this process. The run is
/// recorded as failed.
async fn cancel_sync(
    State(state): State<AppState>,
    user: AuthUser,
    Path((owner_name, name)): Path<(String, String)>,
) -> Result<StatusCode> {
    let project = load_managed_project(&state, &owner_name, &name, &user).await?;
    if !state.sync.cancel(project.id).await {
        return Err(AppError::Conflict("No sync in progress".to_string()));
    }

    tracing::info!(project_id = project.id, requested_by = %user.login, "sync cancelled");
    Ok(StatusCode::ACCEPTED)
}

async fn list_phrases(
    State(state): State<AppState>,
    requester: Option<AuthUser>,
    Path((owner_name, name)): Path<(String, String)>,
) -> Result<Json<Vec<PhraseInfo>>> {
    let (_, project) = load_project(&state, &owner_name, &name, requester.map(|r| r.id)).await?;

    let phrases = projects::list_phrases(&state.db.pool, project.id).await?;
    Ok(Json(phrases))
}
