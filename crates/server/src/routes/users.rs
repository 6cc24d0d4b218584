use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::{
        identity::{self, Owner},
        languages::{self, Language},
        permissions,
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/:login", get(get_user))
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub login: String,
    pub name: String,
    pub avatar_url: String,
    pub bio: String,
    pub prefer_langs: Vec<Language>,
    /// Only present when the requester is this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

async fn get_user(
    State(state): State<AppState>,
    requester: Option<AuthUser>,
    Path(login): Path<String>,
) -> Result<Json<UserInfo>> {
    let user = identity::find_user_by_login(&state.db.pool, &login)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let is_self =
        permissions::has_view_access(requester.map(|r| r.id), &Owner::User(user.clone()));

    Ok(Json(UserInfo {
        prefer_langs: languages::parse_list(&user.prefer_langs),
        email: is_self.then_some(user.email),
        github_id: if is_self { user.github_id } else { None },
        id: user.id,
        login: user.login,
        name: user.name,
        avatar_url: user.avatar_url,
        bio: user.bio,
        created_at: user.created_at,
    }))
}
