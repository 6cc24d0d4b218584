use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::projects::{create_for_owner, CreateProjectRequest};
use crate::{
    db::models::{Organization, OwnerKind},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::{
        identity::{self, Owner},
        permissions,
        projects::{validate_name, ProjectInfo},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_org))
        .route("/:org/members", post(add_member))
        .route("/:org/projects", post(create_org_project))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrgRequest {
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub login: String,
}

#[derive(Debug, Serialize)]
pub struct OrgResponse {
    pub id: i64,
    pub login: String,
    pub name: String,
    pub description: String,
    pub member_ids: Vec<i64>,
}

impl From<Organization> for OrgResponse {
    fn from(org: Organization) -> Self {
        Self {
            id: org.id,
            login: org.login,
            name: org.name,
            description: org.description,
            member_ids: org.member_ids,
        }
    }
}

/// Loads `login` and checks that `user` may act for it.
async fn managed_org(state: &AppState, login: &str, user: &AuthUser) -> Result<Owner> {
    let org = identity::find_organization_by_login(&state.db.pool, login)
        .await?
        .map(Owner::Organization)
        .ok_or_else(|| AppError::NotFound("Organization not found".to_string()))?;

    if !permissions::can_manage(user.id, &org) {
        return Err(AppError::Forbidden("Permission denied".to_string()));
    }
    Ok(org)
}

async fn create_org(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateOrgRequest>,
) -> Result<(StatusCode, Json<OrgResponse>)> {
    if !validate_name(&body.login) {
        return Err(AppError::Validation("Invalid organization name".to_string()));
    }
    if identity::login_taken(&state.db.pool, &body.login).await? {
        return Err(AppError::Duplicate("Login already taken".to_string()));
    }

    let now = Utc::now();
    let name = if body.name.is_empty() {
        body.login.clone()
    } else {
        body.name
    };

    let mut tx = state.db.pool.begin().await?;
    identity::claim_login(&mut *tx, &body.login, OwnerKind::Organization).await?;

    let mut org = sqlx::query_as::<_, Organization>(
        r#"
        INSERT INTO organizations (login, name, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&body.login)
    .bind(&name)
    .bind(&body.description)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO organization_members (org_id, user_id, created_at) VALUES (?, ?, ?)")
        .bind(org.id)
        .bind(user.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    org.member_ids = vec![user.id];
    tracing::info!(org_id = org.id, login = %org.login, created_by = %user.login, "organization created");

    Ok((StatusCode::CREATED, Json(org.into())))
}

async fn add_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path(login): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<OrgResponse>> {
    let org = managed_org(&state, &login, &user).await?;

    let member = identity::find_user_by_login(&state.db.pool, &body.login)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO organization_members (org_id, user_id, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT (org_id, user_id) DO NOTHING
        "#,
    )
    .bind(org.id())
    .bind(member.id)
    .bind(Utc::now())
    .execute(&state.db.pool)
    .await?;

    let org = identity::find_organization_by_login(&state.db.pool, &login)
        .await?
        .ok_or_else(|| AppError::NotFound("Organization not found".to_string()))?;
    Ok(Json(org.into()))
}

async fn create_org_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(login): Path<String>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectInfo>)> {
    let org = managed_org(&state, &login, &user).await?;
    create_for_owner(&state, &org, body).await
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{insert_user, send, test_app, token_for, TestDb};

    #[tokio::test]
    async fn create_org_and_add_members() {
        let db = TestDb::new().await;
        let app = test_app(&db);
        let alice = insert_user(&db.pool, "alice").await;
        let bob = insert_user(&db.pool, "bob").await;
        let alice_token = token_for(&alice);
        let bob_token = token_for(&bob);

        let (status, body) =
            send(&app, "POST", "/api/orgs", Some(&alice_token), Some(json!({ "login": "acme" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["member_ids"], json!([alice.id]));

        // Users and organizations share a namespace
        let (status, _) =
            send(&app, "POST", "/api/orgs", Some(&bob_token), Some(json!({ "login": "alice" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            "POST",
            "/api/orgs/acme/members",
            Some(&bob_token),
            Some(json!({ "login": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            "POST",
            "/api/orgs/acme/members",
            Some(&alice_token),
            Some(json!({ "login": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["member_ids"], json!([alice.id, bob.id]));

        let (status, _) = send(
            &app,
            "POST",
            "/api/orgs/acme/projects",
            Some(&bob_token),
            Some(json!({ "name": "site", "src_langs": "eng" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn user_and_organization_cannot_share_a_login() {
        let db = TestDb::new().await;
        let app = test_app(&db);
        let alice = insert_user(&db.pool, "alice").await;
        let token = token_for(&alice);

        for i in 0..10 {
            let login = format!("acme{i}");
            let register = send(
                &app,
                "POST",
                "/api/auth/register",
                None,
                Some(json!({
                    "login": login,
                    "email": format!("{login}@example.com"),
                    "password": "correct horse"
                })),
            );
            let create = send(
                &app,
                "POST",
                "/api/orgs",
                Some(&token),
                Some(json!({ "login": login })),
            );
            let ((user_status, _), (org_status, _)) = tokio::join!(register, create);

            let statuses = [user_status, org_status];
            assert_eq!(
                statuses.iter().filter(|s| **s == StatusCode::CREATED).count(),
                1,
                "{login}: {statuses:?}"
            );
            assert!(statuses.contains(&StatusCode::CONFLICT));

            let users = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE login = ?")
                .bind(&login)
                .fetch_one(&db.pool)
                .await
                .unwrap();
            let orgs =
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM organizations WHERE login = ?")
                    .bind(&login)
                    .fetch_one(&db.pool)
                    .await
                    .unwrap();
            assert_eq!(users + orgs, 1);
        }
    }

    #[tokio::test]
    async fn rejects_invalid_names_and_anonymous_callers() {
        let db = TestDb::new().await;
        let app = test_app(&db);
        let alice = insert_user(&db.pool, "alice").await;

        let (status, _) = send(&app, "POST", "/api/orgs", None, Some(json!({ "login": "acme" }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            "POST",
            "/api/orgs",
            Some(&token_for(&alice)),
            Some(json!({ "login": "a b" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
