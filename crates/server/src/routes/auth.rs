use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::{OwnerKind, User},
    error::{is_unique_violation, AppError, Result},
    middleware::auth::AuthUser,
    services::{identity, languages, projects::validate_name},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/github", post(link_github))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub password: String,
    /// `|`-joined language codes.
    #[serde(default)]
    pub prefer_langs: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Login or email.
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkGithubRequest {
    pub github_id: i64,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub name: String,
    pub github_id: Option<i64>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            login: user.login,
            email: user.email,
            name: user.name,
            github_id: user.github_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub login: String,
    pub exp: usize,
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub fn create_token(user_id: i64, login: &str, secret: &str) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::days(7))
        .ok_or_else(|| AppError::Internal("Token expiry overflow".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        login: login.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    // Logins show up in project URLs
    if !validate_name(&body.login) {
        return Err(AppError::Validation("Invalid login".to_string()));
    }
    if body.email.is_empty() || !body.email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if body.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    let prefer_langs = languages::parse_list(&body.prefer_langs);
    if !languages::validate_all(&prefer_langs) {
        return Err(AppError::Validation("Invalid preferred language".to_string()));
    }

    if identity::login_taken(&state.db.pool, &body.login).await? {
        return Err(AppError::Duplicate("Login already taken".to_string()));
    }

    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&body.email)
        .fetch_one(&state.db.pool)
        .await?;
    if existing > 0 {
        return Err(AppError::Duplicate("Email already registered".to_string()));
    }

    let password_hash = hash_password(&body.password)?;
    let now = Utc::now();
    let name = if body.name.is_empty() {
        body.login.clone()
    } else {
        body.name
    };

    let mut tx = state.db.pool.begin().await?;
    identity::claim_login(&mut *tx, &body.login, OwnerKind::User).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (login, name, email, prefer_langs, password_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&body.login)
    .bind(&name)
    .bind(&body.email)
    .bind(languages::format_list(&prefer_langs))
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Duplicate("Email already registered".to_string())
        } else {
            AppError::Database(e)
        }
    })?;
    tx.commit().await?;

    tracing::info!(user_id = user.id, login = %user.login, "user registered");

    let token = create_token(user.id, &user.login, &state.config.jwt_secret)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = identity::find_user_by_login_or_email(&state.db.pool, &body.login)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !verify_password(&body.password, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }

    let token = create_token(user.id, &user.login, &state.config.jwt_secret)?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

async fn link_github(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<LinkGithubRequest>,
) -> Result<Json<UserResponse>> {
    let user = identity::link_github_id(&state.db.pool, user.id, body.github_id).await?;
    Ok(Json(user.into()))
}
