use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::{error::AppError, routes::auth::Claims, AppState};

/// The authenticated requester. Handlers that require sign-in take
/// `AuthUser`; handlers that only vary by requester take `Option<AuthUser>`.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: i64,
    pub login: String,
}

fn user_from_headers(headers: &HeaderMap, secret: &str) -> Option<AuthUser> {
    let token = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    Some(AuthUser {
        id: token_data.claims.sub.parse().ok()?,
        login: token_data.claims.login,
    })
}

/// Attaches the requester to the request when a valid bearer token is
/// present. Requests without one pass through anonymously.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(user) = user_from_headers(request.headers(), &state.config.jwt_secret) {
        request.extensions_mut().insert(user);
    }

    next.run(request).await
}

// Extractor for getting the authenticated user from request extensions
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
