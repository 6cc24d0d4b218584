use axum::{extract::Path, routing::get, Json, Router};

use crate::{
    error::{AppError, Result},
    services::languages::{self, Language},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_languages))
        .route("/:lang", get(get_language))
}

async fn list_languages() -> Json<&'static [Language]> {
    Json(languages::all())
}

/// `:lang` is either a catalog id or a code.
async fn get_language(Path(lang): Path<String>) -> Result<Json<Language>> {
    let found = match lang.parse::<u32>() {
        Ok(id) => languages::resolve_by_id(id),
        Err(_) => languages::resolve_by_code(&lang),
    };

    found
        .copied()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Language not found".to_string()))
}
