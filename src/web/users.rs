use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::web::{
    AppState,
    extract::non_empty,
    models::UserProfileRow,
    responses::{ApiResult, bad_request, internal_error, not_found},
};

#[derive(Deserialize)]
pub struct UsernameQuery {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Serialize)]
pub struct UserDetails {
    first_name: String,
    last_name: String,
    username: String,
    role: String,
}

pub async fn user_details(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> ApiResult<Json<UserDetails>> {
    let user = require_profile(state.pool_ref(), query.username).await?;

    Ok(Json(UserDetails {
        first_name: user.first_name,
        last_name: user.last_name,
        username: user.username,
        role: user.role,
    }))
}

pub async fn fetch_profile(pool: &PgPool, username: &str) -> sqlx::Result<Option<UserProfileRow>> {
    sqlx::query_as::<_, UserProfileRow>(
        "SELECT id, username, first_name, last_name, role FROM users WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
}

/// Resolves a required `username` parameter to a profile: 400 when blank, 404 when unknown.
pub async fn require_profile(pool: &PgPool, username: Option<String>) -> ApiResult<UserProfileRow> {
    let username = non_empty(username).ok_or_else(|| bad_request("username is required"))?;

    fetch_profile(pool, &username)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("User not found"))
}
