use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::web::{
    AppState,
    responses::{ApiResult, internal_error},
};

const RECENT_LIMIT: i64 = 5;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemOverview {
    total_users: i64,
    subjects: i64,
    templates: i64,
    active_coordinators: i64,
}

pub async fn system_overview(State(state): State<AppState>) -> ApiResult<Json<SystemOverview>> {
    let pool = state.pool_ref();

    let (total_users, subjects, templates, active_coordinators) = tokio::try_join!(
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users").fetch_one(pool),
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subjects").fetch_one(pool),
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM templates").fetch_one(pool),
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users u
             WHERE u.role = 'COORDINATOR'
               AND EXISTS (SELECT 1 FROM subjects s WHERE s.coordinator_id = u.id)",
        )
        .fetch_one(pool),
    )
    .map_err(internal_error)?;

    Ok(Json(SystemOverview {
        total_users,
        subjects,
        templates,
        active_coordinators,
    }))
}

#[derive(Debug, FromRow, Serialize)]
pub struct RecentUser {
    id: i64,
    username: String,
    first_name: String,
    last_name: String,
    role: String,
    date_joined: DateTime<Utc>,
}

#[derive(Debug, FromRow, Serialize)]
pub struct RecentSubject {
    id: i64,
    #[serde(rename = "subjectCode")]
    subject_code: String,
    name: Option<String>,
    year: i32,
    semester: i32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow, Serialize)]
pub struct RecentTemplate {
    id: i64,
    name: String,
    version: i32,
    owner_username: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    recent_users: Vec<RecentUser>,
    recent_subjects: Vec<RecentSubject>,
    recent_templates: Vec<RecentTemplate>,
}

/// The newest users, subjects and templates, five of each.
pub async fn recent_activity(State(state): State<AppState>) -> ApiResult<Json<RecentActivity>> {
    let pool = state.pool_ref();

    let (recent_users, recent_subjects, recent_templates) = tokio::try_join!(
        sqlx::query_as::<_, RecentUser>(
            "SELECT id, username, first_name, last_name, role, date_joined
             FROM users ORDER BY date_joined DESC, id DESC LIMIT $1",
        )
        .bind(RECENT_LIMIT)
        .fetch_all(pool),
        sqlx::query_as::<_, RecentSubject>(
            "SELECT id, subject_code, name, year, semester, created_at
             FROM subjects ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(RECENT_LIMIT)
        .fetch_all(pool),
        sqlx::query_as::<_, RecentTemplate>(
            "SELECT t.id, t.name, t.version, u.username AS owner_username, t.created_at
             FROM templates t
             JOIN users u ON u.id = t.owner_id
             ORDER BY t.created_at DESC, t.id DESC LIMIT $1",
        )
        .bind(RECENT_LIMIT)
        .fetch_all(pool),
    )
    .map_err(internal_error)?;

    Ok(Json(RecentActivity {
        recent_users,
        recent_subjects,
        recent_templates,
    }))
}
