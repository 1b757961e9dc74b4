use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;

use crate::web::{
    AppState,
    extract::{JsonOrForm, flexible_i64, non_empty},
    models::{Role, TaughtSubjectRow},
    responses::{ApiResult, bad_request, conflict, internal_error, is_unique_violation, not_found},
    users::{UsernameQuery, require_profile},
};

#[derive(Serialize)]
pub struct TaughtSubjectsResponse {
    taught_subjects: Vec<TaughtSubjectRow>,
}

pub async fn taught_subjects(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> ApiResult<Json<TaughtSubjectsResponse>> {
    let user = require_profile(state.pool_ref(), query.username).await?;

    if !Role::coerce(Some(&user.role)).teaches() {
        return Ok(Json(TaughtSubjectsResponse {
            taught_subjects: Vec::new(),
        }));
    }

    let taught_subjects = sqlx::query_as::<_, TaughtSubjectRow>(
        "SELECT id, name, subject_code, year, semester
         FROM subjects
         WHERE coordinator_id = $1
         ORDER BY year DESC, semester DESC, subject_code",
    )
    .bind(user.id)
    .fetch_all(state.pool_ref())
    .await
    .map_err(internal_error)?;

    Ok(Json(TaughtSubjectsResponse { taught_subjects }))
}

/// `(subjectCode, year, semester)` as submitted with a template or enrolment.
pub struct SubjectKey {
    pub code: String,
    pub year: i32,
    pub semester: i32,
}

impl SubjectKey {
    pub fn from_parts(
        code: Option<String>,
        year: Option<i64>,
        semester: Option<i64>,
    ) -> ApiResult<Self> {
        let code = non_empty(code).ok_or_else(|| bad_request("subjectCode is required"))?;
        let year = year
            .and_then(|y| i32::try_from(y).ok())
            .ok_or_else(|| bad_request("year is required"))?;
        let semester = semester
            .and_then(|s| i32::try_from(s).ok())
            .ok_or_else(|| bad_request("semester is required"))?;

        Ok(Self {
            code: code.to_ascii_uppercase(),
            year,
            semester,
        })
    }
}

pub async fn find_subject(pool: &PgPool, key: &SubjectKey) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar(
        "SELECT id FROM subjects WHERE subject_code = $1 AND year = $2 AND semester = $3",
    )
    .bind(&key.code)
    .bind(key.year)
    .bind(key.semester)
    .fetch_optional(pool)
    .await
}

/// Returns the subject's id, creating a bare subject row when none matches.
pub async fn get_or_create_subject(pool: &PgPool, key: &SubjectKey) -> sqlx::Result<i64> {
    let inserted: Option<i64> = sqlx::query_scalar(
        "INSERT INTO subjects (subject_code, year, semester) VALUES ($1, $2, $3)
         ON CONFLICT (subject_code, year, semester) DO NOTHING
         RETURNING id",
    )
    .bind(&key.code)
    .bind(key.year)
    .bind(key.semester)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(id) => {
            info!(code = %key.code, year = key.year, semester = key.semester, "created subject");
            Ok(id)
        }
        None => find_subject(pool, key).await?.ok_or(sqlx::Error::RowNotFound),
    }
}

/// Makes `user_id` the subject's coordinator unless one is already assigned.
pub async fn claim_subject(pool: &PgPool, subject_id: i64, user_id: i64) -> sqlx::Result<bool> {
    let claimed = sqlx::query(
        "UPDATE subjects SET coordinator_id = $2 WHERE id = $1 AND coordinator_id IS NULL",
    )
    .bind(subject_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if claimed.rows_affected() > 0 {
        info!(subject_id, user_id, "assigned subject coordinator");
    }
    Ok(claimed.rows_affected() > 0)
}

#[derive(Deserialize)]
pub struct EnrolForm {
    #[serde(default)]
    username: Option<String>,
    #[serde(default, rename = "subjectCode")]
    subject_code: Option<String>,
    #[serde(default, deserialize_with = "flexible_i64")]
    year: Option<i64>,
    #[serde(default, deserialize_with = "flexible_i64")]
    semester: Option<i64>,
}

#[derive(Serialize)]
pub struct EnrolResponse {
    success: bool,
    #[serde(rename = "enrolmentId")]
    enrolment_id: i64,
}

pub async fn enrol(
    State(state): State<AppState>,
    JsonOrForm(form): JsonOrForm<EnrolForm>,
) -> ApiResult<(StatusCode, Json<EnrolResponse>)> {
    let key = SubjectKey::from_parts(form.subject_code, form.year, form.semester)?;
    let student = require_profile(state.pool_ref(), form.username).await?;

    if Role::coerce(Some(&student.role)) != Role::Student {
        return Err(bad_request("only students can be enrolled"));
    }

    let subject_id = find_subject(state.pool_ref(), &key)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Subject not found"))?;

    let result = sqlx::query_scalar::<_, i64>(
        "INSERT INTO enrolments (subject_id, student_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(subject_id)
    .bind(student.id)
    .fetch_one(state.pool_ref())
    .await;

    match result {
        Ok(enrolment_id) => Ok((
            StatusCode::CREATED,
            Json(EnrolResponse {
                success: true,
                enrolment_id,
            }),
        )),
        Err(err) if is_unique_violation(&err) => Err(conflict("student is already enrolled")),
        Err(err) => Err(internal_error(err)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::web::test_support::{app_with_pool, post_json, send};

    #[test]
    fn subject_key_normalises_code() {
        let key = SubjectKey::from_parts(Some(" comp10001 ".to_string()), Some(2025), Some(1))
            .unwrap();
        assert_eq!(key.code, "COMP10001");
        assert_eq!(key.year, 2025);
        assert_eq!(key.semester, 1);
    }

    #[test]
    fn subject_key_reports_first_missing_part() {
        let Err((status, Json(body))) = SubjectKey::from_parts(None, Some(2025), Some(1)) else {
            panic!("missing code must be rejected");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "subjectCode is required");

        let Err((_, Json(body))) =
            SubjectKey::from_parts(Some("FINM7403".to_string()), Some(2025), None)
        else {
            panic!("missing semester must be rejected");
        };
        assert_eq!(body.error, "semester is required");
    }

    async fn insert_user(pool: &PgPool, username: &str, role: &str) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO users (username, password_hash, first_name, last_name, role)
             VALUES ($1, 'x', 'Test', 'User', $2) RETURNING id",
        )
        .bind(username)
        .bind(role)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn enrolment(username: &str, code: &str) -> serde_json::Value {
        json!({"username": username, "subjectCode": code, "year": 2025, "semester": 2})
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn enrolment_checks_subject_role_and_duplicates(pool: PgPool) {
        insert_user(&pool, "sam", "STUDENT").await;
        insert_user(&pool, "tutor", "STAFF").await;
        let key = SubjectKey::from_parts(Some("FINM7403".to_string()), Some(2025), Some(2)).unwrap();
        get_or_create_subject(&pool, &key).await.unwrap();

        let (status, body) = send(
            app_with_pool(pool.clone()),
            post_json("/subject/enrol/", enrolment("sam", "COMP9999")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Subject not found");

        let (status, body) = send(
            app_with_pool(pool.clone()),
            post_json("/subject/enrol/", enrolment("tutor", "FINM7403")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "only students can be enrolled");

        let (status, body) = send(
            app_with_pool(pool.clone()),
            post_json("/subject/enrol/", enrolment("sam", "finm7403")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["enrolmentId"].as_i64().is_some());

        let (status, body) = send(
            app_with_pool(pool.clone()),
            post_json("/subject/enrol/", enrolment("sam", "FINM7403")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "student is already enrolled");

        let enrolments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrolments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enrolments, 1);
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn claiming_keeps_the_first_coordinator(pool: PgPool) {
        let first = insert_user(&pool, "first", "COORDINATOR").await;
        let second = insert_user(&pool, "second", "COORDINATOR").await;
        let key = SubjectKey::from_parts(Some("FINM7403".to_string()), Some(2025), Some(2)).unwrap();
        let subject_id = get_or_create_subject(&pool, &key).await.unwrap();

        assert!(claim_subject(&pool, subject_id, first).await.unwrap());
        assert!(!claim_subject(&pool, subject_id, second).await.unwrap());

        let coordinator: Option<i64> =
            sqlx::query_scalar("SELECT coordinator_id FROM subjects WHERE id = $1")
                .bind(subject_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(coordinator, Some(first));
    }
}
