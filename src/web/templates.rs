use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::{
    scales,
    versioning::{self, NameRule, NewTemplate, VersionError},
    web::{
        AppState,
        acknowledgements::{self, AcknowledgementFormDetails},
        extract::{JsonOrForm, flexible_bool, flexible_i64, non_empty},
        models::{Role, TEMPLATE_SUMMARY_COLUMNS, TemplateSummaryRow},
        responses::{
            ApiResult, JsonError, Success, bad_request, conflict, internal_error,
            is_foreign_key_violation, is_unique_violation, not_found,
        },
        subjects::{SubjectKey, claim_subject, get_or_create_subject},
        users::{UsernameQuery, require_profile},
    },
};

#[derive(Deserialize)]
pub struct TemplateForm {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "subjectCode")]
    subject_code: Option<String>,
    #[serde(default, deserialize_with = "flexible_i64")]
    year: Option<i64>,
    #[serde(default, deserialize_with = "flexible_i64")]
    semester: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "isPublishable", deserialize_with = "flexible_bool")]
    is_publishable: Option<bool>,
    #[serde(default, rename = "isTemplate", deserialize_with = "flexible_bool")]
    is_template: Option<bool>,
}

#[derive(Serialize)]
pub struct TemplateCreated {
    success: bool,
    #[serde(rename = "templateId")]
    template_id: i64,
    version: i32,
}

/// Creates a template row. Resubmitting an existing name stores the next version rather than
/// editing the previous row. Any `version` sent by the client is ignored.
pub async fn create_or_update_template(
    State(state): State<AppState>,
    JsonOrForm(form): JsonOrForm<TemplateForm>,
) -> ApiResult<(StatusCode, Json<TemplateCreated>)> {
    let name = non_empty(form.name).ok_or_else(|| bad_request("name is required"))?;
    let subject = SubjectKey::from_parts(form.subject_code, form.year, form.semester)?;
    let owner = require_profile(state.pool_ref(), form.username).await?;

    let subject_id = get_or_create_subject(state.pool_ref(), &subject)
        .await
        .map_err(internal_error)?;
    if Role::coerce(Some(&owner.role)).teaches() {
        claim_subject(state.pool_ref(), subject_id, owner.id)
            .await
            .map_err(internal_error)?;
    }

    let template = NewTemplate {
        owner_id: owner.id,
        subject_id: Some(subject_id),
        name,
        scope: form.scope.unwrap_or_default(),
        description: form.description.unwrap_or_default(),
        is_publishable: form.is_publishable.unwrap_or(true),
        is_template: form.is_template.unwrap_or(true),
        name_rule: NameRule::AsGiven,
        copy_children_from: None,
    };

    let inserted = versioning::insert_versioned(state.pool_ref(), &template)
        .await
        .map_err(version_error)?;

    info!(
        template_id = inserted.id,
        owner_id = owner.id,
        version = inserted.version,
        "stored template version"
    );

    Ok((
        StatusCode::CREATED,
        Json(TemplateCreated {
            success: true,
            template_id: inserted.id,
            version: inserted.version,
        }),
    ))
}

fn version_error(err: VersionError) -> JsonError {
    match err {
        VersionError::Conflict { .. } => {
            conflict("another version of this template was saved concurrently, please retry")
        }
        VersionError::Database(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
pub struct TemplateItemForm {
    #[serde(default, rename = "templateId", deserialize_with = "flexible_i64")]
    template_id: Option<i64>,
    #[serde(default, rename = "templateItemId", deserialize_with = "flexible_i64")]
    template_item_id: Option<i64>,
    #[serde(default)]
    task: Option<String>,
    #[serde(default, rename = "aiUseScaleLevel_name")]
    level_name: Option<String>,
    #[serde(default, rename = "instructionsToStudents")]
    instructions_to_students: Option<String>,
    #[serde(default)]
    examples: Option<String>,
    #[serde(default, rename = "aiGeneratedContent")]
    ai_generated_content: Option<String>,
    #[serde(default, rename = "useAcknowledgement", deserialize_with = "flexible_bool")]
    use_acknowledgement: Option<bool>,
}

#[derive(Serialize)]
pub struct TemplateItemSaved {
    success: bool,
    #[serde(rename = "templateItemId")]
    template_item_id: i64,
}

/// Adds a task row to a template, or rewrites one when `templateItemId` is given.
pub async fn update_template_item(
    State(state): State<AppState>,
    JsonOrForm(form): JsonOrForm<TemplateItemForm>,
) -> ApiResult<(StatusCode, Json<TemplateItemSaved>)> {
    let template_id = form
        .template_id
        .ok_or_else(|| bad_request("templateId is required"))?;
    let task = non_empty(form.task).ok_or_else(|| bad_request("task is required"))?;

    let level = match non_empty(form.level_name) {
        Some(name) => Some(
            scales::resolve_level(state.pool_ref(), &name)
                .await
                .map_err(internal_error)?
                .ok_or_else(|| bad_request(format!("unknown AI use scale level: {name}")))?,
        ),
        None => None,
    };

    let use_acknowledgement = form
        .use_acknowledgement
        .or(level.map(|level| level.acknowledgement_required))
        .unwrap_or(false);
    let instructions = form.instructions_to_students.unwrap_or_default();
    let examples = form.examples.unwrap_or_default();
    let ai_generated_content = form.ai_generated_content.unwrap_or_default();
    let level_id = level.map(|level| level.id);

    if let Some(item_id) = form.template_item_id {
        let result = sqlx::query(
            "UPDATE template_items SET
                 task = $3, ai_use_scale_id = $4, instructions_to_students = $5, examples = $6,
                 ai_generated_content = $7, use_acknowledgement = $8
             WHERE id = $1 AND template_id = $2
               AND NOT EXISTS (
                   SELECT 1 FROM templates t
                   JOIN templates newer
                     ON newer.owner_id = t.owner_id AND newer.name = t.name
                    AND newer.version > t.version
                   WHERE t.id = $2)",
        )
        .bind(item_id)
        .bind(template_id)
        .bind(&task)
        .bind(level_id)
        .bind(&instructions)
        .bind(&examples)
        .bind(&ai_generated_content)
        .bind(use_acknowledgement)
        .execute(state.pool_ref())
        .await
        .map_err(internal_error)?;

        if result.rows_affected() == 0 {
            return Err(
                if is_superseded(state.pool_ref(), template_id).await.map_err(internal_error)? {
                    conflict("only the latest version of a template can be edited")
                } else {
                    not_found("Template item not found")
                },
            );
        }

        return Ok((
            StatusCode::OK,
            Json(TemplateItemSaved {
                success: true,
                template_item_id: item_id,
            }),
        ));
    }

    let inserted = sqlx::query_scalar::<_, i64>(
        "INSERT INTO template_items
             (template_id, task, ai_use_scale_id, instructions_to_students, examples,
              ai_generated_content, use_acknowledgement)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id",
    )
    .bind(template_id)
    .bind(&task)
    .bind(level_id)
    .bind(&instructions)
    .bind(&examples)
    .bind(&ai_generated_content)
    .bind(use_acknowledgement)
    .fetch_one(state.pool_ref())
    .await;

    match inserted {
        Ok(template_item_id) => Ok((
            StatusCode::CREATED,
            Json(TemplateItemSaved {
                success: true,
                template_item_id,
            }),
        )),
        Err(err) if is_foreign_key_violation(&err) => Err(not_found("Template not found")),
        Err(err) => Err(internal_error(err)),
    }
}

/// True when a later version shares the template's owner and name.
async fn is_superseded(pool: &PgPool, template_id: i64) -> sqlx::Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS(
             SELECT 1 FROM templates t
             JOIN templates newer
               ON newer.owner_id = t.owner_id AND newer.name = t.name
              AND newer.version > t.version
             WHERE t.id = $1)",
    )
    .bind(template_id)
    .fetch_one(pool)
    .await
}

#[derive(Serialize)]
pub struct TemplateSummaryResponse {
    templates: Vec<TemplateSummaryRow>,
}

/// Templates owned by the user or shared with them, newest first.
pub async fn summary_templates(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> ApiResult<Json<TemplateSummaryResponse>> {
    let user = require_profile(state.pool_ref(), query.username).await?;

    let sql = format!(
        "SELECT {TEMPLATE_SUMMARY_COLUMNS}
         FROM templates t
         JOIN users u ON u.id = t.owner_id
         LEFT JOIN subjects s ON s.id = t.subject_id
         WHERE t.owner_id = $1
            OR EXISTS (
                SELECT 1 FROM template_ownerships o
                WHERE o.template_id = t.id AND o.owner_id = $1
            )
         ORDER BY t.created_at DESC, t.id DESC"
    );

    let templates = sqlx::query_as::<_, TemplateSummaryRow>(&sql)
        .bind(user.id)
        .fetch_all(state.pool_ref())
        .await
        .map_err(internal_error)?;

    Ok(Json(TemplateSummaryResponse { templates }))
}

pub async fn fetch_summary(pool: &PgPool, template_id: i64) -> sqlx::Result<Option<TemplateSummaryRow>> {
    let sql = format!(
        "SELECT {TEMPLATE_SUMMARY_COLUMNS}
         FROM templates t
         JOIN users u ON u.id = t.owner_id
         LEFT JOIN subjects s ON s.id = t.subject_id
         WHERE t.id = $1"
    );

    sqlx::query_as::<_, TemplateSummaryRow>(&sql)
        .bind(template_id)
        .fetch_optional(pool)
        .await
}

#[derive(Deserialize)]
pub struct TemplateDetailsQuery {
    #[serde(default, rename = "templateId", deserialize_with = "flexible_i64")]
    template_id: Option<i64>,
    #[serde(default, deserialize_with = "flexible_i64")]
    id: Option<i64>,
}

#[derive(FromRow)]
struct TemplateRecord {
    id: i64,
    name: String,
    version: i32,
    owner_id: i64,
    owner_username: String,
    scope: String,
    description: String,
    is_publishable: bool,
    is_template: bool,
    created_at: DateTime<Utc>,
    subject_code: Option<String>,
    subject_name: Option<String>,
    subject_year: Option<i32>,
    subject_semester: Option<i32>,
}

#[derive(Serialize)]
pub struct SubjectSummary {
    code: String,
    name: Option<String>,
    semester: i32,
    year: i32,
}

#[derive(Clone, Debug, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateItemRow {
    pub id: i64,
    pub task: String,
    pub instructions_to_students: String,
    pub examples: String,
    pub ai_generated_content: String,
    pub use_acknowledgement: bool,
    #[serde(rename = "aiUseScaleLevel__name")]
    pub ai_use_scale_level_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDetails {
    id: i64,
    name: String,
    version: i32,
    owner_id: i64,
    owner_username: String,
    subject: Option<SubjectSummary>,
    scope: String,
    description: String,
    is_publishable: bool,
    is_template: bool,
    created_at: DateTime<Utc>,
    shared_with: Vec<String>,
    #[serde(rename = "template_items")]
    template_items: Vec<TemplateItemRow>,
    #[serde(rename = "acknowledgement_forms")]
    acknowledgement_forms: Vec<AcknowledgementFormDetails>,
}

pub async fn template_details(
    State(state): State<AppState>,
    Query(query): Query<TemplateDetailsQuery>,
) -> ApiResult<Json<TemplateDetails>> {
    let template_id = query
        .template_id
        .or(query.id)
        .ok_or_else(|| bad_request("templateId is required"))?;
    let pool = state.pool_ref();

    let record = sqlx::query_as::<_, TemplateRecord>(
        "SELECT t.id, t.name, t.version, t.owner_id, u.username AS owner_username, t.scope,
                t.description, t.is_publishable, t.is_template, t.created_at,
                s.subject_code, s.name AS subject_name, s.year AS subject_year,
                s.semester AS subject_semester
         FROM templates t
         JOIN users u ON u.id = t.owner_id
         LEFT JOIN subjects s ON s.id = t.subject_id
         WHERE t.id = $1",
    )
    .bind(template_id)
    .fetch_optional(pool)
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("Template not found"))?;

    let template_items = sqlx::query_as::<_, TemplateItemRow>(
        "SELECT i.id, i.task, i.instructions_to_students, i.examples, i.ai_generated_content,
                i.use_acknowledgement, a.title AS ai_use_scale_level_name
         FROM template_items i
         LEFT JOIN ai_use_scales a ON a.id = i.ai_use_scale_id
         WHERE i.template_id = $1
         ORDER BY i.id",
    )
    .bind(template_id)
    .fetch_all(pool)
    .await
    .map_err(internal_error)?;

    let shared_with: Vec<String> = sqlx::query_scalar(
        "SELECT u.username FROM template_ownerships o
         JOIN users u ON u.id = o.owner_id
         WHERE o.template_id = $1
         ORDER BY u.username",
    )
    .bind(template_id)
    .fetch_all(pool)
    .await
    .map_err(internal_error)?;

    let acknowledgement_forms = acknowledgements::fetch_forms_for_template(pool, template_id)
        .await
        .map_err(internal_error)?;

    let subject = match (record.subject_code, record.subject_year, record.subject_semester) {
        (Some(code), Some(year), Some(semester)) => Some(SubjectSummary {
            code,
            name: record.subject_name,
            semester,
            year,
        }),
        _ => None,
    };

    Ok(Json(TemplateDetails {
        id: record.id,
        name: record.name,
        version: record.version,
        owner_id: record.owner_id,
        owner_username: record.owner_username,
        subject,
        scope: record.scope,
        description: record.description,
        is_publishable: record.is_publishable,
        is_template: record.is_template,
        created_at: record.created_at,
        shared_with,
        template_items,
        acknowledgement_forms,
    }))
}

#[derive(Deserialize)]
pub struct TemplateIdForm {
    #[serde(default, rename = "templateId", deserialize_with = "flexible_i64")]
    template_id: Option<i64>,
    #[serde(default)]
    username: Option<String>,
}

/// Deletes a template; items, shares and acknowledgement forms go with it.
pub async fn delete_template(
    State(state): State<AppState>,
    JsonOrForm(form): JsonOrForm<TemplateIdForm>,
) -> ApiResult<Json<Success>> {
    let template_id = form
        .template_id
        .ok_or_else(|| bad_request("templateId is required"))?;

    let result = sqlx::query("DELETE FROM templates WHERE id = $1")
        .bind(template_id)
        .execute(state.pool_ref())
        .await
        .map_err(internal_error)?;

    if result.rows_affected() == 0 {
        return Err(not_found("Template not found"));
    }

    info!(template_id, "deleted template");
    Ok(Success::ok())
}

#[derive(FromRow)]
struct DuplicateSource {
    id: i64,
    owner_id: i64,
    subject_id: Option<i64>,
    name: String,
    scope: String,
    description: String,
    is_publishable: bool,
    is_template: bool,
}

#[derive(Serialize)]
pub struct TemplateDuplicated {
    success: bool,
    new_template: TemplateSummaryRow,
}

/// Copies a template, with its items and acknowledgement forms, for the requesting user
/// (or the original owner when no username is sent). The copy is named `"<base> (n)"`.
pub async fn duplicate_template(
    State(state): State<AppState>,
    JsonOrForm(form): JsonOrForm<TemplateIdForm>,
) -> ApiResult<(StatusCode, Json<TemplateDuplicated>)> {
    let template_id = form
        .template_id
        .ok_or_else(|| bad_request("templateId is required"))?;
    let pool = state.pool_ref();

    let source = sqlx::query_as::<_, DuplicateSource>(
        "SELECT id, owner_id, subject_id, name, scope, description, is_publishable, is_template
         FROM templates WHERE id = $1",
    )
    .bind(template_id)
    .fetch_optional(pool)
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("Template not found"))?;

    let owner_id = match non_empty(form.username) {
        Some(username) => require_profile(pool, Some(username)).await?.id,
        None => source.owner_id,
    };

    let copy = NewTemplate {
        owner_id,
        subject_id: source.subject_id,
        name: source.name,
        scope: source.scope,
        description: source.description,
        is_publishable: source.is_publishable,
        is_template: source.is_template,
        name_rule: NameRule::NextFreeCopy,
        copy_children_from: Some(source.id),
    };

    let inserted = versioning::insert_versioned(pool, &copy)
        .await
        .map_err(version_error)?;

    let new_template = fetch_summary(pool, inserted.id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Template not found"))?;

    info!(
        source_id = source.id,
        template_id = inserted.id,
        name = %new_template.name,
        "duplicated template"
    );

    Ok((
        StatusCode::CREATED,
        Json(TemplateDuplicated {
            success: true,
            new_template,
        }),
    ))
}

/// Grants another user shared ownership of a template.
pub async fn share_template(
    State(state): State<AppState>,
    JsonOrForm(form): JsonOrForm<TemplateIdForm>,
) -> ApiResult<(StatusCode, Json<Success>)> {
    let template_id = form
        .template_id
        .ok_or_else(|| bad_request("templateId is required"))?;
    let pool = state.pool_ref();
    let user = require_profile(pool, form.username).await?;

    let owner_id: i64 = sqlx::query_scalar("SELECT owner_id FROM templates WHERE id = $1")
        .bind(template_id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Template not found"))?;

    if owner_id == user.id {
        return Err(bad_request("user already owns this template"));
    }

    let result =
        sqlx::query("INSERT INTO template_ownerships (template_id, owner_id) VALUES ($1, $2)")
            .bind(template_id)
            .bind(user.id)
            .execute(pool)
            .await;

    match result {
        Ok(_) => Ok((StatusCode::CREATED, Success::ok())),
        Err(err) if is_unique_violation(&err) => {
            Err(conflict("template is already shared with this user"))
        }
        Err(err) if is_foreign_key_violation(&err) => Err(not_found("Template not found")),
        Err(err) => Err(internal_error(err)),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::web::test_support::{app_with_pool, get, post_json, send, test_app};

    #[tokio::test]
    async fn create_requires_a_name() {
        let (status, body) = send(
            test_app(),
            post_json(
                "/template/update/",
                json!({"username": "coord", "subjectCode": "FINM7403", "year": 2025, "semester": 2}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "name is required");
    }

    #[tokio::test]
    async fn create_requires_subject_fields() {
        let (status, body) = send(
            test_app(),
            post_json("/template/update/", json!({"username": "coord", "name": "Essay"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "subjectCode is required");
    }

    #[tokio::test]
    async fn item_update_requires_template_and_task() {
        let (status, body) =
            send(test_app(), post_json("/templateitem/update/", json!({"task": "Essay"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "templateId is required");

        let (status, body) =
            send(test_app(), post_json("/templateitem/update/", json!({"templateId": 4}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "task is required");
    }

    #[tokio::test]
    async fn details_delete_and_duplicate_require_template_id() {
        let (status, _) = send(test_app(), get("/template/details/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(test_app(), post_json("/template/delete/", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = send(test_app(), post_json("/template/duplicate/", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
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

    fn template_payload(name: &str) -> serde_json::Value {
        json!({
            "username": "coord",
            "name": name,
            "subjectCode": "FINM7403",
            "year": 2025,
            "semester": 2,
            "scope": "Course-level",
            "description": "Integration template",
            "isPublishable": true,
            "isTemplate": true,
        })
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn resubmitting_a_template_allocates_dense_versions(pool: PgPool) {
        insert_user(&pool, "coord", "COORDINATOR").await;

        let mut versions = Vec::new();
        for _ in 0..3 {
            let (status, body) = send(
                app_with_pool(pool.clone()),
                post_json("/template/update/", template_payload("My Template")),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            versions.push(body["version"].as_i64().unwrap());
        }
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn deleting_a_template_cascades_to_children(pool: PgPool) {
        scales::ensure_default_scales(&pool).await.unwrap();
        insert_user(&pool, "coord", "COORDINATOR").await;
        let (_, created) = send(
            app_with_pool(pool.clone()),
            post_json("/template/update/", template_payload("Essay")),
        )
        .await;
        let template_id = created["templateId"].as_i64().unwrap();

        let (status, _) = send(
            app_with_pool(pool.clone()),
            post_json(
                "/templateitem/update/",
                json!({"templateId": template_id, "task": "Draft", "aiUseScaleLevel_name": "N"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            app_with_pool(pool.clone()),
            post_json(
                "/acknowledgement/update/",
                json!({"templateId": template_id, "name": "Declaration", "items": [{"task": "Draft"}]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            app_with_pool(pool.clone()),
            post_json("/template/delete/", json!({"templateId": template_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM template_items")
            .fetch_one(&pool)
            .await
            .unwrap();
        let forms: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM acknowledgement_forms")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!((items, forms), (0, 0));
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn duplicates_take_the_smallest_free_counter(pool: PgPool) {
        insert_user(&pool, "coord", "COORDINATOR").await;
        let (_, created) = send(
            app_with_pool(pool.clone()),
            post_json("/template/update/", template_payload("Essay")),
        )
        .await;
        let template_id = created["templateId"].as_i64().unwrap();

        let mut names = Vec::new();
        for _ in 0..2 {
            let (status, body) = send(
                app_with_pool(pool.clone()),
                post_json("/template/duplicate/", json!({"templateId": template_id})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            names.push(body["new_template"]["name"].as_str().unwrap().to_string());
        }
        assert_eq!(names, vec!["Essay (1)", "Essay (2)"]);
    }

    async fn create_template(pool: &PgPool, name: &str) -> i64 {
        let (status, body) = send(
            app_with_pool(pool.clone()),
            post_json("/template/update/", template_payload(name)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["templateId"].as_i64().unwrap()
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn coordinators_take_over_unassigned_subjects(pool: PgPool) {
        insert_user(&pool, "coord", "COORDINATOR").await;
        create_template(&pool, "Essay").await;

        let (status, body) = send(
            app_with_pool(pool.clone()),
            get("/info/taught_subjects/?username=coord"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let subjects = body["taught_subjects"].as_array().unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0]["subjectCode"], "FINM7403");

        insert_user(&pool, "other", "STAFF").await;
        let mut payload = template_payload("Report");
        payload["username"] = json!("other");
        send(app_with_pool(pool.clone()), post_json("/template/update/", payload)).await;

        let (_, body) = send(app_with_pool(pool), get("/info/taught_subjects/?username=other")).await;
        assert_eq!(body, json!({"taught_subjects": []}));
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn sharing_rejects_owner_and_repeats(pool: PgPool) {
        insert_user(&pool, "coord", "COORDINATOR").await;
        insert_user(&pool, "tutor", "STAFF").await;
        let template_id = create_template(&pool, "Essay").await;
        let share = |username: &str| {
            post_json(
                "/template/share/",
                json!({"templateId": template_id, "username": username}),
            )
        };

        let (status, body) = send(app_with_pool(pool.clone()), share("coord")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "user already owns this template");

        let (status, _) = send(app_with_pool(pool.clone()), share("tutor")).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(app_with_pool(pool.clone()), share("tutor")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "template is already shared with this user");

        let (status, body) =
            send(app_with_pool(pool), get("/template/summary/?username=tutor")).await;
        assert_eq!(status, StatusCode::OK);
        let templates = body["templates"].as_array().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0]["templateId"], template_id);
        assert_eq!(templates[0]["ownerUsername"], "coord");
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn superseded_versions_keep_their_items(pool: PgPool) {
        insert_user(&pool, "coord", "COORDINATOR").await;
        let first = create_template(&pool, "Essay").await;

        let (_, body) = send(
            app_with_pool(pool.clone()),
            post_json("/templateitem/update/", json!({"templateId": first, "task": "Draft"})),
        )
        .await;
        let item_id = body["templateItemId"].as_i64().unwrap();
        let (status, _) = send(
            app_with_pool(pool.clone()),
            post_json(
                "/templateitem/update/",
                json!({"templateId": first, "templateItemId": item_id, "task": "Outline"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let latest = create_template(&pool, "Essay").await;
        let (status, body) = send(
            app_with_pool(pool.clone()),
            post_json(
                "/templateitem/update/",
                json!({"templateId": first, "templateItemId": item_id, "task": "Rewritten"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "only the latest version of a template can be edited");

        let task: String = sqlx::query_scalar("SELECT task FROM template_items WHERE id = $1")
            .bind(item_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(task, "Outline");

        let (status, _) = send(
            app_with_pool(pool),
            post_json(
                "/templateitem/update/",
                json!({"templateId": latest, "templateItemId": item_id, "task": "x"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
