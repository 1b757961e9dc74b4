use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::info;

use crate::web::{
    AppState,
    extract::{JsonOrForm, flexible_i64, non_empty},
    responses::{ApiResult, bad_request, internal_error, is_foreign_key_violation, not_found},
};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AcknowledgementItemInput {
    #[serde(default)]
    task: String,
    #[serde(default, rename = "aiToolsUsed")]
    ai_tools_used: String,
    #[serde(default)]
    purpose: String,
    #[serde(default)]
    prompts: String,
}

#[derive(Deserialize)]
pub struct AcknowledgementForm {
    #[serde(default, rename = "templateId", deserialize_with = "flexible_i64")]
    template_id: Option<i64>,
    #[serde(default, rename = "formId", deserialize_with = "flexible_i64")]
    form_id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    items: Vec<AcknowledgementItemInput>,
}

#[derive(Serialize)]
pub struct AcknowledgementSaved {
    success: bool,
    #[serde(rename = "formId")]
    form_id: i64,
}

#[derive(Clone, Debug, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgementItemRow {
    pub id: i64,
    #[serde(skip)]
    pub form_id: i64,
    pub task: String,
    pub ai_tools_used: String,
    pub purpose: String,
    pub prompts: String,
}

#[derive(FromRow)]
struct FormRow {
    id: i64,
    template_id: i64,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgementFormDetails {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<AcknowledgementItemRow>,
}

/// Stores an acknowledgement form with its items. With `formId` the form is renamed and its
/// items replaced; otherwise a new form is attached to `templateId`.
pub async fn update_acknowledgement(
    State(state): State<AppState>,
    JsonOrForm(form): JsonOrForm<AcknowledgementForm>,
) -> ApiResult<(StatusCode, Json<AcknowledgementSaved>)> {
    let name = non_empty(form.name).ok_or_else(|| bad_request("name is required"))?;
    if form.form_id.is_none() && form.template_id.is_none() {
        return Err(bad_request("templateId is required"));
    }

    let mut tx = state.pool_ref().begin().await.map_err(internal_error)?;

    let (status, form_id) = match form.form_id {
        Some(form_id) => {
            let updated = sqlx::query("UPDATE acknowledgement_forms SET name = $2 WHERE id = $1")
                .bind(form_id)
                .bind(&name)
                .execute(&mut *tx)
                .await
                .map_err(internal_error)?;

            if updated.rows_affected() == 0 {
                return Err(not_found("Acknowledgement form not found"));
            }

            sqlx::query("DELETE FROM acknowledgement_form_items WHERE form_id = $1")
                .bind(form_id)
                .execute(&mut *tx)
                .await
                .map_err(internal_error)?;

            (StatusCode::OK, form_id)
        }
        None => {
            let inserted = sqlx::query_scalar::<_, i64>(
                "INSERT INTO acknowledgement_forms (template_id, name) VALUES ($1, $2) RETURNING id",
            )
            .bind(form.template_id)
            .bind(&name)
            .fetch_one(&mut *tx)
            .await;

            match inserted {
                Ok(form_id) => (StatusCode::CREATED, form_id),
                Err(err) if is_foreign_key_violation(&err) => {
                    return Err(not_found("Template not found"));
                }
                Err(err) => return Err(internal_error(err)),
            }
        }
    };

    insert_items(&mut *tx, form_id, &form.items)
        .await
        .map_err(internal_error)?;
    tx.commit().await.map_err(internal_error)?;

    info!(form_id, items = form.items.len(), "stored acknowledgement form");

    Ok((
        status,
        Json(AcknowledgementSaved {
            success: true,
            form_id,
        }),
    ))
}

async fn insert_items(
    conn: &mut PgConnection,
    form_id: i64,
    items: &[AcknowledgementItemInput],
) -> sqlx::Result<()> {
    for item in items {
        sqlx::query(
            "INSERT INTO acknowledgement_form_items (form_id, task, ai_tools_used, purpose, prompts)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(form_id)
        .bind(&item.task)
        .bind(&item.ai_tools_used)
        .bind(&item.purpose)
        .bind(&item.prompts)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct AcknowledgementQuery {
    #[serde(default, rename = "formId", deserialize_with = "flexible_i64")]
    form_id: Option<i64>,
}

pub async fn acknowledgement_details(
    State(state): State<AppState>,
    Query(query): Query<AcknowledgementQuery>,
) -> ApiResult<Json<AcknowledgementFormDetails>> {
    let form_id = query
        .form_id
        .ok_or_else(|| bad_request("formId is required"))?;

    let form = sqlx::query_as::<_, FormRow>(
        "SELECT id, template_id, name, created_at FROM acknowledgement_forms WHERE id = $1",
    )
    .bind(form_id)
    .fetch_optional(state.pool_ref())
    .await
    .map_err(internal_error)?
    .ok_or_else(|| not_found("Acknowledgement form not found"))?;

    let mut forms = attach_items(state.pool_ref(), vec![form])
        .await
        .map_err(internal_error)?;

    forms
        .pop()
        .map(Json)
        .ok_or_else(|| not_found("Acknowledgement form not found"))
}

/// All forms of a template, oldest first, each with its items.
pub async fn fetch_forms_for_template(
    pool: &PgPool,
    template_id: i64,
) -> sqlx::Result<Vec<AcknowledgementFormDetails>> {
    let forms = sqlx::query_as::<_, FormRow>(
        "SELECT id, template_id, name, created_at FROM acknowledgement_forms
         WHERE template_id = $1
         ORDER BY created_at, id",
    )
    .bind(template_id)
    .fetch_all(pool)
    .await?;

    attach_items(pool, forms).await
}

async fn attach_items(
    pool: &PgPool,
    forms: Vec<FormRow>,
) -> sqlx::Result<Vec<AcknowledgementFormDetails>> {
    if forms.is_empty() {
        return Ok(Vec::new());
    }

    let form_ids: Vec<i64> = forms.iter().map(|form| form.id).collect();
    let rows = sqlx::query_as::<_, AcknowledgementItemRow>(
        "SELECT id, form_id, task, ai_tools_used, purpose, prompts
         FROM acknowledgement_form_items
         WHERE form_id = ANY($1)
         ORDER BY id",
    )
    .bind(&form_ids)
    .fetch_all(pool)
    .await?;

    Ok(group_items(forms, rows))
}

fn group_items(
    forms: Vec<FormRow>,
    rows: Vec<AcknowledgementItemRow>,
) -> Vec<AcknowledgementFormDetails> {
    let mut by_form: HashMap<i64, Vec<AcknowledgementItemRow>> = HashMap::new();
    for row in rows {
        by_form.entry(row.form_id).or_default().push(row);
    }

    forms
        .into_iter()
        .map(|form| AcknowledgementFormDetails {
            items: by_form.remove(&form.id).unwrap_or_default(),
            id: form.id,
            template_id: form.template_id,
            name: form.name,
            created_at: form.created_at,
        })
        .collect()
}
