use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    audit::{self, AuditLogRow, TARGET_AI_USE_SCALE},
    scales::{self, AiUseScaleRow, ScaleFields},
    web::{
        AppState,
        auth::require_admin,
        extract::{JsonOrForm, flexible_bool, flexible_i64, non_empty},
        responses::{
            ApiResult, JsonError, Success, bad_request, conflict, internal_error,
            is_unique_violation, not_found,
        },
    },
};

#[derive(Serialize)]
pub struct ScaleList {
    scales: Vec<AiUseScaleRow>,
}

pub async fn list_scales(State(state): State<AppState>) -> ApiResult<Json<ScaleList>> {
    let scales = scales::list_scales(state.pool_ref())
        .await
        .map_err(internal_error)?;
    Ok(Json(ScaleList { scales }))
}

#[derive(Default, Deserialize)]
pub struct ScaleForm {
    #[serde(default, deserialize_with = "flexible_i64")]
    id: Option<i64>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    acknowledgement_required: Option<bool>,
    #[serde(default)]
    acknowledgement_text: Option<String>,
    #[serde(default)]
    acknowledgement_url: Option<String>,
    #[serde(default, deserialize_with = "flexible_i64")]
    position: Option<i64>,
    #[serde(default)]
    color: Option<String>,
}

impl ScaleForm {
    fn into_fields(self) -> Result<ScaleFields, JsonError> {
        let code = non_empty(self.code).ok_or_else(|| bad_request("code is required"))?;
        let title = non_empty(self.title).ok_or_else(|| bad_request("title is required"))?;
        let position = i32::try_from(self.position.unwrap_or(0))
            .map_err(|_| bad_request("position is out of range"))?;
        let color = non_empty(self.color).unwrap_or_else(|| "#FFFFFF".to_string());
        if !is_hex_color(&color) {
            return Err(bad_request("color must look like #RRGGBB"));
        }

        Ok(ScaleFields {
            code: code.to_ascii_uppercase(),
            title,
            instructions: self.instructions.unwrap_or_default(),
            acknowledgement_required: self.acknowledgement_required.unwrap_or(false),
            acknowledgement_text: self.acknowledgement_text.unwrap_or_default(),
            acknowledgement_url: self.acknowledgement_url.unwrap_or_default(),
            position,
            color: color.to_ascii_uppercase(),
        })
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Serialize)]
pub struct ScaleCreated {
    success: bool,
    #[serde(rename = "scaleId")]
    scale_id: i64,
}

pub async fn create_scale(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonOrForm(form): JsonOrForm<ScaleForm>,
) -> ApiResult<(StatusCode, Json<ScaleCreated>)> {
    let admin = require_admin(&state, &jar).await?;
    let fields = form.into_fields()?;

    match scales::create_scale(state.pool_ref(), admin.id, &fields).await {
        Ok(scale_id) => {
            info!(scale_id, code = %fields.code, actor = %admin.username, "created AI use scale");
            Ok((
                StatusCode::CREATED,
                Json(ScaleCreated {
                    success: true,
                    scale_id,
                }),
            ))
        }
        Err(err) if is_unique_violation(&err) => {
            Err(conflict("a scale with this code or title already exists"))
        }
        Err(err) => Err(internal_error(err)),
    }
}

pub async fn update_scale(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonOrForm(form): JsonOrForm<ScaleForm>,
) -> ApiResult<Json<Success>> {
    let admin = require_admin(&state, &jar).await?;
    let id = form.id.ok_or_else(|| bad_request("id is required"))?;
    let fields = form.into_fields()?;

    match scales::update_scale(state.pool_ref(), admin.id, id, &fields).await {
        Ok(true) => {
            info!(scale_id = id, actor = %admin.username, "updated AI use scale");
            Ok(Success::ok())
        }
        Ok(false) => Err(not_found("Scale not found")),
        Err(err) if is_unique_violation(&err) => {
            Err(conflict("a scale with this code or title already exists"))
        }
        Err(err) => Err(internal_error(err)),
    }
}

#[derive(Deserialize)]
pub struct ScaleHistoryQuery {
    #[serde(default, rename = "scaleId", deserialize_with = "flexible_i64")]
    scale_id: Option<i64>,
}

#[derive(Serialize)]
pub struct ScaleHistory {
    entries: Vec<AuditLogRow>,
}

/// Audit trail of one scale, newest first.
pub async fn scale_history(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<ScaleHistoryQuery>,
) -> ApiResult<Json<ScaleHistory>> {
    require_admin(&state, &jar).await?;
    let scale_id = query
        .scale_id
        .ok_or_else(|| bad_request("scaleId is required"))?;

    let mut conn = state.pool_ref().acquire().await.map_err(internal_error)?;
    let entries = audit::entries_for(&mut conn, TARGET_AI_USE_SCALE, scale_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(ScaleHistory { entries }))
}
