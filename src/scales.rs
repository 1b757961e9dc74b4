use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::audit::{self, AuditAction, TARGET_AI_USE_SCALE};

const ACKNOWLEDGEMENT_URL: &str = "https://students.unimelb.edu.au/academic-skills/resources/academic-integrity/acknowledging-AI-tools-and-technologies";

/// Field values for an AI use scale level, as seeded or submitted by an admin.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScaleFields {
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub acknowledgement_required: bool,
    #[serde(default)]
    pub acknowledgement_text: String,
    #[serde(default)]
    pub acknowledgement_url: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    "#FFFFFF".to_string()
}

#[derive(Clone, Debug, FromRow, Serialize)]
pub struct AiUseScaleRow {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub instructions: String,
    pub acknowledgement_required: bool,
    pub acknowledgement_text: String,
    pub acknowledgement_url: String,
    pub position: i32,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn default_scales() -> Vec<ScaleFields> {
    vec![
        ScaleFields {
            code: "N".to_string(),
            title: "No AI".to_string(),
            instructions: "No AI use for this task is allowed.".to_string(),
            acknowledgement_required: false,
            acknowledgement_text: String::new(),
            acknowledgement_url: String::new(),
            position: 1,
            color: "#FF6B6B".to_string(),
        },
        ScaleFields {
            code: "R1".to_string(),
            title: "AI-Assisted Proofreading".to_string(),
            instructions: "You may use AI tools only for:\n\
                - Basic spell-checking and grammar-checking (without rewording or rewriting)\n\
                - Translating individual words (not sentences)"
                .to_string(),
            acknowledgement_required: true,
            acknowledgement_text:
                "Students MUST add an AI-use declaration at the end of their submission."
                    .to_string(),
            acknowledgement_url: ACKNOWLEDGEMENT_URL.to_string(),
            position: 2,
            color: "#F4B183".to_string(),
        },
        ScaleFields {
            code: "R2".to_string(),
            title: "AI-Assisted Contextual Research".to_string(),
            instructions: "You may use AI tools only for:\n\
                - Understanding the broad context (industry overview, general background)"
                .to_string(),
            acknowledgement_required: false,
            acknowledgement_text: String::new(),
            acknowledgement_url: String::new(),
            position: 3,
            color: "#FFF475".to_string(),
        },
        ScaleFields {
            code: "G".to_string(),
            title: "AI for General Learning (not assessment-oriented)".to_string(),
            instructions: "For general learning, you may use AI for:\n\
                - Browsing information (not assessment-specific questions)\n\
                - Explaining concepts with examples/simplified explanations\n\
                - Creating revision quizzes, flashcards, memorization tools"
                .to_string(),
            acknowledgement_required: false,
            acknowledgement_text: "N/A".to_string(),
            acknowledgement_url: String::new(),
            position: 4,
            color: "#A9C5D9".to_string(),
        },
    ]
}

/// Inserts the default levels that are missing. A default whose code or title is already taken
/// is left alone, so admin edits and renames survive restarts.
pub async fn ensure_default_scales(pool: &PgPool) -> Result<()> {
    for scale in default_scales() {
        let inserted = sqlx::query(
            "INSERT INTO ai_use_scales
                 (code, title, instructions, acknowledgement_required, acknowledgement_text,
                  acknowledgement_url, position, color)
             SELECT $1, $2, $3, $4, $5, $6, $7, $8
             WHERE NOT EXISTS (
                 SELECT 1 FROM ai_use_scales WHERE code = $1 OR title = $2
             )
             ON CONFLICT DO NOTHING",
        )
        .bind(&scale.code)
        .bind(&scale.title)
        .bind(&scale.instructions)
        .bind(scale.acknowledgement_required)
        .bind(&scale.acknowledgement_text)
        .bind(&scale.acknowledgement_url)
        .bind(scale.position)
        .bind(&scale.color)
        .execute(pool)
        .await
        .with_context(|| format!("failed to seed AI use scale {}", scale.code))?;

        if inserted.rows_affected() > 0 {
            info!(code = %scale.code, "seeded AI use scale");
        }
    }

    Ok(())
}

pub async fn list_scales(pool: &PgPool) -> sqlx::Result<Vec<AiUseScaleRow>> {
    sqlx::query_as::<_, AiUseScaleRow>(
        "SELECT id, code, title, instructions, acknowledgement_required, acknowledgement_text,
                acknowledgement_url, position, color, created_at, updated_at
         FROM ai_use_scales ORDER BY position, code",
    )
    .fetch_all(pool)
    .await
}

#[derive(Clone, Copy, Debug, FromRow)]
pub struct ResolvedLevel {
    pub id: i64,
    pub acknowledgement_required: bool,
}

/// Looks a level up by its code or its title, ignoring case.
pub async fn resolve_level(pool: &PgPool, name: &str) -> sqlx::Result<Option<ResolvedLevel>> {
    sqlx::query_as::<_, ResolvedLevel>(
        "SELECT id, acknowledgement_required FROM ai_use_scales
         WHERE LOWER(code) = LOWER($1) OR LOWER(title) = LOWER($1)
         ORDER BY (LOWER(code) = LOWER($1)) DESC
         LIMIT 1",
    )
    .bind(name.trim())
    .fetch_optional(pool)
    .await
}

pub async fn create_scale(
    pool: &PgPool,
    actor_id: i64,
    fields: &ScaleFields,
) -> sqlx::Result<i64> {
    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO ai_use_scales
             (code, title, instructions, acknowledgement_required, acknowledgement_text,
              acknowledgement_url, position, color)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING id",
    )
    .bind(&fields.code)
    .bind(&fields.title)
    .bind(&fields.instructions)
    .bind(fields.acknowledgement_required)
    .bind(&fields.acknowledgement_text)
    .bind(&fields.acknowledgement_url)
    .bind(fields.position)
    .bind(&fields.color)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        Some(actor_id),
        AuditAction::Create,
        TARGET_AI_USE_SCALE,
        id,
        json!({ "after": fields }),
    )
    .await?;

    tx.commit().await?;
    Ok(id)
}

/// Returns `Ok(false)` when no scale has the given id.
pub async fn update_scale(
    pool: &PgPool,
    actor_id: i64,
    id: i64,
    fields: &ScaleFields,
) -> sqlx::Result<bool> {
    let mut tx = pool.begin().await?;

    let before = sqlx::query_as::<_, AiUseScaleRow>(
        "SELECT id, code, title, instructions, acknowledgement_required, acknowledgement_text,
                acknowledgement_url, position, color, created_at, updated_at
         FROM ai_use_scales WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(before) = before else {
        return Ok(false);
    };

    sqlx::query(
        "UPDATE ai_use_scales SET
             code = $2, title = $3, instructions = $4, acknowledgement_required = $5,
             acknowledgement_text = $6, acknowledgement_url = $7, position = $8, color = $9,
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(&fields.code)
    .bind(&fields.title)
    .bind(&fields.instructions)
    .bind(fields.acknowledgement_required)
    .bind(&fields.acknowledgement_text)
    .bind(&fields.acknowledgement_url)
    .bind(fields.position)
    .bind(&fields.color)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        Some(actor_id),
        AuditAction::Update,
        TARGET_AI_USE_SCALE,
        id,
        json!({ "before": before, "after": fields }),
    )
    .await?;

    tx.commit().await?;
    Ok(true)
}
