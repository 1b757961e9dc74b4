use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgConnection};

pub const TARGET_AI_USE_SCALE: &str = "ai_use_scale";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
        }
    }
}

/// Audit log entry. Rows are append-only.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLogRow {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub target_type: String,
    pub target_id: i64,
    pub detail: Value,
    pub created_at: DateTime<Utc>,
}

pub async fn record(
    conn: &mut PgConnection,
    actor_id: Option<i64>,
    action: AuditAction,
    target_type: &str,
    target_id: i64,
    detail: Value,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO audit_logs (actor_id, action, target_type, target_id, detail)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(actor_id)
    .bind(action.as_str())
    .bind(target_type)
    .bind(target_id)
    .bind(&detail)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn entries_for(
    conn: &mut PgConnection,
    target_type: &str,
    target_id: i64,
) -> sqlx::Result<Vec<AuditLogRow>> {
    sqlx::query_as::<_, AuditLogRow>(
        "SELECT id, actor_id, action, target_type, target_id, detail, created_at
         FROM audit_logs
         WHERE target_type = $1 AND target_id = $2
         ORDER BY created_at DESC, id DESC",
    )
    .bind(target_type)
    .bind(target_id)
    .fetch_all(conn)
    .await
}
