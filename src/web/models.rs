use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Student,
    Staff,
    Coordinator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Staff => "STAFF",
            Role::Coordinator => "COORDINATOR",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Some(Role::Student),
            "STAFF" => Some(Role::Staff),
            "COORDINATOR" => Some(Role::Coordinator),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Unknown or missing roles fall back to `Student`.
    pub fn coerce(value: Option<&str>) -> Self {
        value.and_then(Role::parse).unwrap_or(Role::Student)
    }

    /// Roles that can have taught subjects.
    pub fn teaches(&self) -> bool {
        matches!(self, Role::Coordinator | Role::Staff)
    }
}

#[derive(Clone, Debug, FromRow)]
pub struct UserProfileRow {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

#[derive(Clone, Debug, FromRow, Serialize)]
pub struct TaughtSubjectRow {
    pub id: i64,
    pub name: Option<String>,
    #[serde(rename = "subjectCode")]
    pub subject_code: String,
    pub year: i32,
    pub semester: i32,
}

/// One template row as listed in summaries, community search and duplication results.
#[derive(Clone, Debug, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummaryRow {
    pub template_id: i64,
    pub name: String,
    pub version: i32,
    pub subject_code: Option<String>,
    pub year: Option<i32>,
    pub semester: Option<i32>,
    pub owner_name: String,
    pub owner_username: String,
    pub is_publishable: bool,
    pub is_template: bool,
    pub created_at: DateTime<Utc>,
}

/// Column list for `TemplateSummaryRow`, expecting `templates t`, `users u` and `subjects s` aliases.
pub const TEMPLATE_SUMMARY_COLUMNS: &str = "t.id AS template_id, t.name, t.version,
    s.subject_code, s.year, s.semester,
    COALESCE(NULLIF(TRIM(u.first_name || ' ' || u.last_name), ''), u.username) AS owner_name,
    u.username AS owner_username, t.is_publishable, t.is_template, t.created_at";
