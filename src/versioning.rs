//! Version allocation for templates.
//!
//! Templates are append-only: every create, update or duplicate inserts a
//! new row whose `version` is one past the current maximum for the same
//! `(owner_id, name)` key. The maximum is read while holding a
//! transaction-scoped advisory lock on that key, so concurrent writers for
//! the same key serialise. The lock also covers keys with no rows yet,
//! which a `FOR UPDATE` row lock cannot. A unique-constraint conflict that
//! still slips through is retried once; a second conflict is reported to
//! the caller.
//!
//! Copies named `"<base> (n)"` pick `n` while holding a second lock scoped to
//! the owner, so concurrent duplicates of one template get distinct names.

use std::{collections::HashSet, future::Future};

use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::warn;

pub const TEMPLATE_VERSION_CONSTRAINT: &str = "templates_owner_name_version_key";

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("version conflict for template {name:?} owned by user {owner_id}")]
    Conflict { owner_id: i64, name: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A template row about to be inserted under a freshly allocated version.
#[derive(Clone, Debug)]
pub struct NewTemplate {
    pub owner_id: i64,
    pub subject_id: Option<i64>,
    pub name: String,
    pub scope: String,
    pub description: String,
    pub is_publishable: bool,
    pub is_template: bool,
    pub name_rule: NameRule,
    /// Copy items and acknowledgement forms from this template in the same transaction.
    pub copy_children_from: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameRule {
    /// Store under `name` exactly.
    AsGiven,
    /// Store under `"<base> (n)"`, where `base` is `name` without a copy counter and `n` is the
    /// smallest counter not yet used among the owner's templates.
    NextFreeCopy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertedTemplate {
    pub id: i64,
    pub name: String,
    pub version: i32,
}

pub fn is_version_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(TEMPLATE_VERSION_CONSTRAINT),
        _ => false,
    }
}

/// Locks the `(owner_id, name)` key for the rest of the transaction and
/// returns the next free version. Must run inside a transaction.
pub async fn next_version(conn: &mut PgConnection, owner_id: i64, name: &str) -> sqlx::Result<i32> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::TEXT || '/' || $2, 0))")
        .bind(owner_id)
        .bind(name)
        .execute(&mut *conn)
        .await?;

    let current: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) FROM templates WHERE owner_id = $1 AND name = $2",
    )
    .bind(owner_id)
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    Ok(current + 1)
}

/// Locks the owner's copy names for the rest of the transaction and returns the next free
/// `"<base> (n)"` for `source_name`.
pub async fn next_copy_name_locked(
    conn: &mut PgConnection,
    owner_id: i64,
    source_name: &str,
) -> sqlx::Result<String> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended('copy/' || $1::TEXT, 0))")
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;

    let base = strip_copy_suffix(source_name);
    let pattern = format!("{} (%)", escape_like(base));
    let siblings: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT name FROM templates WHERE owner_id = $1 AND name LIKE $2 ESCAPE '\\'",
    )
    .bind(owner_id)
    .bind(&pattern)
    .fetch_all(&mut *conn)
    .await?;

    Ok(next_copy_name(base, siblings.iter().map(String::as_str)))
}

/// Runs `attempt`, and runs it exactly once more if it reports a version
/// conflict. Any other outcome of the first attempt is returned as is.
pub async fn retry_once_on_conflict<T, F, Fut>(mut attempt: F) -> Result<T, VersionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VersionError>>,
{
    match attempt().await {
        Err(VersionError::Conflict { owner_id, name }) => {
            warn!(owner_id, %name, "template version conflict, retrying once");
            attempt().await
        }
        outcome => outcome,
    }
}

pub async fn insert_versioned(
    pool: &PgPool,
    template: &NewTemplate,
) -> Result<InsertedTemplate, VersionError> {
    retry_once_on_conflict(move || insert_once(pool, template)).await
}

async fn insert_once(
    pool: &PgPool,
    template: &NewTemplate,
) -> Result<InsertedTemplate, VersionError> {
    let mut tx = pool.begin().await?;

    let name = match template.name_rule {
        NameRule::AsGiven => template.name.clone(),
        NameRule::NextFreeCopy => {
            next_copy_name_locked(&mut *tx, template.owner_id, &template.name).await?
        }
    };
    let version = next_version(&mut *tx, template.owner_id, &name).await?;

    let inserted = sqlx::query_scalar::<_, i64>(
        "INSERT INTO templates
             (owner_id, subject_id, name, scope, description, version, is_publishable, is_template)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING id",
    )
    .bind(template.owner_id)
    .bind(template.subject_id)
    .bind(&name)
    .bind(&template.scope)
    .bind(&template.description)
    .bind(version)
    .bind(template.is_publishable)
    .bind(template.is_template)
    .fetch_one(&mut *tx)
    .await;

    let id = match inserted {
        Ok(id) => id,
        Err(err) if is_version_conflict(&err) => {
            return Err(VersionError::Conflict {
                owner_id: template.owner_id,
                name,
            });
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(source_id) = template.copy_children_from {
        copy_children(&mut *tx, source_id, id).await?;
    }

    tx.commit().await?;

    Ok(InsertedTemplate { id, name, version })
}

/// `"Essay (2)"` becomes `"Essay"`; names without a numeric suffix are returned trimmed.
pub fn strip_copy_suffix(name: &str) -> &str {
    let trimmed = name.trim_end();
    if let Some(open) = trimmed.rfind(" (") {
        let counter = trimmed[open + 2..].strip_suffix(')');
        if counter.is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        {
            return &trimmed[..open];
        }
    }
    trimmed
}

/// `"<base> (n)"` for the smallest `n >= 1` not already taken among `existing`.
pub fn next_copy_name<'a>(base: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let taken: HashSet<u32> = existing
        .into_iter()
        .filter_map(|name| copy_counter(base, name))
        .collect();

    let mut counter = 1;
    while taken.contains(&counter) {
        counter += 1;
    }

    format!("{base} ({counter})")
}

fn copy_counter(base: &str, name: &str) -> Option<u32> {
    name.strip_prefix(base)?
        .strip_prefix(" (")?
        .strip_suffix(')')?
        .parse()
        .ok()
        .filter(|counter| *counter > 0)
}

/// Escapes `LIKE` wildcards so user text matches literally (paired with `ESCAPE '\'`).
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

async fn copy_children(conn: &mut PgConnection, source_id: i64, target_id: i64) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO template_items
             (template_id, task, ai_use_scale_id, instructions_to_students, examples,
              ai_generated_content, use_acknowledgement)
         SELECT $2, task, ai_use_scale_id, instructions_to_students, examples,
                ai_generated_content, use_acknowledgement
         FROM template_items WHERE template_id = $1 ORDER BY id",
    )
    .bind(source_id)
    .bind(target_id)
    .execute(&mut *conn)
    .await?;

    let forms: Vec<(i64, String)> = sqlx::query_as(
        "SELECT id, name FROM acknowledgement_forms WHERE template_id = $1 ORDER BY id",
    )
    .bind(source_id)
    .fetch_all(&mut *conn)
    .await?;

    for (form_id, form_name) in forms {
        let new_form_id: i64 = sqlx::query_scalar(
            "INSERT INTO acknowledgement_forms (template_id, name) VALUES ($1, $2) RETURNING id",
        )
        .bind(target_id)
        .bind(&form_name)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query(
            "INSERT INTO acknowledgement_form_items (form_id, task, ai_tools_used, purpose, prompts)
             SELECT $2, task, ai_tools_used, purpose, prompts
             FROM acknowledgement_form_items WHERE form_id = $1 ORDER BY id",
        )
        .bind(form_id)
        .bind(new_form_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}
