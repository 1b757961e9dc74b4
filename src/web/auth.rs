use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{Json, extract::State, http::StatusCode};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::web::{
    AppState,
    extract::{JsonOrForm, non_empty},
    models::Role,
    responses::{
        ApiResult, JsonError, Success, conflict, internal_error, is_unique_violation,
        json_error,
    },
};

pub const SESSION_COOKIE: &str = "sessionid";
pub const CSRF_COOKIE: &str = "csrftoken";

#[derive(Clone, FromRow)]
pub struct DbUserAuth {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Clone, Debug, FromRow, Serialize)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: String,
}

impl AuthUser {
    pub fn role(&self) -> Role {
        Role::coerce(Some(&self.role))
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    success: bool,
    user: AuthUser,
}

#[derive(Serialize)]
pub struct RegisteredUser {
    username: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    success: bool,
    user: RegisteredUser,
}

#[derive(Serialize)]
pub struct SessionResponse {
    authenticated: bool,
    user: Option<AuthUser>,
}

#[derive(Serialize)]
pub struct CsrfResponse {
    #[serde(rename = "csrfToken")]
    csrf_token: String,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonOrForm(form): JsonOrForm<LoginForm>,
) -> ApiResult<(CookieJar, Json<LoginResponse>)> {
    let username = non_empty(form.username);
    let password = form.password.filter(|p| !p.is_empty());
    let (Some(username), Some(password)) = (username, password) else {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "username and password required",
        ));
    };

    debug!(%username, "attempting login");

    let user = fetch_user_by_username(state.pool_ref(), &username)
        .await
        .map_err(internal_error)?
        .ok_or_else(invalid_credentials)?;

    if !verify_password(&password, &user.password_hash) {
        return Err(invalid_credentials());
    }

    let ttl_days = state.config().session_ttl_days;
    let session_token = Uuid::new_v4();
    let expires_at = Utc::now() + ChronoDuration::days(ttl_days);

    sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(session_token)
        .bind(user.id)
        .bind(expires_at)
        .execute(state.pool_ref())
        .await
        .map_err(internal_error)?;

    let mut cookie = Cookie::new(SESSION_COOKIE, session_token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(state.config().secure_cookies);
    cookie.set_max_age(CookieDuration::days(ttl_days));

    info!(user_id = user.id, "user logged in");

    let response = LoginResponse {
        success: true,
        user: AuthUser {
            id: user.id,
            username: user.username,
            role: user.role,
        },
    };
    Ok((jar.add(cookie), Json(response)))
}

pub async fn register(
    State(state): State<AppState>,
    JsonOrForm(form): JsonOrForm<RegisterForm>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let username = non_empty(form.username);
    let password = form.password.filter(|p| !p.is_empty());
    let first_name = non_empty(form.first_name);
    let last_name = non_empty(form.last_name);
    let role = non_empty(form.role);

    let (Some(username), Some(password), Some(first_name), Some(last_name), Some(role)) =
        (&username, &password, &first_name, &last_name, &role)
    else {
        let missing = missing_fields(&[
            ("username", username.is_some()),
            ("password", password.is_some()),
            ("first_name", first_name.is_some()),
            ("last_name", last_name.is_some()),
            ("role", role.is_some()),
        ]);
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            format!("{} required", missing.join(", ")),
        ));
    };
    let role = registrable_role(role);

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
        .bind(username)
        .fetch_one(state.pool_ref())
        .await
        .map_err(internal_error)?;
    if exists {
        return Err(conflict("username already exists"));
    }

    let password_hash = hash_password(password).map_err(|err| {
        error!(?err, "failed to hash password during registration");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error occurred")
    })?;

    let result = sqlx::query(
        "INSERT INTO users (username, password_hash, first_name, last_name, email, role)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(username)
    .bind(password_hash)
    .bind(first_name)
    .bind(last_name)
    .bind(non_empty(form.email))
    .bind(role.as_str())
    .execute(state.pool_ref())
    .await;

    match result {
        Ok(_) => {
            info!(%username, role = role.as_str(), "registered user");
            Ok((
                StatusCode::CREATED,
                Json(RegisterResponse {
                    success: true,
                    user: RegisteredUser {
                        username: username.clone(),
                    },
                }),
            ))
        }
        Err(err) if is_unique_violation(&err) => Err(conflict("username already exists")),
        Err(err) => Err(internal_error(err)),
    }
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<Success>) {
    if let Some(token) = session_token(&jar) {
        if let Err(err) = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(token)
            .execute(state.pool_ref())
            .await
        {
            error!(?err, "failed to remove session during logout");
        }
    }

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));

    (jar.remove(removal), Success::ok())
}

pub async fn session(State(state): State<AppState>, jar: CookieJar) -> ApiResult<Json<SessionResponse>> {
    let user = current_user(&state, &jar).await?;
    Ok(Json(SessionResponse {
        authenticated: user.is_some(),
        user,
    }))
}

pub async fn csrf_token(jar: CookieJar) -> (CookieJar, Json<CsrfResponse>) {
    let token = jar
        .get(CSRF_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(generate_csrf_token);

    let mut cookie = Cookie::new(CSRF_COOKIE, token.clone());
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);

    (jar.add(cookie), Json(CsrfResponse { csrf_token: token }))
}

fn generate_csrf_token() -> String {
    let mut bytes = [0_u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn session_token(jar: &CookieJar) -> Option<Uuid> {
    let cookie = jar.get(SESSION_COOKIE)?;
    Uuid::parse_str(cookie.value()).ok()
}

/// The logged-in user, if the session cookie names a live session.
pub async fn current_user(state: &AppState, jar: &CookieJar) -> Result<Option<AuthUser>, JsonError> {
    let Some(token) = session_token(jar) else {
        return Ok(None);
    };

    fetch_user_by_session(state.pool_ref(), token)
        .await
        .map_err(internal_error)
}

pub async fn require_user(state: &AppState, jar: &CookieJar) -> Result<AuthUser, JsonError> {
    current_user(state, jar)
        .await?
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "authentication required"))
}

pub async fn require_admin(state: &AppState, jar: &CookieJar) -> Result<AuthUser, JsonError> {
    let user = require_user(state, jar).await?;
    if user.role() != Role::Admin {
        return Err(json_error(StatusCode::FORBIDDEN, "admin role required"));
    }
    Ok(user)
}

fn missing_fields<'a>(fields: &[(&'a str, bool)]) -> Vec<&'a str> {
    fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect()
}

/// Public registration never grants ADMIN; that role comes from the seed admin.
fn registrable_role(value: &str) -> Role {
    match Role::coerce(Some(value)) {
        Role::Admin => Role::Student,
        role => role,
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub async fn fetch_user_by_username(
    pool: &PgPool,
    username: &str,
) -> sqlx::Result<Option<DbUserAuth>> {
    sqlx::query_as::<_, DbUserAuth>(
        "SELECT id, username, password_hash, role FROM users WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_user_by_session(pool: &PgPool, token: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>(
        "SELECT users.id, users.username, users.role FROM sessions JOIN users ON users.id = sessions.user_id WHERE sessions.id = $1 AND sessions.expires_at > NOW()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

fn invalid_credentials() -> JsonError {
    json_error(StatusCode::UNAUTHORIZED, "Incorrect login details")
}
