use std::{env, str::FromStr};

use anyhow::{Context, Result, anyhow};

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_SESSION_TTL_DAYS: i64 = 14;
const DEFAULT_SEED_ADMIN_USERNAME: &str = "admin";
const DEFAULT_SEED_ADMIN_PASSWORD: &str = "change-me";

/// Process configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub session_ttl_days: i64,
    pub secure_cookies: bool,
    pub seed_admin_username: String,
    pub seed_admin_password: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let session_ttl_days = parse_var("SESSION_TTL_DAYS", DEFAULT_SESSION_TTL_DAYS)?;
        if session_ttl_days <= 0 {
            return Err(anyhow!("SESSION_TTL_DAYS must be positive"));
        }

        Ok(Self {
            database_url,
            port: parse_var("PORT", DEFAULT_PORT)?,
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            session_ttl_days,
            secure_cookies: parse_flag(env::var("COOKIE_SECURE").ok().as_deref()),
            seed_admin_username: env::var("SEED_ADMIN_USERNAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SEED_ADMIN_USERNAME.to_string()),
            seed_admin_password: env::var("SEED_ADMIN_PASSWORD")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_SEED_ADMIN_PASSWORD.to_string()),
        })
    }

    /// Configuration for tests that never open a real connection.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/ai_scale_test".to_string(),
            port: DEFAULT_PORT,
            max_connections: 1,
            session_ttl_days: DEFAULT_SESSION_TTL_DAYS,
            secure_cookies: false,
            seed_admin_username: DEFAULT_SEED_ADMIN_USERNAME.to_string(),
            seed_admin_password: DEFAULT_SEED_ADMIN_PASSWORD.to_string(),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw}")),
        _ => Ok(default),
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
