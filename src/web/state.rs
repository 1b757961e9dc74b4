use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use argon2::password_hash::PasswordHash;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};

use crate::{config::AppConfig, scales};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    config: Arc<AppConfig>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        scales::ensure_default_scales(&pool)
            .await
            .context("failed to seed default AI use scales")?;

        Ok(Self::from_pool(pool, config))
    }

    pub fn from_pool(pool: PgPool, config: AppConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    /// State backed by a pool that only connects on first use.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let config = AppConfig::for_tests();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&config.database_url)
            .expect("lazy pool from a static URL");
        Self::from_pool(pool, config)
    }

    pub async fn ensure_seed_admin(&self) -> Result<()> {
        let has_admin: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE role = 'ADMIN')")
                .fetch_one(&self.pool)
                .await
                .context("failed to verify admin presence")?;

        if has_admin {
            return Ok(());
        }

        let password_hash = crate::web::auth::hash_password(&self.config.seed_admin_password)
            .map_err(|err| anyhow!("failed to hash seed admin password: {err}"))?;

        let inserted = sqlx::query(
            "INSERT INTO users (username, password_hash, first_name, last_name, role)
             VALUES ($1, $2, 'System', 'Admin', 'ADMIN')
             ON CONFLICT (username) DO NOTHING",
        )
        .bind(&self.config.seed_admin_username)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .context("failed to insert seed admin user")?;

        if inserted.rows_affected() > 0 {
            warn!(
                username = %self.config.seed_admin_username,
                "Seeded default admin user. Change its password promptly."
            );
        } else {
            warn!(
                username = %self.config.seed_admin_username,
                "No admin user exists and the seed username is taken by a non-admin account"
            );
        }

        Ok(())
    }

    /// Re-hashes stored passwords that are not argon2/PHC strings, e.g. rows loaded from fixtures.
    pub async fn rehash_plaintext_passwords(&self) -> Result<u64> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, password_hash FROM users")
            .fetch_all(&self.pool)
            .await
            .context("failed to load stored password hashes")?;

        let mut rehashed = 0_u64;
        for (user_id, stored) in rows {
            if PasswordHash::new(&stored).is_ok() {
                continue;
            }

            let password_hash = crate::web::auth::hash_password(&stored)
                .map_err(|err| anyhow!("failed to hash password for user {user_id}: {err}"))?;

            sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
                .bind(user_id)
                .bind(password_hash)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to store re-hashed password for user {user_id}"))?;

            rehashed += 1;
        }

        if rehashed > 0 {
            info!(rehashed, "re-hashed plaintext passwords");
        }

        Ok(rehashed)
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
