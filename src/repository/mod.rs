//! Data access layer (Repository pattern)

pub mod approval;
pub mod revocation;
pub mod security_alert;
pub mod security_event;
pub mod tenant;
pub mod user;

pub use approval::ApprovalRepository;
pub use revocation::RevocationRepository;
pub use security_alert::SecurityAlertRepository;
pub use security_event::SecurityEventRepository;
pub use tenant::TenantRepository;
pub use user::UserRepository;

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

/// Open the shared MySQL pool
pub async fn connect(config: &DatabaseConfig) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(&config.url)
        .await
        .context("Failed to connect to database")
}

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &MySqlPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")
}
