//! Security alert repository

use crate::domain::{CreateSecurityAlertInput, SecurityAlert, StringUuid};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

const ALERT_COLUMNS: &str = r#"
    id, event_type, severity, source_address, tenant_id, user_id,
    event_count, window_mins, created_at, resolved_at, resolved_by
"#;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecurityAlertRepository: Send + Sync {
    async fn create(&self, input: &CreateSecurityAlertInput) -> Result<SecurityAlert>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<SecurityAlert>>;
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<SecurityAlert>>;
    async fn list_unresolved(&self, offset: i64, limit: i64) -> Result<Vec<SecurityAlert>>;
    async fn count(&self) -> Result<i64>;
    async fn count_unresolved(&self) -> Result<i64>;
    async fn resolve(
        &self,
        id: StringUuid,
        resolved_by: StringUuid,
        at: DateTime<Utc>,
    ) -> Result<SecurityAlert>;
}

pub struct SecurityAlertRepositoryImpl {
    pool: MySqlPool,
}

impl SecurityAlertRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecurityAlertRepository for SecurityAlertRepositoryImpl {
    async fn create(&self, input: &CreateSecurityAlertInput) -> Result<SecurityAlert> {
        let id = StringUuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO security_alerts (id, event_type, severity, source_address, tenant_id,
                                         user_id, event_count, window_mins, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(input.event_type)
        .bind(input.severity)
        .bind(&input.source_address)
        .bind(input.tenant_id)
        .bind(input.user_id)
        .bind(input.event_count)
        .bind(input.window_mins)
        .bind(input.created_at)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create security alert")))
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<SecurityAlert>> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM security_alerts WHERE id = ?");
        let alert = sqlx::query_as::<_, SecurityAlert>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(alert)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<SecurityAlert>> {
        let sql = format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM security_alerts
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#
        );
        let alerts = sqlx::query_as::<_, SecurityAlert>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(alerts)
    }

    async fn list_unresolved(&self, offset: i64, limit: i64) -> Result<Vec<SecurityAlert>> {
        let sql = format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM security_alerts
            WHERE resolved_at IS NULL
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#
        );
        let alerts = sqlx::query_as::<_, SecurityAlert>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(alerts)
    }

    async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM security_alerts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn count_unresolved(&self) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM security_alerts WHERE resolved_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn resolve(
        &self,
        id: StringUuid,
        resolved_by: StringUuid,
        at: DateTime<Utc>,
    ) -> Result<SecurityAlert> {
        let result = sqlx::query(
            r#"
            UPDATE security_alerts
            SET resolved_at = ?, resolved_by = ?
            WHERE id = ? AND resolved_at IS NULL
            "#,
        )
        .bind(at)
        .bind(resolved_by)
        .bind(id)
        .execute(&self.pool)
        .await?;

        let alert = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Security alert {} not found", id)))?;

        // Resolving twice keeps the first resolver
        if result.rows_affected() == 0 && !alert.is_resolved() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Failed to resolve security alert"
            )));
        }

        Ok(alert)
    }
}
