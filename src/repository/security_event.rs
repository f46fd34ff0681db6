//! Security event log repository (append-only)

use crate::domain::{SecurityEvent, SecurityEventType};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecurityEventRepository: Send + Sync {
    async fn append(&self, event: &SecurityEvent) -> Result<()>;
    /// All event types from one source address since `since` (inclusive)
    async fn count_by_source_since(&self, source_address: &str, since: DateTime<Utc>)
        -> Result<i64>;
    async fn count_by_type_since(
        &self,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
    ) -> Result<i64>;
    async fn count_by_type_and_source_since(
        &self,
        event_type: SecurityEventType,
        source_address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64>;
    /// Newest first. `event_type = None` returns every type.
    async fn list_recent(
        &self,
        event_type: Option<SecurityEventType>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SecurityEvent>>;
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct SecurityEventRepositoryImpl {
    pool: MySqlPool,
}

impl SecurityEventRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecurityEventRepository for SecurityEventRepositoryImpl {
    async fn append(&self, event: &SecurityEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO security_events (id, event_type, user_id, tenant_id, source_address,
                                         severity, risk_score, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id)
        .bind(event.event_type)
        .bind(event.user_id)
        .bind(event.tenant_id)
        .bind(&event.source_address)
        .bind(event.severity)
        .bind(event.risk_score)
        .bind(event.details.as_ref().map(sqlx::types::Json))
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_by_source_since(
        &self,
        source_address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM security_events
            WHERE source_address = ? AND created_at >= ?
            "#,
        )
        .bind(source_address)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn count_by_type_since(
        &self,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM security_events
            WHERE event_type = ? AND created_at >= ?
            "#,
        )
        .bind(event_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn count_by_type_and_source_since(
        &self,
        event_type: SecurityEventType,
        source_address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM security_events
            WHERE event_type = ? AND source_address = ? AND created_at >= ?
            "#,
        )
        .bind(event_type)
        .bind(source_address)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn list_recent(
        &self,
        event_type: Option<SecurityEventType>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SecurityEvent>> {
        let events = sqlx::query_as::<_, SecurityEvent>(
            r#"
            SELECT id, event_type, user_id, tenant_id, source_address, severity,
                   risk_score, details, created_at
            FROM security_events
            WHERE (? IS NULL OR event_type = ?) AND created_at >= ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(event_type)
        .bind(event_type)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM security_events WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
