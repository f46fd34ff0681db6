//! Revoked credential store

use crate::domain::{RevocationEntry, StringUuid, UserRevocation};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

/// Persistent side of the revocation registry. Implemented for MySQL here and
/// for Redis in [`crate::cache`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RevocationRepository: Send + Sync {
    /// Upsert; revoking an already revoked token keeps the later expiry.
    async fn insert(&self, entry: &RevocationEntry) -> Result<()>;
    async fn find(&self, token_hash: &str) -> Result<Option<RevocationEntry>>;
    async fn delete(&self, token_hash: &str) -> Result<()>;
    /// Entries with `expires_at > now`
    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<RevocationEntry>>;

    /// Upsert; the higher version floor and the later expiry win.
    async fn insert_user_revocation(&self, revocation: &UserRevocation) -> Result<()>;
    async fn find_user_revocation(&self, user_id: StringUuid) -> Result<Option<UserRevocation>>;
    async fn list_user_revocations(&self, now: DateTime<Utc>) -> Result<Vec<UserRevocation>>;

    /// Remove token entries and subject floors that expired at or before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub struct RevocationRepositoryImpl {
    pool: MySqlPool,
}

impl RevocationRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationRepository for RevocationRepositoryImpl {
    async fn insert(&self, entry: &RevocationEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (token_hash, user_id, tenant_id, reason, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE expires_at = GREATEST(expires_at, VALUES(expires_at))
            "#,
        )
        .bind(&entry.token_hash)
        .bind(entry.user_id)
        .bind(entry.tenant_id)
        .bind(entry.reason)
        .bind(entry.expires_at)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RevocationEntry>> {
        let entry = sqlx::query_as::<_, RevocationEntry>(
            r#"
            SELECT token_hash, user_id, tenant_id, reason, expires_at, created_at
            FROM revoked_tokens
            WHERE token_hash = ?
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn delete(&self, token_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM revoked_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<RevocationEntry>> {
        let entries = sqlx::query_as::<_, RevocationEntry>(
            r#"
            SELECT token_hash, user_id, tenant_id, reason, expires_at, created_at
            FROM revoked_tokens
            WHERE expires_at > ?
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn insert_user_revocation(&self, revocation: &UserRevocation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_revocations
                (user_id, tenant_id, reason, min_token_version, revoked_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                reason = IF(VALUES(min_token_version) >= min_token_version, VALUES(reason), reason),
                revoked_at = IF(VALUES(min_token_version) >= min_token_version, VALUES(revoked_at), revoked_at),
                min_token_version = GREATEST(min_token_version, VALUES(min_token_version)),
                expires_at = GREATEST(expires_at, VALUES(expires_at))
            "#,
        )
        .bind(revocation.user_id)
        .bind(revocation.tenant_id)
        .bind(revocation.reason)
        .bind(revocation.min_token_version)
        .bind(revocation.revoked_at)
        .bind(revocation.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_user_revocation(&self, user_id: StringUuid) -> Result<Option<UserRevocation>> {
        let revocation = sqlx::query_as::<_, UserRevocation>(
            r#"
            SELECT user_id, tenant_id, reason, min_token_version, revoked_at, expires_at
            FROM user_revocations
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(revocation)
    }

    async fn list_user_revocations(&self, now: DateTime<Utc>) -> Result<Vec<UserRevocation>> {
        let revocations = sqlx::query_as::<_, UserRevocation>(
            r#"
            SELECT user_id, tenant_id, reason, min_token_version, revoked_at, expires_at
            FROM user_revocations
            WHERE expires_at > ?
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(revocations)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let tokens = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        let users = sqlx::query("DELETE FROM user_revocations WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(tokens.rows_affected() + users.rows_affected())
    }
}
