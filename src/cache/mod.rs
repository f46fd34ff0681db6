//! Redis-backed revocation store

use crate::config::RedisConfig;
use crate::domain::{RevocationEntry, StringUuid, UserRevocation};
use crate::error::{AppError, Result};
use crate::repository::RevocationRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};

/// Cache key prefixes
mod keys {
    pub const REVOKED_TOKEN: &str = "rollcall:revoked";
    pub const USER_REVOCATION: &str = "rollcall:user_revoked";
}

const SCAN_BATCH: usize = 500;

/// Revocation store keeping each entry under its own key with an absolute
/// expiry (`EXAT`), so Redis drops entries on its own once they lapse.
#[derive(Clone)]
pub struct RedisRevocationStore {
    conn: ConnectionManager,
}

impl RedisRevocationStore {
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to create Redis client: {}", e))
        })?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { conn })
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;

        value
            .map(|v| {
                serde_json::from_str(&v).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("Cache deserialize error: {}", e))
                })
            })
            .transpose()
    }

    async fn set_until<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cache serialize error: {}", e)))?;

        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(serialized)
            .arg("EXAT")
            .arg(expires_at.timestamp().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Load every value whose key matches `pattern`, using SCAN so a large
    /// keyspace does not block the server.
    async fn scan_values<T: DeserializeOwned>(&self, pattern: &str) -> Result<Vec<T>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut values = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !batch.is_empty() {
                let raw: Vec<Option<String>> = conn.mget(&batch).await?;
                for item in raw.into_iter().flatten() {
                    match serde_json::from_str(&item) {
                        Ok(value) => values.push(value),
                        Err(e) => tracing::warn!(error = %e, "Skipping undecodable revocation entry"),
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(values)
    }
}

fn token_key(token_hash: &str) -> String {
    format!("{}:{}", keys::REVOKED_TOKEN, token_hash)
}

fn user_key(user_id: StringUuid) -> String {
    format!("{}:{}", keys::USER_REVOCATION, user_id)
}

#[async_trait]
impl RevocationRepository for RedisRevocationStore {
    async fn insert(&self, entry: &RevocationEntry) -> Result<()> {
        let key = token_key(&entry.token_hash);
        if let Some(existing) = self.get::<RevocationEntry>(&key).await? {
            if existing.expires_at >= entry.expires_at {
                return Ok(());
            }
        }
        self.set_until(&key, entry, entry.expires_at).await
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RevocationEntry>> {
        self.get(&token_key(token_hash)).await
    }

    async fn delete(&self, token_hash: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(token_key(token_hash)).await?;
        Ok(())
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<RevocationEntry>> {
        let entries: Vec<RevocationEntry> = self
            .scan_values(&format!("{}:*", keys::REVOKED_TOKEN))
            .await?;
        Ok(entries.into_iter().filter(|e| e.is_live(now)).collect())
    }

    async fn insert_user_revocation(&self, revocation: &UserRevocation) -> Result<()> {
        let key = user_key(revocation.user_id);
        let merged = match self.get::<UserRevocation>(&key).await? {
            Some(mut existing) => {
                existing.merge(revocation.clone());
                existing
            }
            None => revocation.clone(),
        };
        self.set_until(&key, &merged, merged.expires_at).await
    }

    async fn find_user_revocation(&self, user_id: StringUuid) -> Result<Option<UserRevocation>> {
        self.get(&user_key(user_id)).await
    }

    async fn list_user_revocations(&self, now: DateTime<Utc>) -> Result<Vec<UserRevocation>> {
        let revocations: Vec<UserRevocation> = self
            .scan_values(&format!("{}:*", keys::USER_REVOCATION))
            .await?;
        Ok(revocations.into_iter().filter(|r| r.is_live(now)).collect())
    }

    async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        // Keys carry their own expiry
        Ok(0)
    }
}
