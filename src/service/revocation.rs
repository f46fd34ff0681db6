//! Revocation registry: server-side denial of otherwise valid credentials

use crate::clock::Clock;
use crate::config::{RevocationConfig, RevocationFailurePolicy};
use crate::domain::{
    token_fingerprint, RevocationEntry, RevocationReason, StringUuid, UserRevocation,
};
use crate::error::{AppError, Result};
use crate::jwt::VerifiedClaims;
use crate::repository::RevocationRepository;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

/// In-process mirror of the unexpired rows in the store
#[derive(Debug, Default)]
struct RevocationIndex {
    /// token hash -> expiry
    tokens: HashMap<String, DateTime<Utc>>,
    users: HashMap<StringUuid, UserRevocation>,
}

impl RevocationIndex {
    fn build(entries: Vec<RevocationEntry>, users: Vec<UserRevocation>) -> Self {
        Self {
            tokens: entries
                .into_iter()
                .map(|entry| (entry.token_hash, entry.expires_at))
                .collect(),
            users: users.into_iter().map(|r| (r.user_id, r)).collect(),
        }
    }

    fn insert_token(&mut self, token_hash: String, expires_at: DateTime<Utc>) {
        let slot = self.tokens.entry(token_hash).or_insert(expires_at);
        if *slot < expires_at {
            *slot = expires_at;
        }
    }

    fn insert_user(&mut self, revocation: UserRevocation) {
        match self.users.get_mut(&revocation.user_id) {
            Some(existing) => existing.merge(revocation),
            None => {
                self.users.insert(revocation.user_id, revocation);
            }
        }
    }

    /// Drop `token_hash` only if its entry is still expired; a concurrent
    /// re-revoke may have extended it since the caller looked.
    fn evict_if_expired(&mut self, token_hash: &str, now: DateTime<Utc>) -> bool {
        if self
            .tokens
            .get(token_hash)
            .is_some_and(|expires_at| *expires_at <= now)
        {
            self.tokens.remove(token_hash);
            return true;
        }
        false
    }
}

/// Tracks credentials that must be rejected before their natural expiry.
///
/// Reads consult the in-process index first and fall back to the store on a
/// miss. Store calls are bounded by `store_timeout`; when the store cannot
/// answer a read, the configured [`RevocationFailurePolicy`] decides the
/// result.
///
/// `token_lifetime` is the longest span a credential keeps verifying (TTL
/// plus leeway). Entries never expire before a credential they cover could.
pub struct RevocationRegistry<R: RevocationRepository> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    config: RevocationConfig,
    token_lifetime: Duration,
    index: RwLock<RevocationIndex>,
    shutdown: Arc<Notify>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RevocationRepository + 'static> RevocationRegistry<R> {
    pub fn new(
        repo: Arc<R>,
        clock: Arc<dyn Clock>,
        config: RevocationConfig,
        token_lifetime: Duration,
    ) -> Self {
        Self {
            repo,
            clock,
            config,
            token_lifetime,
            index: RwLock::new(RevocationIndex::default()),
            shutdown: Arc::new(Notify::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Rebuild the index from the store. Returns the number of live entries.
    pub async fn load(&self) -> Result<usize> {
        let now = self.clock.now();
        let entries = self.bounded(self.repo.list_active(now)).await?;
        let users = self.bounded(self.repo.list_user_revocations(now)).await?;
        let fresh = RevocationIndex::build(entries, users);
        let loaded = fresh.tokens.len() + fresh.users.len();

        *self.index.write().await = fresh;
        tracing::info!(loaded, "Revocation index loaded");
        Ok(loaded)
    }

    /// Revoke one credential until `expires_at` (default: now + the longer of
    /// the configured TTL and the token lifetime). Revoking an already revoked
    /// credential is not an error.
    pub async fn revoke(
        &self,
        token: &str,
        user_id: StringUuid,
        tenant_id: Option<StringUuid>,
        reason: RevocationReason,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = self.clock.now();
        let entry = RevocationEntry {
            token_hash: token_fingerprint(token),
            user_id,
            tenant_id,
            reason,
            expires_at: expires_at.unwrap_or_else(|| now + self.default_entry_ttl()),
            created_at: now,
        };

        let stored = self.bounded(self.repo.insert(&entry)).await;
        // Protect this process even when the store write failed
        self.index
            .write()
            .await
            .insert_token(entry.token_hash.clone(), entry.expires_at);

        if let Err(e) = stored {
            metrics::counter!("rollcall_revocation_store_failures_total").increment(1);
            tracing::error!(error = %e, user_id = %user_id, "Failed to persist token revocation");
            return Err(e);
        }

        metrics::counter!("rollcall_revocations_total", "reason" => reason.to_string())
            .increment(1);
        tracing::info!(
            user_id = %user_id,
            tenant_id = ?tenant_id,
            reason = %reason,
            token_hash = %entry.token_hash,
            "Credential revoked"
        );
        Ok(())
    }

    /// Whether this exact token has been revoked and the entry is still live.
    pub async fn is_revoked(&self, token: &str) -> bool {
        let token_hash = token_fingerprint(token);
        let now = self.clock.now();

        let cached = self.index.read().await.tokens.get(&token_hash).copied();
        match cached {
            Some(expires_at) if expires_at > now => return true,
            Some(_) => {
                // Recheck under the write lock
                return !self
                    .index
                    .write()
                    .await
                    .evict_if_expired(&token_hash, now);
            }
            None => {}
        }

        match self.bounded(self.repo.find(&token_hash)).await {
            Ok(Some(entry)) if entry.is_live(now) => {
                self.index
                    .write()
                    .await
                    .insert_token(token_hash, entry.expires_at);
                true
            }
            Ok(Some(_)) => {
                if let Err(e) = self.bounded(self.repo.delete(&token_hash)).await {
                    tracing::debug!(error = %e, "Failed to evict expired revocation entry");
                }
                false
            }
            Ok(None) => false,
            Err(e) => self.read_failure("find", &e),
        }
    }

    /// Full check for a verified credential: the token's own entry, then the
    /// subject-wide version floor left by [`revoke_all`](Self::revoke_all).
    pub async fn is_credential_revoked(&self, token: &str, claims: &VerifiedClaims) -> bool {
        if self.is_revoked(token).await {
            return true;
        }
        self.covered_by_user_revocation(claims.user_id, claims.token_version)
            .await
    }

    async fn covered_by_user_revocation(&self, user_id: StringUuid, token_version: i64) -> bool {
        let now = self.clock.now();

        let cached = self.index.read().await.users.get(&user_id).cloned();
        if let Some(revocation) = cached {
            if revocation.is_live(now) && revocation.covers(token_version) {
                return true;
            }
        }

        // Another process may hold a higher floor
        match self.bounded(self.repo.find_user_revocation(user_id)).await {
            Ok(Some(revocation)) if revocation.is_live(now) => {
                let covered = revocation.covers(token_version);
                self.index.write().await.insert_user(revocation);
                covered
            }
            Ok(_) => false,
            Err(e) => self.read_failure("find_user_revocation", &e),
        }
    }

    /// Revoke every credential of `user_id` stamped with a token version
    /// below `min_token_version`. The caller bumps the subject's stored
    /// version first, so credentials issued afterwards are unaffected.
    pub async fn revoke_all(
        &self,
        user_id: StringUuid,
        tenant_id: Option<StringUuid>,
        reason: RevocationReason,
        min_token_version: i64,
    ) -> Result<UserRevocation> {
        let now = self.clock.now();
        let revocation = UserRevocation {
            user_id,
            tenant_id,
            reason,
            min_token_version,
            revoked_at: now,
            expires_at: now + self.token_lifetime,
        };

        let stored = self
            .bounded(self.repo.insert_user_revocation(&revocation))
            .await;
        self.index.write().await.insert_user(revocation.clone());

        if let Err(e) = stored {
            metrics::counter!("rollcall_revocation_store_failures_total").increment(1);
            tracing::error!(error = %e, user_id = %user_id, "Failed to persist subject revocation");
            return Err(e);
        }

        metrics::counter!("rollcall_revocations_total", "reason" => reason.to_string())
            .increment(1);
        tracing::info!(
            user_id = %user_id,
            tenant_id = ?tenant_id,
            reason = %reason,
            min_token_version,
            "All credentials for subject revoked"
        );
        Ok(revocation)
    }

    /// Delete expired rows from the store and swap in a freshly built index.
    ///
    /// The new index is built without holding the lock and installed under a
    /// single write lock, so readers see either the old or the new set. Live
    /// entries added to the old index while rebuilding are carried over.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let removed = self.bounded(self.repo.delete_expired(now)).await?;

        let entries = self.bounded(self.repo.list_active(now)).await?;
        let users = self.bounded(self.repo.list_user_revocations(now)).await?;
        let mut fresh = RevocationIndex::build(entries, users);

        {
            let mut index = self.index.write().await;
            for (token_hash, expires_at) in index.tokens.drain() {
                if expires_at > now {
                    fresh.insert_token(token_hash, expires_at);
                }
            }
            for (_, revocation) in index.users.drain() {
                if revocation.is_live(now) {
                    fresh.insert_user(revocation);
                }
            }
            *index = fresh;
        }

        metrics::histogram!("rollcall_revocation_sweep_removed").record(removed as f64);
        tracing::info!(removed, "Swept expired revocation entries");
        Ok(removed)
    }

    /// Run `sweep_expired` every `interval` until [`close`](Self::close).
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) {
        let registry = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("Revocation sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        if let Err(e) = registry.sweep_expired().await {
                            tracing::warn!(error = %e, "Revocation sweep failed");
                        }
                    }
                }
            }
        });

        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the sweeper and drop the in-process index.
    pub async fn close(&self) {
        self.shutdown.notify_one();
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Revocation sweeper ended abnormally");
                }
            }
        }
        *self.index.write().await = RevocationIndex::default();
        tracing::info!("Revocation registry closed");
    }

    /// Number of token entries and subject floors currently mirrored in-process
    pub async fn cached_len(&self) -> usize {
        let index = self.index.read().await;
        index.tokens.len() + index.users.len()
    }

    fn default_entry_ttl(&self) -> Duration {
        Duration::seconds(self.config.default_ttl_secs).max(self.token_lifetime)
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.store_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StoreTimeout),
        }
    }

    fn read_failure(&self, operation: &'static str, error: &AppError) -> bool {
        metrics::counter!("rollcall_revocation_store_failures_total").increment(1);
        match self.config.failure_policy {
            RevocationFailurePolicy::FailOpen => {
                tracing::warn!(
                    operation,
                    error = %error,
                    "Revocation store unavailable, failing open"
                );
                false
            }
            RevocationFailurePolicy::FailClosed => {
                tracing::warn!(
                    operation,
                    error = %error,
                    "Revocation store unavailable, failing closed"
                );
                true
            }
        }
    }
}
