//! Security event scoring and threshold alerting

use crate::clock::Clock;
use crate::config::SecurityMonitorConfig;
use crate::domain::{
    CreateSecurityAlertInput, NewSecurityEvent, SecurityAlert, SecurityEvent, SecurityEventType,
    StringUuid,
};
use crate::error::{AppError, Result};
use crate::repository::{SecurityAlertRepository, SecurityEventRepository};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

const MAX_RISK_SCORE: i32 = 100;
const RECENT_EVENTS_LIMIT: i64 = 1000;

/// What `record` produced
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub event: SecurityEvent,
    /// Set when this event pushed its type over the configured threshold
    pub alert: Option<SecurityAlert>,
}

/// Sink the access engines report security events to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecurityRecorder: Send + Sync {
    async fn record(&self, event: NewSecurityEvent) -> Result<RecordedEvent>;
}

/// Ingests authentication/authorization events, scores them and raises
/// threshold alerts. It never locks accounts; acting on alerts is left to the
/// caller.
pub struct SecurityMonitor<E: SecurityEventRepository, A: SecurityAlertRepository> {
    event_repo: Arc<E>,
    alert_repo: Arc<A>,
    clock: Arc<dyn Clock>,
    config: SecurityMonitorConfig,
}

impl<E: SecurityEventRepository, A: SecurityAlertRepository> SecurityMonitor<E, A> {
    pub fn new(
        event_repo: Arc<E>,
        alert_repo: Arc<A>,
        clock: Arc<dyn Clock>,
        config: SecurityMonitorConfig,
    ) -> Self {
        Self {
            event_repo,
            alert_repo,
            clock,
            config,
        }
    }

    /// Score, persist and evaluate one event.
    pub async fn record(&self, input: NewSecurityEvent) -> Result<RecordedEvent> {
        let now = self.clock.now();
        let severity = input.effective_severity();

        let risk_score = match input.risk_score {
            Some(score) => score.clamp(0, MAX_RISK_SCORE),
            None => {
                let prior = match input.source_address.as_deref() {
                    Some(source) => {
                        let since = now - Duration::minutes(self.config.frequency_window_mins);
                        self.event_repo.count_by_source_since(source, since).await?
                    }
                    None => 0,
                };
                compute_risk_score(input.event_type, severity.adjustment(), prior)
            }
        };

        let event = SecurityEvent {
            id: StringUuid::new_v4(),
            event_type: input.event_type,
            user_id: input.user_id,
            tenant_id: input.tenant_id,
            source_address: input.source_address,
            severity,
            risk_score,
            details: input.details,
            created_at: now,
        };
        self.event_repo.append(&event).await?;

        metrics::counter!(
            "rollcall_security_events_total",
            "event_type" => event.event_type.to_string()
        )
        .increment(1);
        tracing::debug!(
            event_type = %event.event_type,
            risk_score,
            user_id = ?event.user_id,
            source = ?event.source_address,
            "Security event recorded"
        );

        let alert = self.evaluate_threshold(&event).await?;
        Ok(RecordedEvent { event, alert })
    }

    /// Raise an alert when the trailing-window count of this event's type
    /// (including the event itself) reaches the configured threshold.
    async fn evaluate_threshold(&self, event: &SecurityEvent) -> Result<Option<SecurityAlert>> {
        let Some(threshold) = self.config.thresholds.get(&event.event_type) else {
            return Ok(None);
        };

        let since = event.created_at - Duration::minutes(threshold.window_mins);
        let count = match event.source_address.as_deref() {
            Some(source) => {
                self.event_repo
                    .count_by_type_and_source_since(event.event_type, source, since)
                    .await?
            }
            None => {
                self.event_repo
                    .count_by_type_since(event.event_type, since)
                    .await?
            }
        };

        if count < threshold.count {
            return Ok(None);
        }

        let input = CreateSecurityAlertInput {
            event_type: event.event_type,
            severity: threshold.severity,
            source_address: event.source_address.clone(),
            tenant_id: event.tenant_id,
            user_id: event.user_id,
            event_count: count,
            window_mins: threshold.window_mins,
            created_at: event.created_at,
        };
        let alert = self.alert_repo.create(&input).await?;

        metrics::counter!(
            "rollcall_security_alerts_total",
            "event_type" => alert.event_type.to_string(),
            "severity" => alert.severity.to_string()
        )
        .increment(1);
        tracing::warn!(
            alert_id = %alert.id,
            event_type = %alert.event_type,
            severity = %alert.severity,
            event_count = count,
            window_mins = threshold.window_mins,
            source = ?alert.source_address,
            user_id = ?alert.user_id,
            "Security alert raised"
        );

        Ok(Some(alert))
    }

    /// List alerts, newest first. Returns the page and the total count.
    pub async fn list_alerts(
        &self,
        unresolved_only: bool,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<SecurityAlert>, i64)> {
        let per_page = per_page.clamp(1, 100);
        let offset = (page.max(1) - 1).saturating_mul(per_page);
        if unresolved_only {
            let alerts = self.alert_repo.list_unresolved(offset, per_page).await?;
            let total = self.alert_repo.count_unresolved().await?;
            Ok((alerts, total))
        } else {
            let alerts = self.alert_repo.list(offset, per_page).await?;
            let total = self.alert_repo.count().await?;
            Ok((alerts, total))
        }
    }

    pub async fn get_alert(&self, id: StringUuid) -> Result<SecurityAlert> {
        self.alert_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Security alert {} not found", id)))
    }

    pub async fn resolve_alert(
        &self,
        alert_id: StringUuid,
        resolved_by: StringUuid,
    ) -> Result<SecurityAlert> {
        let alert = self
            .alert_repo
            .resolve(alert_id, resolved_by, self.clock.now())
            .await?;
        tracing::info!(alert_id = %alert_id, resolved_by = %resolved_by, "Security alert resolved");
        Ok(alert)
    }

    /// Events within the trailing `window`, newest first
    pub async fn recent_events(
        &self,
        event_type: Option<SecurityEventType>,
        window: Duration,
    ) -> Result<Vec<SecurityEvent>> {
        let since = self.clock.now() - window;
        self.event_repo
            .list_recent(event_type, since, RECENT_EVENTS_LIMIT)
            .await
    }

    /// Drop events older than `days` days. Returns the number removed.
    pub async fn purge_events_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = self.clock.now() - Duration::days(days);
        let removed = self.event_repo.delete_before(cutoff).await?;
        tracing::info!(removed, days, "Purged old security events");
        Ok(removed)
    }
}

#[async_trait]
impl<E: SecurityEventRepository, A: SecurityAlertRepository> SecurityRecorder
    for SecurityMonitor<E, A>
{
    async fn record(&self, event: NewSecurityEvent) -> Result<RecordedEvent> {
        SecurityMonitor::record(self, event).await
    }
}

/// Base score for the type, plus the severity adjustment, plus a frequency
/// adjustment for `prior_from_source` earlier events from the same address.
pub fn compute_risk_score(
    event_type: SecurityEventType,
    severity_adjustment: i32,
    prior_from_source: i64,
) -> i32 {
    let frequency = match prior_from_source {
        n if n > 5 => 20,
        n if n > 3 => 10,
        _ => 0,
    };
    (event_type.base_score() + severity_adjustment + frequency).min(MAX_RISK_SCORE)
}
