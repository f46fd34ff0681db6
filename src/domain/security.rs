//! Security event and alert domain types

use super::common::{mysql_string_enum, StringUuid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of authentication/authorization outcome being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailed,
    PasswordPolicyViolation,
    TokenRevoked,
    AccountDeactivatedLogin,
    PendingApprovalLogin,
    InvalidToken,
    RevokedTokenUse,
    UnauthorizedAccess,
    PrivilegeEscalation,
    CrossTenantAccess,
    SuspiciousActivity,
}

impl SecurityEventType {
    /// Starting point of the risk score before adjustments
    pub fn base_score(self) -> i32 {
        match self {
            Self::LoginSuccess => 30,
            Self::LoginFailed => 50,
            Self::PasswordPolicyViolation => 30,
            Self::TokenRevoked => 30,
            Self::AccountDeactivatedLogin => 60,
            Self::PendingApprovalLogin => 40,
            Self::InvalidToken => 60,
            Self::RevokedTokenUse => 75,
            Self::UnauthorizedAccess => 70,
            Self::PrivilegeEscalation => 80,
            Self::CrossTenantAccess => 90,
            Self::SuspiciousActivity => 95,
        }
    }

    /// Severity assigned when the caller does not supply one
    pub fn default_severity(self) -> AlertSeverity {
        match self {
            Self::LoginSuccess | Self::TokenRevoked => AlertSeverity::Low,
            Self::LoginFailed
            | Self::PasswordPolicyViolation
            | Self::PendingApprovalLogin
            | Self::InvalidToken => AlertSeverity::Medium,
            Self::AccountDeactivatedLogin
            | Self::RevokedTokenUse
            | Self::UnauthorizedAccess
            | Self::PrivilegeEscalation => AlertSeverity::High,
            Self::CrossTenantAccess | Self::SuspiciousActivity => AlertSeverity::Critical,
        }
    }
}

impl std::str::FromStr for SecurityEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "login_success" => Ok(Self::LoginSuccess),
            "login_failed" => Ok(Self::LoginFailed),
            "password_policy_violation" => Ok(Self::PasswordPolicyViolation),
            "token_revoked" => Ok(Self::TokenRevoked),
            "account_deactivated_login" => Ok(Self::AccountDeactivatedLogin),
            "pending_approval_login" => Ok(Self::PendingApprovalLogin),
            "invalid_token" => Ok(Self::InvalidToken),
            "revoked_token_use" => Ok(Self::RevokedTokenUse),
            "unauthorized_access" => Ok(Self::UnauthorizedAccess),
            "privilege_escalation" => Ok(Self::PrivilegeEscalation),
            "cross_tenant_access" => Ok(Self::CrossTenantAccess),
            "suspicious_activity" => Ok(Self::SuspiciousActivity),
            _ => Err(format!("Unknown security event type: {}", s)),
        }
    }
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailed => "login_failed",
            Self::PasswordPolicyViolation => "password_policy_violation",
            Self::TokenRevoked => "token_revoked",
            Self::AccountDeactivatedLogin => "account_deactivated_login",
            Self::PendingApprovalLogin => "pending_approval_login",
            Self::InvalidToken => "invalid_token",
            Self::RevokedTokenUse => "revoked_token_use",
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::CrossTenantAccess => "cross_tenant_access",
            Self::SuspiciousActivity => "suspicious_activity",
        };
        f.write_str(s)
    }
}

mysql_string_enum!(SecurityEventType);

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Risk score added on top of the event type's base score
    pub fn adjustment(self) -> i32 {
        match self {
            AlertSeverity::Low => 0,
            AlertSeverity::Medium => 5,
            AlertSeverity::High => 10,
            AlertSeverity::Critical => 20,
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(AlertSeverity::Low),
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            _ => Err(format!("Unknown alert severity: {}", s)),
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

mysql_string_enum!(AlertSeverity);

/// Immutable security event record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SecurityEvent {
    pub id: StringUuid,
    pub event_type: SecurityEventType,
    pub user_id: Option<StringUuid>,
    pub tenant_id: Option<StringUuid>,
    pub source_address: Option<String>,
    pub severity: AlertSeverity,
    pub risk_score: i32,
    #[sqlx(json)]
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Event as submitted to the monitor, before scoring
#[derive(Debug, Clone)]
pub struct NewSecurityEvent {
    pub event_type: SecurityEventType,
    pub user_id: Option<StringUuid>,
    pub tenant_id: Option<StringUuid>,
    pub source_address: Option<String>,
    /// Falls back to [`SecurityEventType::default_severity`]
    pub severity: Option<AlertSeverity>,
    /// Computed by the monitor when absent
    pub risk_score: Option<i32>,
    pub details: Option<serde_json::Value>,
}

impl NewSecurityEvent {
    pub fn new(event_type: SecurityEventType) -> Self {
        Self {
            event_type,
            user_id: None,
            tenant_id: None,
            source_address: None,
            severity: None,
            risk_score: None,
            details: None,
        }
    }

    pub fn user(mut self, user_id: StringUuid, tenant_id: Option<StringUuid>) -> Self {
        self.user_id = Some(user_id);
        self.tenant_id = tenant_id;
        self
    }

    pub fn tenant(mut self, tenant_id: Option<StringUuid>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn source(mut self, source_address: Option<&str>) -> Self {
        self.source_address = source_address.map(str::to_string);
        self
    }

    pub fn severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn effective_severity(&self) -> AlertSeverity {
        self.severity
            .unwrap_or_else(|| self.event_type.default_severity())
    }
}

/// Threshold alert raised by the security monitor
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SecurityAlert {
    pub id: StringUuid,
    pub event_type: SecurityEventType,
    pub severity: AlertSeverity,
    pub source_address: Option<String>,
    pub tenant_id: Option<StringUuid>,
    pub user_id: Option<StringUuid>,
    /// Events counted in the window when the alert fired
    pub event_count: i64,
    pub window_mins: i64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<StringUuid>,
}

impl SecurityAlert {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

impl Default for SecurityAlert {
    fn default() -> Self {
        Self {
            id: StringUuid::new_v4(),
            event_type: SecurityEventType::LoginFailed,
            severity: AlertSeverity::Medium,
            source_address: None,
            tenant_id: None,
            user_id: None,
            event_count: 0,
            window_mins: 0,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }
}

/// Input for creating a security alert
#[derive(Debug, Clone)]
pub struct CreateSecurityAlertInput {
    pub event_type: SecurityEventType,
    pub severity: AlertSeverity,
    pub source_address: Option<String>,
    pub tenant_id: Option<StringUuid>,
    pub user_id: Option<StringUuid>,
    pub event_count: i64,
    pub window_mins: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_scores_span_documented_range() {
        assert_eq!(SecurityEventType::LoginSuccess.base_score(), 30);
        assert_eq!(SecurityEventType::LoginFailed.base_score(), 50);
        assert_eq!(SecurityEventType::SuspiciousActivity.base_score(), 95);
    }

    #[test]
    fn test_severity_adjustments() {
        assert_eq!(AlertSeverity::Low.adjustment(), 0);
        assert_eq!(AlertSeverity::Medium.adjustment(), 5);
        assert_eq!(AlertSeverity::High.adjustment(), 10);
        assert_eq!(AlertSeverity::Critical.adjustment(), 20);
        assert!(AlertSeverity::Critical > AlertSeverity::High);
    }

    #[test]
    fn test_event_type_serde_matches_display() {
        let json = serde_json::to_string(&SecurityEventType::RevokedTokenUse).unwrap();
        assert_eq!(json, "\"revoked_token_use\"");
        assert_eq!(
            "revoked_token_use".parse::<SecurityEventType>().unwrap(),
            SecurityEventType::RevokedTokenUse
        );
    }

    #[test]
    fn test_new_event_builder() {
        let user = StringUuid::new_v4();
        let event = NewSecurityEvent::new(SecurityEventType::LoginFailed)
            .user(user, None)
            .source(Some("10.0.0.1"));
        assert_eq!(event.user_id, Some(user));
        assert_eq!(event.source_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(event.effective_severity(), AlertSeverity::Medium);

        let event = event.severity(AlertSeverity::Critical);
        assert_eq!(event.effective_severity(), AlertSeverity::Critical);
    }
}
