//! Approval request domain types

use super::common::{mysql_string_enum, StringUuid};
use super::user::{ApprovalStatus, CapabilityFlags, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Why an approval is being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRequestType {
    NewSignup,
    RoleChange,
    Reactivation,
}

impl std::str::FromStr for ApprovalRequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new_signup" => Ok(Self::NewSignup),
            "role_change" => Ok(Self::RoleChange),
            "reactivation" => Ok(Self::Reactivation),
            _ => Err(format!("Unknown approval request type: {}", s)),
        }
    }
}

impl std::fmt::Display for ApprovalRequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewSignup => write!(f, "new_signup"),
            Self::RoleChange => write!(f, "role_change"),
            Self::Reactivation => write!(f, "reactivation"),
        }
    }
}

mysql_string_enum!(ApprovalRequestType);

/// Approval request entity. `status` reuses [`ApprovalStatus`]; `Pending` is
/// the only non-terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApprovalRequest {
    pub id: StringUuid,
    pub user_id: StringUuid,
    pub tenant_id: Option<StringUuid>,
    pub requested_role: Role,
    pub request_type: ApprovalRequestType,
    pub status: ApprovalStatus,
    pub requested_by: StringUuid,
    pub reviewer_id: Option<StringUuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

impl Default for ApprovalRequest {
    fn default() -> Self {
        Self {
            id: StringUuid::new_v4(),
            user_id: StringUuid::new_v4(),
            tenant_id: None,
            requested_role: Role::User,
            request_type: ApprovalRequestType::NewSignup,
            status: ApprovalStatus::Pending,
            requested_by: StringUuid::new_v4(),
            reviewer_id: None,
            reviewed_at: None,
            notes: None,
            created_at: Utc::now(),
        }
    }
}

/// Input for opening an approval request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApprovalInput {
    pub user_id: StringUuid,
    pub requested_role: Role,
    pub request_type: ApprovalRequestType,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// Row handed to the store when a request is opened
#[derive(Debug, Clone)]
pub struct NewApprovalRequest {
    pub user_id: StringUuid,
    pub tenant_id: Option<StringUuid>,
    pub requested_role: Role,
    pub request_type: ApprovalRequestType,
    pub requested_by: StringUuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Terminal decision applied atomically to the request and its user
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewDecision {
    Approve {
        role: Role,
        capabilities: CapabilityFlags,
        reactivate: bool,
    },
    Reject {
        /// Whether the user's own approval status flips to rejected
        reject_user: bool,
    },
}

/// Everything the store needs to close a pending request
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub request_id: StringUuid,
    pub reviewer_id: StringUuid,
    pub reviewed_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub decision: ReviewDecision,
}

impl ReviewOutcome {
    pub fn final_status(&self) -> ApprovalStatus {
        match self.decision {
            ReviewDecision::Approve { .. } => ApprovalStatus::Approved,
            ReviewDecision::Reject { .. } => ApprovalStatus::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request_is_pending() {
        let request = ApprovalRequest::default();
        assert!(request.is_pending());
        assert!(request.reviewer_id.is_none());
    }

    #[test]
    fn test_request_type_strings() {
        assert_eq!(ApprovalRequestType::RoleChange.to_string(), "role_change");
        assert_eq!(
            "reactivation".parse::<ApprovalRequestType>().unwrap(),
            ApprovalRequestType::Reactivation
        );
        assert!("promotion".parse::<ApprovalRequestType>().is_err());
    }

    #[test]
    fn test_review_outcome_final_status() {
        let outcome = ReviewOutcome {
            request_id: StringUuid::new_v4(),
            reviewer_id: StringUuid::new_v4(),
            reviewed_at: Utc::now(),
            notes: None,
            decision: ReviewDecision::Reject { reject_user: true },
        };
        assert_eq!(outcome.final_status(), ApprovalStatus::Rejected);
    }
}
