//! User (subject) domain model

use super::common::{mysql_string_enum, StringUuid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Fixed role enumeration, most privileged first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    PlatformAdmin,
    CompanySuperAdmin,
    CompanyAdmin,
    User,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::PlatformAdmin,
        Role::CompanySuperAdmin,
        Role::CompanyAdmin,
        Role::User,
    ];

    /// Position in the hierarchy; higher is more privileged.
    pub fn rank(self) -> u8 {
        match self {
            Role::PlatformAdmin => 3,
            Role::CompanySuperAdmin => 2,
            Role::CompanyAdmin => 1,
            Role::User => 0,
        }
    }

    pub fn outranks_or_equals(self, other: Role) -> bool {
        self.rank() >= other.rank()
    }

    /// Roles that live inside a tenant (everything except platform admins).
    pub fn is_tenant_scoped(self) -> bool {
        self != Role::PlatformAdmin
    }

    /// Roles allowed to open and review approval requests.
    pub fn is_administrator(self) -> bool {
        self != Role::User
    }

    /// Capability flag that gates signing in with this role.
    pub fn login_capability(self) -> Capability {
        match self {
            Role::User => Capability::MobileApp,
            Role::CompanyAdmin | Role::CompanySuperAdmin => Capability::Dashboard,
            Role::PlatformAdmin => Capability::PlatformPanel,
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "platform_admin" => Ok(Role::PlatformAdmin),
            "company_super_admin" => Ok(Role::CompanySuperAdmin),
            "company_admin" => Ok(Role::CompanyAdmin),
            "user" => Ok(Role::User),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::PlatformAdmin => write!(f, "platform_admin"),
            Role::CompanySuperAdmin => write!(f, "company_super_admin"),
            Role::CompanyAdmin => write!(f, "company_admin"),
            Role::User => write!(f, "user"),
        }
    }
}

mysql_string_enum!(Role);

/// Registration/approval state of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            _ => Err(format!("Unknown approval status: {}", s)),
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

mysql_string_enum!(ApprovalStatus);

/// A surface a user can be granted access to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    MobileApp,
    Dashboard,
    PlatformPanel,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::MobileApp => write!(f, "mobile_app"),
            Capability::Dashboard => write!(f, "dashboard"),
            Capability::PlatformPanel => write!(f, "platform_panel"),
        }
    }
}

/// Independent capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityFlags {
    pub mobile_app_access: bool,
    pub dashboard_access: bool,
    pub platform_panel_access: bool,
}

impl CapabilityFlags {
    pub const NONE: CapabilityFlags = CapabilityFlags {
        mobile_app_access: false,
        dashboard_access: false,
        platform_panel_access: false,
    };

    /// What an approved role unlocks. This table is the only place the
    /// role-to-surface mapping is defined.
    pub const fn for_role(role: Role) -> CapabilityFlags {
        match role {
            Role::User => CapabilityFlags {
                mobile_app_access: true,
                dashboard_access: false,
                platform_panel_access: false,
            },
            Role::CompanyAdmin => CapabilityFlags {
                mobile_app_access: true,
                dashboard_access: true,
                platform_panel_access: false,
            },
            Role::CompanySuperAdmin => CapabilityFlags {
                mobile_app_access: false,
                dashboard_access: true,
                platform_panel_access: false,
            },
            Role::PlatformAdmin => CapabilityFlags {
                mobile_app_access: false,
                dashboard_access: false,
                platform_panel_access: true,
            },
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::MobileApp => self.mobile_app_access,
            Capability::Dashboard => self.dashboard_access,
            Capability::PlatformPanel => self.platform_panel_access,
        }
    }
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: StringUuid,
    /// None only for platform-level principals
    pub tenant_id: Option<StringUuid>,
    pub email: String,
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    #[sqlx(flatten)]
    pub capabilities: CapabilityFlags,
    pub approval_status: ApprovalStatus,
    pub is_active: bool,
    /// Bumped by every subject-wide revocation; stamped into issued tokens
    #[serde(skip_serializing)]
    pub token_version: i64,
    /// Reviewer that last approved/rejected this user (resolved by lookup)
    pub approved_by: Option<StringUuid>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub mobile_last_used_at: Option<DateTime<Utc>>,
    pub dashboard_last_used_at: Option<DateTime<Utc>>,
    pub platform_panel_last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_approved(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            tenant_id: self.tenant_id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            capabilities: self.capabilities,
            approval_status: self.approval_status,
            is_active: self.is_active,
            last_login_at: self.last_login_at,
        }
    }
}

impl Default for User {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: StringUuid::new_v4(),
            tenant_id: None,
            email: String::new(),
            display_name: None,
            password_hash: String::new(),
            role: Role::User,
            capabilities: CapabilityFlags::NONE,
            approval_status: ApprovalStatus::Pending,
            is_active: true,
            token_version: 0,
            approved_by: None,
            last_login_at: None,
            mobile_last_used_at: None,
            dashboard_last_used_at: None,
            platform_panel_last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Public view of a user, safe to return to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: StringUuid,
    pub tenant_id: Option<StringUuid>,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub capabilities: CapabilityFlags,
    pub approval_status: ApprovalStatus,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Partial update of a user record; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub role: Option<Role>,
    pub capabilities: Option<CapabilityFlags>,
    pub approval_status: Option<ApprovalStatus>,
    pub is_active: Option<bool>,
    pub password_hash: Option<String>,
    pub approved_by: Option<StringUuid>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub mobile_last_used_at: Option<DateTime<Utc>>,
    pub dashboard_last_used_at: Option<DateTime<Utc>>,
    pub platform_panel_last_used_at: Option<DateTime<Utc>>,
}

impl UserPatch {
    /// Login bookkeeping for a successful sign-in through `capability`.
    pub fn login(at: DateTime<Utc>, capability: Capability) -> Self {
        let mut patch = UserPatch {
            last_login_at: Some(at),
            ..Default::default()
        };
        match capability {
            Capability::MobileApp => patch.mobile_last_used_at = Some(at),
            Capability::Dashboard => patch.dashboard_last_used_at = Some(at),
            Capability::PlatformPanel => patch.platform_panel_last_used_at = Some(at),
        }
        patch
    }

    /// Apply the patch to an in-memory record.
    pub fn apply_to(&self, user: &mut User, at: DateTime<Utc>) {
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(capabilities) = self.capabilities {
            user.capabilities = capabilities;
        }
        if let Some(status) = self.approval_status {
            user.approval_status = status;
        }
        if let Some(active) = self.is_active {
            user.is_active = active;
        }
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(reviewer) = self.approved_by {
            user.approved_by = Some(reviewer);
        }
        if let Some(ts) = self.last_login_at {
            user.last_login_at = Some(ts);
        }
        if let Some(ts) = self.mobile_last_used_at {
            user.mobile_last_used_at = Some(ts);
        }
        if let Some(ts) = self.dashboard_last_used_at {
            user.dashboard_last_used_at = Some(ts);
        }
        if let Some(ts) = self.platform_panel_last_used_at {
            user.platform_panel_last_used_at = Some(ts);
        }
        user.updated_at = at;
    }
}

/// Registration request as received from a client
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterUserInput {
    pub tenant_id: Option<StringUuid>,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 255))]
    pub display_name: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
    pub role: Role,
}

/// Sign-in attempt as received from a client
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginInput {
    /// Required for tenant-scoped roles, ignored for platform admins
    pub tenant_id: Option<StringUuid>,
    #[validate(length(min = 1, max = 320))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
    pub role: Role,
}

/// Identity of whoever is performing an administrative action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: StringUuid,
    pub tenant_id: Option<StringUuid>,
    pub role: Role,
}

impl Actor {
    pub fn is_platform_admin(&self) -> bool {
        self.role == Role::PlatformAdmin
    }

    /// Whether records owned by `tenant_id` are within this actor's scope.
    /// Platform admins reach every tenant; everyone else only their own.
    pub fn reaches(&self, tenant_id: Option<StringUuid>) -> bool {
        self.is_platform_admin() || (self.tenant_id.is_some() && self.tenant_id == tenant_id)
    }
}

/// Normalized form used for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Fully resolved record handed to the store on registration
#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub tenant_id: Option<StringUuid>,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub capabilities: CapabilityFlags,
    pub approval_status: ApprovalStatus,
    pub approved_by: Option<StringUuid>,
}
