//! Authentication and authorization decisions

use crate::clock::Clock;
use crate::domain::{
    normalize_email, Actor, ApprovalRequestType, ApprovalStatus, CapabilityFlags,
    CreateUserInput, LoginInput, NewApprovalRequest, NewSecurityEvent, RegisterUserInput,
    RevocationReason, Role, SecurityEventType, StringUuid, User, UserPatch, UserProfile,
    UserRevocation,
};
use crate::error::{AppError, Result};
use crate::jwt::{IssuedToken, TokenService, VerifiedClaims};
use crate::repository::{
    ApprovalRepository, RevocationRepository, TenantRepository, UserRepository,
};
use crate::service::password::{
    hash_password, verify_against_dummy, verify_password, PasswordPolicyEngine,
};
use crate::service::revocation::RevocationRegistry;
use crate::service::security_monitor::SecurityRecorder;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

/// Successful sign-in
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub profile: UserProfile,
    pub token: IssuedToken,
}

/// How a subject record comes into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPath {
    /// Public sign-up: always a `user`, pending until an administrator approves
    SelfSignup,
    /// Created directly by an administrator, approved immediately
    AdminCreated { actor: Actor },
    /// First account of a freshly provisioned tenant
    TenantOwner,
}

/// Why an administrative action on another subject was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refusal {
    NotAdministrator,
    CrossTenant,
    Outranked,
}

impl Refusal {
    pub(crate) fn event_type(self) -> SecurityEventType {
        match self {
            Refusal::NotAdministrator => SecurityEventType::UnauthorizedAccess,
            Refusal::CrossTenant => SecurityEventType::CrossTenantAccess,
            Refusal::Outranked => SecurityEventType::PrivilegeEscalation,
        }
    }

    pub(crate) fn into_error(self) -> AppError {
        match self {
            Refusal::NotAdministrator => {
                AppError::Forbidden("Administrator role required".to_string())
            }
            Refusal::CrossTenant => AppError::CrossTenant,
            Refusal::Outranked => {
                AppError::Forbidden("Cannot act on a role ranked above your own".to_string())
            }
        }
    }
}

/// Checks shared by every administrative action targeting a subject in
/// `tenant_id` holding (or about to hold) `role`.
pub(crate) fn check_reach(
    actor: &Actor,
    tenant_id: Option<StringUuid>,
    role: Role,
) -> std::result::Result<(), Refusal> {
    if !actor.role.is_administrator() {
        return Err(Refusal::NotAdministrator);
    }
    if !actor.reaches(tenant_id) {
        return Err(Refusal::CrossTenant);
    }
    if !actor.role.outranks_or_equals(role) {
        return Err(Refusal::Outranked);
    }
    Ok(())
}

/// Report a security event; a failure to persist it is logged and never
/// changes the outcome of the decision being reported.
pub(crate) async fn report(monitor: &dyn SecurityRecorder, event: NewSecurityEvent) {
    let event_type = event.event_type;
    if let Err(e) = monitor.record(event).await {
        tracing::error!(error = %e, event_type = %event_type, "Failed to record security event");
    }
}

/// Central authorization engine: sign-in gating, request authorization,
/// registration and administrative lifecycle changes.
///
/// Effective privilege is the conjunction of role, capability flag,
/// approval status, the subject's active flag and the tenant's status.
pub struct AccessControlEngine<
    U: UserRepository,
    T: TenantRepository,
    P: ApprovalRepository,
    R: RevocationRepository,
> {
    users: Arc<U>,
    tenants: Arc<T>,
    approvals: Arc<P>,
    revocations: Arc<RevocationRegistry<R>>,
    tokens: Arc<TokenService>,
    monitor: Arc<dyn SecurityRecorder>,
    password_policy: PasswordPolicyEngine,
    clock: Arc<dyn Clock>,
}

impl<U, T, P, R> AccessControlEngine<U, T, P, R>
where
    U: UserRepository,
    T: TenantRepository,
    P: ApprovalRepository,
    R: RevocationRepository + 'static,
{
    pub fn new(
        users: Arc<U>,
        tenants: Arc<T>,
        approvals: Arc<P>,
        revocations: Arc<RevocationRegistry<R>>,
        tokens: Arc<TokenService>,
        monitor: Arc<dyn SecurityRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            tenants,
            approvals,
            revocations,
            tokens,
            monitor,
            password_policy: PasswordPolicyEngine::new(),
            clock,
        }
    }

    /// Sign in as `input.role`.
    ///
    /// Unknown subject and wrong password yield the same `InvalidCredentials`
    /// at the same cost. Every refusal is reported to the security monitor.
    pub async fn authenticate(
        &self,
        input: &LoginInput,
        source_address: Option<&str>,
    ) -> Result<AuthResult> {
        input.validate()?;
        let email = normalize_email(&input.email);
        let scope = if input.role.is_tenant_scoped() {
            input.tenant_id
        } else {
            None
        };

        let found = match scope {
            None if input.role.is_tenant_scoped() => None,
            _ => {
                self.users
                    .find_by_credentials(scope, &email, input.role)
                    .await?
            }
        };

        let user = match found {
            Some(user) if verify_password(&input.password, &user.password_hash) => user,
            Some(user) => {
                let event = NewSecurityEvent::new(SecurityEventType::LoginFailed)
                    .user(user.id, user.tenant_id)
                    .source(source_address)
                    .details(json!({ "reason": "wrong_password", "role": input.role }));
                return Err(self
                    .refuse_login(AppError::InvalidCredentials, event)
                    .await);
            }
            None => {
                verify_against_dummy(&input.password);
                let event = NewSecurityEvent::new(SecurityEventType::LoginFailed)
                    .tenant(scope)
                    .source(source_address)
                    .details(json!({ "reason": "unknown_subject", "email": email, "role": input.role }));
                return Err(self
                    .refuse_login(AppError::InvalidCredentials, event)
                    .await);
            }
        };

        if !user.is_active {
            let event = NewSecurityEvent::new(SecurityEventType::AccountDeactivatedLogin)
                .user(user.id, user.tenant_id)
                .source(source_address);
            return Err(self
                .refuse_login(AppError::AccountDeactivated, event)
                .await);
        }

        if user.role.is_tenant_scoped() && !user.is_approved() {
            let event = NewSecurityEvent::new(SecurityEventType::PendingApprovalLogin)
                .user(user.id, user.tenant_id)
                .source(source_address)
                .details(json!({ "approval_status": user.approval_status }));
            return Err(self.refuse_login(AppError::PendingApproval, event).await);
        }

        if let Some(tenant_id) = user.tenant_id {
            let tenant_active = self
                .tenants
                .find_by_id(tenant_id)
                .await?
                .is_some_and(|tenant| tenant.is_active());
            if !tenant_active {
                let event = NewSecurityEvent::new(SecurityEventType::UnauthorizedAccess)
                    .user(user.id, user.tenant_id)
                    .source(source_address)
                    .details(json!({ "reason": "tenant_deactivated" }));
                return Err(self
                    .refuse_login(AppError::TenantDeactivated, event)
                    .await);
            }
        }

        let capability = user.role.login_capability();
        if !user.capabilities.has(capability) {
            let event = NewSecurityEvent::new(SecurityEventType::UnauthorizedAccess)
                .user(user.id, user.tenant_id)
                .source(source_address)
                .details(json!({ "reason": "capability_not_granted", "capability": capability }));
            return Err(self
                .refuse_login(AppError::InsufficientAccess, event)
                .await);
        }

        let now = self.clock.now();
        let user = self
            .users
            .update(user.id, &UserPatch::login(now, capability), now)
            .await?;
        let token = self.tokens.issue(user.id, user.tenant_id, user.role, user.token_version)?;

        report(
            self.monitor.as_ref(),
            NewSecurityEvent::new(SecurityEventType::LoginSuccess)
                .user(user.id, user.tenant_id)
                .source(source_address)
                .details(json!({ "role": user.role, "session_id": token.session_id })),
        )
        .await;
        metrics::counter!("rollcall_auth_attempts_total", "outcome" => "success").increment(1);
        tracing::info!(
            user_id = %user.id,
            tenant_id = ?user.tenant_id,
            role = %user.role,
            "User authenticated"
        );

        Ok(AuthResult {
            profile: user.profile(),
            token,
        })
    }

    async fn refuse_login(&self, error: AppError, event: NewSecurityEvent) -> AppError {
        metrics::counter!("rollcall_auth_attempts_total", "outcome" => error.code())
            .increment(1);
        tracing::info!(
            user_id = ?event.user_id,
            tenant_id = ?event.tenant_id,
            reason = error.code(),
            "Authentication refused"
        );
        report(self.monitor.as_ref(), event).await;
        error
    }

    /// Pure membership test of the verified role against `required_roles`.
    pub fn authorize(&self, claims: &VerifiedClaims, required_roles: &[Role]) -> bool {
        required_roles.contains(&claims.role)
    }

    /// Full check for an incoming request: signature and expiry, then
    /// revocation, then role membership.
    pub async fn authenticate_request(
        &self,
        token: &str,
        required_roles: &[Role],
        source_address: Option<&str>,
    ) -> Result<VerifiedClaims> {
        let claims = match self.tokens.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                report(
                    self.monitor.as_ref(),
                    NewSecurityEvent::new(SecurityEventType::InvalidToken).source(source_address),
                )
                .await;
                return Err(e);
            }
        };

        if self.revocations.is_credential_revoked(token, &claims).await {
            tracing::warn!(
                user_id = %claims.user_id,
                session_id = %claims.session_id,
                "Revoked credential presented"
            );
            report(
                self.monitor.as_ref(),
                NewSecurityEvent::new(SecurityEventType::RevokedTokenUse)
                    .user(claims.user_id, claims.tenant_id)
                    .source(source_address)
                    .details(json!({ "session_id": claims.session_id })),
            )
            .await;
            return Err(AppError::TokenRevoked);
        }

        if !self.authorize(&claims, required_roles) {
            report(
                self.monitor.as_ref(),
                NewSecurityEvent::new(SecurityEventType::UnauthorizedAccess)
                    .user(claims.user_id, claims.tenant_id)
                    .source(source_address)
                    .details(json!({ "role": claims.role, "required_roles": required_roles })),
            )
            .await;
            return Err(AppError::Forbidden(format!(
                "Role {} is not permitted here",
                claims.role
            )));
        }

        Ok(claims)
    }

    /// Apply the role's capability mapping to the subject.
    pub async fn grant_capabilities(
        &self,
        user_id: StringUuid,
        role: Role,
    ) -> Result<CapabilityFlags> {
        let capabilities = CapabilityFlags::for_role(role);
        let patch = UserPatch {
            role: Some(role),
            capabilities: Some(capabilities),
            ..Default::default()
        };
        self.users.update(user_id, &patch, self.clock.now()).await?;
        tracing::info!(user_id = %user_id, role = %role, "Capabilities granted");
        Ok(capabilities)
    }

    /// Revoke the presented credential until it would stop verifying
    /// (its expiry plus the verification leeway).
    pub async fn logout(&self, token: &str, source_address: Option<&str>) -> Result<()> {
        let claims = self.tokens.verify(token)?;
        self.revocations
            .revoke(
                token,
                claims.user_id,
                claims.tenant_id,
                RevocationReason::Logout,
                Some(claims.expires_at_utc() + self.tokens.leeway()),
            )
            .await?;

        report(
            self.monitor.as_ref(),
            NewSecurityEvent::new(SecurityEventType::TokenRevoked)
                .user(claims.user_id, claims.tenant_id)
                .source(source_address)
                .details(json!({ "reason": RevocationReason::Logout, "session_id": claims.session_id })),
        )
        .await;
        Ok(())
    }

    /// Revoke every credential issued to `user_id` so far.
    ///
    /// Subjects may always revoke their own sessions; anyone else needs the
    /// same reach an approval reviewer would.
    pub async fn revoke_all_sessions(
        &self,
        user_id: StringUuid,
        actor: &Actor,
        reason: RevocationReason,
    ) -> Result<UserRevocation> {
        let target = self.get_user(user_id).await?;
        if actor.user_id != target.id {
            self.ensure_reach(actor, &target, target.role).await?;
        }

        let revocation = self.revoke_subject(&target, reason).await?;

        report(
            self.monitor.as_ref(),
            NewSecurityEvent::new(SecurityEventType::TokenRevoked)
                .user(target.id, target.tenant_id)
                .details(json!({ "reason": reason, "scope": "all", "actor": actor.user_id })),
        )
        .await;
        Ok(revocation)
    }

    /// Create a subject record along one of the registration paths.
    pub async fn register(&self, input: RegisterUserInput, path: RegistrationPath) -> Result<User> {
        input.validate()?;

        let (role, tenant_id, approval_status, capabilities, approved_by) = match path {
            RegistrationPath::SelfSignup => {
                if input.role != Role::User {
                    return Err(AppError::Forbidden(
                        "Self sign-up is only available for the user role".to_string(),
                    ));
                }
                (
                    Role::User,
                    input.tenant_id,
                    ApprovalStatus::Pending,
                    CapabilityFlags::NONE,
                    None,
                )
            }
            RegistrationPath::AdminCreated { actor } => {
                let tenant_id = if input.role.is_tenant_scoped() {
                    input.tenant_id
                } else {
                    None
                };
                if let Err(refusal) = check_reach(&actor, tenant_id, input.role) {
                    report(
                        self.monitor.as_ref(),
                        NewSecurityEvent::new(refusal.event_type())
                            .user(actor.user_id, actor.tenant_id)
                            .details(json!({ "action": "create_user", "role": input.role })),
                    )
                    .await;
                    return Err(refusal.into_error());
                }
                (
                    input.role,
                    tenant_id,
                    ApprovalStatus::Approved,
                    CapabilityFlags::for_role(input.role),
                    Some(actor.user_id),
                )
            }
            RegistrationPath::TenantOwner => (
                Role::CompanySuperAdmin,
                input.tenant_id,
                ApprovalStatus::Approved,
                CapabilityFlags::for_role(Role::CompanySuperAdmin),
                None,
            ),
        };

        if role.is_tenant_scoped() {
            let tenant_id = tenant_id.ok_or_else(|| {
                AppError::Validation(format!("tenant_id is required for role {}", role))
            })?;
            let tenant = self
                .tenants
                .find_by_id(tenant_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Tenant {} not found", tenant_id)))?;
            if !tenant.is_active() {
                return Err(AppError::TenantDeactivated);
            }
        }

        if let Err(e) = self.password_policy.enforce(&input.password) {
            report(
                self.monitor.as_ref(),
                NewSecurityEvent::new(SecurityEventType::PasswordPolicyViolation)
                    .tenant(tenant_id)
                    .details(json!({ "action": "register" })),
            )
            .await;
            return Err(e);
        }

        let email = normalize_email(&input.email);
        if self.users.find_by_email(tenant_id, &email).await?.is_some() {
            return Err(AppError::DuplicateEmail);
        }

        let now = self.clock.now();
        let user = self
            .users
            .create(
                &CreateUserInput {
                    tenant_id,
                    email,
                    display_name: input.display_name,
                    password_hash: hash_password(&input.password)?,
                    role,
                    capabilities,
                    approval_status,
                    approved_by,
                },
                now,
            )
            .await?;

        if path == RegistrationPath::SelfSignup {
            self.approvals
                .create(&NewApprovalRequest {
                    user_id: user.id,
                    tenant_id: user.tenant_id,
                    requested_role: Role::User,
                    request_type: ApprovalRequestType::NewSignup,
                    requested_by: user.id,
                    notes: None,
                    created_at: now,
                })
                .await?;
        }

        tracing::info!(
            user_id = %user.id,
            tenant_id = ?user.tenant_id,
            role = %user.role,
            approval_status = %user.approval_status,
            "User registered"
        );
        Ok(user)
    }

    /// Administrative (de)activation. Deactivating also revokes every
    /// outstanding credential of the subject.
    pub async fn set_active(&self, user_id: StringUuid, active: bool, actor: &Actor) -> Result<User> {
        let target = self.get_user(user_id).await?;
        if actor.user_id == target.id {
            return Err(AppError::Forbidden(
                "Cannot change your own active status".to_string(),
            ));
        }
        self.ensure_reach(actor, &target, target.role).await?;

        let patch = UserPatch {
            is_active: Some(active),
            ..Default::default()
        };
        let user = self.users.update(target.id, &patch, self.clock.now()).await?;

        if !active {
            self.revoke_subject(&user, RevocationReason::AdminRevoke).await?;
        }

        tracing::info!(
            user_id = %user.id,
            actor_id = %actor.user_id,
            active,
            "User active status changed"
        );
        Ok(user)
    }

    /// Replace the subject's password and revoke earlier credentials.
    pub async fn change_password(
        &self,
        user_id: StringUuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let user = self.get_user(user_id).await?;

        if !verify_password(current_password, &user.password_hash) {
            report(
                self.monitor.as_ref(),
                NewSecurityEvent::new(SecurityEventType::LoginFailed)
                    .user(user.id, user.tenant_id)
                    .details(json!({ "reason": "wrong_password", "action": "change_password" })),
            )
            .await;
            return Err(AppError::InvalidCredentials);
        }

        if let Err(e) = self.password_policy.enforce(new_password) {
            report(
                self.monitor.as_ref(),
                NewSecurityEvent::new(SecurityEventType::PasswordPolicyViolation)
                    .user(user.id, user.tenant_id)
                    .details(json!({ "action": "change_password" })),
            )
            .await;
            return Err(e);
        }

        let patch = UserPatch {
            password_hash: Some(hash_password(new_password)?),
            ..Default::default()
        };
        self.users.update(user.id, &patch, self.clock.now()).await?;
        self.revoke_subject(&user, RevocationReason::Security).await?;

        tracing::info!(user_id = %user.id, "Password changed");
        Ok(())
    }

    /// Bump the subject's token version, then revoke everything stamped below it.
    async fn revoke_subject(
        &self,
        user: &User,
        reason: RevocationReason,
    ) -> Result<UserRevocation> {
        let version = self.users.increment_token_version(user.id).await?;
        self.revocations
            .revoke_all(user.id, user.tenant_id, reason, version)
            .await
    }

    async fn get_user(&self, user_id: StringUuid) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }

    async fn ensure_reach(&self, actor: &Actor, target: &User, role: Role) -> Result<()> {
        match check_reach(actor, target.tenant_id, role) {
            Ok(()) => Ok(()),
            Err(refusal) => {
                report(
                    self.monitor.as_ref(),
                    NewSecurityEvent::new(refusal.event_type())
                        .user(actor.user_id, actor.tenant_id)
                        .details(json!({ "target_user_id": target.id })),
                )
                .await;
                Err(refusal.into_error())
            }
        }
    }
}
