//! Common test utilities: in-memory repositories and a wired-up engine set

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_core::clock::{Clock, ManualClock};
use rollcall_core::config::{JwtConfig, RevocationConfig, SecurityMonitorConfig};
use rollcall_core::domain::{
    Actor, ApprovalRequest, ApprovalStatus, CapabilityFlags, CreateSecurityAlertInput,
    CreateUserInput, NewApprovalRequest, ReviewDecision, ReviewOutcome, RevocationEntry, Role,
    SecurityAlert, SecurityEvent, SecurityEventType, StringUuid, Tenant, TenantStatus, User,
    UserPatch, UserRevocation,
};
use rollcall_core::error::{AppError, Result};
use rollcall_core::jwt::TokenService;
use rollcall_core::repository::{
    ApprovalRepository, RevocationRepository, SecurityAlertRepository, SecurityEventRepository,
    TenantRepository, UserRepository,
};
use rollcall_core::service::password::hash_password;
use rollcall_core::service::{
    AccessControlEngine, ApprovalWorkflow, RevocationRegistry, SecurityMonitor,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-key-for-rollcall";
pub const GOOD_PASSWORD: &str = "Kp7!vRzq";

// ============================================================================
// Users
// ============================================================================

pub struct TestUserRepository {
    users: RwLock<Vec<User>>,
}

impl TestUserRepository {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(vec![]),
        }
    }

    pub async fn add_user(&self, user: User) {
        self.users.write().await.push(user);
    }

    pub async fn get(&self, id: StringUuid) -> Option<User> {
        self.users.read().await.iter().find(|u| u.id == id).cloned()
    }

    /// Apply a review decision to a user row; caller holds the request lock.
    async fn apply_review(&self, user_id: StringUuid, outcome: &ReviewOutcome) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        match &outcome.decision {
            ReviewDecision::Approve {
                role,
                capabilities,
                reactivate,
            } => {
                user.role = *role;
                user.capabilities = *capabilities;
                user.approval_status = ApprovalStatus::Approved;
                user.approved_by = Some(outcome.reviewer_id);
                user.is_active = user.is_active || *reactivate;
            }
            ReviewDecision::Reject { reject_user: true } => {
                user.approval_status = ApprovalStatus::Rejected;
                user.approved_by = Some(outcome.reviewer_id);
            }
            ReviewDecision::Reject { reject_user: false } => {}
        }
        user.updated_at = outcome.reviewed_at;
        Ok(())
    }
}

impl Default for TestUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for TestUserRepository {
    async fn find_by_credentials(
        &self,
        tenant_id: Option<StringUuid>,
        email: &str,
        role: Role,
    ) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|u| u.tenant_id == tenant_id && u.email == email && u.role == role)
            .cloned())
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<User>> {
        Ok(self.get(id).await)
    }

    async fn find_by_email(
        &self,
        tenant_id: Option<StringUuid>,
        email: &str,
    ) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|u| u.tenant_id == tenant_id && u.email == email)
            .cloned())
    }

    async fn create(&self, input: &CreateUserInput, at: DateTime<Utc>) -> Result<User> {
        let mut users = self.users.write().await;
        if users
            .iter()
            .any(|u| u.tenant_id == input.tenant_id && u.email == input.email)
        {
            return Err(AppError::DuplicateEmail);
        }
        let user = User {
            id: StringUuid::new_v4(),
            tenant_id: input.tenant_id,
            email: input.email.clone(),
            display_name: input.display_name.clone(),
            password_hash: input.password_hash.clone(),
            role: input.role,
            capabilities: input.capabilities,
            approval_status: input.approval_status,
            is_active: true,
            approved_by: input.approved_by,
            created_at: at,
            updated_at: at,
            ..Default::default()
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn update(&self, id: StringUuid, patch: &UserPatch, at: DateTime<Utc>) -> Result<User> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;
        patch.apply_to(user, at);
        Ok(user.clone())
    }

    async fn increment_token_version(&self, id: StringUuid) -> Result<i64> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;
        user.token_version += 1;
        Ok(user.token_version)
    }
}

// ============================================================================
// Tenants
// ============================================================================

pub struct TestTenantRepository {
    tenants: RwLock<Vec<Tenant>>,
}

impl TestTenantRepository {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(vec![]),
        }
    }

    pub async fn add_tenant(&self, tenant: Tenant) {
        self.tenants.write().await.push(tenant);
    }

    pub async fn set_status(&self, id: StringUuid, status: TenantStatus) {
        if let Some(tenant) = self.tenants.write().await.iter_mut().find(|t| t.id == id) {
            tenant.status = status;
        }
    }
}

impl Default for TestTenantRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantRepository for TestTenantRepository {
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<Tenant>> {
        let tenants = self.tenants.read().await;
        Ok(tenants.iter().find(|t| t.id == id).cloned())
    }
}

// ============================================================================
// Approval requests
// ============================================================================

/// Holds the request lock while touching the user row, so a review is
/// atomic the same way the MySQL transaction is.
pub struct TestApprovalRepository {
    requests: RwLock<Vec<ApprovalRequest>>,
    users: Arc<TestUserRepository>,
}

impl TestApprovalRepository {
    pub fn new(users: Arc<TestUserRepository>) -> Self {
        Self {
            requests: RwLock::new(vec![]),
            users,
        }
    }
}

#[async_trait]
impl ApprovalRepository for TestApprovalRepository {
    async fn create(&self, input: &NewApprovalRequest) -> Result<ApprovalRequest> {
        let mut requests = self.requests.write().await;
        if requests
            .iter()
            .any(|r| r.user_id == input.user_id && r.is_pending())
        {
            return Err(AppError::DuplicatePending);
        }
        let request = ApprovalRequest {
            id: StringUuid::new_v4(),
            user_id: input.user_id,
            tenant_id: input.tenant_id,
            requested_role: input.requested_role,
            request_type: input.request_type,
            status: ApprovalStatus::Pending,
            requested_by: input.requested_by,
            reviewer_id: None,
            reviewed_at: None,
            notes: input.notes.clone(),
            created_at: input.created_at,
        };
        requests.push(request.clone());
        Ok(request)
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<ApprovalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests.iter().find(|r| r.id == id).cloned())
    }

    async fn find_pending_by_user(&self, user_id: StringUuid) -> Result<Option<ApprovalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .iter()
            .find(|r| r.user_id == user_id && r.is_pending())
            .cloned())
    }

    async fn list_pending(
        &self,
        tenant_id: Option<StringUuid>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ApprovalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .iter()
            .filter(|r| r.is_pending() && (tenant_id.is_none() || r.tenant_id == tenant_id))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_pending(&self, tenant_id: Option<StringUuid>) -> Result<i64> {
        let requests = self.requests.read().await;
        Ok(requests
            .iter()
            .filter(|r| r.is_pending() && (tenant_id.is_none() || r.tenant_id == tenant_id))
            .count() as i64)
    }

    async fn complete_review(&self, outcome: &ReviewOutcome) -> Result<ApprovalRequest> {
        let mut requests = self.requests.write().await;
        let request = requests
            .iter_mut()
            .find(|r| r.id == outcome.request_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Approval request {} not found", outcome.request_id))
            })?;
        if !request.is_pending() {
            return Err(AppError::NotPending);
        }

        self.users.apply_review(request.user_id, outcome).await?;

        request.status = outcome.final_status();
        request.reviewer_id = Some(outcome.reviewer_id);
        request.reviewed_at = Some(outcome.reviewed_at);
        if outcome.notes.is_some() {
            request.notes = outcome.notes.clone();
        }
        Ok(request.clone())
    }
}

// ============================================================================
// Revocation store
// ============================================================================

/// Revocation store that can be switched into an outage or a stall.
pub struct TestRevocationRepository {
    tokens: RwLock<HashMap<String, RevocationEntry>>,
    users: RwLock<HashMap<StringUuid, UserRevocation>>,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl TestRevocationRepository {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        }
    }

    /// Every call fails with a store error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every call hangs far beyond any store timeout
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub async fn row_count(&self) -> usize {
        self.tokens.read().await.len() + self.users.read().await.len()
    }

    /// Write a row the way another process sharing the store would
    pub async fn insert_foreign(&self, entry: RevocationEntry) {
        self.tokens
            .write()
            .await
            .insert(entry.token_hash.clone(), entry);
    }

    async fn gate(&self) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Store("revocation store unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for TestRevocationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RevocationRepository for TestRevocationRepository {
    async fn insert(&self, entry: &RevocationEntry) -> Result<()> {
        self.gate().await?;
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(&entry.token_hash) {
            Some(existing) => existing.expires_at = existing.expires_at.max(entry.expires_at),
            None => {
                tokens.insert(entry.token_hash.clone(), entry.clone());
            }
        }
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RevocationEntry>> {
        self.gate().await?;
        Ok(self.tokens.read().await.get(token_hash).cloned())
    }

    async fn delete(&self, token_hash: &str) -> Result<()> {
        self.gate().await?;
        self.tokens.write().await.remove(token_hash);
        Ok(())
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<RevocationEntry>> {
        self.gate().await?;
        Ok(self
            .tokens
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .cloned()
            .collect())
    }

    async fn insert_user_revocation(&self, revocation: &UserRevocation) -> Result<()> {
        self.gate().await?;
        let mut users = self.users.write().await;
        match users.get_mut(&revocation.user_id) {
            Some(existing) => existing.merge(revocation.clone()),
            None => {
                users.insert(revocation.user_id, revocation.clone());
            }
        }
        Ok(())
    }

    async fn find_user_revocation(&self, user_id: StringUuid) -> Result<Option<UserRevocation>> {
        self.gate().await?;
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn list_user_revocations(&self, now: DateTime<Utc>) -> Result<Vec<UserRevocation>> {
        self.gate().await?;
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|r| r.is_live(now))
            .cloned()
            .collect())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.gate().await?;
        let mut tokens = self.tokens.write().await;
        let mut users = self.users.write().await;
        let before = tokens.len() + users.len();
        tokens.retain(|_, e| e.is_live(now));
        users.retain(|_, r| r.is_live(now));
        Ok((before - tokens.len() - users.len()) as u64)
    }
}

// ============================================================================
// Security events and alerts
// ============================================================================

pub struct TestSecurityEventRepository {
    events: RwLock<Vec<SecurityEvent>>,
}

impl TestSecurityEventRepository {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(vec![]),
        }
    }

    pub async fn all(&self) -> Vec<SecurityEvent> {
        self.events.read().await.clone()
    }

    pub async fn of_type(&self, event_type: SecurityEventType) -> Vec<SecurityEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl Default for TestSecurityEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecurityEventRepository for TestSecurityEventRepository {
    async fn append(&self, event: &SecurityEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn count_by_source_since(
        &self,
        source_address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.source_address.as_deref() == Some(source_address) && e.created_at >= since)
            .count() as i64)
    }

    async fn count_by_type_since(
        &self,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.event_type == event_type && e.created_at >= since)
            .count() as i64)
    }

    async fn count_by_type_and_source_since(
        &self,
        event_type: SecurityEventType,
        source_address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| {
                e.event_type == event_type
                    && e.source_address.as_deref() == Some(source_address)
                    && e.created_at >= since
            })
            .count() as i64)
    }

    async fn list_recent(
        &self,
        event_type: Option<SecurityEventType>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SecurityEvent>> {
        let events = self.events.read().await;
        let mut matching: Vec<SecurityEvent> = events
            .iter()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t) && e.created_at >= since)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.created_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

pub struct TestSecurityAlertRepository {
    alerts: RwLock<Vec<SecurityAlert>>,
}

impl TestSecurityAlertRepository {
    pub fn new() -> Self {
        Self {
            alerts: RwLock::new(vec![]),
        }
    }

    pub async fn all(&self) -> Vec<SecurityAlert> {
        self.alerts.read().await.clone()
    }
}

impl Default for TestSecurityAlertRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecurityAlertRepository for TestSecurityAlertRepository {
    async fn create(&self, input: &CreateSecurityAlertInput) -> Result<SecurityAlert> {
        let alert = SecurityAlert {
            id: StringUuid::new_v4(),
            event_type: input.event_type,
            severity: input.severity,
            source_address: input.source_address.clone(),
            tenant_id: input.tenant_id,
            user_id: input.user_id,
            event_count: input.event_count,
            window_mins: input.window_mins,
            created_at: input.created_at,
            resolved_at: None,
            resolved_by: None,
        };
        self.alerts.write().await.push(alert.clone());
        Ok(alert)
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<SecurityAlert>> {
        Ok(self.alerts.read().await.iter().find(|a| a.id == id).cloned())
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<SecurityAlert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_unresolved(&self, offset: i64, limit: i64) -> Result<Vec<SecurityAlert>> {
        let alerts = self.alerts.read().await;
        Ok(alerts
            .iter()
            .rev()
            .filter(|a| !a.is_resolved())
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.alerts.read().await.len() as i64)
    }

    async fn count_unresolved(&self) -> Result<i64> {
        Ok(self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| !a.is_resolved())
            .count() as i64)
    }

    async fn resolve(
        &self,
        id: StringUuid,
        resolved_by: StringUuid,
        at: DateTime<Utc>,
    ) -> Result<SecurityAlert> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Security alert {} not found", id)))?;
        if alert.resolved_at.is_none() {
            alert.resolved_at = Some(at);
            alert.resolved_by = Some(resolved_by);
        }
        Ok(alert.clone())
    }
}

// ============================================================================
// Wired engines
// ============================================================================

pub type TestMonitor = SecurityMonitor<TestSecurityEventRepository, TestSecurityAlertRepository>;
pub type TestEngine = AccessControlEngine<
    TestUserRepository,
    TestTenantRepository,
    TestApprovalRepository,
    TestRevocationRepository,
>;
pub type TestWorkflow = ApprovalWorkflow<TestUserRepository, TestApprovalRepository>;

/// Every engine wired over in-memory stores sharing one manual clock
pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub users: Arc<TestUserRepository>,
    pub tenants: Arc<TestTenantRepository>,
    pub approvals: Arc<TestApprovalRepository>,
    pub revocation_store: Arc<TestRevocationRepository>,
    pub events: Arc<TestSecurityEventRepository>,
    pub alerts: Arc<TestSecurityAlertRepository>,
    pub tokens: Arc<TokenService>,
    pub registry: Arc<RevocationRegistry<TestRevocationRepository>>,
    pub monitor: Arc<TestMonitor>,
    pub engine: TestEngine,
    pub workflow: TestWorkflow,
}

pub fn test_jwt_config() -> JwtConfig {
    JwtConfig {
        secret: TEST_JWT_SECRET.to_string(),
        ..Default::default()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_revocation_config(RevocationConfig::default())
    }

    pub fn with_revocation_config(revocation: RevocationConfig) -> Self {
        Self::with_configs(test_jwt_config(), revocation)
    }

    pub fn with_jwt_config(jwt: JwtConfig) -> Self {
        Self::with_configs(jwt, RevocationConfig::default())
    }

    pub fn with_configs(jwt: JwtConfig, revocation: RevocationConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let users = Arc::new(TestUserRepository::new());
        let tenants = Arc::new(TestTenantRepository::new());
        let approvals = Arc::new(TestApprovalRepository::new(users.clone()));
        let revocation_store = Arc::new(TestRevocationRepository::new());
        let events = Arc::new(TestSecurityEventRepository::new());
        let alerts = Arc::new(TestSecurityAlertRepository::new());

        let token_lifetime = jwt.max_token_lifetime();
        let tokens = Arc::new(TokenService::new(jwt, dyn_clock.clone()).expect("token service"));
        let registry = Arc::new(RevocationRegistry::new(
            revocation_store.clone(),
            dyn_clock.clone(),
            revocation,
            token_lifetime,
        ));
        let monitor = Arc::new(SecurityMonitor::new(
            events.clone(),
            alerts.clone(),
            dyn_clock.clone(),
            SecurityMonitorConfig::default(),
        ));

        let engine = AccessControlEngine::new(
            users.clone(),
            tenants.clone(),
            approvals.clone(),
            registry.clone(),
            tokens.clone(),
            monitor.clone(),
            dyn_clock.clone(),
        );
        let workflow = ApprovalWorkflow::new(
            users.clone(),
            approvals.clone(),
            monitor.clone(),
            dyn_clock,
        );

        Self {
            clock,
            users,
            tenants,
            approvals,
            revocation_store,
            events,
            alerts,
            tokens,
            registry,
            monitor,
            engine,
            workflow,
        }
    }

    pub async fn tenant(&self) -> Tenant {
        let tenant = Tenant {
            name: "Acme Attendance".to_string(),
            ..Default::default()
        };
        self.tenants.add_tenant(tenant.clone()).await;
        tenant
    }

    /// Insert an approved, active subject holding `role` with its capabilities
    pub async fn approved_user(&self, tenant_id: Option<StringUuid>, role: Role, email: &str) -> User {
        self.seed_user(
            tenant_id,
            role,
            email,
            ApprovalStatus::Approved,
            CapabilityFlags::for_role(role),
        )
        .await
    }

    pub async fn seed_user(
        &self,
        tenant_id: Option<StringUuid>,
        role: Role,
        email: &str,
        approval_status: ApprovalStatus,
        capabilities: CapabilityFlags,
    ) -> User {
        let now = self.clock.now();
        let user = User {
            tenant_id,
            email: email.to_string(),
            password_hash: hash_password(GOOD_PASSWORD).expect("hash"),
            role,
            capabilities,
            approval_status,
            created_at: now,
            updated_at: now,
            ..Default::default()
        };
        self.users.add_user(user.clone()).await;
        user
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn actor_for(user: &User) -> Actor {
    Actor {
        user_id: user.id,
        tenant_id: user.tenant_id,
        role: user.role,
    }
}
