//! Second-party sign-off for role grants

use crate::clock::Clock;
use crate::domain::{
    Actor, ApprovalRequest, ApprovalRequestType, CapabilityFlags, CreateApprovalInput,
    NewApprovalRequest, NewSecurityEvent, ReviewDecision, ReviewOutcome, Role, StringUuid,
};
use crate::error::{AppError, Result};
use crate::repository::{ApprovalRepository, UserRepository};
use crate::service::access_control::{check_reach, report, Refusal};
use crate::service::security_monitor::SecurityRecorder;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

/// Approval state machine: `pending` moves once to `approved` or `rejected`
/// and never leaves a terminal state.
pub struct ApprovalWorkflow<U: UserRepository, P: ApprovalRepository> {
    users: Arc<U>,
    approvals: Arc<P>,
    monitor: Arc<dyn SecurityRecorder>,
    clock: Arc<dyn Clock>,
}

impl<U: UserRepository, P: ApprovalRepository> ApprovalWorkflow<U, P> {
    pub fn new(
        users: Arc<U>,
        approvals: Arc<P>,
        monitor: Arc<dyn SecurityRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            approvals,
            monitor,
            clock,
        }
    }

    /// Open a pending request on behalf of `requester`.
    pub async fn create(
        &self,
        input: CreateApprovalInput,
        requester: &Actor,
    ) -> Result<ApprovalRequest> {
        input.validate()?;

        if !requester.role.is_administrator() {
            return Err(self
                .refuse(requester, Refusal::NotAdministrator, "create", input.user_id)
                .await);
        }

        let subject = self
            .users
            .find_by_id(input.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", input.user_id)))?;

        if let Err(refusal) = check_reach(requester, subject.tenant_id, input.requested_role) {
            return Err(self.refuse(requester, refusal, "create", subject.id).await);
        }
        if input.requested_role.is_tenant_scoped() != subject.tenant_id.is_some() {
            return Err(AppError::Validation(format!(
                "Role {} does not match the subject's tenant scope",
                input.requested_role
            )));
        }

        if self
            .approvals
            .find_pending_by_user(subject.id)
            .await?
            .is_some()
        {
            return Err(AppError::DuplicatePending);
        }

        let request = self
            .approvals
            .create(&NewApprovalRequest {
                user_id: subject.id,
                tenant_id: subject.tenant_id,
                requested_role: input.requested_role,
                request_type: input.request_type,
                requested_by: requester.user_id,
                notes: input.notes,
                created_at: self.clock.now(),
            })
            .await?;

        tracing::info!(
            request_id = %request.id,
            user_id = %request.user_id,
            requested_role = %request.requested_role,
            request_type = %request.request_type,
            requested_by = %requester.user_id,
            "Approval request created"
        );
        Ok(request)
    }

    /// Approve: the request closes and the subject receives the requested
    /// role with its capability flags, in one store transaction.
    pub async fn approve(
        &self,
        request_id: StringUuid,
        reviewer: &Actor,
        notes: Option<String>,
    ) -> Result<ApprovalRequest> {
        let request = self.reviewable(request_id, reviewer).await?;

        let decision = ReviewDecision::Approve {
            role: request.requested_role,
            capabilities: CapabilityFlags::for_role(request.requested_role),
            reactivate: request.request_type == ApprovalRequestType::Reactivation,
        };
        self.complete(request, reviewer, notes, decision).await
    }

    /// Reject with a reason. New sign-ups and reactivations also mark the
    /// subject rejected; a refused role change leaves current access alone.
    pub async fn reject(
        &self,
        request_id: StringUuid,
        reviewer: &Actor,
        reason: String,
    ) -> Result<ApprovalRequest> {
        let request = self.reviewable(request_id, reviewer).await?;

        let decision = ReviewDecision::Reject {
            reject_user: matches!(
                request.request_type,
                ApprovalRequestType::NewSignup | ApprovalRequestType::Reactivation
            ),
        };
        self.complete(request, reviewer, Some(reason), decision).await
    }

    pub async fn get(&self, request_id: StringUuid, actor: &Actor) -> Result<ApprovalRequest> {
        let request = self.find(request_id).await?;
        if request.user_id == actor.user_id {
            return Ok(request);
        }
        if let Err(refusal) = check_reach(actor, request.tenant_id, Role::User) {
            return Err(self.refuse(actor, refusal, "view", request.user_id).await);
        }
        Ok(request)
    }

    /// Pending requests visible to `actor`, oldest first, with the total count.
    pub async fn list_pending(
        &self,
        actor: &Actor,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<ApprovalRequest>, i64)> {
        if !actor.role.is_administrator() {
            return Err(Refusal::NotAdministrator.into_error());
        }
        let scope = if actor.is_platform_admin() {
            None
        } else {
            Some(actor.tenant_id.ok_or(AppError::CrossTenant)?)
        };

        let per_page = per_page.clamp(1, 100);
        let offset = (page.max(1) - 1).saturating_mul(per_page);
        let requests = self.approvals.list_pending(scope, offset, per_page).await?;
        let total = self.approvals.count_pending(scope).await?;
        Ok((requests, total))
    }

    async fn find(&self, request_id: StringUuid) -> Result<ApprovalRequest> {
        self.approvals
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Approval request {} not found", request_id)))
    }

    /// Load a request and check that `reviewer` may close it.
    async fn reviewable(
        &self,
        request_id: StringUuid,
        reviewer: &Actor,
    ) -> Result<ApprovalRequest> {
        let request = self.find(request_id).await?;
        if !request.is_pending() {
            return Err(AppError::NotPending);
        }
        if let Err(refusal) = check_reach(reviewer, request.tenant_id, request.requested_role) {
            return Err(self.refuse(reviewer, refusal, "review", request.user_id).await);
        }
        if reviewer.user_id == request.user_id {
            return Err(AppError::Forbidden(
                "Cannot review your own approval request".to_string(),
            ));
        }
        Ok(request)
    }

    async fn complete(
        &self,
        request: ApprovalRequest,
        reviewer: &Actor,
        notes: Option<String>,
        decision: ReviewDecision,
    ) -> Result<ApprovalRequest> {
        let outcome = ReviewOutcome {
            request_id: request.id,
            reviewer_id: reviewer.user_id,
            reviewed_at: self.clock.now(),
            notes,
            decision,
        };
        let closed = self.approvals.complete_review(&outcome).await?;

        let status = outcome.final_status();
        metrics::counter!("rollcall_approval_decisions_total", "decision" => status.to_string())
            .increment(1);
        tracing::info!(
            request_id = %closed.id,
            user_id = %closed.user_id,
            reviewer_id = %reviewer.user_id,
            requested_role = %closed.requested_role,
            decision = %status,
            "Approval request reviewed"
        );
        Ok(closed)
    }

    async fn refuse(
        &self,
        actor: &Actor,
        refusal: Refusal,
        action: &str,
        subject_id: StringUuid,
    ) -> AppError {
        report(
            self.monitor.as_ref(),
            NewSecurityEvent::new(refusal.event_type())
                .user(actor.user_id, actor.tenant_id)
                .details(json!({
                    "action": format!("approval_{}", action),
                    "subject_id": subject_id,
                    "actor_role": actor.role,
                })),
        )
        .await;
        refusal.into_error()
    }
}
