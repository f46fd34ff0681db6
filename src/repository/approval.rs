//! Approval request repository

use crate::domain::{
    ApprovalRequest, ApprovalStatus, NewApprovalRequest, ReviewDecision, ReviewOutcome,
    StringUuid,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

const APPROVAL_COLUMNS: &str = r#"
    id, user_id, tenant_id, requested_role, request_type, status,
    requested_by, reviewer_id, reviewed_at, notes, created_at
"#;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    /// Insert a pending request. Fails with `DuplicatePending` when the
    /// subject already has one, even under concurrent inserts.
    async fn create(&self, input: &NewApprovalRequest) -> Result<ApprovalRequest>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<ApprovalRequest>>;
    async fn find_pending_by_user(&self, user_id: StringUuid) -> Result<Option<ApprovalRequest>>;
    /// `tenant_id = None` lists across all tenants
    async fn list_pending(
        &self,
        tenant_id: Option<StringUuid>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ApprovalRequest>>;
    async fn count_pending(&self, tenant_id: Option<StringUuid>) -> Result<i64>;
    /// Close a pending request and apply its effect on the subject in one
    /// transaction. Only the first caller for a given request succeeds; later
    /// callers get `NotPending`.
    async fn complete_review(&self, outcome: &ReviewOutcome) -> Result<ApprovalRequest>;
}

pub struct ApprovalRepositoryImpl {
    pool: MySqlPool,
}

impl ApprovalRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApprovalRepository for ApprovalRepositoryImpl {
    async fn create(&self, input: &NewApprovalRequest) -> Result<ApprovalRequest> {
        let id = StringUuid::new_v4();

        // `pending_user_id` is a generated column (user_id while pending, NULL
        // otherwise) with a unique index, so a racing insert fails here too.
        let result = sqlx::query(
            r#"
            INSERT INTO approval_requests (id, user_id, tenant_id, requested_role, request_type,
                                           status, requested_by, notes, created_at)
            SELECT ?, ?, ?, ?, ?, 'pending', ?, ?, ?
            FROM DUAL
            WHERE NOT EXISTS (
                SELECT 1 FROM approval_requests WHERE user_id = ? AND status = 'pending'
            )
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(input.tenant_id)
        .bind(input.requested_role)
        .bind(input.request_type)
        .bind(input.requested_by)
        .bind(&input.notes)
        .bind(input.created_at)
        .bind(input.user_id)
        .execute(&self.pool)
        .await;

        let result = match result {
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::DuplicatePending)
            }
            other => other?,
        };
        if result.rows_affected() == 0 {
            return Err(AppError::DuplicatePending);
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create approval request")))
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<ApprovalRequest>> {
        let sql = format!("SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE id = ?");
        let request = sqlx::query_as::<_, ApprovalRequest>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(request)
    }

    async fn find_pending_by_user(&self, user_id: StringUuid) -> Result<Option<ApprovalRequest>> {
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE user_id = ? AND status = 'pending'"
        );
        let request = sqlx::query_as::<_, ApprovalRequest>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(request)
    }

    async fn list_pending(
        &self,
        tenant_id: Option<StringUuid>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ApprovalRequest>> {
        let sql = format!(
            r#"
            SELECT {APPROVAL_COLUMNS}
            FROM approval_requests
            WHERE status = 'pending' AND (? IS NULL OR tenant_id = ?)
            ORDER BY created_at ASC
            LIMIT ? OFFSET ?
            "#
        );
        let requests = sqlx::query_as::<_, ApprovalRequest>(&sql)
            .bind(tenant_id)
            .bind(tenant_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(requests)
    }

    async fn count_pending(&self, tenant_id: Option<StringUuid>) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM approval_requests WHERE status = 'pending' AND (? IS NULL OR tenant_id = ?)",
        )
        .bind(tenant_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn complete_review(&self, outcome: &ReviewOutcome) -> Result<ApprovalRequest> {
        let mut tx = self.pool.begin().await?;

        let Some(user_id) = sqlx::query_scalar::<_, StringUuid>(
            "SELECT user_id FROM approval_requests WHERE id = ? FOR UPDATE",
        )
        .bind(outcome.request_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Err(AppError::NotFound(format!(
                "Approval request {} not found",
                outcome.request_id
            )));
        };

        let flipped = sqlx::query(
            r#"
            UPDATE approval_requests
            SET status = ?, reviewer_id = ?, reviewed_at = ?, notes = COALESCE(?, notes)
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(outcome.final_status())
        .bind(outcome.reviewer_id)
        .bind(outcome.reviewed_at)
        .bind(&outcome.notes)
        .bind(outcome.request_id)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            return Err(AppError::NotPending);
        }

        match &outcome.decision {
            ReviewDecision::Approve {
                role,
                capabilities,
                reactivate,
            } => {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET role = ?, mobile_app_access = ?, dashboard_access = ?,
                        platform_panel_access = ?, approval_status = ?, approved_by = ?,
                        is_active = (is_active OR ?), updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(*role)
                .bind(capabilities.mobile_app_access)
                .bind(capabilities.dashboard_access)
                .bind(capabilities.platform_panel_access)
                .bind(ApprovalStatus::Approved)
                .bind(outcome.reviewer_id)
                .bind(*reactivate)
                .bind(outcome.reviewed_at)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
            ReviewDecision::Reject { reject_user: true } => {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET approval_status = ?, approved_by = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(ApprovalStatus::Rejected)
                .bind(outcome.reviewer_id)
                .bind(outcome.reviewed_at)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
            ReviewDecision::Reject { reject_user: false } => {}
        }

        tx.commit().await?;

        self.find_by_id(outcome.request_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to load reviewed request")))
    }
}
