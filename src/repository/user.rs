//! User repository

use crate::domain::{CreateUserInput, Role, StringUuid, User, UserPatch};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

const USER_COLUMNS: &str = r#"
    id, tenant_id, email, display_name, password_hash, role,
    mobile_app_access, dashboard_access, platform_panel_access,
    approval_status, is_active, token_version, approved_by, last_login_at,
    mobile_last_used_at, dashboard_last_used_at, platform_panel_last_used_at,
    created_at, updated_at
"#;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Look up a subject by (tenant, email, role). `tenant_id = None` matches
    /// platform-level principals only.
    async fn find_by_credentials(
        &self,
        tenant_id: Option<StringUuid>,
        email: &str,
        role: Role,
    ) -> Result<Option<User>>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<User>>;
    /// Email uniqueness is per tenant
    async fn find_by_email(&self, tenant_id: Option<StringUuid>, email: &str)
        -> Result<Option<User>>;
    async fn create(&self, input: &CreateUserInput, at: DateTime<Utc>) -> Result<User>;
    async fn update(&self, id: StringUuid, patch: &UserPatch, at: DateTime<Utc>) -> Result<User>;
    /// Atomically bump the subject's token version and return the new value
    async fn increment_token_version(&self, id: StringUuid) -> Result<i64>;
}

pub struct UserRepositoryImpl {
    pool: MySqlPool,
}

impl UserRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for UserRepositoryImpl {
    async fn find_by_credentials(
        &self,
        tenant_id: Option<StringUuid>,
        email: &str,
        role: Role,
    ) -> Result<Option<User>> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE email = ? AND role = ? AND tenant_id <=> ?
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .bind(role)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_by_email(
        &self,
        tenant_id: Option<StringUuid>,
        email: &str,
    ) -> Result<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ? AND tenant_id <=> ? LIMIT 1"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn create(&self, input: &CreateUserInput, at: DateTime<Utc>) -> Result<User> {
        let id = StringUuid::new_v4();

        let result = sqlx::query(
            r#"
            INSERT INTO users (id, tenant_id, email, display_name, password_hash, role,
                               mobile_app_access, dashboard_access, platform_panel_access,
                               approval_status, is_active, approved_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, TRUE, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.email)
        .bind(&input.display_name)
        .bind(&input.password_hash)
        .bind(input.role)
        .bind(input.capabilities.mobile_app_access)
        .bind(input.capabilities.dashboard_access)
        .bind(input.capabilities.platform_panel_access)
        .bind(input.approval_status)
        .bind(input.approved_by)
        .bind(at)
        .bind(at)
        .execute(&self.pool)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &result {
            if db_err.is_unique_violation() {
                return Err(AppError::DuplicateEmail);
            }
        }
        result?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create user")))
    }

    async fn update(&self, id: StringUuid, patch: &UserPatch, at: DateTime<Utc>) -> Result<User> {
        let capabilities = patch.capabilities;
        let result = sqlx::query(
            r#"
            UPDATE users
            SET role = COALESCE(?, role),
                mobile_app_access = COALESCE(?, mobile_app_access),
                dashboard_access = COALESCE(?, dashboard_access),
                platform_panel_access = COALESCE(?, platform_panel_access),
                approval_status = COALESCE(?, approval_status),
                is_active = COALESCE(?, is_active),
                password_hash = COALESCE(?, password_hash),
                approved_by = COALESCE(?, approved_by),
                last_login_at = COALESCE(?, last_login_at),
                mobile_last_used_at = COALESCE(?, mobile_last_used_at),
                dashboard_last_used_at = COALESCE(?, dashboard_last_used_at),
                platform_panel_last_used_at = COALESCE(?, platform_panel_last_used_at),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(patch.role)
        .bind(capabilities.map(|c| c.mobile_app_access))
        .bind(capabilities.map(|c| c.dashboard_access))
        .bind(capabilities.map(|c| c.platform_panel_access))
        .bind(patch.approval_status)
        .bind(patch.is_active)
        .bind(&patch.password_hash)
        .bind(patch.approved_by)
        .bind(patch.last_login_at)
        .bind(patch.mobile_last_used_at)
        .bind(patch.dashboard_last_used_at)
        .bind(patch.platform_panel_last_used_at)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to update user")))
    }

    async fn increment_token_version(&self, id: StringUuid) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE users SET token_version = token_version + 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        let version: i64 = sqlx::query_scalar("SELECT token_version FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(version)
    }
}
