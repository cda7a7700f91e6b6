use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::info;

use crate::auth::RoleAssignmentGuard;
use crate::cache::ScopeCache;
use crate::entities::{prelude::*, user};
use crate::error::{AuthzError, Result};

#[derive(Clone)]
pub struct UserService {
    db: DatabaseConnection,
    guard: RoleAssignmentGuard,
    scope_cache: ScopeCache,
}

impl UserService {
    pub fn new(db: DatabaseConnection, guard: RoleAssignmentGuard, scope_cache: ScopeCache) -> Self {
        Self {
            db,
            guard,
            scope_cache,
        }
    }

    pub async fn create_user(
        &self,
        username: &str,
        role_id: Option<i64>,
        dept_id: Option<i64>,
    ) -> Result<user::Model> {
        if let Some(existing) = User::find()
            .filter(user::Column::Username.eq(username))
            .one(&self.db)
            .await?
        {
            return Err(AuthzError::AlreadyExists { entity: "user", id: existing.id });
        }
        if let Some(role_id) = role_id {
            if Role::find_by_id(role_id).one(&self.db).await?.is_none() {
                return Err(AuthzError::NotFound { entity: "role", id: role_id });
            }
        }
        if let Some(dept_id) = dept_id {
            if Dept::find_by_id(dept_id).one(&self.db).await?.is_none() {
                return Err(AuthzError::NotFound { entity: "dept", id: dept_id });
            }
        }

        let new_user = user::ActiveModel {
            username: Set(username.to_string()),
            role_id: Set(role_id),
            dept_id: Set(dept_id),
            is_active: Set(true),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        Ok(new_user.insert(&self.db).await?)
    }

    pub async fn find_user_by_id(&self, user_id: i64) -> Result<Option<user::Model>> {
        Ok(User::find_by_id(user_id).one(&self.db).await?)
    }

    async fn require_user(&self, user_id: i64) -> Result<user::Model> {
        self.find_user_by_id(user_id)
            .await?
            .ok_or(AuthzError::NotFound { entity: "user", id: user_id })
    }

    /// Give `target_user_id` the role `role_id`, on behalf of `acting_user_id`.
    pub async fn assign_role(
        &self,
        acting_user_id: i64,
        target_user_id: i64,
        role_id: i64,
    ) -> Result<user::Model> {
        let acting = self.require_user(acting_user_id).await?;
        let acting_role_id = self.guard.acting_role(&acting)?;
        self.guard.require_assign_role(acting_role_id, role_id).await?;

        let target = self.require_user(target_user_id).await?;
        let mut active: user::ActiveModel = target.into();
        active.role_id = Set(Some(role_id));
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&self.db).await?;

        self.scope_cache.invalidate_users(&[target_user_id]).await;
        info!(acting_user_id, target_user_id, role_id, "user role assigned");
        Ok(updated)
    }

    pub async fn move_to_dept(&self, user_id: i64, dept_id: i64) -> Result<user::Model> {
        if Dept::find_by_id(dept_id).one(&self.db).await?.is_none() {
            return Err(AuthzError::NotFound { entity: "dept", id: dept_id });
        }
        let existing = self.require_user(user_id).await?;
        let mut active: user::ActiveModel = existing.into();
        active.dept_id = Set(Some(dept_id));
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&self.db).await?;

        self.scope_cache.invalidate_users(&[user_id]).await;
        info!(user_id, dept_id, "user moved to department");
        Ok(updated)
    }
}
