use std::collections::BTreeSet;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use tracing::info;

use crate::cache::{PermissionCache, ScopeCache};
use crate::entities::role::{DataScope, SUPER_ADMIN_ROLE_ID};
use crate::entities::{dept, prelude::*, role, role_dept, user};
use crate::error::{AuthzError, Result};

#[derive(Clone)]
pub struct RoleService {
    db: DatabaseConnection,
    permission_cache: PermissionCache,
    scope_cache: ScopeCache,
}

impl RoleService {
    pub fn new(db: DatabaseConnection, permission_cache: PermissionCache, scope_cache: ScopeCache) -> Self {
        Self {
            db,
            permission_cache,
            scope_cache,
        }
    }

    pub async fn create_role(&self, name: &str, sort: i32, data_scope: DataScope) -> Result<role::Model> {
        let new_role = role::ActiveModel {
            name: Set(name.to_string()),
            sort: Set(sort),
            data_scope: Set(data_scope),
            is_active: Set(true),
            deleted_at: Set(None),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        Ok(new_role.insert(&self.db).await?)
    }

    /// Fetch a role that has not been soft-deleted.
    pub async fn find_role(&self, role_id: i64) -> Result<role::Model> {
        Role::find_by_id(role_id)
            .filter(role::Column::DeletedAt.is_null())
            .one(&self.db)
            .await?
            .ok_or(AuthzError::NotFound { entity: "role", id: role_id })
    }

    pub async fn set_data_scope(&self, role_id: i64, data_scope: DataScope) -> Result<role::Model> {
        let existing = self.find_role(role_id).await?;
        let mut active: role::ActiveModel = existing.into();
        active.data_scope = Set(data_scope);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&self.db).await?;

        self.invalidate_holders_scope(role_id).await?;
        info!(role_id, ?data_scope, "role data scope changed");
        Ok(updated)
    }

    /// Replace the departments visible under the custom data scope.
    pub async fn set_role_depts(&self, role_id: i64, dept_ids: &[i64]) -> Result<()> {
        self.find_role(role_id).await?;

        let dept_ids: Vec<i64> = dept_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if !dept_ids.is_empty() {
            let found: BTreeSet<i64> = Dept::find()
                .select_only()
                .column(dept::Column::Id)
                .filter(dept::Column::Id.is_in(dept_ids.clone()))
                .into_tuple::<i64>()
                .all(&self.db)
                .await?
                .into_iter()
                .collect();
            let missing: Vec<i64> = dept_ids.iter().filter(|id| !found.contains(*id)).copied().collect();
            if !missing.is_empty() {
                return Err(AuthzError::InvalidReference { entity: "dept", ids: missing });
            }
        }

        let txn = self.db.begin().await?;
        RoleDept::delete_many()
            .filter(role_dept::Column::RoleId.eq(role_id))
            .exec(&txn)
            .await?;
        if !dept_ids.is_empty() {
            let rows = dept_ids.iter().map(|dept_id| role_dept::ActiveModel {
                role_id: Set(role_id),
                dept_id: Set(*dept_id),
            });
            RoleDept::insert_many(rows).exec_without_returning(&txn).await?;
        }
        txn.commit().await?;

        self.invalidate_holders_scope(role_id).await?;
        info!(role_id, depts = ?dept_ids, "role custom depts replaced");
        Ok(())
    }

    pub async fn get_role_dept_ids(&self, role_id: i64) -> Result<Vec<i64>> {
        Ok(RoleDept::find()
            .select_only()
            .column(role_dept::Column::DeptId)
            .filter(role_dept::Column::RoleId.eq(role_id))
            .into_tuple::<i64>()
            .all(&self.db)
            .await?)
    }

    /// Enable or disable a role. A disabled role grants nothing.
    pub async fn set_role_status(&self, role_id: i64, is_active: bool) -> Result<role::Model> {
        if role_id == SUPER_ADMIN_ROLE_ID {
            return Err(AuthzError::PermissionDenied(
                "the super-admin role cannot be disabled".to_string(),
            ));
        }
        let existing = self.find_role(role_id).await?;
        let mut active: role::ActiveModel = existing.into();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&self.db).await?;

        self.permission_cache.invalidate_quietly(role_id).await;
        self.invalidate_holders_scope(role_id).await?;
        info!(role_id, is_active, "role status changed");
        Ok(updated)
    }

    /// Mark a role deleted. Its bindings stay in place but grant nothing.
    pub async fn soft_delete_role(&self, role_id: i64) -> Result<()> {
        if role_id == SUPER_ADMIN_ROLE_ID {
            return Err(AuthzError::PermissionDenied(
                "the super-admin role cannot be deleted".to_string(),
            ));
        }
        let existing = self.find_role(role_id).await?;
        let mut active: role::ActiveModel = existing.into();
        active.deleted_at = Set(Some(Utc::now().into()));
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;

        self.permission_cache.invalidate_quietly(role_id).await;
        self.invalidate_holders_scope(role_id).await?;
        info!(role_id, "role soft-deleted");
        Ok(())
    }

    async fn invalidate_holders_scope(&self, role_id: i64) -> Result<()> {
        let user_ids = User::find()
            .select_only()
            .column(user::Column::Id)
            .filter(user::Column::RoleId.eq(role_id))
            .into_tuple::<i64>()
            .all(&self.db)
            .await?;
        self.scope_cache.invalidate_users(&user_ids).await;
        Ok(())
    }
}
