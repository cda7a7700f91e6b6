use std::collections::HashSet;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use tracing::warn;

use crate::entities::role::SUPER_ADMIN_ROLE_ID;
use crate::entities::{menu, prelude::*, role_menu, user};
use crate::error::{AuthzError, Result};

/// Decides who may hand out which role and which menus.
///
/// Smaller role ids are more senior. A non-super-admin may only grant roles at
/// or below its own seniority, and only menus it holds itself.
#[derive(Clone)]
pub struct RoleAssignmentGuard {
    db: DatabaseConnection,
}

impl RoleAssignmentGuard {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The role an acting user grants with. Disabled and roleless users grant nothing.
    pub fn acting_role(&self, acting: &user::Model) -> Result<i64> {
        if !acting.is_active {
            warn!(user_id = acting.id, "inactive user attempted an assignment");
            return Err(AuthzError::PermissionDenied(format!(
                "user {} is disabled",
                acting.id
            )));
        }
        acting.role_id.ok_or_else(|| {
            AuthzError::PermissionDenied(format!("user {} holds no role", acting.id))
        })
    }

    pub async fn can_assign_role(&self, acting_role_id: i64, target_role_id: i64) -> Result<bool> {
        if acting_role_id == SUPER_ADMIN_ROLE_ID {
            return Ok(true);
        }
        if !self.role_is_usable(acting_role_id).await? {
            return Ok(false);
        }
        if target_role_id < acting_role_id {
            return Ok(false);
        }
        self.role_is_usable(target_role_id).await
    }

    pub async fn can_assign_menus(&self, acting_role_id: i64, menu_ids: &[i64]) -> Result<bool> {
        if acting_role_id == SUPER_ADMIN_ROLE_ID {
            return Ok(true);
        }
        if !self.role_is_usable(acting_role_id).await? {
            return Ok(false);
        }

        let requested: HashSet<i64> = menu_ids.iter().copied().collect();
        if requested.is_empty() {
            return Ok(true);
        }

        let active: HashSet<i64> = Menu::find()
            .select_only()
            .column(menu::Column::Id)
            .filter(menu::Column::Id.is_in(requested.iter().copied()))
            .filter(menu::Column::IsActive.eq(true))
            .into_tuple::<i64>()
            .all(&self.db)
            .await?
            .into_iter()
            .collect();
        if !requested.is_subset(&active) {
            return Ok(false);
        }

        let held: HashSet<i64> = RoleMenu::find()
            .select_only()
            .column(role_menu::Column::MenuId)
            .filter(role_menu::Column::RoleId.eq(acting_role_id))
            .into_tuple::<i64>()
            .all(&self.db)
            .await?
            .into_iter()
            .collect();
        Ok(requested.is_subset(&held))
    }

    pub async fn require_assign_role(&self, acting_role_id: i64, target_role_id: i64) -> Result<()> {
        if self.can_assign_role(acting_role_id, target_role_id).await? {
            return Ok(());
        }
        warn!(acting_role_id, target_role_id, "role assignment rejected");
        Err(AuthzError::PermissionDenied(format!(
            "role {acting_role_id} may not assign role {target_role_id}"
        )))
    }

    pub async fn require_assign_menus(&self, acting_role_id: i64, menu_ids: &[i64]) -> Result<()> {
        if self.can_assign_menus(acting_role_id, menu_ids).await? {
            return Ok(());
        }
        warn!(acting_role_id, ?menu_ids, "menu assignment rejected");
        Err(AuthzError::PermissionDenied(format!(
            "role {acting_role_id} may not grant menus it does not hold"
        )))
    }

    async fn role_is_usable(&self, role_id: i64) -> Result<bool> {
        Ok(Role::find_by_id(role_id)
            .one(&self.db)
            .await?
            .is_some_and(|role| role.is_usable()))
    }
}
