//! Materialized role permissions.
//!
//! A role's `sys_permission` rows are never edited in place. Every change to
//! a binding, a menu's perms string, or a menu/API status recomputes the
//! affected roles wholesale inside one transaction, and the permission cache
//! is invalidated only after that transaction commits.

use std::collections::BTreeSet;

use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, info};

use crate::cache::PermissionCache;
use crate::entities::{api, menu, menu_api, permission, prelude::*};
use crate::entities::permission::ResourceType;
use crate::error::{AuthzError, Result};
use crate::services::binding::{
    menu_ids_for_role, missing_api_ids, missing_menu_ids, replace_menu_apis, replace_role_menus,
    role_ids_for_menus,
};

/// One staged `(resource_type, resource_key)` pair for a role.
pub type PermissionEntry = (ResourceType, String);

#[derive(Clone)]
pub struct PermissionMaterializer {
    db: DatabaseConnection,
    cache: PermissionCache,
}

impl PermissionMaterializer {
    pub fn new(db: DatabaseConnection, cache: PermissionCache) -> Self {
        Self { db, cache }
    }

    /// Replace the role's menus with `menu_ids` and recompute its permissions.
    ///
    /// Returns the number of permission rows written.
    pub async fn rebuild_for_role(&self, role_id: i64, menu_ids: &[i64]) -> Result<usize> {
        if Role::find_by_id(role_id).one(&self.db).await?.is_none() {
            return Err(AuthzError::NotFound { entity: "role", id: role_id });
        }

        let menu_ids = dedup(menu_ids);
        let missing = missing_menu_ids(&self.db, &menu_ids).await?;
        if !missing.is_empty() {
            return Err(AuthzError::InvalidReference { entity: "menu", ids: missing });
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        let written = materialize_role(&txn, role_id, &menu_ids)
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        txn.commit().await.map_err(AuthzError::MaterializationFailed)?;

        self.cache.invalidate_quietly(role_id).await;
        info!(role_id, menus = menu_ids.len(), rows = written, "rebuilt role permissions");
        Ok(written)
    }

    /// Replace the menu's API bindings and recompute every role holding the menu.
    ///
    /// Returns the ids of the roles that were rebuilt.
    pub async fn rebuild_apis_for_menu(&self, menu_id: i64, api_ids: &[i64]) -> Result<Vec<i64>> {
        if Menu::find_by_id(menu_id).one(&self.db).await?.is_none() {
            return Err(AuthzError::NotFound { entity: "menu", id: menu_id });
        }

        let api_ids = dedup(api_ids);
        let missing = missing_api_ids(&self.db, &api_ids).await?;
        if !missing.is_empty() {
            return Err(AuthzError::InvalidReference { entity: "api", ids: missing });
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        replace_menu_apis(&txn, menu_id, &api_ids)
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        let role_ids = rematerialize_for_menus(&txn, &[menu_id])
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        txn.commit().await.map_err(AuthzError::MaterializationFailed)?;

        self.invalidate_roles(&role_ids).await;
        info!(menu_id, apis = api_ids.len(), roles = ?role_ids, "rebound menu apis");
        Ok(role_ids)
    }

    /// Recompute every role holding `menu_id`, e.g. after its perms or status changed.
    pub async fn rebuild_roles_for_menu(&self, menu_id: i64) -> Result<Vec<i64>> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        let role_ids = rematerialize_for_menus(&txn, &[menu_id])
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        txn.commit().await.map_err(AuthzError::MaterializationFailed)?;

        self.invalidate_roles(&role_ids).await;
        debug!(menu_id, roles = ?role_ids, "rebuilt roles for menu");
        Ok(role_ids)
    }

    /// Recompute every role reaching `api_id` through any menu.
    pub async fn rebuild_roles_for_api(&self, api_id: i64) -> Result<Vec<i64>> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        let role_ids = rematerialize_for_api(&txn, api_id)
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        txn.commit().await.map_err(AuthzError::MaterializationFailed)?;

        self.invalidate_roles(&role_ids).await;
        debug!(api_id, roles = ?role_ids, "rebuilt roles for api");
        Ok(role_ids)
    }

    /// Current materialized keys of one type for a role, straight from the table.
    pub async fn stored_keys(
        &self,
        role_id: i64,
        resource_type: ResourceType,
    ) -> Result<Vec<String>> {
        let keys = Permission::find()
            .select_only()
            .column(permission::Column::ResourceKey)
            .filter(permission::Column::RoleId.eq(role_id))
            .filter(permission::Column::ResourceType.eq(resource_type))
            .into_tuple::<String>()
            .all(&self.db)
            .await?;
        Ok(keys)
    }

    /// Post-commit invalidation for roles rebuilt inside a caller's transaction.
    pub(crate) async fn invalidate_roles(&self, role_ids: &[i64]) {
        for role_id in role_ids {
            self.cache.invalidate_quietly(*role_id).await;
        }
    }
}

fn dedup(ids: &[i64]) -> Vec<i64> {
    ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Rebuild every role bound to any of `menu_ids`. Caller owns the transaction.
pub(crate) async fn rematerialize_for_menus<C: ConnectionTrait>(
    conn: &C,
    menu_ids: &[i64],
) -> std::result::Result<Vec<i64>, DbErr> {
    let role_ids = role_ids_for_menus(conn, menu_ids).await?;
    rematerialize_roles(conn, &role_ids).await?;
    Ok(role_ids)
}

/// Rebuild every role reaching `api_id` through a menu. Caller owns the transaction.
pub(crate) async fn rematerialize_for_api<C: ConnectionTrait>(
    conn: &C,
    api_id: i64,
) -> std::result::Result<Vec<i64>, DbErr> {
    let menu_ids = MenuApi::find()
        .select_only()
        .column(menu_api::Column::MenuId)
        .filter(menu_api::Column::ApiId.eq(api_id))
        .into_tuple::<i64>()
        .all(conn)
        .await?;
    rematerialize_for_menus(conn, &menu_ids).await
}

async fn rematerialize_roles<C: ConnectionTrait>(
    conn: &C,
    role_ids: &[i64],
) -> std::result::Result<(), DbErr> {
    for role_id in role_ids {
        let menu_ids = menu_ids_for_role(conn, *role_id).await?;
        materialize_role(conn, *role_id, &menu_ids).await?;
    }
    Ok(())
}

/// Rewrite RoleMenu and Permission rows for one role. Caller owns the transaction.
async fn materialize_role<C: ConnectionTrait>(
    conn: &C,
    role_id: i64,
    menu_ids: &[i64],
) -> std::result::Result<usize, DbErr> {
    replace_role_menus(conn, role_id, menu_ids).await?;
    Permission::delete_many()
        .filter(permission::Column::RoleId.eq(role_id))
        .exec(conn)
        .await?;

    if menu_ids.is_empty() {
        return Ok(0);
    }

    let menus = Menu::find()
        .filter(menu::Column::Id.is_in(menu_ids.to_vec()))
        .filter(menu::Column::IsActive.eq(true))
        .all(conn)
        .await?;
    let active_menu_ids: Vec<i64> = menus.iter().map(|m| m.id).collect();
    let apis: Vec<api::Model> = if active_menu_ids.is_empty() {
        Vec::new()
    } else {
        MenuApi::find()
            .filter(menu_api::Column::MenuId.is_in(active_menu_ids))
            .find_also_related(Api)
            .all(conn)
            .await?
            .into_iter()
            .filter_map(|(_, api)| api)
            .collect()
    };

    let staged = stage_permissions(&menus, &apis);
    if staged.is_empty() {
        return Ok(0);
    }

    let written = staged.len();
    let rows = staged
        .into_iter()
        .map(|(resource_type, resource_key)| permission::ActiveModel {
            role_id: Set(role_id),
            resource_type: Set(resource_type),
            resource_key: Set(resource_key),
            ..Default::default()
        });
    Permission::insert_many(rows).exec_without_returning(conn).await?;
    Ok(written)
}

/// The de-duplicated permission set contributed by `menus` and their bound `apis`.
///
/// Inactive menus and APIs contribute nothing; equal keys merge silently.
pub fn stage_permissions(menus: &[menu::Model], apis: &[api::Model]) -> BTreeSet<PermissionEntry> {
    let menu_keys = menus
        .iter()
        .filter(|m| m.is_active)
        .filter_map(|m| m.perms_key())
        .map(|key| (ResourceType::Menu, key.to_string()));
    let api_keys = apis
        .iter()
        .filter(|a| a.is_active)
        .map(|a| (ResourceType::Api, a.api_name.clone()));
    menu_keys.chain(api_keys).collect()
}
