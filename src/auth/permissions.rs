use std::collections::{BTreeSet, HashSet};

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use tracing::{debug, warn};

use crate::cache::{Lookup, PermissionCache};
use crate::entities::permission::ResourceType;
use crate::entities::role::SUPER_ADMIN_ROLE_ID;
use crate::entities::{menu, permission, prelude::*, role_menu, user};
use crate::error::Result;
use crate::services::menu::{build_menu_tree, MenuTree};

/// Read side of the permission engine: authorization checks and UI projections.
#[derive(Clone)]
pub struct PermissionService {
    db: DatabaseConnection,
    cache: PermissionCache,
}

impl PermissionService {
    pub fn new(db: DatabaseConnection, cache: PermissionCache) -> Self {
        Self { db, cache }
    }

    /// Can `user_id` call the API identified by `resource_key`?
    ///
    /// Unknown users and users without a role are denied. The super-admin role
    /// is allowed without any lookup.
    pub async fn check_permission(&self, user_id: i64, resource_key: &str) -> Result<bool> {
        let Some(user) = User::find_by_id(user_id).one(&self.db).await? else {
            debug!(user_id, "permission check for unknown user");
            return Ok(false);
        };
        if !user.is_active {
            return Ok(false);
        }
        let Some(role_id) = user.role_id else {
            return Ok(false);
        };
        if role_id == SUPER_ADMIN_ROLE_ID {
            return Ok(true);
        }

        let keys = self.role_keys(role_id, ResourceType::Api).await?;
        Ok(keys.contains(resource_key))
    }

    /// A role's key set for one resource type, read through the cache.
    ///
    /// A cache failure degrades to one direct read of the permission table.
    pub async fn role_keys(
        &self,
        role_id: i64,
        resource_type: ResourceType,
    ) -> Result<HashSet<String>> {
        let stamp = match self.cache.lookup(role_id, resource_type).await {
            Ok(Lookup::Hit(keys)) => {
                debug!(role_id, ?resource_type, "permission cache hit");
                return Ok(keys);
            }
            Ok(Lookup::Miss(stamp)) => {
                debug!(role_id, ?resource_type, "permission cache miss");
                Some(stamp)
            }
            Err(e) => {
                warn!(role_id, error = %e, "permission cache read failed, reading store");
                None
            }
        };

        let keys = self.load_role_keys(role_id, resource_type).await?;
        if let Some(stamp) = stamp {
            if let Err(e) = self.cache.put(&stamp, &keys).await {
                warn!(role_id, error = %e, "permission cache write failed");
            }
        }
        Ok(keys)
    }

    async fn load_role_keys(
        &self,
        role_id: i64,
        resource_type: ResourceType,
    ) -> Result<HashSet<String>> {
        let usable = Role::find_by_id(role_id)
            .one(&self.db)
            .await?
            .is_some_and(|role| role.is_usable());
        if !usable {
            return Ok(HashSet::new());
        }

        let keys = Permission::find()
            .select_only()
            .column(permission::Column::ResourceKey)
            .filter(permission::Column::RoleId.eq(role_id))
            .filter(permission::Column::ResourceType.eq(resource_type))
            .into_tuple::<String>()
            .all(&self.db)
            .await?;
        Ok(keys.into_iter().collect())
    }

    /// Menu tree the user may navigate. Buttons are excluded; their keys come
    /// from `get_user_permission_keys`.
    pub async fn get_user_menus(&self, user_id: i64) -> Result<Vec<MenuTree>> {
        let menus = self
            .visible_menus(user_id)
            .await?
            .into_iter()
            .filter(|m| m.menu_type != menu::MenuType::Button)
            .collect::<Vec<_>>();
        Ok(build_menu_tree(menus))
    }

    /// Sorted MENU-type keys used by the UI to toggle buttons and pages.
    pub async fn get_user_permission_keys(&self, user_id: i64) -> Result<Vec<String>> {
        let Some(role_id) = self.role_of(user_id).await? else {
            return Ok(Vec::new());
        };

        let keys: BTreeSet<String> = if role_id == SUPER_ADMIN_ROLE_ID {
            self.visible_menus(user_id)
                .await?
                .iter()
                .filter_map(|m| m.perms_key().map(str::to_string))
                .collect()
        } else {
            self.role_keys(role_id, ResourceType::Menu)
                .await?
                .into_iter()
                .collect()
        };
        Ok(keys.into_iter().collect())
    }

    /// Active menus for the user's role; every active menu for the super-admin.
    async fn visible_menus(&self, user_id: i64) -> Result<Vec<menu::Model>> {
        let Some(role_id) = self.role_of(user_id).await? else {
            return Ok(Vec::new());
        };

        let mut query = Menu::find().filter(menu::Column::IsActive.eq(true));
        if role_id != SUPER_ADMIN_ROLE_ID {
            let usable = Role::find_by_id(role_id)
                .one(&self.db)
                .await?
                .is_some_and(|role| role.is_usable());
            if !usable {
                return Ok(Vec::new());
            }
            let menu_ids = RoleMenu::find()
                .select_only()
                .column(role_menu::Column::MenuId)
                .filter(role_menu::Column::RoleId.eq(role_id))
                .into_tuple::<i64>()
                .all(&self.db)
                .await?;
            query = query.filter(menu::Column::Id.is_in(menu_ids));
        }
        Ok(query.all(&self.db).await?)
    }

    async fn role_of(&self, user_id: i64) -> Result<Option<i64>> {
        let role_id = User::find_by_id(user_id)
            .one(&self.db)
            .await?
            .filter(|u: &user::Model| u.is_active)
            .and_then(|u| u.role_id);
        Ok(role_id)
    }
}
