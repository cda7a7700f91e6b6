//! Entry point for collaborators: controllers and CRUD services talk to the
//! permission engine through `AccessControl` only.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, EntityTrait, Select};

use crate::auth::{PermissionService, RoleAssignmentGuard};
use crate::cache::{CacheStore, PermissionCache, ScopeCache};
use crate::config::AuthzConfig;
use crate::entities::prelude::*;
use crate::error::{AuthzError, Result};
use crate::services::{
    ApiService, BindingStore, DataScopeFilter, DeptScoped, DeptService, MenuService, MenuTree,
    PermissionMaterializer, RoleService, UserService,
};

#[derive(Clone)]
pub struct AccessControl {
    db: DatabaseConnection,
    bindings: BindingStore,
    materializer: PermissionMaterializer,
    permissions: PermissionService,
    guard: RoleAssignmentGuard,
    data_scope: DataScopeFilter,
    roles: RoleService,
    menus: MenuService,
    apis: ApiService,
    depts: DeptService,
    users: UserService,
    permission_cache: PermissionCache,
}

impl AccessControl {
    pub fn new(db: DatabaseConnection, store: Arc<dyn CacheStore>, config: AuthzConfig) -> Self {
        let permission_cache = PermissionCache::new(store.clone(), config.cache_ttl);
        let scope_cache = ScopeCache::new(store, config.cache_ttl);

        let materializer = PermissionMaterializer::new(db.clone(), permission_cache.clone());
        let guard = RoleAssignmentGuard::new(db.clone());

        Self {
            bindings: BindingStore::new(db.clone()),
            permissions: PermissionService::new(db.clone(), permission_cache.clone()),
            data_scope: DataScopeFilter::new(db.clone(), scope_cache.clone(), &config),
            roles: RoleService::new(db.clone(), permission_cache.clone(), scope_cache.clone()),
            menus: MenuService::new(db.clone(), materializer.clone()),
            apis: ApiService::new(db.clone(), materializer.clone()),
            depts: DeptService::new(db.clone(), scope_cache.clone()),
            users: UserService::new(db.clone(), guard.clone(), scope_cache),
            materializer,
            guard,
            permission_cache,
            db,
        }
    }

    /// Replace a role's menus on behalf of `acting_user_id`.
    ///
    /// The actor must be allowed to assign the target role and must itself
    /// hold every requested menu. Returns the number of permission rows written.
    pub async fn assign_menus_to_role(
        &self,
        acting_user_id: i64,
        role_id: i64,
        menu_ids: &[i64],
    ) -> Result<usize> {
        let acting = User::find_by_id(acting_user_id)
            .one(&self.db)
            .await?
            .ok_or(AuthzError::NotFound { entity: "user", id: acting_user_id })?;
        let acting_role_id = self.guard.acting_role(&acting)?;

        self.guard.require_assign_role(acting_role_id, role_id).await?;
        self.guard.require_assign_menus(acting_role_id, menu_ids).await?;
        self.materializer.rebuild_for_role(role_id, menu_ids).await
    }

    /// Replace a menu's APIs and propagate to every role holding the menu.
    pub async fn bind_apis_to_menu(&self, menu_id: i64, api_ids: &[i64]) -> Result<Vec<i64>> {
        self.materializer.rebuild_apis_for_menu(menu_id, api_ids).await
    }

    pub async fn check_permission(&self, user_id: i64, resource_key: &str) -> Result<bool> {
        self.permissions.check_permission(user_id, resource_key).await
    }

    pub async fn get_user_menus(&self, user_id: i64) -> Result<Vec<MenuTree>> {
        self.permissions.get_user_menus(user_id).await
    }

    pub async fn get_user_permission_keys(&self, user_id: i64) -> Result<Vec<String>> {
        self.permissions.get_user_permission_keys(user_id).await
    }

    pub async fn apply_data_scope<E: DeptScoped>(&self, query: Select<E>, user_id: i64) -> Result<Select<E>> {
        self.data_scope.apply(query, user_id).await
    }

    /// Drop every cached permission set, e.g. after the tables were edited by hand.
    pub async fn flush_permission_cache(&self) -> Result<()> {
        self.permission_cache.invalidate_all().await
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn bindings(&self) -> &BindingStore {
        &self.bindings
    }

    pub fn materializer(&self) -> &PermissionMaterializer {
        &self.materializer
    }

    pub fn permissions(&self) -> &PermissionService {
        &self.permissions
    }

    pub fn guard(&self) -> &RoleAssignmentGuard {
        &self.guard
    }

    pub fn data_scope(&self) -> &DataScopeFilter {
        &self.data_scope
    }

    pub fn roles(&self) -> &RoleService {
        &self.roles
    }

    pub fn menus(&self) -> &MenuService {
        &self.menus
    }

    pub fn apis(&self) -> &ApiService {
        &self.apis
    }

    pub fn depts(&self) -> &DeptService {
        &self.depts
    }

    pub fn users(&self) -> &UserService {
        &self.users
    }
}
