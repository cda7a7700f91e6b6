use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use tracing::info;

use crate::entities::menu::MenuType;
use crate::entities::{menu, prelude::*};
use crate::error::{AuthzError, Result};
use crate::services::materializer::{rematerialize_for_menus, PermissionMaterializer};

#[derive(Debug, Clone)]
pub struct NewMenu {
    pub parent_id: i64,
    pub name: String,
    pub menu_type: MenuType,
    pub perms: Option<String>,
    pub path: Option<String>,
    pub sort: i32,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuTree {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub menu_type: MenuType,
    pub perms: Option<String>,
    pub path: Option<String>,
    pub sort: i32,
    pub visible: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MenuTree>,
}

impl From<menu::Model> for MenuTree {
    fn from(model: menu::Model) -> Self {
        Self {
            id: model.id,
            parent_id: model.parent_id,
            name: model.name,
            menu_type: model.menu_type,
            perms: model.perms,
            path: model.path,
            sort: model.sort,
            visible: model.visible,
            children: Vec::new(),
        }
    }
}

/// Assemble a forest from a flat menu list.
///
/// Menus whose parent is absent from the list become roots, so a role bound to
/// a page but not its directory still sees the page. Siblings are ordered by
/// `sort`, then id.
pub fn build_menu_tree(menus: Vec<menu::Model>) -> Vec<MenuTree> {
    let present: HashSet<i64> = menus.iter().map(|m| m.id).collect();
    let mut children: HashMap<i64, Vec<menu::Model>> = HashMap::new();
    let mut roots = Vec::new();
    for m in menus {
        if m.parent_id != 0 && present.contains(&m.parent_id) {
            children.entry(m.parent_id).or_default().push(m);
        } else {
            roots.push(m);
        }
    }

    fn attach(node: menu::Model, children: &mut HashMap<i64, Vec<menu::Model>>) -> MenuTree {
        let mut kids = children.remove(&node.id).unwrap_or_default();
        kids.sort_by_key(|m| (m.sort, m.id));
        let mut tree = MenuTree::from(node);
        tree.children = kids.into_iter().map(|k| attach(k, children)).collect();
        tree
    }

    roots.sort_by_key(|m| (m.sort, m.id));
    roots
        .into_iter()
        .map(|root| attach(root, &mut children))
        .collect()
}

#[derive(Clone)]
pub struct MenuService {
    db: DatabaseConnection,
    materializer: PermissionMaterializer,
}

impl MenuService {
    pub fn new(db: DatabaseConnection, materializer: PermissionMaterializer) -> Self {
        Self { db, materializer }
    }

    pub async fn create_menu(&self, input: NewMenu) -> Result<menu::Model> {
        if input.parent_id != 0 && Menu::find_by_id(input.parent_id).one(&self.db).await?.is_none() {
            return Err(AuthzError::NotFound { entity: "menu", id: input.parent_id });
        }

        let new_menu = menu::ActiveModel {
            parent_id: Set(input.parent_id),
            name: Set(input.name),
            menu_type: Set(input.menu_type),
            perms: Set(input.perms),
            path: Set(input.path),
            sort: Set(input.sort),
            is_active: Set(true),
            visible: Set(input.visible),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        Ok(new_menu.insert(&self.db).await?)
    }

    pub async fn find_menu(&self, menu_id: i64) -> Result<menu::Model> {
        Menu::find_by_id(menu_id)
            .one(&self.db)
            .await?
            .ok_or(AuthzError::NotFound { entity: "menu", id: menu_id })
    }

    /// Change the MENU key a menu contributes and rebuild every role holding it.
    pub async fn update_menu_perms(&self, menu_id: i64, perms: Option<String>) -> Result<menu::Model> {
        let existing = self.find_menu(menu_id).await?;

        let txn = self.db.begin().await.map_err(AuthzError::MaterializationFailed)?;
        let mut active: menu::ActiveModel = existing.into();
        active.perms = Set(perms);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&txn).await.map_err(AuthzError::MaterializationFailed)?;
        let role_ids = rematerialize_for_menus(&txn, &[menu_id])
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        txn.commit().await.map_err(AuthzError::MaterializationFailed)?;

        self.materializer.invalidate_roles(&role_ids).await;
        info!(menu_id, roles = ?role_ids, "menu perms updated");
        Ok(updated)
    }

    /// Enable or disable a menu; disabled menus contribute no permissions.
    pub async fn set_menu_status(&self, menu_id: i64, is_active: bool) -> Result<menu::Model> {
        let existing = self.find_menu(menu_id).await?;

        let txn = self.db.begin().await.map_err(AuthzError::MaterializationFailed)?;
        let mut active: menu::ActiveModel = existing.into();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&txn).await.map_err(AuthzError::MaterializationFailed)?;
        let role_ids = rematerialize_for_menus(&txn, &[menu_id])
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        txn.commit().await.map_err(AuthzError::MaterializationFailed)?;

        self.materializer.invalidate_roles(&role_ids).await;
        info!(menu_id, is_active, roles = ?role_ids, "menu status changed");
        Ok(updated)
    }

    /// The full menu tree, optionally restricted to active menus.
    pub async fn menu_tree(&self, active_only: bool) -> Result<Vec<MenuTree>> {
        let mut query = Menu::find().order_by_asc(menu::Column::Sort);
        if active_only {
            query = query.filter(menu::Column::IsActive.eq(true));
        }
        Ok(build_menu_tree(query.all(&self.db).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu(id: i64, parent_id: i64, sort: i32) -> menu::Model {
        menu::Model {
            id,
            parent_id,
            name: format!("menu-{id}"),
            menu_type: MenuType::Page,
            perms: None,
            path: None,
            sort,
            is_active: true,
            visible: true,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn children_nest_under_parents_in_sort_order() {
        let tree = build_menu_tree(vec![menu(3, 1, 2), menu(1, 0, 0), menu(2, 1, 1), menu(4, 2, 0)]);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, 1);
        let kids: Vec<i64> = tree[0].children.iter().map(|c| c.id).collect();
        assert_eq!(kids, vec![2, 3]);
        assert_eq!(tree[0].children[0].children[0].id, 4);
    }

    #[test]
    fn orphaned_menus_become_roots() {
        let tree = build_menu_tree(vec![menu(5, 9, 1), menu(6, 0, 0)]);

        let roots: Vec<i64> = tree.iter().map(|m| m.id).collect();
        assert_eq!(roots, vec![6, 5]);
    }
}
