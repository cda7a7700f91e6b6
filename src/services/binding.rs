//! Role-Menu and Menu-Api bindings.
//!
//! Plain relational CRUD. Nothing here touches the materialized permission
//! table; the materializer owns that.

use std::collections::{BTreeSet, HashSet};

use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
    Set, TransactionTrait,
};

use crate::entities::{api, menu, menu_api, prelude::*, role_menu};
use crate::error::{AuthzError, Result};

#[derive(Clone)]
pub struct BindingStore {
    db: DatabaseConnection,
}

impl BindingStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Replace every menu bound to `role_id`.
    pub async fn set_role_menus(&self, role_id: i64, menu_ids: &[i64]) -> Result<()> {
        reject_duplicates("role_menu", menu_ids)?;
        if Role::find_by_id(role_id).one(&self.db).await?.is_none() {
            return Err(AuthzError::NotFound { entity: "role", id: role_id });
        }
        if let Some(id) = missing_menu_ids(&self.db, menu_ids).await?.first() {
            return Err(AuthzError::NotFound { entity: "menu", id: *id });
        }

        let txn = self.db.begin().await?;
        replace_role_menus(&txn, role_id, menu_ids).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Replace every API bound to `menu_id`.
    pub async fn set_menu_apis(&self, menu_id: i64, api_ids: &[i64]) -> Result<()> {
        reject_duplicates("menu_api", api_ids)?;
        if Menu::find_by_id(menu_id).one(&self.db).await?.is_none() {
            return Err(AuthzError::NotFound { entity: "menu", id: menu_id });
        }
        if let Some(id) = missing_api_ids(&self.db, api_ids).await?.first() {
            return Err(AuthzError::NotFound { entity: "api", id: *id });
        }

        let txn = self.db.begin().await?;
        replace_menu_apis(&txn, menu_id, api_ids).await?;
        txn.commit().await?;
        Ok(())
    }

    pub async fn get_menu_ids(&self, role_id: i64) -> Result<Vec<i64>> {
        Ok(menu_ids_for_role(&self.db, role_id).await?)
    }

    pub async fn get_api_ids(&self, menu_id: i64) -> Result<Vec<i64>> {
        let ids = MenuApi::find()
            .select_only()
            .column(menu_api::Column::ApiId)
            .filter(menu_api::Column::MenuId.eq(menu_id))
            .into_tuple::<i64>()
            .all(&self.db)
            .await?;
        Ok(ids)
    }

    /// Reverse index: every role that has `menu_id` bound.
    pub async fn get_role_ids_for_menu(&self, menu_id: i64) -> Result<Vec<i64>> {
        Ok(role_ids_for_menus(&self.db, &[menu_id]).await?)
    }
}

fn reject_duplicates(entity: &'static str, ids: &[i64]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(*id) {
            return Err(AuthzError::AlreadyExists { entity, id: *id });
        }
    }
    Ok(())
}

pub(crate) async fn replace_role_menus<C: ConnectionTrait>(
    conn: &C,
    role_id: i64,
    menu_ids: &[i64],
) -> std::result::Result<(), sea_orm::DbErr> {
    RoleMenu::delete_many()
        .filter(role_menu::Column::RoleId.eq(role_id))
        .exec(conn)
        .await?;

    if menu_ids.is_empty() {
        return Ok(());
    }

    let rows = menu_ids.iter().map(|menu_id| role_menu::ActiveModel {
        role_id: Set(role_id),
        menu_id: Set(*menu_id),
    });
    RoleMenu::insert_many(rows).exec_without_returning(conn).await?;
    Ok(())
}

pub(crate) async fn replace_menu_apis<C: ConnectionTrait>(
    conn: &C,
    menu_id: i64,
    api_ids: &[i64],
) -> std::result::Result<(), sea_orm::DbErr> {
    MenuApi::delete_many()
        .filter(menu_api::Column::MenuId.eq(menu_id))
        .exec(conn)
        .await?;

    if api_ids.is_empty() {
        return Ok(());
    }

    let rows = api_ids.iter().map(|api_id| menu_api::ActiveModel {
        menu_id: Set(menu_id),
        api_id: Set(*api_id),
    });
    MenuApi::insert_many(rows).exec_without_returning(conn).await?;
    Ok(())
}

pub(crate) async fn menu_ids_for_role<C: ConnectionTrait>(
    conn: &C,
    role_id: i64,
) -> std::result::Result<Vec<i64>, sea_orm::DbErr> {
    RoleMenu::find()
        .select_only()
        .column(role_menu::Column::MenuId)
        .filter(role_menu::Column::RoleId.eq(role_id))
        .into_tuple::<i64>()
        .all(conn)
        .await
}

/// Distinct role ids bound to any of `menu_ids`, ascending.
pub(crate) async fn role_ids_for_menus<C: ConnectionTrait>(
    conn: &C,
    menu_ids: &[i64],
) -> std::result::Result<Vec<i64>, sea_orm::DbErr> {
    if menu_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = RoleMenu::find()
        .select_only()
        .column(role_menu::Column::RoleId)
        .filter(role_menu::Column::MenuId.is_in(menu_ids.to_vec()))
        .into_tuple::<i64>()
        .all(conn)
        .await?;
    Ok(ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect())
}

/// Requested menu ids with no matching row, ascending.
pub(crate) async fn missing_menu_ids<C: ConnectionTrait>(
    conn: &C,
    menu_ids: &[i64],
) -> std::result::Result<Vec<i64>, sea_orm::DbErr> {
    if menu_ids.is_empty() {
        return Ok(Vec::new());
    }
    let found: HashSet<i64> = Menu::find()
        .select_only()
        .column(menu::Column::Id)
        .filter(menu::Column::Id.is_in(menu_ids.to_vec()))
        .into_tuple::<i64>()
        .all(conn)
        .await?
        .into_iter()
        .collect();
    Ok(menu_ids
        .iter()
        .filter(|id| !found.contains(*id))
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

pub(crate) async fn missing_api_ids<C: ConnectionTrait>(
    conn: &C,
    api_ids: &[i64],
) -> std::result::Result<Vec<i64>, sea_orm::DbErr> {
    if api_ids.is_empty() {
        return Ok(Vec::new());
    }
    let found: HashSet<i64> = Api::find()
        .select_only()
        .column(api::Column::Id)
        .filter(api::Column::Id.is_in(api_ids.to_vec()))
        .into_tuple::<i64>()
        .all(conn)
        .await?
        .into_iter()
        .collect();
    Ok(api_ids
        .iter()
        .filter(|id| !found.contains(*id))
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}
