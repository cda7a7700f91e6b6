//! `SeaORM` Entity, Menu tree node

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum MenuType {
    #[sea_orm(string_value = "directory")]
    Directory,
    #[sea_orm(string_value = "page")]
    Page,
    #[sea_orm(string_value = "button")]
    Button,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "sys_menu")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// 0 marks a root menu.
    pub parent_id: i64,
    pub name: String,
    pub menu_type: MenuType,
    /// Resource key of type MENU, e.g. `system:user:add`.
    pub perms: Option<String>,
    pub path: Option<String>,
    pub sort: i32,
    pub is_active: bool,
    pub visible: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// The MENU resource key this menu contributes, if any.
    pub fn perms_key(&self) -> Option<&str> {
        self.perms.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::role_menu::Entity")]
    RoleMenu,
    #[sea_orm(has_many = "super::menu_api::Entity")]
    MenuApi,
}

impl Related<super::role_menu::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RoleMenu.def()
    }
}

impl Related<super::menu_api::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MenuApi.def()
    }
}

impl Related<super::api::Entity> for Entity {
    fn to() -> RelationDef {
        super::menu_api::Relation::Api.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::menu_api::Relation::Menu.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
