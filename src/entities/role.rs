//! `SeaORM` Entity, RBAC Role

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Well-known id of the super-admin role. It bypasses every check.
pub const SUPER_ADMIN_ROLE_ID: i64 = 1;

/// Breadth of organizational data a role may see in list queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum DataScope {
    #[sea_orm(string_value = "all")]
    All,
    #[sea_orm(string_value = "own_dept")]
    OwnDept,
    #[sea_orm(string_value = "own_dept_and_children")]
    OwnDeptAndChildren,
    #[sea_orm(string_value = "custom")]
    Custom,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "sys_role")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    pub sort: i32,
    pub data_scope: DataScope,
    pub is_active: bool,
    pub deleted_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Disabled or soft-deleted roles grant nothing.
    pub fn is_usable(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user::Entity")]
    User,
    #[sea_orm(has_many = "super::role_menu::Entity")]
    RoleMenu,
    #[sea_orm(has_many = "super::role_dept::Entity")]
    RoleDept,
    #[sea_orm(has_many = "super::permission::Entity")]
    Permission,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::role_menu::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RoleMenu.def()
    }
}

impl Related<super::role_dept::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RoleDept.def()
    }
}

impl Related<super::permission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Permission.def()
    }
}

impl Related<super::menu::Entity> for Entity {
    fn to() -> RelationDef {
        super::role_menu::Relation::Menu.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::role_menu::Relation::Role.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
