//! `SeaORM` Entity, Department

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "sys_dept")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// 0 marks a root department.
    pub parent_id: i64,
    pub name: String,
    /// Comma-joined ancestor ids, root first, excluding self. Empty for roots.
    pub dept_path: String,
    pub sort: i32,
    pub is_active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// The `dept_path` every direct child of this department carries.
    pub fn child_path(&self) -> String {
        child_path(&self.dept_path, self.id)
    }
}

pub fn child_path(parent_path: &str, parent_id: i64) -> String {
    if parent_path.is_empty() {
        parent_id.to_string()
    } else {
        format!("{parent_path},{parent_id}")
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user::Entity")]
    User,
    #[sea_orm(has_many = "super::role_dept::Entity")]
    RoleDept,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::role_dept::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RoleDept.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
