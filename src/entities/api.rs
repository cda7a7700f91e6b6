//! `SeaORM` Entity, protected API endpoint

use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "sys_api")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Resource key of type API.
    #[sea_orm(unique)]
    pub api_name: String,
    pub method: String,
    pub path: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::menu_api::Entity")]
    MenuApi,
}

impl Related<super::menu_api::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MenuApi.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
