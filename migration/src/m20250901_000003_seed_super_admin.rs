use chrono::Utc;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ActiveModelTrait, ConnectionTrait, DbBackend, EntityTrait, Set};

use syspanel::entities::role::{self, DataScope, SUPER_ADMIN_ROLE_ID};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        if role::Entity::find_by_id(SUPER_ADMIN_ROLE_ID).one(db).await?.is_some() {
            println!("Super admin role already present, skipping seed");
            return Ok(());
        }

        let super_admin = role::ActiveModel {
            id: Set(SUPER_ADMIN_ROLE_ID),
            name: Set("super_admin".to_string()),
            sort: Set(0),
            data_scope: Set(DataScope::All),
            is_active: Set(true),
            deleted_at: Set(None),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        super_admin.insert(db).await?;
        println!("✅ Created role: super_admin (id {SUPER_ADMIN_ROLE_ID})");

        // The explicit id bypassed the sequence; move it past the seeded row.
        if manager.get_database_backend() == DbBackend::Postgres {
            db.execute_unprepared(
                "SELECT setval(pg_get_serial_sequence('sys_role', 'id'), (SELECT MAX(id) FROM sys_role))",
            )
            .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        role::Entity::delete_by_id(SUPER_ADMIN_ROLE_ID).exec(db).await?;
        Ok(())
    }
}
