use sea_orm_migration::{prelude::*, schema::*};

use crate::m20250901_000001_create_rbac_tables::SysRole;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SysDept::Table)
                    .if_not_exists()
                    .col(pk_auto(SysDept::Id).big_integer())
                    .col(big_integer(SysDept::ParentId).default(0)) // 0 = root
                    .col(string(SysDept::Name))
                    .col(string(SysDept::DeptPath).default("")) // ancestor ids, excluding self
                    .col(integer(SysDept::Sort).default(0))
                    .col(boolean(SysDept::IsActive).default(true))
                    .col(timestamp_with_time_zone(SysDept::CreatedAt))
                    .col(timestamp_with_time_zone(SysDept::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // Prefix lookups for descendant queries
        manager
            .create_index(
                Index::create()
                    .name("idx-dept-path")
                    .table(SysDept::Table)
                    .col(SysDept::DeptPath)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SysRoleDept::Table)
                    .if_not_exists()
                    .col(big_integer(SysRoleDept::RoleId))
                    .col(big_integer(SysRoleDept::DeptId))
                    .primary_key(
                        Index::create()
                            .col(SysRoleDept::RoleId)
                            .col(SysRoleDept::DeptId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-role-dept-role")
                            .from(SysRoleDept::Table, SysRoleDept::RoleId)
                            .to(SysRole::Table, SysRole::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-role-dept-dept")
                            .from(SysRoleDept::Table, SysRoleDept::DeptId)
                            .to(SysDept::Table, SysDept::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SysUser::Table)
                    .if_not_exists()
                    .col(pk_auto(SysUser::Id).big_integer())
                    .col(string_uniq(SysUser::Username))
                    .col(big_integer_null(SysUser::RoleId))
                    .col(big_integer_null(SysUser::DeptId))
                    .col(boolean(SysUser::IsActive).default(true))
                    .col(timestamp_with_time_zone(SysUser::CreatedAt))
                    .col(timestamp_with_time_zone(SysUser::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-user-role")
                            .from(SysUser::Table, SysUser::RoleId)
                            .to(SysRole::Table, SysRole::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-user-dept")
                            .from(SysUser::Table, SysUser::DeptId)
                            .to(SysDept::Table, SysDept::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SysUser::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SysRoleDept::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SysDept::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SysDept {
    Table,
    Id,
    ParentId,
    Name,
    DeptPath,
    Sort,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SysRoleDept {
    Table,
    RoleId,
    DeptId,
}

#[derive(DeriveIden)]
enum SysUser {
    Table,
    Id,
    Username,
    RoleId,
    DeptId,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
