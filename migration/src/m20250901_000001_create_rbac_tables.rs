use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SysRole::Table)
                    .if_not_exists()
                    .col(pk_auto(SysRole::Id).big_integer())
                    .col(string(SysRole::Name).unique_key())
                    .col(integer(SysRole::Sort).default(0))
                    .col(string_len(SysRole::DataScope, 32).default("all"))
                    .col(boolean(SysRole::IsActive).default(true))
                    .col(timestamp_with_time_zone_null(SysRole::DeletedAt))
                    .col(timestamp_with_time_zone(SysRole::CreatedAt))
                    .col(timestamp_with_time_zone(SysRole::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SysMenu::Table)
                    .if_not_exists()
                    .col(pk_auto(SysMenu::Id).big_integer())
                    .col(big_integer(SysMenu::ParentId).default(0)) // 0 = root
                    .col(string(SysMenu::Name))
                    .col(string_len(SysMenu::MenuType, 16))
                    .col(string_null(SysMenu::Perms))
                    .col(string_null(SysMenu::Path))
                    .col(integer(SysMenu::Sort).default(0))
                    .col(boolean(SysMenu::IsActive).default(true))
                    .col(boolean(SysMenu::Visible).default(true))
                    .col(timestamp_with_time_zone(SysMenu::CreatedAt))
                    .col(timestamp_with_time_zone(SysMenu::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SysApi::Table)
                    .if_not_exists()
                    .col(pk_auto(SysApi::Id).big_integer())
                    .col(string(SysApi::ApiName).unique_key()) // e.g. "PUT /roles/{role_id}/menus"
                    .col(string_len(SysApi::Method, 8))
                    .col(string(SysApi::Path))
                    .col(string_null(SysApi::Description))
                    .col(boolean(SysApi::IsActive).default(true))
                    .col(timestamp_with_time_zone(SysApi::CreatedAt))
                    .col(timestamp_with_time_zone(SysApi::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SysRoleMenu::Table)
                    .if_not_exists()
                    .col(big_integer(SysRoleMenu::RoleId))
                    .col(big_integer(SysRoleMenu::MenuId))
                    .primary_key(
                        Index::create()
                            .col(SysRoleMenu::RoleId)
                            .col(SysRoleMenu::MenuId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-role-menu-role")
                            .from(SysRoleMenu::Table, SysRoleMenu::RoleId)
                            .to(SysRole::Table, SysRole::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-role-menu-menu")
                            .from(SysRoleMenu::Table, SysRoleMenu::MenuId)
                            .to(SysMenu::Table, SysMenu::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Reverse lookup: roles holding a menu
        manager
            .create_index(
                Index::create()
                    .name("idx-role-menu-menu")
                    .table(SysRoleMenu::Table)
                    .col(SysRoleMenu::MenuId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SysMenuApi::Table)
                    .if_not_exists()
                    .col(big_integer(SysMenuApi::MenuId))
                    .col(big_integer(SysMenuApi::ApiId))
                    .primary_key(
                        Index::create()
                            .col(SysMenuApi::MenuId)
                            .col(SysMenuApi::ApiId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-menu-api-menu")
                            .from(SysMenuApi::Table, SysMenuApi::MenuId)
                            .to(SysMenu::Table, SysMenu::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-menu-api-api")
                            .from(SysMenuApi::Table, SysMenuApi::ApiId)
                            .to(SysApi::Table, SysApi::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-menu-api-api")
                    .table(SysMenuApi::Table)
                    .col(SysMenuApi::ApiId)
                    .to_owned(),
            )
            .await?;

        // Materialized permissions, rebuilt wholesale per role
        manager
            .create_table(
                Table::create()
                    .table(SysPermission::Table)
                    .if_not_exists()
                    .col(pk_auto(SysPermission::Id).big_integer())
                    .col(big_integer(SysPermission::RoleId))
                    .col(string_len(SysPermission::ResourceType, 8))
                    .col(string(SysPermission::ResourceKey))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-permission-role")
                            .from(SysPermission::Table, SysPermission::RoleId)
                            .to(SysRole::Table, SysRole::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .index(
                        Index::create()
                            .name("idx-permission-role-type-key")
                            .col(SysPermission::RoleId)
                            .col(SysPermission::ResourceType)
                            .col(SysPermission::ResourceKey)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SysPermission::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SysMenuApi::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SysRoleMenu::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SysApi::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SysMenu::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SysRole::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum SysRole {
    Table,
    Id,
    Name,
    Sort,
    DataScope,
    IsActive,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SysMenu {
    Table,
    Id,
    ParentId,
    Name,
    MenuType,
    Perms,
    Path,
    Sort,
    IsActive,
    Visible,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SysApi {
    Table,
    Id,
    ApiName,
    Method,
    Path,
    Description,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SysRoleMenu {
    Table,
    RoleId,
    MenuId,
}

#[derive(DeriveIden)]
enum SysMenuApi {
    Table,
    MenuId,
    ApiId,
}

#[derive(DeriveIden)]
enum SysPermission {
    Table,
    Id,
    RoleId,
    ResourceType,
    ResourceKey,
}
