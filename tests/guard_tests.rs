mod common;

use common::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use syspanel::entities::menu::MenuType;
use syspanel::entities::prelude::User;
use syspanel::entities::user;
use syspanel::entities::role::DataScope;
use syspanel::AuthzError;

const SENIOR_ROLE: i64 = 4;
const MANAGER_ROLE: i64 = 5;
const JUNIOR_ROLE: i64 = 6;
const MANAGER: i64 = 60;
const STAFF: i64 = 61;

async fn seeded() -> TestApp {
    let app = setup().await;
    for role_id in [SENIOR_ROLE, MANAGER_ROLE, JUNIOR_ROLE] {
        insert_role(&app.db, role_id, DataScope::OwnDept).await;
    }
    insert_user(&app.db, MANAGER, Some(MANAGER_ROLE), None).await;
    insert_user(&app.db, STAFF, Some(JUNIOR_ROLE), None).await;

    insert_menu(&app.db, 100, 0, MenuType::Directory, None).await;
    insert_menu(&app.db, 101, 100, MenuType::Page, Some("system:user:list")).await;
    insert_menu(&app.db, 102, 101, MenuType::Button, Some("system:user:add")).await;
    insert_menu(&app.db, 103, 100, MenuType::Page, Some("system:role:list")).await;
    insert_api(&app.db, 200, "GET /users").await;
    bind_raw(&app.db, 101, &[200]).await;

    app.access
        .assign_menus_to_role(SUPER_ADMIN_USER_ID, MANAGER_ROLE, &[100, 101, 102])
        .await
        .unwrap();
    app
}

fn is_denied(err: &AuthzError) -> bool {
    matches!(err, AuthzError::PermissionDenied(_))
}

#[tokio::test]
async fn test_manager_grants_a_subset_of_its_menus() {
    let app = seeded().await;

    let written = app
        .access
        .assign_menus_to_role(MANAGER, JUNIOR_ROLE, &[100, 101])
        .await
        .unwrap();

    assert_eq!(written, 2);
    assert!(app.access.check_permission(STAFF, "GET /users").await.unwrap());
}

#[tokio::test]
async fn test_manager_cannot_grant_menus_it_lacks() {
    let app = seeded().await;

    let err = app
        .access
        .assign_menus_to_role(MANAGER, JUNIOR_ROLE, &[101, 103])
        .await
        .unwrap_err();

    assert!(is_denied(&err));
    assert_eq!(permission_row_count(&app.db, JUNIOR_ROLE).await, 0);
    assert!(app.access.bindings().get_menu_ids(JUNIOR_ROLE).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_manager_cannot_grant_inactive_menus() {
    let app = seeded().await;
    app.access.menus().set_menu_status(102, false).await.unwrap();

    let err = app
        .access
        .assign_menus_to_role(MANAGER, JUNIOR_ROLE, &[102])
        .await
        .unwrap_err();

    assert!(is_denied(&err));
}

#[tokio::test]
async fn test_manager_cannot_touch_more_senior_roles() {
    let app = seeded().await;

    let err = app
        .access
        .assign_menus_to_role(MANAGER, SENIOR_ROLE, &[101])
        .await
        .unwrap_err();

    assert!(is_denied(&err));
    assert!(!app.access.guard().can_assign_role(MANAGER_ROLE, SENIOR_ROLE).await.unwrap());
    assert!(app.access.guard().can_assign_role(MANAGER_ROLE, MANAGER_ROLE).await.unwrap());
}

#[tokio::test]
async fn test_disabled_roles_cannot_be_assigned_or_act() {
    let app = seeded().await;
    app.access.roles().set_role_status(JUNIOR_ROLE, false).await.unwrap();
    assert!(!app.access.guard().can_assign_role(MANAGER_ROLE, JUNIOR_ROLE).await.unwrap());

    app.access.roles().set_role_status(MANAGER_ROLE, false).await.unwrap();
    assert!(!app.access.guard().can_assign_menus(MANAGER_ROLE, &[]).await.unwrap());
}

#[tokio::test]
async fn test_super_admin_assigns_anything() {
    let app = seeded().await;

    assert!(app.access.guard().can_assign_role(1, SENIOR_ROLE).await.unwrap());
    assert!(app.access.guard().can_assign_menus(1, &[103, 999]).await.unwrap());
    app.access
        .assign_menus_to_role(SUPER_ADMIN_USER_ID, SENIOR_ROLE, &[103])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_roleless_actor_is_denied() {
    let app = seeded().await;
    insert_user(&app.db, 62, None, None).await;

    let err = app
        .access
        .assign_menus_to_role(62, JUNIOR_ROLE, &[])
        .await
        .unwrap_err();
    assert!(is_denied(&err));

    let err = app
        .access
        .assign_menus_to_role(404, JUNIOR_ROLE, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::NotFound { entity: "user", .. }));
}

#[tokio::test]
async fn test_user_role_assignment_is_guarded() {
    let app = seeded().await;

    let err = app
        .access
        .users()
        .assign_role(MANAGER, STAFF, SENIOR_ROLE)
        .await
        .unwrap_err();
    assert!(is_denied(&err));
    let staff = app.access.users().find_user_by_id(STAFF).await.unwrap().unwrap();
    assert_eq!(staff.role_id, Some(JUNIOR_ROLE));

    let staff = app
        .access
        .users()
        .assign_role(MANAGER, STAFF, MANAGER_ROLE)
        .await
        .unwrap();
    assert_eq!(staff.role_id, Some(MANAGER_ROLE));
    assert!(app.access.check_permission(STAFF, "GET /users").await.unwrap());
}

async fn disable_user(app: &TestApp, user_id: i64) {
    User::update_many()
        .col_expr(user::Column::IsActive, Expr::value(false))
        .filter(user::Column::Id.eq(user_id))
        .exec(&app.db)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_disabled_actor_cannot_grant_menus() {
    let app = seeded().await;
    disable_user(&app, MANAGER).await;

    let err = app
        .access
        .assign_menus_to_role(MANAGER, JUNIOR_ROLE, &[101])
        .await
        .unwrap_err();

    assert!(is_denied(&err));
    assert_eq!(permission_row_count(&app.db, JUNIOR_ROLE).await, 0);
}

#[tokio::test]
async fn test_disabled_actor_cannot_assign_roles() {
    let app = seeded().await;
    disable_user(&app, MANAGER).await;

    let err = app
        .access
        .users()
        .assign_role(MANAGER, STAFF, JUNIOR_ROLE)
        .await
        .unwrap_err();

    assert!(is_denied(&err));
}
