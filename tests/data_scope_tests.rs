//! Row filtering by role data scope over a small department tree:
//!
//! ```text
//! 10 (root)          40 (root)
//! └── 20
//!     └── 30
//! ```

mod common;

use std::collections::BTreeSet;

use common::*;
use sea_orm::EntityTrait;
use syspanel::entities::prelude::*;
use syspanel::entities::role::DataScope;
use syspanel::{AccessControl, AuthzConfig, AuthzError};

const SUBTREE_ROLE: i64 = 2;
const OWN_DEPT_ROLE: i64 = 3;
const CUSTOM_ROLE: i64 = 4;
const ALL_ROLE: i64 = 5;

async fn seed(app: &TestApp) {
    insert_dept(&app.db, 10, 0, "").await;
    insert_dept(&app.db, 20, 10, "10").await;
    insert_dept(&app.db, 30, 20, "10,20").await;
    insert_dept(&app.db, 40, 0, "").await;

    insert_role(&app.db, SUBTREE_ROLE, DataScope::OwnDeptAndChildren).await;
    insert_role(&app.db, OWN_DEPT_ROLE, DataScope::OwnDept).await;
    insert_role(&app.db, CUSTOM_ROLE, DataScope::Custom).await;
    insert_role(&app.db, ALL_ROLE, DataScope::All).await;

    insert_user(&app.db, 51, Some(SUBTREE_ROLE), Some(10)).await;
    insert_user(&app.db, 52, Some(SUBTREE_ROLE), Some(20)).await;
    insert_user(&app.db, 53, Some(OWN_DEPT_ROLE), Some(20)).await;
    insert_user(&app.db, 54, Some(CUSTOM_ROLE), Some(10)).await;
    insert_user(&app.db, 55, Some(ALL_ROLE), Some(40)).await;
    insert_user(&app.db, 56, None, Some(40)).await;
}

async fn seeded() -> TestApp {
    let app = setup().await;
    seed(&app).await;
    app
}

async fn visible_depts(app: &TestApp, user_id: i64) -> BTreeSet<i64> {
    app.access
        .apply_data_scope(Dept::find(), user_id)
        .await
        .unwrap()
        .all(&app.db)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect()
}

async fn visible_users(app: &TestApp, user_id: i64) -> BTreeSet<i64> {
    app.access
        .apply_data_scope(User::find(), user_id)
        .await
        .unwrap()
        .all(&app.db)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect()
}

fn ids(values: &[i64]) -> BTreeSet<i64> {
    values.iter().copied().collect()
}

#[tokio::test]
async fn test_own_dept_and_children_covers_the_subtree() {
    let app = seeded().await;

    assert_eq!(visible_depts(&app, 51).await, ids(&[10, 20, 30]));
    assert_eq!(visible_depts(&app, 52).await, ids(&[20, 30]));
}

#[tokio::test]
async fn test_own_dept_and_children_filters_users_by_their_dept() {
    let app = seeded().await;

    // The super admin holds no department and falls outside every subtree.
    assert_eq!(visible_users(&app, 51).await, ids(&[51, 52, 53, 54]));
    assert_eq!(visible_users(&app, 52).await, ids(&[52, 53]));
}

#[tokio::test]
async fn test_own_dept_is_exact() {
    let app = seeded().await;

    assert_eq!(visible_depts(&app, 53).await, ids(&[20]));
    assert_eq!(visible_users(&app, 53).await, ids(&[52, 53]));
}

#[tokio::test]
async fn test_custom_scope_without_depts_sees_nothing() {
    let app = seeded().await;

    assert!(visible_depts(&app, 54).await.is_empty());
    assert!(visible_users(&app, 54).await.is_empty());
}

#[tokio::test]
async fn test_custom_depts_take_effect_immediately() {
    let app = seeded().await;
    assert!(visible_depts(&app, 54).await.is_empty());

    app.access.roles().set_role_depts(CUSTOM_ROLE, &[30]).await.unwrap();
    assert_eq!(visible_depts(&app, 54).await, ids(&[30]));

    app.access.roles().set_role_depts(CUSTOM_ROLE, &[40, 10]).await.unwrap();
    assert_eq!(visible_depts(&app, 54).await, ids(&[10, 40]));
    assert_eq!(
        app.access.roles().get_role_dept_ids(CUSTOM_ROLE).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_custom_depts_must_exist() {
    let app = seeded().await;
    app.access.roles().set_role_depts(CUSTOM_ROLE, &[30]).await.unwrap();

    let err = app
        .access
        .roles()
        .set_role_depts(CUSTOM_ROLE, &[30, 999])
        .await
        .unwrap_err();

    assert!(matches!(err, AuthzError::InvalidReference { ref ids, .. } if ids == &vec![999]));
    assert_eq!(visible_depts(&app, 54).await, ids(&[30]));
}

#[tokio::test]
async fn test_all_scope_and_super_admin_are_unfiltered() {
    let app = seeded().await;

    assert_eq!(visible_depts(&app, 55).await, ids(&[10, 20, 30, 40]));
    assert_eq!(visible_depts(&app, SUPER_ADMIN_USER_ID).await, ids(&[10, 20, 30, 40]));
    assert_eq!(visible_users(&app, SUPER_ADMIN_USER_ID).await.len(), 7);
}

#[tokio::test]
async fn test_roleless_user_is_not_filtered() {
    let app = seeded().await;

    assert_eq!(visible_depts(&app, 56).await, ids(&[10, 20, 30, 40]));
}

#[tokio::test]
async fn test_disabled_filtering_is_a_no_op() {
    let app = setup_with(AuthzConfig {
        data_scope_enabled: false,
        ..AuthzConfig::default()
    })
    .await;
    seed(&app).await;

    assert_eq!(visible_depts(&app, 54).await, ids(&[10, 20, 30, 40]));
    assert_eq!(visible_depts(&app, 53).await, ids(&[10, 20, 30, 40]));
}

#[tokio::test]
async fn test_entities_without_dept_column_are_not_filtered() {
    let app = seeded().await;

    let roles = app
        .access
        .apply_data_scope(Role::find(), 54)
        .await
        .unwrap()
        .all(&app.db)
        .await
        .unwrap();
    assert_eq!(roles.len(), 5);
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let app = seeded().await;

    let err = app.access.apply_data_scope(Dept::find(), 404).await.unwrap_err();
    assert!(matches!(err, AuthzError::NotFound { entity: "user", id: 404 }));
}

#[tokio::test]
async fn test_scope_change_takes_effect_immediately() {
    let app = seeded().await;
    assert_eq!(visible_depts(&app, 53).await, ids(&[20]));

    app.access
        .roles()
        .set_data_scope(OWN_DEPT_ROLE, DataScope::OwnDeptAndChildren)
        .await
        .unwrap();

    assert_eq!(visible_depts(&app, 53).await, ids(&[20, 30]));
}

#[tokio::test]
async fn test_disabled_role_sees_nothing() {
    let app = seeded().await;
    assert_eq!(visible_depts(&app, 51).await, ids(&[10, 20, 30]));

    app.access.roles().set_role_status(SUBTREE_ROLE, false).await.unwrap();

    assert!(visible_depts(&app, 51).await.is_empty());
}

#[tokio::test]
async fn test_moving_a_user_changes_their_scope() {
    let app = seeded().await;
    assert_eq!(visible_depts(&app, 52).await, ids(&[20, 30]));

    app.access.users().move_to_dept(52, 30).await.unwrap();

    assert_eq!(visible_depts(&app, 52).await, ids(&[30]));
}

#[tokio::test]
async fn test_reparenting_moves_the_subtree_between_scopes() {
    let app = seeded().await;
    assert_eq!(visible_depts(&app, 51).await, ids(&[10, 20, 30]));
    assert_eq!(visible_depts(&app, 52).await, ids(&[20, 30]));

    app.access.depts().reparent_dept(20, 40).await.unwrap();

    assert_eq!(visible_depts(&app, 51).await, ids(&[10]));
    assert_eq!(visible_depts(&app, 52).await, ids(&[20, 30]));

    insert_user(&app.db, 57, Some(SUBTREE_ROLE), Some(40)).await;
    assert_eq!(visible_depts(&app, 57).await, ids(&[20, 30, 40]));
}

#[tokio::test]
async fn test_profile_write_back_racing_a_custom_dept_change_is_not_served() {
    let app = seeded().await;
    let (store, entered, release) = GatedStore::new();
    let access = AccessControl::new(app.db.clone(), store, AuthzConfig::default());

    let reader = {
        let access = access.clone();
        tokio::spawn(async move { access.data_scope().resolve(54).await })
    };
    entered.await.unwrap();

    access.roles().set_role_depts(CUSTOM_ROLE, &[30]).await.unwrap();
    release.send(()).unwrap();
    assert!(reader.await.unwrap().unwrap().custom_dept_ids.is_empty());

    let visible: BTreeSet<i64> = access
        .apply_data_scope(Dept::find(), 54)
        .await
        .unwrap()
        .all(&app.db)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(visible, ids(&[30]));
}
