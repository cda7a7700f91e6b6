#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, Schema, Set,
};
use tokio::sync::oneshot;

use syspanel::cache::{CacheStore, MemoryStore};
use syspanel::entities::menu::MenuType;
use syspanel::entities::permission::ResourceType;
use syspanel::entities::role::{DataScope, SUPER_ADMIN_ROLE_ID};
use syspanel::entities::{api, dept, menu, permission, prelude::*, role, user};
use syspanel::{AccessControl, AuthzConfig};

pub const SUPER_ADMIN_USER_ID: i64 = 1;

pub struct TestApp {
    pub db: DatabaseConnection,
    pub access: AccessControl,
    pub store: Arc<MemoryStore>,
}

pub async fn setup() -> TestApp {
    setup_with(AuthzConfig::default()).await
}

pub async fn setup_with(config: AuthzConfig) -> TestApp {
    let db = setup_db().await;
    let store = Arc::new(MemoryStore::new());
    let access = AccessControl::new(db.clone(), store.clone() as Arc<dyn CacheStore>, config);

    insert_role(&db, SUPER_ADMIN_ROLE_ID, DataScope::All).await;
    insert_user(&db, SUPER_ADMIN_USER_ID, Some(SUPER_ADMIN_ROLE_ID), None).await;

    TestApp { db, access, store }
}

/// In-memory SQLite with every table created from the entities.
pub async fn setup_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();

    let schema = Schema::new(db.get_database_backend());
    create_table(&db, &schema, Role).await;
    create_table(&db, &schema, Menu).await;
    create_table(&db, &schema, Api).await;
    create_table(&db, &schema, Dept).await;
    create_table(&db, &schema, RoleMenu).await;
    create_table(&db, &schema, MenuApi).await;
    create_table(&db, &schema, Permission).await;
    create_table(&db, &schema, RoleDept).await;
    create_table(&db, &schema, User).await;
    db
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, schema: &Schema, entity: E) {
    let backend = db.get_database_backend();
    db.execute(backend.build(&schema.create_table_from_entity(entity)))
        .await
        .unwrap();
}

pub async fn insert_role(db: &DatabaseConnection, id: i64, data_scope: DataScope) -> role::Model {
    role::ActiveModel {
        id: Set(id),
        name: Set(format!("role-{id}")),
        sort: Set(id as i32),
        data_scope: Set(data_scope),
        is_active: Set(true),
        deleted_at: Set(None),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_menu(
    db: &DatabaseConnection,
    id: i64,
    parent_id: i64,
    menu_type: MenuType,
    perms: Option<&str>,
) -> menu::Model {
    menu::ActiveModel {
        id: Set(id),
        parent_id: Set(parent_id),
        name: Set(format!("menu-{id}")),
        menu_type: Set(menu_type),
        perms: Set(perms.map(str::to_string)),
        path: Set(None),
        sort: Set(0),
        is_active: Set(true),
        visible: Set(true),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_api(db: &DatabaseConnection, id: i64, api_name: &str) -> api::Model {
    let (method, path) = api_name.split_once(' ').unwrap_or(("GET", api_name));
    api::ActiveModel {
        id: Set(id),
        api_name: Set(api_name.to_string()),
        method: Set(method.to_string()),
        path: Set(path.to_string()),
        description: Set(None),
        is_active: Set(true),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_dept(db: &DatabaseConnection, id: i64, parent_id: i64, dept_path: &str) -> dept::Model {
    dept::ActiveModel {
        id: Set(id),
        parent_id: Set(parent_id),
        name: Set(format!("dept-{id}")),
        dept_path: Set(dept_path.to_string()),
        sort: Set(0),
        is_active: Set(true),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_user(
    db: &DatabaseConnection,
    id: i64,
    role_id: Option<i64>,
    dept_id: Option<i64>,
) -> user::Model {
    user::ActiveModel {
        id: Set(id),
        username: Set(format!("user-{id}")),
        role_id: Set(role_id),
        dept_id: Set(dept_id),
        is_active: Set(true),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .unwrap()
}

/// Bind apis to a menu directly, without rebuilding any role.
pub async fn bind_raw(db: &DatabaseConnection, menu_id: i64, api_ids: &[i64]) {
    for api_id in api_ids {
        syspanel::entities::menu_api::ActiveModel {
            menu_id: Set(menu_id),
            api_id: Set(*api_id),
        }
        .insert(db)
        .await
        .unwrap();
    }
}

/// Every materialized row of a role as `(type, key)` pairs.
pub async fn permission_rows(db: &DatabaseConnection, role_id: i64) -> BTreeSet<(ResourceType, String)> {
    Permission::find()
        .filter(permission::Column::RoleId.eq(role_id))
        .all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|row| (row.resource_type, row.resource_key))
        .collect()
}

pub async fn permission_row_count(db: &DatabaseConnection, role_id: i64) -> usize {
    Permission::find()
        .filter(permission::Column::RoleId.eq(role_id))
        .all(db)
        .await
        .unwrap()
        .len()
}

pub fn api_key(name: &str) -> (ResourceType, String) {
    (ResourceType::Api, name.to_string())
}

pub fn menu_key(name: &str) -> (ResourceType, String) {
    (ResourceType::Menu, name.to_string())
}

/// Memory store whose first `set` parks until released, so a test can land a
/// write between a reader's store load and its cache write-back.
pub struct GatedStore {
    inner: MemoryStore,
    gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl GatedStore {
    /// The store, a receiver fired when the first `set` parks, and its release.
    pub fn new() -> (Arc<Self>, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let store = Arc::new(Self {
            inner: MemoryStore::new(),
            gate: Mutex::new(Some((entered_tx, release_rx))),
        });
        (store, entered_rx, release_tx)
    }
}

#[async_trait]
impl CacheStore for GatedStore {
    async fn get(&self, key: &str) -> syspanel::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> syspanel::Result<()> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.await;
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> syspanel::Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> syspanel::Result<()> {
        self.inner.delete_prefix(prefix).await
    }
}
