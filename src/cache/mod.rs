//! Permission and data-scope caches over a pluggable key-value store.
//!
//! The cache is advisory. Every read failure degrades to a store read and
//! every write failure is logged and dropped; nothing here is on the
//! correctness path of a permission write.
//!
//! Entries are keyed by the generation observed *before* the backing rows
//! were read. Invalidation bumps the generation instead of deleting, so a
//! reader that loaded pre-commit rows and writes them back after the
//! writer's invalidation lands on a key nobody looks up again.

mod memory;

pub use memory::MemoryStore;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entities::permission::ResourceType;
use crate::entities::role::DataScope;
use crate::error::{AuthzError, Result};

const PERMISSION_NAMESPACE: &str = "perm:";
const SCOPE_NAMESPACE: &str = "scope:";
const INITIAL_GENERATION: &str = "0";

static GENERATION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Key-value store with per-entry TTL. Failures surface as `CacheUnavailable`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| AuthzError::CacheUnavailable(e.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| AuthzError::CacheUnavailable(e.to_string()))
}

/// Never repeats within a process and never equals `INITIAL_GENERATION`.
fn next_generation() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = GENERATION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:x}.{seq:x}")
}

/// Entry key pinned to the generation seen before a miss was loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp(String);

/// Result of a cache lookup. A miss carries the stamp to write the loaded value under.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit(T),
    Miss(Stamp),
}

/// Generation bookkeeping for one namespace.
///
/// `{ns}epoch` is bumped by a namespace flush, `{ns}gen:{scope}` by a scoped
/// invalidation. Generation keys outlive entries so an expired counter never
/// revives an entry written under the initial generation.
#[derive(Clone)]
struct Generations {
    store: Arc<dyn CacheStore>,
    namespace: &'static str,
    ttl: Duration,
}

impl Generations {
    fn epoch_key(&self) -> String {
        format!("{}epoch", self.namespace)
    }

    fn generation_key(&self, scope: &str) -> String {
        format!("{}gen:{scope}", self.namespace)
    }

    fn generation_ttl(&self) -> Duration {
        self.ttl.saturating_mul(2)
    }

    async fn read(&self, key: &str) -> Result<String> {
        Ok(self
            .store
            .get(key)
            .await?
            .unwrap_or_else(|| INITIAL_GENERATION.to_string()))
    }

    async fn stamp(&self, scope: &str) -> Result<Stamp> {
        let epoch = self.read(&self.epoch_key()).await?;
        let generation = self.read(&self.generation_key(scope)).await?;
        Ok(Stamp(format!("{}{scope}@{epoch}.{generation}", self.namespace)))
    }

    async fn lookup<T: DeserializeOwned>(&self, scope: &str) -> Result<Lookup<T>> {
        let stamp = self.stamp(scope).await?;
        match self.store.get(&stamp.0).await? {
            Some(raw) => Ok(Lookup::Hit(decode(&raw)?)),
            None => Ok(Lookup::Miss(stamp)),
        }
    }

    async fn put<T: Serialize>(&self, stamp: &Stamp, value: &T) -> Result<()> {
        self.store.set(&stamp.0, encode(value)?, self.ttl).await
    }

    async fn bump(&self, scope: &str) -> Result<()> {
        self.store
            .set(&self.generation_key(scope), next_generation(), self.generation_ttl())
            .await
    }

    /// Drop the namespace, then move every scope to a fresh epoch.
    async fn reset(&self) -> Result<()> {
        self.store.delete_prefix(self.namespace).await?;
        self.store
            .set(&self.epoch_key(), next_generation(), self.generation_ttl())
            .await
    }
}

/// Caches a role's resource-key set per resource type.
#[derive(Clone)]
pub struct PermissionCache {
    generations: Generations,
}

impl PermissionCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            generations: Generations {
                store,
                namespace: PERMISSION_NAMESPACE,
                ttl,
            },
        }
    }

    fn scope(role_id: i64, resource_type: ResourceType) -> String {
        format!("{role_id}:{}", resource_type.as_ref())
    }

    pub async fn lookup(
        &self,
        role_id: i64,
        resource_type: ResourceType,
    ) -> Result<Lookup<HashSet<String>>> {
        self.generations
            .lookup(&Self::scope(role_id, resource_type))
            .await
    }

    /// Store `keys` under `stamp`. A stamp taken before an invalidation is never read again.
    pub async fn put(&self, stamp: &Stamp, keys: &HashSet<String>) -> Result<()> {
        self.generations.put(stamp, keys).await
    }

    /// Invalidates one resource type, or both when `resource_type` is `None`.
    pub async fn invalidate(&self, role_id: i64, resource_type: Option<ResourceType>) -> Result<()> {
        match resource_type {
            Some(resource_type) => {
                self.generations
                    .bump(&Self::scope(role_id, resource_type))
                    .await
            }
            None => {
                self.generations
                    .bump(&Self::scope(role_id, ResourceType::Api))
                    .await?;
                self.generations
                    .bump(&Self::scope(role_id, ResourceType::Menu))
                    .await
            }
        }
    }

    pub async fn invalidate_all(&self) -> Result<()> {
        self.generations.reset().await
    }

    /// Invalidation that never fails the caller.
    pub async fn invalidate_quietly(&self, role_id: i64) {
        if let Err(e) = self.invalidate(role_id, None).await {
            warn!(role_id, error = %e, "permission cache invalidation failed");
        } else {
            debug!(role_id, "permission cache invalidated");
        }
    }
}

/// Everything the data scope filter needs about an acting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeProfile {
    pub user_id: i64,
    pub role_id: Option<i64>,
    pub data_scope: Option<DataScope>,
    pub dept_id: Option<i64>,
    pub dept_path: String,
    pub custom_dept_ids: Vec<i64>,
}

/// Caches resolved `ScopeProfile`s per user, in its own namespace.
#[derive(Clone)]
pub struct ScopeCache {
    generations: Generations,
}

impl ScopeCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            generations: Generations {
                store,
                namespace: SCOPE_NAMESPACE,
                ttl,
            },
        }
    }

    fn scope(user_id: i64) -> String {
        format!("user:{user_id}")
    }

    pub async fn lookup(&self, user_id: i64) -> Result<Lookup<ScopeProfile>> {
        self.generations.lookup(&Self::scope(user_id)).await
    }

    pub async fn put(&self, stamp: &Stamp, profile: &ScopeProfile) -> Result<()> {
        self.generations.put(stamp, profile).await
    }

    pub async fn invalidate_users(&self, user_ids: &[i64]) {
        for user_id in user_ids {
            if let Err(e) = self.generations.bump(&Self::scope(*user_id)).await {
                warn!(user_id, error = %e, "scope cache invalidation failed");
            }
        }
    }

    pub async fn invalidate_all(&self) {
        if let Err(e) = self.generations.reset().await {
            warn!(error = %e, "scope cache flush failed");
        }
    }
}
