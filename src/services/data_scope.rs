//! Row filtering by organizational data scope.
//!
//! List services hand their query to `DataScopeFilter::apply` before running
//! it. The predicate depends on the acting user's role scope and department;
//! descendant departments are found with a prefix match on `dept_path`.

use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, QueryTrait,
    Select,
};
use tracing::{debug, warn};

use crate::cache::{Lookup, ScopeCache, ScopeProfile};
use crate::config::AuthzConfig;
use crate::entities::role::{DataScope, SUPER_ADMIN_ROLE_ID};
use crate::entities::{api, dept, menu, prelude::*, role, role_dept, user};
use crate::error::{AuthzError, Result};

/// Entities that can be narrowed by data scope.
pub trait DeptScoped: EntityTrait {
    /// The column holding the owning department id, if the table has one.
    fn dept_column() -> Option<Self::Column>;
}

impl DeptScoped for user::Entity {
    fn dept_column() -> Option<Self::Column> {
        Some(user::Column::DeptId)
    }
}

impl DeptScoped for dept::Entity {
    fn dept_column() -> Option<Self::Column> {
        Some(dept::Column::Id)
    }
}

impl DeptScoped for role::Entity {
    fn dept_column() -> Option<Self::Column> {
        None
    }
}

impl DeptScoped for menu::Entity {
    fn dept_column() -> Option<Self::Column> {
        None
    }
}

impl DeptScoped for api::Entity {
    fn dept_column() -> Option<Self::Column> {
        None
    }
}

fn always_false() -> SimpleExpr {
    Expr::cust("1 = 0")
}

/// The predicate a profile imposes on `column`, or `None` for unrestricted access.
pub fn scope_condition<C: ColumnTrait>(column: C, profile: &ScopeProfile) -> Option<Condition> {
    let scope = profile.data_scope?;
    let condition = match scope {
        DataScope::All => return None,
        DataScope::OwnDept => match profile.dept_id {
            Some(dept_id) => Condition::all().add(column.eq(dept_id)),
            None => Condition::all().add(always_false()),
        },
        DataScope::OwnDeptAndChildren => match profile.dept_id {
            Some(dept_id) => {
                let prefix = dept::child_path(&profile.dept_path, dept_id);
                let subtree = Dept::find()
                    .select_only()
                    .column(dept::Column::Id)
                    .filter(
                        Condition::any()
                            .add(dept::Column::Id.eq(dept_id))
                            .add(dept::Column::DeptPath.eq(prefix.clone()))
                            .add(dept::Column::DeptPath.like(format!("{prefix},%"))),
                    )
                    .into_query();
                Condition::all().add(column.in_subquery(subtree))
            }
            None => Condition::all().add(always_false()),
        },
        DataScope::Custom => {
            if profile.custom_dept_ids.is_empty() {
                Condition::all().add(always_false())
            } else {
                Condition::all().add(column.is_in(profile.custom_dept_ids.clone()))
            }
        }
    };
    Some(condition)
}

#[derive(Clone)]
pub struct DataScopeFilter {
    db: DatabaseConnection,
    cache: ScopeCache,
    enabled: bool,
}

impl DataScopeFilter {
    pub fn new(db: DatabaseConnection, cache: ScopeCache, config: &AuthzConfig) -> Self {
        Self {
            db,
            cache,
            enabled: config.data_scope_enabled,
        }
    }

    /// Narrow `query` to the rows `user_id` may see.
    ///
    /// No-op when filtering is disabled, when the user holds no role, or when
    /// the entity has no department column, checked in that order.
    pub async fn apply<E: DeptScoped>(&self, query: Select<E>, user_id: i64) -> Result<Select<E>> {
        if !self.enabled {
            return Ok(query);
        }
        let profile = self.resolve(user_id).await?;
        if profile.role_id.is_none() {
            return Ok(query);
        }
        let Some(column) = E::dept_column() else {
            return Ok(query);
        };

        match scope_condition(column, &profile) {
            Some(condition) => Ok(query.filter(condition)),
            None => Ok(query),
        }
    }

    /// The acting user's role scope and department, read through the scope cache.
    pub async fn resolve(&self, user_id: i64) -> Result<ScopeProfile> {
        let stamp = match self.cache.lookup(user_id).await {
            Ok(Lookup::Hit(profile)) => {
                debug!(user_id, "scope cache hit");
                return Ok(profile);
            }
            Ok(Lookup::Miss(stamp)) => {
                debug!(user_id, "scope cache miss");
                Some(stamp)
            }
            Err(e) => {
                warn!(user_id, error = %e, "scope cache read failed, reading store");
                None
            }
        };

        let profile = self.load_profile(user_id).await?;
        if let Some(stamp) = stamp {
            if let Err(e) = self.cache.put(&stamp, &profile).await {
                warn!(user_id, error = %e, "scope cache write failed");
            }
        }
        Ok(profile)
    }

    async fn load_profile(&self, user_id: i64) -> Result<ScopeProfile> {
        let user = User::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or(AuthzError::NotFound { entity: "user", id: user_id })?;

        let dept_path = match user.dept_id {
            Some(dept_id) => Dept::find_by_id(dept_id)
                .one(&self.db)
                .await?
                .map(|d| d.dept_path)
                .unwrap_or_default(),
            None => String::new(),
        };

        let data_scope = match user.role_id {
            None => None,
            Some(SUPER_ADMIN_ROLE_ID) => Some(DataScope::All),
            Some(role_id) => match Role::find_by_id(role_id).one(&self.db).await? {
                Some(role) if role.is_usable() => Some(role.data_scope),
                // A dangling, disabled or deleted role sees nothing.
                _ => Some(DataScope::Custom),
            },
        };

        let custom_dept_ids = match (data_scope, user.role_id) {
            (Some(DataScope::Custom), Some(role_id)) => self.custom_dept_ids(role_id).await?,
            _ => Vec::new(),
        };

        Ok(ScopeProfile {
            user_id,
            role_id: user.role_id,
            data_scope,
            dept_id: user.dept_id,
            dept_path,
            custom_dept_ids,
        })
    }

    async fn custom_dept_ids(&self, role_id: i64) -> Result<Vec<i64>> {
        let usable = Role::find_by_id(role_id)
            .one(&self.db)
            .await?
            .is_some_and(|role| role.is_usable());
        if !usable {
            return Ok(Vec::new());
        }
        Ok(RoleDept::find()
            .select_only()
            .column(role_dept::Column::DeptId)
            .filter(role_dept::Column::RoleId.eq(role_id))
            .into_tuple::<i64>()
            .all(&self.db)
            .await?)
    }
}
