//! Department hierarchy with a materialized ancestor path.
//!
//! `dept_path` holds the comma-joined ancestor ids of a department, root first
//! and excluding itself, so every descendant query is a prefix match. Moving a
//! department rewrites the paths of its whole subtree top-down in one
//! transaction.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::info;

use crate::cache::ScopeCache;
use crate::entities::dept::child_path;
use crate::entities::{dept, prelude::*};
use crate::error::{AuthzError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct DeptTree {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub dept_path: String,
    pub sort: i32,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DeptTree>,
}

impl From<&dept::Model> for DeptTree {
    fn from(model: &dept::Model) -> Self {
        Self {
            id: model.id,
            parent_id: model.parent_id,
            name: model.name.clone(),
            dept_path: model.dept_path.clone(),
            sort: model.sort,
            is_active: model.is_active,
            children: Vec::new(),
        }
    }
}

/// Whether `path` names `ancestor_id` as one of its segments.
pub fn path_contains(path: &str, ancestor_id: i64) -> bool {
    let needle = ancestor_id.to_string();
    path.split(',').any(|segment| segment == needle)
}

/// Flat arena of departments with a parent-to-children index.
pub struct DeptArena {
    nodes: Vec<dept::Model>,
    index: HashMap<i64, usize>,
    children: HashMap<i64, Vec<usize>>,
}

impl DeptArena {
    pub fn new(nodes: Vec<dept::Model>) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        let mut children: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            index.insert(node.id, i);
            children.entry(node.parent_id).or_default().push(i);
        }
        for kids in children.values_mut() {
            kids.sort_by_key(|&i| (nodes[i].sort, nodes[i].id));
        }
        Self {
            nodes,
            index,
            children,
        }
    }

    pub fn get(&self, id: i64) -> Option<&dept::Model> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    /// New `(id, parent_id, dept_path)` for the moved department and every
    /// descendant, parents before children.
    pub fn plan_reparent(&self, dept_id: i64, new_parent_id: i64) -> Result<Vec<(i64, i64, String)>> {
        let moved = self
            .get(dept_id)
            .ok_or(AuthzError::NotFound { entity: "dept", id: dept_id })?;
        let new_path = if new_parent_id == 0 {
            String::new()
        } else {
            let parent = self
                .get(new_parent_id)
                .ok_or(AuthzError::NotFound { entity: "dept", id: new_parent_id })?;
            if parent.id == dept_id || path_contains(&parent.dept_path, dept_id) {
                return Err(AuthzError::InvalidReference {
                    entity: "dept",
                    ids: vec![new_parent_id],
                });
            }
            parent.child_path()
        };

        let mut plan = vec![(moved.id, new_parent_id, new_path.clone())];
        let mut queue = VecDeque::from([(moved.id, new_path)]);
        while let Some((id, path)) = queue.pop_front() {
            let child_prefix = child_path(&path, id);
            for &i in self.children.get(&id).map(Vec::as_slice).unwrap_or_default() {
                let child = &self.nodes[i];
                plan.push((child.id, child.parent_id, child_prefix.clone()));
                queue.push_back((child.id, child_prefix.clone()));
            }
        }
        Ok(plan)
    }

    /// Forest rooted at departments whose parent is 0 or missing.
    pub fn into_tree(self) -> Vec<DeptTree> {
        fn attach(arena: &DeptArena, i: usize) -> DeptTree {
            let node = &arena.nodes[i];
            let mut tree = DeptTree::from(node);
            tree.children = arena
                .children
                .get(&node.id)
                .map(|kids| kids.iter().map(|&k| attach(arena, k)).collect())
                .unwrap_or_default();
            tree
        }

        let mut roots: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| {
                let parent_id = self.nodes[i].parent_id;
                parent_id == 0 || !self.index.contains_key(&parent_id)
            })
            .collect();
        roots.sort_by_key(|&i| (self.nodes[i].sort, self.nodes[i].id));
        roots.into_iter().map(|i| attach(&self, i)).collect()
    }
}

#[derive(Clone)]
pub struct DeptService {
    db: DatabaseConnection,
    scope_cache: ScopeCache,
}

impl DeptService {
    pub fn new(db: DatabaseConnection, scope_cache: ScopeCache) -> Self {
        Self { db, scope_cache }
    }

    pub async fn create_dept(&self, parent_id: i64, name: &str, sort: i32) -> Result<dept::Model> {
        let dept_path = if parent_id == 0 {
            String::new()
        } else {
            self.find_dept(parent_id).await?.child_path()
        };

        let new_dept = dept::ActiveModel {
            parent_id: Set(parent_id),
            name: Set(name.to_string()),
            dept_path: Set(dept_path),
            sort: Set(sort),
            is_active: Set(true),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        Ok(new_dept.insert(&self.db).await?)
    }

    pub async fn find_dept(&self, dept_id: i64) -> Result<dept::Model> {
        Dept::find_by_id(dept_id)
            .one(&self.db)
            .await?
            .ok_or(AuthzError::NotFound { entity: "dept", id: dept_id })
    }

    /// Move a department under `new_parent_id` (0 for root), rewriting the
    /// paths of its subtree. Moving under itself or a descendant fails with
    /// `InvalidReference`.
    pub async fn reparent_dept(&self, dept_id: i64, new_parent_id: i64) -> Result<dept::Model> {
        let txn = self.db.begin().await?;
        let arena = DeptArena::new(Dept::find().all(&txn).await?);
        let plan = arena.plan_reparent(dept_id, new_parent_id)?;

        let now = Utc::now();
        for (id, parent_id, path) in &plan {
            Dept::update_many()
                .col_expr(dept::Column::ParentId, Expr::value(*parent_id))
                .col_expr(dept::Column::DeptPath, Expr::value(path.clone()))
                .col_expr(dept::Column::UpdatedAt, Expr::value(now.fixed_offset()))
                .filter(dept::Column::Id.eq(*id))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        // Paths of every user under the moved subtree changed.
        self.scope_cache.invalidate_all().await;
        info!(dept_id, new_parent_id, rewritten = plan.len(), "department moved");
        self.find_dept(dept_id).await
    }

    /// Ids of every department strictly below `dept_id`.
    pub async fn descendant_ids(&self, dept_id: i64) -> Result<Vec<i64>> {
        let dept = self.find_dept(dept_id).await?;
        let prefix = dept.child_path();
        Ok(Dept::find()
            .select_only()
            .column(dept::Column::Id)
            .filter(
                Condition::any()
                    .add(dept::Column::DeptPath.eq(prefix.clone()))
                    .add(dept::Column::DeptPath.like(format!("{prefix},%"))),
            )
            .into_tuple::<i64>()
            .all(&self.db)
            .await?)
    }

    pub async fn dept_tree(&self) -> Result<Vec<DeptTree>> {
        Ok(DeptArena::new(Dept::find().all(&self.db).await?).into_tree())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dept(id: i64, parent_id: i64, dept_path: &str) -> dept::Model {
        dept::Model {
            id,
            parent_id,
            name: format!("dept-{id}"),
            dept_path: dept_path.to_string(),
            sort: 0,
            is_active: true,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    // 1 ─ 2 ─ 3
    //       └ 4
    // 5
    fn sample() -> DeptArena {
        DeptArena::new(vec![
            dept(1, 0, ""),
            dept(2, 1, "1"),
            dept(3, 2, "1,2"),
            dept(4, 2, "1,2"),
            dept(5, 0, ""),
        ])
    }

    #[test]
    fn path_segments_match_whole_ids_only() {
        assert!(path_contains("1,12,3", 12));
        assert!(!path_contains("1,12,3", 2));
        assert!(!path_contains("", 1));
    }

    #[test]
    fn reparent_rewrites_subtree_top_down() {
        let plan = sample().plan_reparent(2, 5).unwrap();

        assert_eq!(plan[0], (2, 5, "5".to_string()));
        assert!(plan.contains(&(3, 2, "5,2".to_string())));
        assert!(plan.contains(&(4, 2, "5,2".to_string())));
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn reparent_to_root_clears_path() {
        let plan = sample().plan_reparent(2, 0).unwrap();

        assert_eq!(plan[0], (2, 0, String::new()));
        assert!(plan.contains(&(3, 2, "2".to_string())));
    }

    #[test]
    fn reparent_under_descendant_is_rejected() {
        let err = sample().plan_reparent(1, 3).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidReference { entity: "dept", .. }));

        let err = sample().plan_reparent(2, 2).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidReference { .. }));
    }

    #[test]
    fn tree_nests_children() {
        let tree = sample().into_tree();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, 1);
        assert_eq!(tree[0].children[0].id, 2);
        assert_eq!(tree[0].children[0].children.len(), 2);
    }
}
