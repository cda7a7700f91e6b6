use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::info;

use crate::entities::{api, prelude::*};
use crate::error::{AuthzError, Result};
use crate::services::materializer::{rematerialize_for_api, PermissionMaterializer};

#[derive(Clone)]
pub struct ApiService {
    db: DatabaseConnection,
    materializer: PermissionMaterializer,
}

impl ApiService {
    pub fn new(db: DatabaseConnection, materializer: PermissionMaterializer) -> Self {
        Self { db, materializer }
    }

    /// Register an endpoint. `api_name` is the key checked at request time.
    pub async fn create_api(
        &self,
        api_name: &str,
        method: &str,
        path: &str,
        description: Option<String>,
    ) -> Result<api::Model> {
        let new_api = api::ActiveModel {
            api_name: Set(api_name.to_string()),
            method: Set(method.to_ascii_uppercase()),
            path: Set(path.to_string()),
            description: Set(description),
            is_active: Set(true),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        Ok(new_api.insert(&self.db).await?)
    }

    pub async fn find_by_name(&self, api_name: &str) -> Result<Option<api::Model>> {
        Ok(Api::find()
            .filter(api::Column::ApiName.eq(api_name))
            .one(&self.db)
            .await?)
    }

    /// Enable or disable an endpoint and rebuild every role reaching it.
    pub async fn set_api_status(&self, api_id: i64, is_active: bool) -> Result<api::Model> {
        let existing = Api::find_by_id(api_id)
            .one(&self.db)
            .await?
            .ok_or(AuthzError::NotFound { entity: "api", id: api_id })?;

        let txn = self.db.begin().await.map_err(AuthzError::MaterializationFailed)?;
        let mut active: api::ActiveModel = existing.into();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&txn).await.map_err(AuthzError::MaterializationFailed)?;
        let role_ids = rematerialize_for_api(&txn, api_id)
            .await
            .map_err(AuthzError::MaterializationFailed)?;
        txn.commit().await.map_err(AuthzError::MaterializationFailed)?;

        self.materializer.invalidate_roles(&role_ids).await;
        info!(api_id, is_active, roles = ?role_ids, "api status changed");
        Ok(updated)
    }
}
