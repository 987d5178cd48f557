use crate::{entities::product, errors::CoreError};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Read-only queries over the product catalog.
///
/// The purchase flow only ever reads through this service; the single
/// buyer-facing stock mutation lives in the ledger. Category and product
/// management belong to the admin tooling, outside this crate.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, CoreError> {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("product {}", id)))
    }

    /// Distinct category names, alphabetical. With `include_empty` false,
    /// only categories that still have at least one in-stock product.
    #[instrument(skip(self))]
    pub async fn list_categories(&self, include_empty: bool) -> Result<Vec<String>, CoreError> {
        let mut query = product::Entity::find()
            .select_only()
            .column(product::Column::Category)
            .distinct();

        if !include_empty {
            query = query.filter(product::Column::Stock.gt(0));
        }

        let categories = query
            .order_by_asc(product::Column::Category)
            .into_tuple::<String>()
            .all(&*self.db)
            .await?;

        Ok(categories)
    }

    /// Products of one category in insertion order.
    #[instrument(skip(self))]
    pub async fn list_products(&self, category: &str) -> Result<Vec<product::Model>, CoreError> {
        let products = product::Entity::find()
            .filter(product::Column::Category.eq(category))
            .order_by_asc(product::Column::CreatedAt)
            .order_by_asc(product::Column::Id)
            .all(&*self.db)
            .await?;

        Ok(products)
    }
}
