use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A sellable product in the catalog.
///
/// `stock` never goes below zero: the only buyer-facing mutation is the
/// conditional decrement in the purchase ledger, which refuses to fire when
/// stock is already exhausted. `promo_code` is the redeemable secret handed
/// to the buyer on a completed purchase; a unique index keeps it unique
/// across all products.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub category: String,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    /// Whole currency units; the storefront deals in integral prices.
    pub price: i64,
    #[sea_orm(unique)]
    pub promo_code: Option<String>,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase::Entity")]
    Purchases,
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchases.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
