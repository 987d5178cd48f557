use crate::{
    entities::{product, purchase},
    errors::CoreError,
    BuyerId,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Result of attempting to finalize a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Stock was decremented and the purchase recorded.
    Completed(Uuid),
    /// Stock was already exhausted; nothing was written.
    OutOfStock,
}

/// Owns the one correctness-critical operation in the system: the atomic
/// stock-decrement-and-record-insert.
#[derive(Clone)]
pub struct PurchaseLedger {
    db: Arc<DatabaseConnection>,
}

impl PurchaseLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Decrements the product's stock by one if any remains and records the
    /// purchase, both inside a single transaction.
    ///
    /// The guard lives in the `WHERE` clause of the conditional update, so
    /// concurrent finalizations for the same product serialize at the
    /// storage layer; no in-process lock is involved and sessions on other
    /// executors contend safely. Zero rows affected means the stock ran out
    /// between the display-time check and now.
    #[instrument(skip(self))]
    pub async fn finalize_purchase(
        &self,
        buyer: BuyerId,
        product_id: Uuid,
    ) -> Result<FinalizeOutcome, CoreError> {
        let txn = self.db.begin().await?;

        let updated = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(1),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gt(0))
            .exec(&txn)
            .await?;

        match updated.rows_affected {
            0 => {
                txn.rollback().await?;
                counter!("keyvend_oversell_rejected_total", 1);
                Ok(FinalizeOutcome::OutOfStock)
            }
            1 => {
                let record = purchase::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    buyer_id: Set(buyer.0),
                    product_id: Set(product_id),
                    created_at: Set(Utc::now()),
                };
                let record = record.insert(&txn).await?;
                txn.commit().await?;

                counter!("keyvend_purchases_completed_total", 1);
                info!(purchase_id = %record.id, %buyer, %product_id, "purchase finalized");
                Ok(FinalizeOutcome::Completed(record.id))
            }
            n => {
                // Product ids are primary keys; touching more than one row
                // means the schema or query is broken. Refuse to commit.
                txn.rollback().await?;
                Err(CoreError::InvariantViolation(format!(
                    "stock decrement touched {n} rows for product {product_id}"
                )))
            }
        }
    }

    /// Purchase history for one buyer, newest first.
    #[instrument(skip(self))]
    pub async fn list_purchases(
        &self,
        buyer: BuyerId,
        limit: u64,
    ) -> Result<Vec<purchase::Model>, CoreError> {
        let purchases = purchase::Entity::find()
            .filter(purchase::Column::BuyerId.eq(buyer.0))
            .order_by_desc(purchase::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?;

        Ok(purchases)
    }
}
