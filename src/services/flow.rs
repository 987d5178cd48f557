use crate::{
    entities::product,
    errors::CoreError,
    events::{Event, EventSender},
    services::{
        catalog::CatalogService,
        gateway::{PaymentGateway, PaymentStatus},
        ledger::{FinalizeOutcome, PurchaseLedger},
        session::{SessionState, SessionStore},
    },
    BuyerId,
};
use chrono::{Duration, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Buyer intents delivered by the conversational front-end. This is the
/// engine's entire input surface; everything else the bot does is read-only
/// with respect to the purchase flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SelectProduct(Uuid),
    ConfirmPurchase,
    CheckPayment,
    CancelPurchase,
}

/// What the front-end should render back to the buyer. Every variant maps to
/// a message naming the buyer's next action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Product details with confirm/cancel controls.
    ProductOffered { product: product::Model },
    /// The product sold out. `paid` is true on the race where the payment
    /// succeeded but the last unit went to a concurrent buyer; the front-end
    /// must tell that buyer to contact support.
    OutOfStock { paid: bool },
    /// Payment intent created; send the buyer to the hosted payment page
    /// and present check/cancel controls.
    PaymentPending { confirmation_url: String },
    /// Payment not confirmed yet; re-present check/cancel controls.
    StillPending { confirmation_url: String },
    /// Purchase recorded; deliver the redeemable code.
    Completed {
        purchase_id: Uuid,
        promo_code: Option<String>,
    },
    Canceled,
    /// The payment never resolved within the poll bound.
    Failed,
    /// The intent arrived without a matching in-flight session.
    NoActiveSession,
}

/// Per-buyer purchase state machine.
///
/// Transitions are driven solely by that buyer's own intents, so each
/// session is effectively single-threaded; the only cross-session contention
/// is per-product stock, which the ledger resolves at the storage layer.
pub struct PurchaseFlow {
    catalog: CatalogService,
    ledger: PurchaseLedger,
    gateway: Arc<dyn PaymentGateway>,
    sessions: Arc<SessionStore>,
    events: EventSender,
    max_poll_attempts: u32,
    session_ttl: Duration,
}

impl PurchaseFlow {
    pub fn new(
        catalog: CatalogService,
        ledger: PurchaseLedger,
        gateway: Arc<dyn PaymentGateway>,
        sessions: Arc<SessionStore>,
        events: EventSender,
        max_poll_attempts: u32,
        session_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            ledger,
            gateway,
            sessions,
            events,
            max_poll_attempts,
            session_ttl,
        }
    }

    /// Applies one buyer intent to the state machine.
    ///
    /// On `Err` no transition happened and the session, if any, is left
    /// untouched: the front-end renders [`CoreError::user_message`] and
    /// re-presents the same controls, so the buyer retries explicitly. The
    /// engine never retries on its own.
    #[instrument(skip(self))]
    pub async fn handle(&self, buyer: BuyerId, intent: Intent) -> Result<Reply, CoreError> {
        match intent {
            Intent::SelectProduct(product_id) => self.select_product(buyer, product_id).await,
            Intent::ConfirmPurchase => self.confirm_purchase(buyer).await,
            Intent::CheckPayment => self.check_payment(buyer).await,
            Intent::CancelPurchase => self.cancel(buyer).await,
        }
    }

    /// `Idle -> ProductSelected`, or straight to `OutOfStock` when the
    /// display-time read finds no stock. The stock check here is advisory
    /// only; nothing is reserved until the ledger step.
    async fn select_product(&self, buyer: BuyerId, product_id: Uuid) -> Result<Reply, CoreError> {
        let product = self.catalog.get_product(product_id).await?;

        if product.stock <= 0 {
            self.sessions.remove(buyer);
            return Ok(Reply::OutOfStock { paid: false });
        }

        // Always a fresh session: a prior in-flight purchase, payment id
        // included, is discarded the moment the buyer picks a product.
        self.sessions.begin(buyer, product_id);
        Ok(Reply::ProductOffered { product })
    }

    /// `ProductSelected -> PaymentCreated`. Re-reads the product first:
    /// stock may have moved since display time.
    async fn confirm_purchase(&self, buyer: BuyerId) -> Result<Reply, CoreError> {
        let session = match self.sessions.get(buyer) {
            Some(s) => s,
            None => return Ok(Reply::NoActiveSession),
        };

        let product_id = match session.state {
            SessionState::ProductSelected { product_id } => product_id,
            // A payment already exists; re-present it rather than create a
            // second charge for the same purchase.
            SessionState::PaymentCreated {
                confirmation_url, ..
            } => {
                return Ok(Reply::PaymentPending { confirmation_url });
            }
        };

        let product = self.catalog.get_product(product_id).await?;
        if product.stock <= 0 {
            self.sessions.remove(buyer);
            return Ok(Reply::OutOfStock { paid: false });
        }

        let created = self
            .gateway
            .create_payment(
                product.price,
                &format!("{} ({})", product.name, product.category),
                product_id,
            )
            .await?;

        self.sessions.update(
            buyer,
            SessionState::PaymentCreated {
                product_id,
                payment_id: created.payment_id.clone(),
                confirmation_url: created.confirmation_url.clone(),
                polls: 0,
            },
        );

        self.events
            .send(Event::PaymentCreated {
                buyer,
                product_id,
                payment_id: created.payment_id,
            })
            .await;

        Ok(Reply::PaymentPending {
            confirmation_url: created.confirmation_url,
        })
    }

    /// Resolves the `PaymentCreated` state by polling the provider once.
    async fn check_payment(&self, buyer: BuyerId) -> Result<Reply, CoreError> {
        let session = match self.sessions.get(buyer) {
            Some(s) => s,
            None => return Ok(Reply::NoActiveSession),
        };

        let (product_id, payment_id, confirmation_url, polls) = match session.state {
            SessionState::PaymentCreated {
                product_id,
                payment_id,
                confirmation_url,
                polls,
            } => (product_id, payment_id, confirmation_url, polls),
            SessionState::ProductSelected { .. } => return Ok(Reply::NoActiveSession),
        };

        // A transport failure here leaves the poll counter alone; only an
        // actual `pending` answer counts against the bound.
        let status = self.gateway.get_status(&payment_id).await?;

        match status {
            PaymentStatus::Pending => {
                let polls = polls + 1;
                if polls >= self.max_poll_attempts {
                    self.sessions.remove(buyer);
                    warn!(%buyer, %payment_id, polls, "payment never resolved, giving up");
                    self.events
                        .send(Event::PurchaseFailed { buyer, payment_id })
                        .await;
                    return Ok(Reply::Failed);
                }
                self.sessions.update(
                    buyer,
                    SessionState::PaymentCreated {
                        product_id,
                        payment_id,
                        confirmation_url: confirmation_url.clone(),
                        polls,
                    },
                );
                Ok(Reply::StillPending { confirmation_url })
            }
            PaymentStatus::Succeeded => {
                self.complete(buyer, product_id, payment_id).await
            }
            PaymentStatus::Canceled | PaymentStatus::Failed => {
                self.sessions.remove(buyer);
                self.events.send(Event::PurchaseCanceled { buyer }).await;
                Ok(Reply::Canceled)
            }
        }
    }

    /// `PaymentCreated -> Completed`, or `-> OutOfStock` on the race where a
    /// concurrent sale took the last unit after this buyer already paid.
    async fn complete(
        &self,
        buyer: BuyerId,
        product_id: Uuid,
        payment_id: String,
    ) -> Result<Reply, CoreError> {
        // Storage failure propagates with the session intact: the next
        // CheckPayment observes `succeeded` again and retries the ledger.
        let outcome = self.ledger.finalize_purchase(buyer, product_id).await?;

        match outcome {
            FinalizeOutcome::Completed(purchase_id) => {
                self.sessions.remove(buyer);

                // The purchase is already durable; a failed read here only
                // costs the inline code delivery, not the purchase.
                let promo_code = match self.catalog.get_product(product_id).await {
                    Ok(p) => p.promo_code,
                    Err(e) => {
                        warn!(%purchase_id, "could not load promo code after purchase: {}", e);
                        None
                    }
                };

                info!(%buyer, %purchase_id, "purchase completed");
                self.events
                    .send(Event::PurchaseCompleted {
                        buyer,
                        product_id,
                        purchase_id,
                    })
                    .await;

                Ok(Reply::Completed {
                    purchase_id,
                    promo_code,
                })
            }
            FinalizeOutcome::OutOfStock => {
                self.sessions.remove(buyer);

                // The buyer has paid and cannot be fulfilled. There is no
                // automated refund path; raise every alarm we have.
                error!(
                    %buyer, %product_id, %payment_id,
                    "payment succeeded but stock is exhausted; manual resolution required"
                );
                counter!("keyvend_paid_unfulfilled_total", 1);
                self.events
                    .send(Event::PaidButOutOfStock {
                        buyer,
                        product_id,
                        payment_id,
                        occurred_at: Utc::now(),
                    })
                    .await;

                Ok(Reply::OutOfStock { paid: true })
            }
        }
    }

    /// Explicit cancellation: permitted from any state, always clears the
    /// session. Nothing was reserved, so there is nothing to compensate.
    async fn cancel(&self, buyer: BuyerId) -> Result<Reply, CoreError> {
        if self.sessions.remove(buyer).is_some() {
            self.events.send(Event::PurchaseCanceled { buyer }).await;
        }
        Ok(Reply::Canceled)
    }

    /// Sweeps abandoned sessions, emitting an expiry event per buyer. The
    /// host decides the cadence.
    pub async fn purge_expired_sessions(&self) -> usize {
        let expired = self.sessions.purge_expired(self.session_ttl);
        for buyer in &expired {
            self.events.send(Event::SessionExpired { buyer: *buyer }).await;
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::MockPaymentGateway;
    use crate::{db, events};
    use chrono::Utc;
    use sea_orm::{ActiveModelTrait, Set};

    async fn flow_with_gateway(
        gateway: MockPaymentGateway,
    ) -> (PurchaseFlow, Arc<SessionStore>, Uuid) {
        // One connection only: every pooled connection to `sqlite::memory:`
        // would otherwise open its own empty database.
        let db_config = db::DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = Arc::new(
            db::establish_connection_with_config(&db_config)
                .await
                .expect("in-memory sqlite"),
        );
        db::run_migrations(&pool).await.expect("migrations");

        let product_id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(product_id),
            category: Set("games".into()),
            name: Set("Gift Card".into()),
            description: Set("A redeemable gift card".into()),
            price: Set(25),
            promo_code: Set(Some("GIFT-25".into())),
            stock: Set(3),
            created_at: Set(Utc::now()),
        }
        .insert(&*pool)
        .await
        .expect("seed product");

        let sessions = Arc::new(SessionStore::new());
        let (events, _rx) = events::channel(16);
        let flow = PurchaseFlow::new(
            CatalogService::new(pool.clone()),
            PurchaseLedger::new(pool),
            Arc::new(gateway),
            sessions.clone(),
            events,
            10,
            Duration::minutes(30),
        );
        (flow, sessions, product_id)
    }

    #[tokio::test]
    async fn provider_error_on_confirm_keeps_session() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .returning(|_, _, _| Err(CoreError::Provider("connection reset".into())));

        let (flow, sessions, product_id) = flow_with_gateway(gateway).await;
        let buyer = BuyerId(100);

        flow.handle(buyer, Intent::SelectProduct(product_id))
            .await
            .unwrap();
        let err = flow.handle(buyer, Intent::ConfirmPurchase).await.unwrap_err();
        assert!(matches!(err, CoreError::Provider(_)));

        // No transition happened; the buyer can simply confirm again.
        assert_eq!(
            sessions.get(buyer).unwrap().state,
            SessionState::ProductSelected { product_id }
        );
    }

    #[tokio::test]
    async fn confirm_without_session_is_not_an_error() {
        let (flow, _, _) = flow_with_gateway(MockPaymentGateway::new()).await;
        let reply = flow
            .handle(BuyerId(5), Intent::ConfirmPurchase)
            .await
            .unwrap();
        assert_eq!(reply, Reply::NoActiveSession);
    }

    #[tokio::test]
    async fn double_confirm_does_not_create_second_payment() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().times(1).returning(|_, _, _| {
            Ok(crate::services::gateway::CreatedPayment {
                payment_id: "pay_1".into(),
                confirmation_url: "https://pay.example/1".into(),
            })
        });

        let (flow, _, product_id) = flow_with_gateway(gateway).await;
        let buyer = BuyerId(42);

        flow.handle(buyer, Intent::SelectProduct(product_id))
            .await
            .unwrap();
        let first = flow.handle(buyer, Intent::ConfirmPurchase).await.unwrap();
        let second = flow.handle(buyer, Intent::ConfirmPurchase).await.unwrap();

        // The mock enforces times(1); both replies carry the same intent.
        assert_eq!(first, second);
    }
}
