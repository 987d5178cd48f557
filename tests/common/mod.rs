#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use keyvend::{
    config::{AppConfig, PaymentConfig},
    db,
    entities::{product, purchase},
    errors::CoreError,
    events::{self, Event},
    services::gateway::{CreatedPayment, PaymentGateway, PaymentStatus},
    EngineState,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Payment gateway double that plays back a scripted sequence of statuses.
/// The last scripted status repeats once the script runs out, so a queue of
/// `[Pending, Succeeded]` behaves like a payment that settles after one poll.
pub struct ScriptedGateway {
    statuses: Mutex<VecDeque<PaymentStatus>>,
    payments_created: AtomicUsize,
    status_polls: AtomicUsize,
    fail_next_create: Mutex<bool>,
    fail_next_status: Mutex<bool>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            payments_created: AtomicUsize::new(0),
            status_polls: AtomicUsize::new(0),
            fail_next_create: Mutex::new(false),
            fail_next_status: Mutex::new(false),
        }
    }

    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = PaymentStatus>) {
        let mut queue = self.statuses.lock().unwrap();
        queue.clear();
        queue.extend(statuses);
    }

    pub fn fail_next_create(&self) {
        *self.fail_next_create.lock().unwrap() = true;
    }

    pub fn fail_next_status(&self) {
        *self.fail_next_status.lock().unwrap() = true;
    }

    pub fn payments_created(&self) -> usize {
        self.payments_created.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_payment(
        &self,
        _amount: i64,
        _description: &str,
        _product_id: Uuid,
    ) -> Result<CreatedPayment, CoreError> {
        let mut fail = self.fail_next_create.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(CoreError::Provider("scripted outage".into()));
        }
        drop(fail);

        let n = self.payments_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedPayment {
            payment_id: format!("pay_{n}"),
            confirmation_url: format!("https://pay.test/confirm/{n}"),
        })
    }

    async fn get_status(&self, _payment_id: &str) -> Result<PaymentStatus, CoreError> {
        let mut fail = self.fail_next_status.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(CoreError::Provider("scripted outage".into()));
        }
        drop(fail);

        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.statuses.lock().unwrap();
        match queue.len() {
            0 => Ok(PaymentStatus::Pending),
            1 => Ok(*queue.front().unwrap()),
            _ => Ok(queue.pop_front().unwrap()),
        }
    }
}

/// Engine wired over a fresh in-memory SQLite database with migrations
/// applied and a scripted payment gateway.
pub struct TestHarness {
    pub state: EngineState,
    pub gateway: Arc<ScriptedGateway>,
    pub events: mpsc::Receiver<Event>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_poll_limit(10).await
    }

    pub async fn with_poll_limit(max_poll_attempts: u32) -> Self {
        let config = AppConfig {
            database_url: "sqlite::memory:".into(),
            db_max_connections: 1,
            db_min_connections: 1,
            environment: "test".into(),
            log_level: "debug".into(),
            log_json: false,
            payment: PaymentConfig {
                base_url: "https://pay.test/api".into(),
                api_token: "test-token".into(),
                return_url: "https://shop.test/return".into(),
                currency: "USD".into(),
            },
            max_poll_attempts,
            session_ttl_secs: 1800,
            event_buffer: 64,
        };

        // One connection only: a pool over `sqlite::memory:` would hand each
        // connection its own empty database.
        let db_config = db::DbConfig {
            url: config.database_url.clone(),
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

        let (event_sender, events) = events::channel(config.event_buffer);
        let gateway = Arc::new(ScriptedGateway::new());
        let state = EngineState::new(pool, config, gateway.clone(), event_sender);

        Self {
            state,
            gateway,
            events,
        }
    }

    pub async fn seed_product(
        &self,
        category: &str,
        name: &str,
        price: i64,
        stock: i32,
        promo_code: Option<&str>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            category: Set(category.to_string()),
            name: Set(name.to_string()),
            description: Set(format!("{name} in {category}")),
            price: Set(price),
            promo_code: Set(promo_code.map(str::to_string)),
            stock: Set(stock),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product");
        id
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock
    }

    pub async fn purchase_count(&self, product_id: Uuid) -> u64 {
        purchase::Entity::find()
            .filter(purchase::Column::ProductId.eq(product_id))
            .count(&*self.state.db)
            .await
            .expect("count purchases")
    }

    /// Drains events received so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
