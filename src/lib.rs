//! keyvend — purchase lifecycle engine for a conversational digital-goods
//! storefront.
//!
//! The engine takes a buyer from "product selected" through "payment
//! initiated" to "stock decremented and purchase recorded", guaranteeing
//! that a unit of stock is never sold twice and that a purchase record only
//! ever exists alongside a confirmed payment. The catalog admin tooling and
//! the conversational front-end are external collaborators: the front-end
//! feeds [`services::flow::Intent`]s in and renders
//! [`services::flow::Reply`]s out.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod services;

use chrono::Duration;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use services::{
    catalog::CatalogService, flow::PurchaseFlow, gateway::PaymentGateway, ledger::PurchaseLedger,
    session::SessionStore,
};

/// Identity of a buyer: the conversation id handed over by the front-end
/// platform. A newtype so it cannot be mixed up with product or purchase
/// ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuyerId(pub i64);

impl fmt::Display for BuyerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buyer:{}", self.0)
    }
}

/// Composition root: the engine's services wired over one connection pool
/// and one event channel.
#[derive(Clone)]
pub struct EngineState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub catalog: CatalogService,
    pub ledger: PurchaseLedger,
    pub sessions: Arc<SessionStore>,
    pub flow: Arc<PurchaseFlow>,
}

impl EngineState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: events::EventSender,
    ) -> Self {
        let catalog = CatalogService::new(db.clone());
        let ledger = PurchaseLedger::new(db.clone());
        let sessions = Arc::new(SessionStore::new());
        let flow = Arc::new(PurchaseFlow::new(
            catalog.clone(),
            ledger.clone(),
            gateway,
            sessions.clone(),
            event_sender.clone(),
            config.max_poll_attempts,
            Duration::seconds(config.session_ttl_secs as i64),
        ));

        Self {
            db,
            config,
            event_sender,
            catalog,
            ledger,
            sessions,
            flow,
        }
    }

    /// Connects to the database, applies migrations, and wires the engine.
    pub async fn build(
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> anyhow::Result<(Self, tokio::sync::mpsc::Receiver<events::Event>)> {
        let db_config = db::DbConfig {
            url: config.database_url.clone(),
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            ..Default::default()
        };
        let pool = Arc::new(db::establish_connection_with_config(&db_config).await?);
        db::run_migrations(&pool).await?;

        let (event_sender, event_receiver) = events::channel(config.event_buffer);
        Ok((
            Self::new(pool, config, gateway, event_sender),
            event_receiver,
        ))
    }
}
