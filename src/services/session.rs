use crate::BuyerId;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Where a buyer currently is in the purchase flow. Terminal outcomes are
/// not represented: reaching one destroys the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Buyer is viewing a product; stock was positive at display time.
    ProductSelected { product_id: Uuid },
    /// A payment intent exists; the buyer is paying or polling its status.
    PaymentCreated {
        product_id: Uuid,
        payment_id: String,
        confirmation_url: String,
        /// How many times the status poll came back `pending`.
        polls: u32,
    },
}

/// Per-buyer in-flight purchase. Exclusively owned by that buyer's
/// conversation; at most one exists per buyer at any time.
#[derive(Debug, Clone)]
pub struct PurchaseSession {
    pub buyer: BuyerId,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Keyed store of in-flight sessions.
///
/// Purely in-memory: a session is cheap to lose since nothing is reserved
/// before the ledger step. Abandoned sessions are reaped by
/// [`SessionStore::purge_expired`], which the host calls on its own cadence.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<BuyerId, PurchaseSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh session for the buyer, discarding any prior one. A new
    /// product selection always wins; stale payment ids must never leak into
    /// a new purchase.
    pub fn begin(&self, buyer: BuyerId, product_id: Uuid) -> PurchaseSession {
        let now = Utc::now();
        let session = PurchaseSession {
            buyer,
            state: SessionState::ProductSelected { product_id },
            started_at: now,
            last_activity: now,
        };
        self.sessions.insert(buyer, session.clone());
        session
    }

    pub fn get(&self, buyer: BuyerId) -> Option<PurchaseSession> {
        self.sessions.get(&buyer).map(|s| s.clone())
    }

    /// Advances the buyer's session to a new state, refreshing its activity
    /// timestamp. Returns false when no session exists (it may have been
    /// purged or canceled concurrently with the buyer's message).
    pub fn update(&self, buyer: BuyerId, state: SessionState) -> bool {
        match self.sessions.get_mut(&buyer) {
            Some(mut session) => {
                session.state = state;
                session.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, buyer: BuyerId) -> Option<PurchaseSession> {
        self.sessions.remove(&buyer).map(|(_, s)| s)
    }

    /// Removes sessions idle longer than `ttl`, returning the affected
    /// buyers so the caller can emit expiry events.
    pub fn purge_expired(&self, ttl: Duration) -> Vec<BuyerId> {
        let cutoff = Utc::now() - ttl;
        let expired: Vec<BuyerId> = self
            .sessions
            .iter()
            .filter(|entry| entry.last_activity < cutoff)
            .map(|entry| entry.buyer)
            .collect();

        for buyer in &expired {
            self.sessions.remove(buyer);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[cfg(test)]
    fn backdate(&self, buyer: BuyerId, by: Duration) {
        if let Some(mut session) = self.sessions.get_mut(&buyer) {
            session.last_activity -= by;
        }
    }
}
