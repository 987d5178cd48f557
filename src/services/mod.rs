pub mod catalog;
pub mod flow;
pub mod gateway;
pub mod ledger;
pub mod session;
