#[cfg(feature = "nl")]
pub mod agent;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod storage;
