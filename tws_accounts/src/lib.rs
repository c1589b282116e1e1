// tws_accounts/src/lib.rs
// Main entry point for the account tracking library

//! # tws_accounts
//!
//! Account snapshots over the Interactive Brokers TWS API.
//!
//! - Discovers every account reachable from the login (FA sub-accounts included)
//! - Subscribes to account updates for one account at a time, as TWS requires
//! - Keeps the latest value per account, tag and currency, and the latest
//!   portfolio line per account and contract
//! - Serves consistent copies of that state to any number of reader threads
//! - Replays recorded sessions for tests

mod base;
mod protocol_encoder;
mod protocol_decoder;
mod protocol_dec_parser;
mod message_parser;
mod parser_account;
mod dispatcher;
mod manager;
pub mod account;
pub mod contract;
pub mod reply;
pub mod handler;
pub mod conn;
pub mod conn_mock;
pub mod snapshot;
pub mod sequencer;
pub mod account_manager;
pub mod client;

pub use base::IBKRError;
pub use account::{AccountTag, AccountValue, AccountValueKey, PortfolioValue, PortfolioValueKey};
pub use account_manager::{ManagerConfig, PrimaryAccountManager};
pub use client::AccountClient;
pub use snapshot::AccountSnapshot;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
