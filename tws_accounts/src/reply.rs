// tws_accounts/src/reply.rs
// Typed replies and requests exchanged with the message engine

use crate::account::{AccountValue, PortfolioValue};

/// First code of the TWS informational band (market data farm status and the like).
const WARNING_CODE_FIRST: i32 = 2100;
const WARNING_CODE_LAST: i32 = 2199;

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
  /// Request id the error refers to, or -1 for connection-level messages.
  pub id: i32,
  pub code: i32,
  pub message: String,
  pub advanced_order_reject_json: Option<String>,
}

impl ErrorMessage {
  /// Warning severity: the 21xx informational band, plus any code the caller
  /// chooses to tolerate.
  pub fn is_warning(&self, tolerated: &[i32]) -> bool {
    (WARNING_CODE_FIRST..=WARNING_CODE_LAST).contains(&self.code) || tolerated.contains(&self.code)
  }
}

/// Every inbound message the account tracker can be handed.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
  Error(ErrorMessage),
  AccountDownloadEnd { account: String },
  NextValidId { order_id: i32 },
  AccountUpdateTime { time_stamp: String },
  AccountValue(AccountValue),
  PortfolioValue(PortfolioValue),
  /// Account codes in the order the gateway listed them.
  ManagedAccounts { accounts: Vec<String> },
  /// A well-formed message of a type this crate does not decode.
  Unhandled { msg_type: i32 },
}

impl Reply {
  /// The request id a reply is addressed to, if any. Only error replies carry one.
  pub fn request_id(&self) -> Option<i64> {
    match self {
      Reply::Error(e) if e.id > 0 => Some(e.id as i64),
      _ => None,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Reply::Error(_) => "ErrorMessage",
      Reply::AccountDownloadEnd { .. } => "AccountDownloadEnd",
      Reply::NextValidId { .. } => "NextValidId",
      Reply::AccountUpdateTime { .. } => "AccountUpdateTime",
      Reply::AccountValue(_) => "AccountValue",
      Reply::PortfolioValue(_) => "PortfolioValue",
      Reply::ManagedAccounts { .. } => "ManagedAccounts",
      Reply::Unhandled { .. } => "Unhandled",
    }
  }
}

/// Requests the account tracker sends through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
  RequestManagedAccounts,
  RequestAccountUpdates { subscribe: bool, account_code: String },
}

impl Request {
  pub fn subscribe(account_code: &str) -> Self {
    Request::RequestAccountUpdates { subscribe: true, account_code: account_code.to_string() }
  }

  pub fn unsubscribe(account_code: &str) -> Self {
    Request::RequestAccountUpdates { subscribe: false, account_code: account_code.to_string() }
  }
}
