// tws_accounts/src/protocol_decoder.rs
// Message type ids for incoming TWS messages

use num_enum::TryFromPrimitive;
use std::fmt;

/// Message tags for incoming messages.
///
/// Only the account-update family is decoded into typed replies. The other
/// ids listed here show up on a plain account connection and are named so
/// that logs can say what was skipped.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum IncomingMessageType {
  OrderStatus = 3,
  ErrorMessage = 4,
  OpenOrder = 5,
  AccountValue = 6,
  PortfolioValue = 7,
  AccountUpdateTime = 8,
  NextValidId = 9,
  ExecutionData = 11,
  NewsBulletins = 14,
  ManagedAccounts = 15,
  CurrentTime = 49,
  OpenOrderEnd = 53,
  AccountDownloadEnd = 54,
  CommissionReport = 59,
  Position = 61,
  PositionEnd = 62,
  AccountSummary = 63,
  AccountSummaryEnd = 64,
  AccountUpdateMulti = 73,
  AccountUpdateMultiEnd = 74,
  CompletedOrder = 101,
  CompletedOrdersEnd = 102,
  UserInfo = 107,
}

impl fmt::Display for IncomingMessageType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}({})", self, *self as i32)
  }
}

/// Human readable name for a raw type id, for logging.
pub fn describe_incoming_type(msg_type: i32) -> String {
  match IncomingMessageType::try_from(msg_type) {
    Ok(t) => t.to_string(),
    Err(_) => format!("Unknown({})", msg_type),
  }
}
