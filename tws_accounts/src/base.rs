// tws_accounts/src/base.rs
// Base types and error definitions for the account tracker

use thiserror::Error;

/// Errors that can occur while talking to TWS or tracking account data.
///
/// `Clone` so that a fatal error latched by the event loop can be handed to
/// every caller that later asks for it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IBKRError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Not connected to IBKR")]
  NotConnected,

  #[error("Already connected to IBKR")]
  AlreadyConnected,

  #[error("Socket error: {0}")]
  SocketError(String),

  #[error("Message parse error: {0}")]
  ParseError(String),

  #[error("Request timeout: {0}")]
  Timeout(String),

  #[error("Send failed: {0}")]
  SendFailed(String),

  #[error("Unexpected reply: {0}")]
  UnexpectedReply(String),

  #[error("Internal error: {0}")]
  InternalError(String),

  #[error("API error: code={0}, msg={1}")]
  ApiError(i32, String),
}
