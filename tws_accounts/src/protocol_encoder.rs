// tws_accounts/src/protocol_encoder.rs
// Encoder for the outgoing messages the account tracker needs

use crate::base::IBKRError;
use crate::reply::Request;
use log::{debug, trace};
use num_enum::TryFromPrimitive;
use std::io::{Cursor, Write};

/// Message tags for outgoing messages
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum OutgoingMessageType {
  RequestAccountData = 6,
  RequestManagedAccts = 17,
  StartApi = 71,
}

/// Identifies an outgoing message from its encoded body, for logging.
pub fn identify_outgoing_type(msg_data: &[u8]) -> Option<&'static str> {
  if msg_data.starts_with(b"API\0") {
    return Some("H1_CLIENT_VERSION");
  }
  let end_pos = msg_data.iter().position(|&b| b == 0)?;
  let type_id: i32 = std::str::from_utf8(&msg_data[..end_pos]).ok()?.parse().ok()?;
  match OutgoingMessageType::try_from(type_id).ok()? {
    OutgoingMessageType::RequestAccountData => Some("REQ_ACCOUNT_DATA"),
    OutgoingMessageType::RequestManagedAccts => Some("REQ_MANAGED_ACCTS"),
    OutgoingMessageType::StartApi => Some("H3_START_API"),
  }
}

/// Message encoder for a negotiated server version.
pub struct Encoder {
  server_version: i32,
}

impl Encoder {
  pub fn new(server_version: i32) -> Self {
    Self { server_version }
  }

  pub fn server_version(&self) -> i32 {
    self.server_version
  }

  fn start_encoding(&self, msg_type: OutgoingMessageType) -> Result<Cursor<Vec<u8>>, IBKRError> {
    let mut cursor = Cursor::new(Vec::new());
    self.write_int_to_cursor(&mut cursor, msg_type as i32)?;
    Ok(cursor)
  }

  fn finish_encoding(&self, cursor: Cursor<Vec<u8>>) -> Vec<u8> {
    cursor.into_inner()
  }

  fn write_str_to_cursor(&self, cursor: &mut Cursor<Vec<u8>>, s: &str) -> Result<(), IBKRError> {
    trace!("Encoding string: {}", s);
    cursor.write_all(s.as_bytes()).map_err(|e| IBKRError::InternalError(format!("Buffer write failed: {}", e)))?;
    cursor.write_all(&[0]).map_err(|e| IBKRError::InternalError(format!("Buffer write failed: {}", e)))?;
    Ok(())
  }

  fn write_int_to_cursor(&self, cursor: &mut Cursor<Vec<u8>>, val: i32) -> Result<(), IBKRError> {
    self.write_str_to_cursor(cursor, &val.to_string())
  }

  fn write_bool_to_cursor(&self, cursor: &mut Cursor<Vec<u8>>, val: bool) -> Result<(), IBKRError> {
    self.write_int_to_cursor(cursor, if val { 1 } else { 0 })
  }

  /// Starts or stops the account-updates stream for one account.
  pub fn encode_request_account_updates(&self, subscribe: bool, account_code: &str) -> Result<Vec<u8>, IBKRError> {
    debug!("Encoding request account updates: Subscribe={}, Account={}", subscribe, account_code);
    let mut cursor = self.start_encoding(OutgoingMessageType::RequestAccountData)?;
    self.write_int_to_cursor(&mut cursor, 2)?; // Version 2 carries the account code
    self.write_bool_to_cursor(&mut cursor, subscribe)?;
    self.write_str_to_cursor(&mut cursor, account_code)?;
    Ok(self.finish_encoding(cursor))
  }

  pub fn encode_request_managed_accounts(&self) -> Result<Vec<u8>, IBKRError> {
    debug!("Encoding request managed accounts");
    let mut cursor = self.start_encoding(OutgoingMessageType::RequestManagedAccts)?;
    self.write_int_to_cursor(&mut cursor, 1)?; // Version
    Ok(self.finish_encoding(cursor))
  }

  /// Body of the StartAPI message that completes the handshake.
  pub fn encode_start_api(&self, client_id: i32, optional_capabilities: &str) -> Result<Vec<u8>, IBKRError> {
    debug!("Encoding start API: ClientID={}", client_id);
    let mut cursor = self.start_encoding(OutgoingMessageType::StartApi)?;
    self.write_int_to_cursor(&mut cursor, 2)?; // Version
    self.write_int_to_cursor(&mut cursor, client_id)?;
    self.write_str_to_cursor(&mut cursor, optional_capabilities)?;
    Ok(self.finish_encoding(cursor))
  }

  pub fn encode(&self, request: &Request) -> Result<Vec<u8>, IBKRError> {
    match request {
      Request::RequestManagedAccounts => self.encode_request_managed_accounts(),
      Request::RequestAccountUpdates { subscribe, account_code } => {
        self.encode_request_account_updates(*subscribe, account_code)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn account_updates_wire_format() {
    let enc = Encoder::new(178);
    assert_eq!(enc.encode(&Request::subscribe("DU1")).unwrap(), b"6\x002\x001\x00DU1\x00".to_vec());
    assert_eq!(enc.encode(&Request::unsubscribe("DU1")).unwrap(), b"6\x002\x000\x00DU1\x00".to_vec());
  }

  #[test]
  fn managed_accounts_wire_format() {
    let enc = Encoder::new(178);
    assert_eq!(enc.encode(&Request::RequestManagedAccounts).unwrap(), b"17\x001\x00".to_vec());
  }

  #[test]
  fn start_api_wire_format() {
    let enc = Encoder::new(178);
    assert_eq!(enc.encode_start_api(42, "").unwrap(), b"71\x002\x0042\x00\x00".to_vec());
  }

  #[test]
  fn identifies_encoded_messages() {
    let enc = Encoder::new(178);
    let body = enc.encode_request_managed_accounts().unwrap();
    assert_eq!(identify_outgoing_type(&body), Some("REQ_MANAGED_ACCTS"));
    assert_eq!(identify_outgoing_type(b"API\0"), Some("H1_CLIENT_VERSION"));
    assert_eq!(identify_outgoing_type(b"999\0"), None);
    // Only requests this crate encodes are named.
    assert_eq!(identify_outgoing_type(b"8\x001\x001\x00"), None);
    assert_eq!(identify_outgoing_type(b"49\x001\x00"), None);
    assert_eq!(identify_outgoing_type(b""), None);
  }
}
