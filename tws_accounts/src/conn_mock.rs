// tws_accounts/src/conn_mock.rs

//! A `Connection` that replays a recorded conversation.
//!
//! The script is a list of SEND and RECV messages written with `·` in place
//! of each NUL separator, the same notation the capture tools print:
//!
//! ```text
//! SEND 17·1·
//! RECV 15·1·DU1,DU2·
//! SEND 6·2·1·DU1·
//! RECV 6·2·NetLiquidation·100·USD·DU1·
//! ```
//!
//! Each `send_message_body` must match the next SEND exactly. After a match,
//! the RECV messages that follow are handed to the message handler
//! synchronously, up to the next SEND.

use crate::base::IBKRError;
use crate::conn::Connection;
use crate::handler::MessageHandler;
use crate::protocol_encoder::identify_outgoing_type;

use parking_lot::{Condvar, Mutex};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CENTER_DOT: char = '·';

fn center_dot_string_to_bytes(s: &str) -> Vec<u8> {
  let mut bytes = Vec::with_capacity(s.len());
  for (i, field) in s.split(CENTER_DOT).enumerate() {
    if i > 0 {
      bytes.push(0);
    }
    bytes.extend_from_slice(field.as_bytes());
  }
  bytes
}

fn bytes_to_center_dot_string(bytes: &[u8]) -> String {
  String::from_utf8_lossy(bytes).replace('\0', &CENTER_DOT.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
  Send,
  Recv,
}

impl FromStr for LogDirection {
  type Err = IBKRError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "SEND" => Ok(LogDirection::Send),
      "RECV" => Ok(LogDirection::Recv),
      _ => Err(IBKRError::ParseError(format!("Invalid direction in script: {}", s))),
    }
  }
}

#[derive(Debug, Clone)]
struct ScriptedMessage {
  direction: LogDirection,
  payload_bytes: Vec<u8>,
}

struct MockConnectionState {
  server_version: i32,
  script: Vec<ScriptedMessage>,
  message_iter_index: usize,
  handler: Option<MessageHandler>,
  connected: bool,
}

#[derive(Clone)]
pub struct MockConnection {
  inner: Arc<Mutex<MockConnectionState>>,
  progress: Arc<Condvar>,
}

impl MockConnection {
  /// Builds a mock from `(direction, payload)` pairs in centre-dot notation.
  pub fn new(server_version: i32, script: &[(LogDirection, &str)]) -> Self {
    let script = script.iter()
      .map(|(direction, text)| ScriptedMessage {
        direction: *direction,
        payload_bytes: center_dot_string_to_bytes(text),
      })
      .collect::<Vec<_>>();
    log::info!("Mock: Loaded {} scripted messages", script.len());
    MockConnection {
      inner: Arc::new(Mutex::new(MockConnectionState {
        server_version,
        script,
        message_iter_index: 0,
        handler: None,
        connected: false,
      })),
      progress: Arc::new(Condvar::new()),
    }
  }

  /// Parses a script with one `SEND <payload>` or `RECV <payload>` per line.
  /// Blank lines and lines starting with `#` are skipped.
  pub fn from_script(server_version: i32, text: &str) -> Result<Self, IBKRError> {
    let mut lines = Vec::new();
    for (n, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let (dir, payload) = line.split_once(' ')
        .ok_or_else(|| IBKRError::ParseError(format!("Script line {}: missing payload", n + 1)))?;
      lines.push((LogDirection::from_str(dir)?, payload.trim()));
    }
    Ok(Self::new(server_version, &lines))
  }

  /// Number of scripted messages not yet consumed.
  pub fn remaining(&self) -> usize {
    let guard = self.inner.lock();
    guard.script.len() - guard.message_iter_index
  }

  /// Blocks until every scripted message has been consumed. Returns false on
  /// timeout.
  pub fn wait_until_exhausted(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut guard = self.inner.lock();
    while guard.message_iter_index < guard.script.len() {
      if self.progress.wait_until(&mut guard, deadline).timed_out() {
        return guard.message_iter_index >= guard.script.len();
      }
    }
    true
  }

  /// Process the next RECV message if there is one. Returns false on a SEND or at the end.
  fn pump_single_recv_message(state: &mut MockConnectionState) -> bool {
    let index = state.message_iter_index;
    let Some(next) = state.script.get(index) else {
      log::trace!("Mock (AutoPump): End of messages.");
      return false;
    };
    if next.direction == LogDirection::Send {
      log::trace!("Mock (AutoPump): Found SEND message #{}. Stopping pump.", index + 1);
      return false;
    }
    let payload = next.payload_bytes.clone();
    let Some(handler) = state.handler.as_mut() else {
      log::trace!("Mock (AutoPump): Cannot pump, no handler set.");
      return false;
    };
    log::debug!("Mock (AutoPump): Processing RECV message #{}", index + 1);
    handler.process(&payload);
    state.message_iter_index += 1;
    true
  }

  fn pump_recv_messages_until_send_or_end(state: &mut MockConnectionState) {
    while Self::pump_single_recv_message(state) {}
    if state.message_iter_index >= state.script.len() {
      log::debug!("Mock: Script exhausted");
    }
  }
}

impl Connection for MockConnection {
  fn is_connected(&self) -> bool {
    self.inner.lock().connected
  }

  fn disconnect(&mut self) -> Result<(), IBKRError> {
    log::info!("Mock: disconnect() called.");
    let mut guard = self.inner.lock();
    guard.connected = false;
    if let Some(mut handler) = guard.handler.take() {
      handler.connection_closed();
    }
    Ok(())
  }

  fn send_message_body(&mut self, data: &[u8]) -> Result<(), IBKRError> {
    let mut guard = self.inner.lock();

    if !guard.connected {
      log::warn!("Mock: send_message_body called while not connected.");
      return Err(IBKRError::NotConnected);
    }

    let index = guard.message_iter_index;
    let Some(expected) = guard.script.get(index).cloned() else {
      log::error!("Mock: Unexpected send {}: end of script reached.", bytes_to_center_dot_string(data));
      return Err(IBKRError::SendFailed("Unexpected send: end of script reached".to_string()));
    };

    match expected.direction {
      LogDirection::Send if data == expected.payload_bytes.as_slice() => {
        log::debug!("Mock: Sent {} matches SEND #{}", identify_outgoing_type(data).unwrap_or("UNKNOWN"), index + 1);
        let state = &mut *guard;
        state.message_iter_index += 1;
        Self::pump_recv_messages_until_send_or_end(state);
        self.progress.notify_all();
        Ok(())
      }
      LogDirection::Send => {
        let msg = format!("Sent message mismatch at #{}: sent '{}', expected '{}'",
                          index + 1,
                          bytes_to_center_dot_string(data),
                          bytes_to_center_dot_string(&expected.payload_bytes));
        log::error!("Mock: {}", msg);
        Err(IBKRError::SendFailed(msg))
      }
      LogDirection::Recv => {
        log::error!("Mock: send_message_body called, but message #{} is RECV.", index + 1);
        Err(IBKRError::SendFailed(format!("Unexpected send: message #{} is RECV", index + 1)))
      }
    }
  }

  /// Marks connected and delivers any RECV messages at the head of the script.
  fn set_message_handler(&mut self, handler: MessageHandler) {
    let mut guard = self.inner.lock();
    if guard.handler.is_some() {
      log::warn!("Mock: Replacing existing message handler.");
    }
    guard.handler = Some(handler);
    guard.connected = true;
    Self::pump_recv_messages_until_send_or_end(&mut *guard);
    self.progress.notify_all();
  }

  fn get_server_version(&self) -> i32 {
    self.inner.lock().server_version
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handler::{ReplyRouter, UNMATCHED_REPLY_ID};
  use crate::reply::Reply;
  use crossbeam_channel::unbounded;

  #[test]
  fn centre_dots_become_nuls() {
    assert_eq!(center_dot_string_to_bytes("17·1·"), b"17\x001\x00".to_vec());
    assert_eq!(bytes_to_center_dot_string(b"6\x002\x00"), "6·2·");
  }

  #[test]
  fn replays_recv_after_matching_send() {
    let router = Arc::new(ReplyRouter::new());
    let (tx, rx) = unbounded();
    router.subscribe(UNMATCHED_REPLY_ID, tx);

    let mut mock = MockConnection::from_script(178, "
      # connect burst
      RECV 9·1·1·
      SEND 17·1·
      RECV 15·1·DU1,·
    ").unwrap();
    mock.set_message_handler(MessageHandler::new(178, router));
    assert_eq!(rx.try_recv().unwrap(), Reply::NextValidId { order_id: 1 });
    assert!(rx.try_recv().is_err());

    mock.send_message_body(b"17\x001\x00").unwrap();
    assert_eq!(rx.try_recv().unwrap(), Reply::ManagedAccounts { accounts: vec!["DU1".to_string()] });
    assert_eq!(mock.remaining(), 0);
    assert!(mock.wait_until_exhausted(Duration::from_millis(1)));
  }

  #[test]
  fn waiting_for_an_unfinished_script_times_out() {
    let mock = MockConnection::new(178, &[(LogDirection::Send, "17·1·")]);
    assert!(!mock.wait_until_exhausted(Duration::from_millis(20)));
  }

  #[test]
  fn mismatched_send_fails() {
    let router = Arc::new(ReplyRouter::new());
    let mut mock = MockConnection::new(178, &[(LogDirection::Send, "17·1·")]);
    mock.set_message_handler(MessageHandler::new(178, router));
    assert!(matches!(mock.send_message_body(b"6\x002\x001\x00DU1\x00"), Err(IBKRError::SendFailed(_))));
    assert_eq!(mock.remaining(), 1);
  }

  #[test]
  fn send_before_handler_is_not_connected() {
    let mut mock = MockConnection::new(178, &[(LogDirection::Send, "17·1·")]);
    assert_eq!(mock.send_message_body(b"17\x001\x00"), Err(IBKRError::NotConnected));
  }
}
