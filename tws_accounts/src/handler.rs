// tws_accounts/src/handler.rs
// Routes decoded replies to the channels subscribed for them.
use crossbeam_channel::Sender;
use log::{debug, error, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::message_parser::process_message;
use crate::reply::Reply;

/// Subscription id for replies that carry no request id of their own
/// (account updates, managed accounts, connection-level errors).
pub const UNMATCHED_REPLY_ID: i64 = i64::MIN;

/// Handle for one subscribed channel, returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Multiplexes replies onto subscriber channels by id.
#[derive(Default)]
pub struct ReplyRouter {
  subscribers: RwLock<HashMap<i64, Vec<(SubscriptionToken, Sender<Reply>)>>>,
  next_token: AtomicU64,
}

impl ReplyRouter {
  pub fn new() -> Self {
    Self::default()
  }

  /// The router owns `channel` from here on; once it drops the sender the
  /// receiver observes disconnection.
  pub fn subscribe(&self, id: i64, channel: Sender<Reply>) -> SubscriptionToken {
    let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
    debug!("Router: subscribe id={} token={:?}", id, token);
    self.subscribers.write().entry(id).or_default().push((token, channel));
    token
  }

  /// Removes one channel; other channels under the same id stay.
  pub fn unsubscribe(&self, id: i64, token: SubscriptionToken) {
    let mut subs = self.subscribers.write();
    if let Some(list) = subs.get_mut(&id) {
      list.retain(|(t, _)| *t != token);
      if list.is_empty() {
        subs.remove(&id);
      }
      debug!("Router: unsubscribe id={} token={:?}", id, token);
    }
  }

  pub fn subscriber_count(&self, id: i64) -> usize {
    self.subscribers.read().get(&id).map_or(0, Vec::len)
  }

  /// Delivers a reply to every channel under its id. Returns how many
  /// channels received it.
  pub fn route(&self, reply: Reply) -> usize {
    let id = reply.request_id().unwrap_or(UNMATCHED_REPLY_ID);
    let mut subs = self.subscribers.write();
    let Some(list) = subs.get_mut(&id) else {
      debug!("Router: no subscriber for {} (id={}), dropping", reply.kind(), id);
      return 0;
    };
    // Receivers that went away are pruned here.
    list.retain(|(_, s)| s.send(reply.clone()).is_ok());
    let delivered = list.len();
    if list.is_empty() {
      subs.remove(&id);
    }
    delivered
  }

  /// Drops every sender so subscribed receivers observe disconnection.
  pub fn close(&self) {
    let mut subs = self.subscribers.write();
    if !subs.is_empty() {
      warn!("Router: closing {} subscription ids", subs.len());
    }
    subs.clear();
  }
}

/// Decodes framed message bodies and hands them to the router. Owned by
/// the connection's reader.
pub struct MessageHandler {
  server_version: i32,
  router: Arc<ReplyRouter>,
}

impl MessageHandler {
  pub fn new(server_version: i32, router: Arc<ReplyRouter>) -> Self {
    MessageHandler { server_version, router }
  }

  pub fn process(&mut self, body: &[u8]) {
    match process_message(body) {
      Ok(reply) => {
        self.router.route(reply);
      }
      Err(e) => error!("Error processing message: {:?}", e),
    }
  }

  pub fn connection_closed(&mut self) {
    warn!("Connection closed; releasing subscribers");
    self.router.close();
  }

  pub fn get_server_version(&self) -> i32 { self.server_version }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::reply::ErrorMessage;
  use crossbeam_channel::{unbounded, TryRecvError};

  fn error(id: i32) -> Reply {
    Reply::Error(ErrorMessage { id, code: 200, message: "x".to_string(), advanced_order_reject_json: None })
  }

  #[test]
  fn unaddressed_replies_go_to_unmatched_subscribers() {
    let router = ReplyRouter::new();
    let (tx, rx) = unbounded();
    router.subscribe(UNMATCHED_REPLY_ID, tx);
    assert_eq!(router.route(Reply::NextValidId { order_id: 1 }), 1);
    assert_eq!(router.route(error(-1)), 1);
    assert_eq!(rx.try_recv().unwrap(), Reply::NextValidId { order_id: 1 });
    assert_eq!(rx.try_recv().unwrap(), error(-1));
  }

  #[test]
  fn addressed_errors_skip_unmatched_subscribers() {
    let router = ReplyRouter::new();
    let (tx, rx) = unbounded();
    let (tx7, rx7) = unbounded();
    router.subscribe(UNMATCHED_REPLY_ID, tx);
    router.subscribe(7, tx7);
    router.route(error(7));
    assert_eq!(rx7.try_recv().unwrap(), error(7));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
  }

  #[test]
  fn unsubscribe_removes_only_that_channel() {
    let router = ReplyRouter::new();
    let (a, ra) = unbounded();
    let (b, rb) = unbounded();
    let token = router.subscribe(UNMATCHED_REPLY_ID, a);
    router.subscribe(UNMATCHED_REPLY_ID, b);
    router.unsubscribe(UNMATCHED_REPLY_ID, token);
    assert_eq!(router.subscriber_count(UNMATCHED_REPLY_ID), 1);
    router.route(Reply::NextValidId { order_id: 2 });
    assert!(ra.try_recv().is_err());
    assert_eq!(rb.try_recv().unwrap(), Reply::NextValidId { order_id: 2 });
  }

  #[test]
  fn close_disconnects_receivers_it_owns() {
    let router = ReplyRouter::new();
    let (tx, rx) = unbounded::<Reply>();
    let token = router.subscribe(UNMATCHED_REPLY_ID, tx);
    router.close();
    assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    // Unsubscribing after close is a no-op.
    router.unsubscribe(UNMATCHED_REPLY_ID, token);
  }

  #[test]
  fn dead_receivers_are_pruned() {
    let router = ReplyRouter::new();
    let (tx, rx) = unbounded();
    router.subscribe(UNMATCHED_REPLY_ID, tx);
    drop(rx);
    assert_eq!(router.route(Reply::NextValidId { order_id: 3 }), 0);
    assert_eq!(router.subscriber_count(UNMATCHED_REPLY_ID), 0);
  }

  #[test]
  fn connection_close_disconnects_receivers() {
    let router = Arc::new(ReplyRouter::new());
    let (tx, rx) = unbounded();
    router.subscribe(UNMATCHED_REPLY_ID, tx);
    let mut handler = MessageHandler::new(178, router.clone());
    handler.process(b"9\x001\x005\x00");
    handler.connection_closed();
    assert_eq!(rx.recv().unwrap(), Reply::NextValidId { order_id: 5 });
    assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
  }
}
