// tws_accounts/src/account_manager.rs

//! Tracks values and portfolio for every account reachable from the login.
//!
//! TWS only streams account updates for one account at a time, so the
//! `PrimaryAccountManager` asks for the managed-accounts list and walks it:
//! subscribe, wait for the download-end marker, unsubscribe, move on. Every
//! value and portfolio line seen along the way is kept in a snapshot store
//! that any thread can read.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tws_accounts::{AccountClient, ManagerConfig, IBKRError};
//!
//! fn main() -> Result<(), IBKRError> {
//!     let client = AccountClient::connect("127.0.0.1", 4002, 101)?;
//!     let manager = client.primary_account_manager(ManagerConfig::default())?;
//!     manager.wait_ready(Duration::from_secs(30))?;
//!     for (key, value) in manager.values() {
//!         println!("{} = {}", key, value.value);
//!     }
//!     Ok(())
//! }
//! ```

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::account::{AccountValue, AccountValueKey, PortfolioValue, PortfolioValueKey};
use crate::base::IBKRError;
use crate::conn::Engine;
use crate::dispatcher::{dispatch, DispatchTarget, UpdateStatus};
use crate::handler::{SubscriptionToken, UNMATCHED_REPLY_ID};
use crate::manager::{ManagerHooks, ManagerLoop};
use crate::reply::{Reply, Request};
use crate::sequencer::AccountSequencer;
use crate::snapshot::{AccountSnapshot, SnapshotStore};

/// TWS rejects the managed-accounts request with 321 on a non-FA login.
pub const NON_FA_REJECT_CODE: i32 = 321;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
  /// Id the manager's reply channel is subscribed under.
  pub reply_id: i64,
  /// Error codes treated as warnings in addition to the 21xx band.
  pub tolerated_error_codes: Vec<i32>,
  /// Name of the event thread.
  pub name: String,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    ManagerConfig {
      reply_id: UNMATCHED_REPLY_ID,
      tolerated_error_codes: vec![NON_FA_REJECT_CODE],
      name: "primary-account-manager".to_string(),
    }
  }
}

/// Hooks run on the event thread. Sole writer of the store.
struct AccountTracker {
  engine: Arc<dyn Engine>,
  reply_id: i64,
  /// Handed to the engine in `pre_loop`; the tracker must not keep a sender
  /// or the reply channel could never disconnect.
  reply_tx: Option<Sender<Reply>>,
  subscription: Option<SubscriptionToken>,
  sequencer: AccountSequencer,
  store: Arc<RwLock<SnapshotStore>>,
  tolerated_error_codes: Vec<i32>,
}

impl ManagerHooks for AccountTracker {
  fn pre_loop(&mut self) -> Result<(), IBKRError> {
    if let Some(channel) = self.reply_tx.take() {
      self.subscription = Some(self.engine.subscribe(self.reply_id, channel));
    }
    self.engine.send(&Request::RequestManagedAccounts)
  }

  fn receive(&mut self, reply: Reply) -> Result<UpdateStatus, IBKRError> {
    debug!("Dispatching {}", reply.kind());
    let mut target = DispatchTarget {
      sequencer: &mut self.sequencer,
      store: &self.store,
      engine: self.engine.as_ref(),
      tolerated_error_codes: &self.tolerated_error_codes,
    };
    dispatch(reply, &mut target)
  }

  fn pre_destroy(&mut self) {
    if let Some(token) = self.subscription.take() {
      self.engine.unsubscribe(self.reply_id, token);
    }
    self.sequencer.terminate(self.engine.as_ref());
  }
}

/// Account values and portfolio for the primary account and, on an FA
/// login, every sub-account.
pub struct PrimaryAccountManager {
  store: Arc<RwLock<SnapshotStore>>,
  event_loop: ManagerLoop,
}

impl PrimaryAccountManager {
  /// Starts the event thread. Account discovery begins immediately.
  pub fn new(engine: Arc<dyn Engine>, config: ManagerConfig) -> Result<Self, IBKRError> {
    let (reply_tx, reply_rx) = unbounded();
    let store = Arc::new(RwLock::new(SnapshotStore::new()));
    let tracker = AccountTracker {
      engine,
      reply_id: config.reply_id,
      reply_tx: Some(reply_tx),
      subscription: None,
      sequencer: AccountSequencer::new(),
      store: store.clone(),
      tolerated_error_codes: config.tolerated_error_codes,
    };
    info!("Starting {}", config.name);
    let event_loop = ManagerLoop::start(&config.name, tracker, reply_rx)?;
    Ok(PrimaryAccountManager { store, event_loop })
  }

  /// Point-in-time copy of every account value.
  pub fn values(&self) -> HashMap<AccountValueKey, AccountValue> {
    self.store.read().values()
  }

  /// Point-in-time copy of every portfolio line.
  pub fn portfolio(&self) -> HashMap<PortfolioValueKey, PortfolioValue> {
    self.store.read().portfolio()
  }

  /// Values and portfolio copied under one lock, so they agree with each other.
  pub fn snapshot(&self) -> AccountSnapshot {
    self.store.read().snapshot()
  }

  pub fn accounts(&self) -> Vec<String> {
    self.snapshot().accounts()
  }

  pub fn wait_ready(&self, timeout: Duration) -> Result<(), IBKRError> {
    self.event_loop.wait_ready(timeout)
  }

  pub fn is_ready(&self) -> bool {
    self.event_loop.is_ready()
  }

  pub fn fatal_error(&self) -> Option<IBKRError> {
    self.event_loop.fatal_error()
  }

  /// Fires once the first pass completes. Every account has been
  /// unsubscribed by then, so later notifications only follow unprompted
  /// replies such as TWS notices.
  pub fn updates(&self) -> Receiver<()> {
    self.event_loop.updates()
  }

  pub fn is_running(&self) -> bool {
    self.event_loop.is_running()
  }

  /// Stops the event thread, unsubscribing whatever account is still active.
  /// The last snapshot stays readable.
  pub fn close(&self) {
    if self.event_loop.is_running() && !self.event_loop.is_ready() {
      warn!("Closing account manager before the first complete snapshot");
    }
    self.event_loop.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handler::ReplyRouter;
  use crate::reply::ErrorMessage;
  use crossbeam_channel::RecvTimeoutError;
  use parking_lot::Mutex;
  use std::thread;

  const WAIT: Duration = Duration::from_secs(5);

  /// Routes through a real router, records requests, and gives the test a
  /// second sender for the subscribed reply channel.
  struct RecordingEngine {
    router: ReplyRouter,
    sent: Mutex<Vec<Request>>,
    sent_tx: Sender<Request>,
    channel_out: Sender<Sender<Reply>>,
    fail_on: Mutex<Option<Request>>,
  }

  impl RecordingEngine {
    fn sent(&self) -> Vec<Request> {
      self.sent.lock().clone()
    }
  }

  impl Engine for RecordingEngine {
    fn subscribe(&self, id: i64, channel: Sender<Reply>) -> SubscriptionToken {
      let _ = self.channel_out.send(channel.clone());
      self.router.subscribe(id, channel)
    }

    fn unsubscribe(&self, id: i64, token: SubscriptionToken) {
      self.router.unsubscribe(id, token);
    }

    fn send(&self, request: &Request) -> Result<(), IBKRError> {
      if self.fail_on.lock().as_ref() == Some(request) {
        return Err(IBKRError::SocketError("broken pipe".to_string()));
      }
      self.sent.lock().push(request.clone());
      let _ = self.sent_tx.send(request.clone());
      Ok(())
    }
  }

  struct Harness {
    manager: PrimaryAccountManager,
    engine: Arc<RecordingEngine>,
    replies: Sender<Reply>,
    requests: Receiver<Request>,
  }

  fn start() -> Harness {
    let (channel_out, channels) = unbounded();
    let (sent_tx, requests) = unbounded();
    let engine = Arc::new(RecordingEngine {
      router: ReplyRouter::new(),
      sent: Mutex::new(Vec::new()),
      sent_tx,
      channel_out,
      fail_on: Mutex::new(None),
    });
    let manager = PrimaryAccountManager::new(engine.clone(), ManagerConfig::default()).unwrap();
    let replies = channels.recv_timeout(WAIT).unwrap();
    Harness { manager, engine, replies, requests }
  }

  fn net_liq(account: &str, v: &str) -> Reply {
    Reply::AccountValue(AccountValue { key: AccountValueKey::new(account, "NetLiquidation", "USD"), value: v.to_string() })
  }

  fn download_end(account: &str) -> Reply {
    Reply::AccountDownloadEnd { account: account.to_string() }
  }

  fn accounts(list: &[&str]) -> Reply {
    Reply::ManagedAccounts { accounts: list.iter().map(|s| s.to_string()).collect() }
  }

  #[test]
  fn walks_two_accounts_and_keeps_both() {
    let h = start();
    h.replies.send(accounts(&["A", "B"])).unwrap();
    h.replies.send(net_liq("A", "100")).unwrap();
    h.replies.send(download_end("A")).unwrap();
    h.replies.send(net_liq("B", "200")).unwrap();
    h.replies.send(download_end("B")).unwrap();

    h.manager.wait_ready(WAIT).unwrap();
    assert_eq!(h.engine.sent(), vec![
      Request::RequestManagedAccounts,
      Request::subscribe("A"),
      Request::unsubscribe("A"),
      Request::subscribe("B"),
      Request::unsubscribe("B"),
    ]);
    let values = h.manager.values();
    assert_eq!(values.len(), 2);
    assert_eq!(values[&AccountValueKey::new("A", "NetLiquidation", "USD")].value, "100");
    assert_eq!(values[&AccountValueKey::new("B", "NetLiquidation", "USD")].value, "200");
    assert_eq!(h.manager.accounts(), vec!["A", "B"]);

    // Nothing is left active, so teardown adds no request.
    h.manager.close();
    assert_eq!(h.engine.sent().len(), 5);
    assert_eq!(h.engine.router.subscriber_count(UNMATCHED_REPLY_ID), 0);
  }

  #[test]
  fn non_fa_login_relays_default_stream() {
    let h = start();
    h.replies.send(Reply::Error(ErrorMessage {
      id: -1,
      code: NON_FA_REJECT_CODE,
      message: "Error validating request".to_string(),
      advanced_order_reject_json: None,
    })).unwrap();
    h.replies.send(net_liq("U1", "50")).unwrap();
    h.replies.send(download_end("U1")).unwrap();
    h.manager.wait_ready(WAIT).unwrap();
    assert_eq!(h.engine.sent(), vec![Request::RequestManagedAccounts]);
    assert_eq!(h.manager.values().len(), 1);
    h.manager.close();
    assert_eq!(h.engine.sent(), vec![Request::RequestManagedAccounts]);
  }

  #[test]
  fn empty_account_list_fails_without_subscribing() {
    let h = start();
    h.replies.send(accounts(&[])).unwrap();
    assert!(matches!(h.manager.wait_ready(WAIT), Err(IBKRError::ConfigurationError(_))));
    h.manager.close();
    assert_eq!(h.engine.sent(), vec![Request::RequestManagedAccounts]);
  }

  #[test]
  fn failed_unsubscribe_keeps_collected_data() {
    let h = start();
    *h.engine.fail_on.lock() = Some(Request::unsubscribe("A"));
    h.replies.send(accounts(&["A", "B"])).unwrap();
    h.replies.send(net_liq("A", "100")).unwrap();
    h.replies.send(download_end("A")).unwrap();

    assert_eq!(h.manager.wait_ready(WAIT), Err(IBKRError::SocketError("broken pipe".to_string())));
    assert_eq!(h.manager.fatal_error(), Some(IBKRError::SocketError("broken pipe".to_string())));
    assert_eq!(h.manager.values().len(), 1);
    assert!(!h.engine.sent().contains(&Request::subscribe("B")));

    // Teardown retries the unsubscribe once and ignores the failure.
    h.manager.close();
    assert_eq!(h.manager.values().len(), 1);
  }

  #[test]
  fn close_mid_sequence_unsubscribes_active_account() {
    let h = start();
    assert_eq!(h.requests.recv_timeout(WAIT), Ok(Request::RequestManagedAccounts));
    h.replies.send(accounts(&["A", "B"])).unwrap();
    assert_eq!(h.requests.recv_timeout(WAIT), Ok(Request::subscribe("A")));

    h.manager.close();
    assert_eq!(h.requests.try_recv(), Ok(Request::unsubscribe("A")));
    assert_eq!(h.engine.sent(), vec![
      Request::RequestManagedAccounts,
      Request::subscribe("A"),
      Request::unsubscribe("A"),
    ]);
    assert!(!h.manager.is_ready());
  }

  #[test]
  fn closed_router_stops_the_manager() {
    let h = start();
    assert_eq!(h.requests.recv_timeout(WAIT), Ok(Request::RequestManagedAccounts));
    // Once the test's sender is gone the router holds the only one.
    drop(h.replies);
    h.engine.router.close();
    assert!(matches!(h.manager.wait_ready(WAIT), Err(IBKRError::ConnectionFailed(_))));
    assert!(!h.manager.is_running());
  }

  #[test]
  fn concurrent_readers_never_see_partial_updates() {
    let h = start();
    let manager = Arc::new(h.manager);
    h.replies.send(accounts(&["A"])).unwrap();

    let readers: Vec<_> = (0..4).map(|_| {
      let manager = manager.clone();
      thread::spawn(move || {
        let mut last = 0u32;
        for _ in 0..500 {
          let snap = manager.snapshot();
          if let Some(v) = snap.values.get(&AccountValueKey::new("A", "NetLiquidation", "USD")) {
            let n: u32 = v.value.parse().unwrap();
            assert!(n >= last, "value went backwards: {} after {}", n, last);
            last = n;
          }
          // Values and portfolio always move together.
          if let Some(p) = snap.portfolio.get(&PortfolioValueKey::new("A", 1)) {
            let v = &snap.values[&AccountValueKey::new("A", "NetLiquidation", "USD")];
            assert!(v.value.parse::<f64>().unwrap() >= p.position);
          }
        }
      })
    }).collect();

    for i in 1..=200u32 {
      h.replies.send(net_liq("A", &i.to_string())).unwrap();
      h.replies.send(Reply::PortfolioValue(PortfolioValue {
        key: PortfolioValueKey::new("A", 1),
        contract: crate::contract::Contract::stock(1, "XYZ"),
        position: i as f64,
        market_price: 1.0,
        market_value: i as f64,
        average_cost: 1.0,
        unrealized_pnl: 0.0,
        realized_pnl: 0.0,
      })).unwrap();
    }
    h.replies.send(download_end("A")).unwrap();
    manager.wait_ready(WAIT).unwrap();
    for r in readers {
      r.join().unwrap();
    }
    assert_eq!(manager.values()[&AccountValueKey::new("A", "NetLiquidation", "USD")].value, "200");
  }

  #[test]
  fn updates_notify_on_readiness() {
    let h = start();
    let updates = h.manager.updates();
    assert_eq!(updates.recv_timeout(Duration::from_millis(20)), Err(RecvTimeoutError::Timeout));
    h.replies.send(accounts(&["A"])).unwrap();
    h.replies.send(download_end("A")).unwrap();
    assert!(updates.recv_timeout(WAIT).is_ok());
    assert!(h.manager.is_ready());

    // Nothing is subscribed any more, so the channel stays quiet until TWS
    // sends something unprompted.
    assert_eq!(updates.recv_timeout(Duration::from_millis(20)), Err(RecvTimeoutError::Timeout));
    h.replies.send(Reply::Error(ErrorMessage {
      id: -1,
      code: 2104,
      message: "Market data farm connection is OK".to_string(),
      advanced_order_reject_json: None,
    })).unwrap();
    assert!(updates.recv_timeout(WAIT).is_ok());
    assert_eq!(h.engine.sent(), vec![
      Request::RequestManagedAccounts,
      Request::subscribe("A"),
      Request::unsubscribe("A"),
    ]);
  }
}
