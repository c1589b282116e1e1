// tws_accounts/src/sequencer.rs

//! Serialises account-updates subscriptions.
//!
//! TWS streams updates for one account at a time per connection. The
//! sequencer holds the accounts still to visit and the one currently
//! subscribed, and moves to the next account only after the previous one
//! has been unsubscribed.

use log::{debug, info, warn};
use std::collections::VecDeque;

use crate::base::IBKRError;
use crate::conn::Engine;
use crate::reply::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerPhase {
  /// No account list has been loaded yet.
  AwaitingAccountList,
  /// A subscription is outstanding or streaming.
  Active,
  /// The previous account's unsubscribe was sent (or failed) and the next
  /// account has not been subscribed yet.
  Draining,
  /// Every listed account has been visited.
  Complete,
  Terminated,
}

/// Outcome of a successful `advance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
  Subscribed(String),
  Finished,
}

#[derive(Debug)]
pub struct AccountSequencer {
  pending: VecDeque<String>,
  active: Option<String>,
  phase: SequencerPhase,
}

impl Default for AccountSequencer {
  fn default() -> Self {
    Self::new()
  }
}

impl AccountSequencer {
  pub fn new() -> Self {
    AccountSequencer {
      pending: VecDeque::new(),
      active: None,
      phase: SequencerPhase::AwaitingAccountList,
    }
  }

  /// Queues account codes in the order given. Codes are not deduplicated.
  pub fn load<I: IntoIterator<Item = String>>(&mut self, accounts: I) {
    self.pending.extend(accounts);
    debug!("Sequencer: {} account(s) pending", self.pending.len());
  }

  /// Unsubscribes the active account, if any, then subscribes the next one.
  ///
  /// Any send failure is returned as is and the caller must stop advancing.
  /// A failed unsubscribe leaves that account recorded as active.
  pub fn advance(&mut self, engine: &dyn Engine) -> Result<Advance, IBKRError> {
    if let Some(current) = self.active.as_deref() {
      self.phase = SequencerPhase::Draining;
      engine.send(&Request::unsubscribe(current))?;
      debug!("Sequencer: unsubscribed {}", current);
    }

    let Some(next) = self.pending.pop_front() else {
      self.active = None;
      self.phase = SequencerPhase::Complete;
      info!("Sequencer: all accounts visited");
      return Ok(Advance::Finished);
    };

    self.active = Some(next.clone());
    engine.send(&Request::subscribe(&next))?;
    self.phase = SequencerPhase::Active;
    info!("Sequencer: subscribed {} ({} left)", next, self.pending.len());
    Ok(Advance::Subscribed(next))
  }

  /// Final best-effort unsubscribe on teardown. Errors are logged, not returned.
  pub fn terminate(&mut self, engine: &dyn Engine) {
    if let Some(current) = self.active.take() {
      if let Err(e) = engine.send(&Request::unsubscribe(&current)) {
        warn!("Sequencer: teardown unsubscribe of {} failed: {}", current, e);
      }
    }
    self.pending.clear();
    self.phase = SequencerPhase::Terminated;
  }

  pub fn active(&self) -> Option<&str> {
    self.active.as_deref()
  }

  pub fn pending(&self) -> usize {
    self.pending.len()
  }

  pub fn phase(&self) -> SequencerPhase {
    self.phase
  }
}
