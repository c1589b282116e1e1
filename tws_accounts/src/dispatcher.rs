// tws_accounts/src/dispatcher.rs

//! Decides what each reply means for the account tracker.

use log::{debug, error, info};
use parking_lot::RwLock;

use crate::base::IBKRError;
use crate::conn::Engine;
use crate::reply::Reply;
use crate::sequencer::{AccountSequencer, Advance};
use crate::snapshot::SnapshotStore;

/// Loop signal returned for a reply that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
  Continue,
  /// The last listed account finished downloading; the snapshot is complete.
  Ready,
}

/// Everything a reply may touch.
pub struct DispatchTarget<'a> {
  pub sequencer: &'a mut AccountSequencer,
  pub store: &'a RwLock<SnapshotStore>,
  pub engine: &'a dyn Engine,
  pub tolerated_error_codes: &'a [i32],
}

pub fn dispatch(reply: Reply, target: &mut DispatchTarget<'_>) -> Result<UpdateStatus, IBKRError> {
  match reply {
    Reply::Error(e) if e.is_warning(target.tolerated_error_codes) => {
      info!("TWS notice {} (id {}): {}", e.code, e.id, e.message);
      Ok(UpdateStatus::Continue)
    }
    Reply::Error(e) => {
      error!("TWS error {} (id {}): {}", e.code, e.id, e.message);
      Err(IBKRError::ApiError(e.code, e.message))
    }
    Reply::AccountDownloadEnd { account } => {
      debug!("Download finished for {}", account);
      match target.sequencer.advance(target.engine)? {
        Advance::Finished => Ok(UpdateStatus::Ready),
        Advance::Subscribed(_) => Ok(UpdateStatus::Continue),
      }
    }
    Reply::NextValidId { .. } | Reply::AccountUpdateTime { .. } => Ok(UpdateStatus::Continue),
    Reply::AccountValue(value) => {
      target.store.write().upsert_value(value);
      Ok(UpdateStatus::Continue)
    }
    Reply::PortfolioValue(line) => {
      target.store.write().upsert_portfolio(line);
      Ok(UpdateStatus::Continue)
    }
    Reply::ManagedAccounts { accounts } => {
      if accounts.is_empty() {
        return Err(IBKRError::ConfigurationError("account manager found no accounts".to_string()));
      }
      info!("Managed accounts: {}", accounts.join(","));
      target.sequencer.load(accounts);
      target.sequencer.advance(target.engine)?;
      Ok(UpdateStatus::Continue)
    }
    Reply::Unhandled { msg_type } => {
      Err(IBKRError::UnexpectedReply(format!("message type {}", msg_type)))
    }
  }
}
