// tws_accounts/src/manager.rs

//! Event-loop scaffold shared by reply-driven managers.
//!
//! A `ManagerLoop` owns one named thread. The thread runs the hooks'
//! `pre_loop`, then hands every reply to `receive` strictly in arrival order,
//! and finally runs `pre_destroy` once when the loop is closed. A failed hook
//! stops reply processing; the error is kept for callers and the thread
//! waits for `close` before tearing down.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::base::IBKRError;
use crate::dispatcher::UpdateStatus;
use crate::reply::Reply;

pub trait ManagerHooks: Send + 'static {
  /// Runs on the loop thread before the first reply is read.
  fn pre_loop(&mut self) -> Result<(), IBKRError>;

  fn receive(&mut self, reply: Reply) -> Result<UpdateStatus, IBKRError>;

  /// Runs exactly once, after `close`. Must not fail.
  fn pre_destroy(&mut self);
}

#[derive(Debug, Default)]
struct LoopState {
  ready: bool,
  fatal: Option<IBKRError>,
  finished: bool,
}

#[derive(Default)]
struct Shared {
  state: Mutex<LoopState>,
  cond: Condvar,
}

impl Shared {
  fn mark_ready(&self, name: &str) {
    let mut state = self.state.lock();
    if !state.ready {
      state.ready = true;
      info!("{}: ready", name);
      self.cond.notify_all();
    }
  }

  fn fail(&self, error: IBKRError) {
    let mut state = self.state.lock();
    if state.fatal.is_none() {
      state.fatal = Some(error);
    }
    self.cond.notify_all();
  }

  fn finish(&self) {
    let mut state = self.state.lock();
    state.finished = true;
    self.cond.notify_all();
  }
}

pub struct ManagerLoop {
  name: String,
  shared: Arc<Shared>,
  shutdown: Mutex<Option<Sender<()>>>,
  thread: Mutex<Option<JoinHandle<()>>>,
  updates: Receiver<()>,
}

impl ManagerLoop {
  pub fn start<H: ManagerHooks>(name: &str, mut hooks: H, replies: Receiver<Reply>) -> Result<Self, IBKRError> {
    let shared = Arc::new(Shared::default());
    // Dropping the sender is the shutdown signal.
    let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
    let (updates_tx, updates_rx) = bounded::<()>(1);

    let thread_shared = shared.clone();
    let thread_name = name.to_string();
    let handle = thread::Builder::new()
      .name(name.to_string())
      .spawn(move || {
        info!("{}: event loop started", thread_name);
        let failure = match hooks.pre_loop() {
          Ok(()) => run_loop(&thread_name, &mut hooks, &replies, &shutdown_rx, &thread_shared, &updates_tx),
          Err(e) => Some(e),
        };
        if let Some(e) = failure {
          error!("{}: event loop stopped: {}", thread_name, e);
          thread_shared.fail(e);
          let _ = shutdown_rx.recv();
        }
        debug!("{}: running teardown", thread_name);
        hooks.pre_destroy();
        thread_shared.finish();
        info!("{}: event loop finished", thread_name);
      })
      .map_err(|e| IBKRError::InternalError(format!("Spawning {} thread: {}", name, e)))?;

    Ok(ManagerLoop {
      name: name.to_string(),
      shared,
      shutdown: Mutex::new(Some(shutdown_tx)),
      thread: Mutex::new(Some(handle)),
      updates: updates_rx,
    })
  }

  /// Blocks until the first complete pass, a fatal error, or `timeout`.
  pub fn wait_ready(&self, timeout: Duration) -> Result<(), IBKRError> {
    let deadline = Instant::now() + timeout;
    let mut state = self.shared.state.lock();
    loop {
      if state.ready {
        return Ok(());
      }
      if let Some(e) = &state.fatal {
        return Err(e.clone());
      }
      if state.finished {
        return Err(IBKRError::NotConnected);
      }
      if self.shared.cond.wait_until(&mut state, deadline).timed_out() {
        return Err(IBKRError::Timeout(format!("{} not ready after {:?}", self.name, timeout)));
      }
    }
  }

  pub fn is_ready(&self) -> bool {
    self.shared.state.lock().ready
  }

  pub fn fatal_error(&self) -> Option<IBKRError> {
    self.shared.state.lock().fatal.clone()
  }

  /// Receives a (coalesced) notification on readiness and after every
  /// processed reply once ready. Replies after readiness are only those TWS
  /// sends unprompted, so past the first notification this is usually quiet.
  pub fn updates(&self) -> Receiver<()> {
    self.updates.clone()
  }

  pub fn is_running(&self) -> bool {
    let state = self.shared.state.lock();
    !state.finished && state.fatal.is_none()
  }

  /// Stops the loop and waits for teardown. Idempotent.
  pub fn close(&self) {
    if self.shutdown.lock().take().is_none() {
      return;
    }
    if let Some(handle) = self.thread.lock().take() {
      if handle.thread().id() == thread::current().id() {
        warn!("{}: close called from its own thread; not joining", self.name);
        return;
      }
      if handle.join().is_err() {
        error!("{}: event loop thread panicked", self.name);
      }
    }
  }
}

impl Drop for ManagerLoop {
  fn drop(&mut self) {
    self.close();
  }
}

/// Returns the error that stopped the loop, or `None` on shutdown.
fn run_loop<H: ManagerHooks>(
  name: &str,
  hooks: &mut H,
  replies: &Receiver<Reply>,
  shutdown: &Receiver<()>,
  shared: &Shared,
  updates: &Sender<()>,
) -> Option<IBKRError> {
  loop {
    select! {
      recv(shutdown) -> _ => {
        debug!("{}: shutdown requested", name);
        return None;
      }
      recv(replies) -> msg => {
        let reply = match msg {
          Ok(reply) => reply,
          Err(_) => return Some(IBKRError::ConnectionFailed("reply channel closed".to_string())),
        };
        match hooks.receive(reply) {
          Ok(UpdateStatus::Ready) => {
            shared.mark_ready(name);
            let _ = updates.try_send(());
          }
          Ok(UpdateStatus::Continue) => {
            if shared.state.lock().ready {
              let _ = updates.try_send(());
            }
          }
          Err(e) => return Some(e),
        }
      }
    }
  }
}
