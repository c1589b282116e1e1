// tws_accounts/src/client.rs

use log::info;
use std::sync::Arc;

use crate::account_manager::{ManagerConfig, PrimaryAccountManager};
use crate::base::IBKRError;
use crate::conn::{Connection, Engine, MessageBroker, SocketConnection};
use crate::conn_mock::MockConnection;

/// Owns the connection to TWS and hands out account managers bound to it.
pub struct AccountClient {
  client_id: i32,
  broker: Arc<MessageBroker>,
}

impl AccountClient {
  /// Connects to TWS or IB Gateway and starts delivering replies.
  pub fn connect(host: &str, port: u16, client_id: i32) -> Result<Self, IBKRError> {
    let conn = SocketConnection::new(host, port, client_id)?;
    info!("Connected to {}:{} as client {} (server version {}, time {})",
          host, port, client_id, conn.get_server_version(), conn.connection_time());
    Ok(Self::with_connection(client_id, Box::new(conn)))
  }

  /// Create a new client over a scripted conversation.
  pub fn from_mock(conn: MockConnection) -> Self {
    Self::with_connection(0, Box::new(conn))
  }

  fn with_connection(client_id: i32, conn: Box<dyn Connection + Send>) -> Self {
    let broker = Arc::new(MessageBroker::new(conn));
    broker.install_handler();
    AccountClient { client_id, broker }
  }

  pub fn client_id(&self) -> i32 { self.client_id }

  pub fn server_version(&self) -> i32 {
    self.broker.get_server_version()
  }

  pub fn is_connected(&self) -> bool {
    self.broker.is_connected()
  }

  pub fn engine(&self) -> Arc<dyn Engine> {
    self.broker.clone()
  }

  /// Starts an account manager on this connection. Only one should run per
  /// connection, since TWS streams a single account at a time.
  pub fn primary_account_manager(&self, config: ManagerConfig) -> Result<PrimaryAccountManager, IBKRError> {
    PrimaryAccountManager::new(self.engine(), config)
  }

  /// Closes the connection. Running managers see their reply channel close.
  pub fn disconnect(&self) -> Result<(), IBKRError> {
    self.broker.disconnect()
  }
}
