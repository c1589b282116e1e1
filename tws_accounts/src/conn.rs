// tws_accounts/src/conn.rs

use crossbeam_channel::Sender;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::base::IBKRError;
use crate::handler::{MessageHandler, ReplyRouter, SubscriptionToken};
use crate::protocol_encoder::{identify_outgoing_type, Encoder};
use crate::reply::{Reply, Request};
pub use socket::SocketConnection;

/// What the account tracker needs from the message engine: a way to receive
/// replies under an id and a way to send typed requests.
#[cfg_attr(test, mockall::automock)]
pub trait Engine: Send + Sync {
  /// Registers `channel` for replies addressed to `id`. The engine keeps the
  /// only sender, so dropping it on disconnect closes the channel.
  fn subscribe(&self, id: i64, channel: Sender<Reply>) -> SubscriptionToken;

  fn unsubscribe(&self, id: i64, token: SubscriptionToken);

  fn send(&self, request: &Request) -> Result<(), IBKRError>;
}

/// Trait defining the basic connection interface to TWS
pub trait Connection {
  fn is_connected(&self) -> bool;

  fn disconnect(&mut self) -> Result<(), IBKRError>;

  /// Send a message body; framing is added by the connection.
  fn send_message_body(&mut self, data: &[u8]) -> Result<(), IBKRError>;

  /// Set the handler for incoming messages. Starts delivery.
  fn set_message_handler(&mut self, handler: MessageHandler);

  fn get_server_version(&self) -> i32;
}

/// `Engine` over a live (or scripted) connection.
pub struct MessageBroker {
  connection: Mutex<Box<dyn Connection + Send>>,
  router: Arc<ReplyRouter>,
  encoder: Encoder,
}

impl MessageBroker {
  pub fn new(connection: Box<dyn Connection + Send>) -> Self {
    let server_version = connection.get_server_version();
    MessageBroker {
      connection: Mutex::new(connection),
      router: Arc::new(ReplyRouter::new()),
      encoder: Encoder::new(server_version),
    }
  }

  /// Connects the inbound side: decoded messages start flowing to the router.
  pub fn install_handler(&self) {
    let handler = MessageHandler::new(self.encoder.server_version(), self.router.clone());
    self.connection.lock().set_message_handler(handler);
  }

  pub fn router(&self) -> Arc<ReplyRouter> {
    self.router.clone()
  }

  pub fn get_server_version(&self) -> i32 {
    self.encoder.server_version()
  }

  pub fn is_connected(&self) -> bool {
    self.connection.lock().is_connected()
  }

  pub fn send_message(&self, body: &[u8]) -> Result<(), IBKRError> {
    debug!("Sending {} ({} bytes)", identify_outgoing_type(body).unwrap_or("UNKNOWN"), body.len());
    self.connection.lock().send_message_body(body)
  }

  pub fn disconnect(&self) -> Result<(), IBKRError> {
    info!("Broker disconnecting");
    let result = self.connection.lock().disconnect();
    self.router.close();
    result
  }
}

impl Engine for MessageBroker {
  fn subscribe(&self, id: i64, channel: Sender<Reply>) -> SubscriptionToken {
    self.router.subscribe(id, channel)
  }

  fn unsubscribe(&self, id: i64, token: SubscriptionToken) {
    self.router.unsubscribe(id, token);
  }

  fn send(&self, request: &Request) -> Result<(), IBKRError> {
    let body = self.encoder.encode(request)?;
    self.send_message(&body)
  }
}

mod socket {
  use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
  use log::{debug, error, info, warn};
  use std::io::{self, Cursor, ErrorKind, Read, Write};
  use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;
  use std::thread;
  use std::time::{Duration, Instant};

  use super::Connection;
  use crate::base::IBKRError;
  use crate::handler::MessageHandler;
  use crate::protocol_encoder::Encoder;

  const MIN_CLIENT_VERSION: i32 = 100;
  const MAX_CLIENT_VERSION: i32 = 178;
  const MAX_MSG_SIZE: usize = 10 * 1024 * 1024;
  const FRAME_STALL_LIMIT: Duration = Duration::from_secs(30);

  /// A TCP connection to TWS whose reader thread feeds a `MessageHandler`.
  pub struct SocketConnection {
    host: String,
    port: u16,
    client_id: i32,
    server_version: i32,
    connection_time: String,
    connected: bool,
    stream: Option<TcpStream>,
    reader_thread: Option<thread::JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
  }

  /// Fills `buf`. A read that has consumed nothing gives up with `TimedOut`
  /// after `idle`. Once part of a frame has arrived (or `frame_started` is
  /// set) the rest is awaited for up to `FRAME_STALL_LIMIT`, and a stall past
  /// that is `InvalidData`, never `TimedOut`.
  fn read_exact_timeout(stream: &mut TcpStream, buf: &mut [u8], idle: Duration, frame_started: bool) -> io::Result<()> {
    let start = Instant::now();
    let mut bytes_read = 0;
    while bytes_read < buf.len() {
      let in_frame = frame_started || bytes_read > 0;
      if !in_frame && start.elapsed() > idle {
        return Err(io::Error::new(ErrorKind::TimedOut, "read timed out"));
      }
      if in_frame && start.elapsed() > FRAME_STALL_LIMIT {
        return Err(io::Error::new(ErrorKind::InvalidData,
                                  format!("frame stalled after {} of {} bytes", bytes_read, buf.len())));
      }
      match stream.read(&mut buf[bytes_read..]) {
        Ok(0) => return Err(io::Error::new(ErrorKind::UnexpectedEof, "connection closed")),
        Ok(n) => bytes_read += n,
        Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
          if !in_frame {
            return Err(io::Error::new(ErrorKind::TimedOut, "read timed out"));
          }
        }
        Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
    Ok(())
  }

  enum FrameError {
    /// Nothing arrived within the poll interval.
    Idle,
    Closed(String),
    Invalid(IBKRError),
  }

  fn read_framed_message_body(stream: &mut TcpStream, timeout: Duration) -> Result<Vec<u8>, FrameError> {
    let mut size_buf = [0u8; 4];
    match read_exact_timeout(stream, &mut size_buf, timeout, false) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::TimedOut => return Err(FrameError::Idle),
      Err(e) => return Err(FrameError::Closed(format!("reading message size: {}", e))),
    }
    let size = Cursor::new(size_buf).read_u32::<BigEndian>()
      .map_err(|e| FrameError::Invalid(IBKRError::ParseError(format!("message size: {}", e))))? as usize;
    if size == 0 {
      return Ok(Vec::new());
    }
    if size > MAX_MSG_SIZE {
      return Err(FrameError::Invalid(IBKRError::InternalError(format!("Message size too large: {}", size))));
    }
    let mut msg_buf = vec![0u8; size];
    read_exact_timeout(stream, &mut msg_buf, timeout, true)
      .map_err(|e| FrameError::Closed(format!("reading message body ({} bytes): {}", size, e)))?;
    Ok(msg_buf)
  }

  fn write_framed_message(stream: &mut TcpStream, msg_body: &[u8]) -> Result<(), IBKRError> {
    let mut frame = Vec::with_capacity(4 + msg_body.len());
    frame.write_u32::<BigEndian>(msg_body.len() as u32)
      .map_err(|e| IBKRError::InternalError(format!("Failed to encode length: {}", e)))?;
    frame.extend_from_slice(msg_body);
    stream.write_all(&frame).map_err(|e| IBKRError::SocketError(e.to_string()))?;
    stream.flush().map_err(|e| IBKRError::SocketError(e.to_string()))
  }

  impl SocketConnection {
    /// Connects and performs the API handshake.
    pub fn new(host: &str, port: u16, client_id: i32) -> Result<Self, IBKRError> {
      let mut connection = Self {
        host: host.to_string(),
        port,
        client_id,
        server_version: 0,
        connection_time: String::new(),
        connected: false,
        stream: None,
        reader_thread: None,
        stop_flag: Arc::new(AtomicBool::new(false)),
      };
      connection.connect()?;
      Ok(connection)
    }

    pub fn connection_time(&self) -> &str {
      &self.connection_time
    }

    fn resolve(&self) -> Result<SocketAddr, IBKRError> {
      let addr = format!("{}:{}", self.host, self.port);
      addr.to_socket_addrs()
        .map_err(|e| IBKRError::ConfigurationError(format!("Invalid address {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| IBKRError::ConfigurationError(format!("No address for {}", addr)))
    }

    fn connect(&mut self) -> Result<(), IBKRError> {
      if self.connected {
        return Err(IBKRError::AlreadyConnected);
      }

      info!("Connecting to TWS at {}:{}", self.host, self.port);
      let timeout = Duration::from_secs(10);
      let mut stream = TcpStream::connect_timeout(&self.resolve()?, timeout)
        .map_err(|e| IBKRError::ConnectionFailed(format!("Connect failed: {}", e)))?;
      stream.set_write_timeout(Some(timeout))
        .map_err(|e| IBKRError::ConnectionFailed(format!("Failed to set write timeout: {}", e)))?;
      stream.set_read_timeout(Some(timeout))
        .map_err(|e| IBKRError::ConnectionFailed(format!("Failed to set read timeout: {}", e)))?;

      // H1: "API\0" followed by the framed supported version range
      let version_payload = format!("v{}..{}", MIN_CLIENT_VERSION, MAX_CLIENT_VERSION);
      let mut h1_message = Vec::with_capacity(8 + version_payload.len());
      h1_message.extend_from_slice(b"API\0");
      h1_message.write_u32::<BigEndian>(version_payload.len() as u32)
        .map_err(|e| IBKRError::InternalError(format!("Failed to encode length: {}", e)))?;
      h1_message.extend_from_slice(version_payload.as_bytes());
      stream.write_all(&h1_message)
        .and_then(|_| stream.flush())
        .map_err(|e| IBKRError::SocketError(format!("Sending H1: {}", e)))?;
      debug!("Sent Handshake H1 ({} bytes)", h1_message.len());

      // H2: ServerVersion\0ConnectionTime\0
      let h2_body = match read_framed_message_body(&mut stream, timeout) {
        Ok(body) => body,
        Err(FrameError::Idle) => return Err(IBKRError::Timeout("Waiting for server version".to_string())),
        Err(FrameError::Closed(msg)) => return Err(IBKRError::ConnectionFailed(msg)),
        Err(FrameError::Invalid(e)) => return Err(e),
      };
      let mut parts = h2_body.split(|&b| b == 0);
      let version_str = parts.next()
        .and_then(|p| std::str::from_utf8(p).ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IBKRError::ParseError(format!("Invalid H2 body: {:02X?}", h2_body)))?;
      self.server_version = version_str.parse::<i32>()
        .map_err(|e| IBKRError::ParseError(format!("Parsing server version '{}': {}", version_str, e)))?;
      self.connection_time = parts.next()
        .map(|p| String::from_utf8_lossy(p).to_string())
        .unwrap_or_default();
      info!("ServerVersion={}, ConnectionTime='{}'", self.server_version, self.connection_time);

      // H3: StartAPI
      let start_api = Encoder::new(self.server_version).encode_start_api(self.client_id, "")?;
      write_framed_message(&mut stream, &start_api)?;

      self.stream = Some(stream);
      self.connected = true;
      info!("Connected to TWS (Server Version: {})", self.server_version);
      Ok(())
    }

    fn start_reader_thread(&mut self, mut handler: MessageHandler) -> Result<(), IBKRError> {
      if self.reader_thread.is_some() {
        return Err(IBKRError::InternalError("Reader thread already running".to_string()));
      }
      let stream = self.stream.as_ref().ok_or(IBKRError::NotConnected)?;
      let mut reader_stream = stream.try_clone()
        .map_err(|e| IBKRError::SocketError(format!("Cloning stream for reader: {}", e)))?;
      let poll = Duration::from_secs(2);
      reader_stream.set_read_timeout(Some(poll))
        .map_err(|e| IBKRError::SocketError(format!("Setting reader timeout: {}", e)))?;

      self.stop_flag.store(false, Ordering::SeqCst);
      let stop_flag = self.stop_flag.clone();

      let handle = thread::Builder::new()
        .name("tws-reader".to_string())
        .spawn(move || {
          debug!("Message reader thread started");
          while !stop_flag.load(Ordering::SeqCst) {
            match read_framed_message_body(&mut reader_stream, poll) {
              Ok(body) if body.is_empty() => continue,
              Ok(body) => handler.process(&body),
              Err(FrameError::Idle) => continue,
              Err(FrameError::Closed(msg)) => {
                if !stop_flag.load(Ordering::SeqCst) {
                  error!("Connection lost in reader thread: {}", msg);
                }
                break;
              }
              Err(FrameError::Invalid(e)) => {
                error!("Unreadable frame, dropping connection: {:?}", e);
                break;
              }
            }
          }
          stop_flag.store(true, Ordering::SeqCst);
          handler.connection_closed();
          debug!("Message reader thread ended");
        })
        .map_err(|e| IBKRError::InternalError(format!("Spawning reader thread: {}", e)))?;

      self.reader_thread = Some(handle);
      Ok(())
    }
  }

  impl Connection for SocketConnection {
    fn is_connected(&self) -> bool {
      self.connected && !self.stop_flag.load(Ordering::SeqCst)
    }

    fn disconnect(&mut self) -> Result<(), IBKRError> {
      if !self.connected && self.reader_thread.is_none() {
        return Ok(());
      }
      info!("Disconnecting from TWS");
      self.stop_flag.store(true, Ordering::SeqCst);

      // Shutdown unblocks the reader.
      if let Some(stream) = &self.stream {
        if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
          if e.kind() != ErrorKind::NotConnected {
            warn!("Error shutting down socket: {}", e);
          }
        }
      }
      if let Some(handle) = self.reader_thread.take() {
        if handle.join().is_err() {
          error!("Reader thread panicked");
        }
      }
      self.stream = None;
      self.connected = false;
      info!("Disconnected from TWS");
      Ok(())
    }

    fn send_message_body(&mut self, data: &[u8]) -> Result<(), IBKRError> {
      if !self.is_connected() {
        return Err(IBKRError::NotConnected);
      }
      let stream = self.stream.as_mut().ok_or(IBKRError::NotConnected)?;
      write_framed_message(stream, data)
    }

    fn set_message_handler(&mut self, handler: MessageHandler) {
      if !self.connected {
        warn!("Message handler set on a closed connection; ignoring");
        return;
      }
      if let Err(e) = self.start_reader_thread(handler) {
        error!("Failed to start reader thread: {:?}", e);
        let _ = self.disconnect();
      }
    }

    fn get_server_version(&self) -> i32 { self.server_version }
  }

  impl Drop for SocketConnection {
    fn drop(&mut self) {
      let _ = self.disconnect();
    }
  }

}
