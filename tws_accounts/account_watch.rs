// tws_accounts/account_watch.rs
use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use std::time::Duration;
use tws_accounts::conn_mock::MockConnection;
use tws_accounts::{AccountClient, AccountSnapshot, ManagerConfig};

/// Prints account values and positions for every account behind a TWS login
#[derive(Parser, Debug)]
#[clap(author, version, about = "TWS account snapshot viewer")]
struct CliArgs {
  /// TWS / IB Gateway host
  #[clap(long, default_value = "127.0.0.1")]
  host: String,

  /// TWS / IB Gateway port
  #[clap(long, default_value = "4002")]
  port: u16,

  #[clap(long, default_value = "101")]
  client_id: i32,

  /// Seconds to wait for the first complete snapshot
  #[clap(long, default_value = "30")]
  timeout: u64,

  /// Print JSON instead of a table
  #[clap(long)]
  json: bool,

  /// Replay a recorded SEND/RECV script instead of connecting
  #[clap(long)]
  replay: Option<String>,

  /// Server version reported by the replayed session
  #[clap(long, default_value = "178")]
  server_version: i32,

  /// Error codes to treat as warnings (the 21xx notices always are)
  #[clap(long, value_delimiter = ',', default_value = "321")]
  tolerate: Vec<i32>,
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
  let args = CliArgs::parse();

  let client = match &args.replay {
    Some(path) => {
      info!("Replaying session from {}", path);
      let script = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
      AccountClient::from_mock(MockConnection::from_script(args.server_version, &script)?)
    }
    None => AccountClient::connect(&args.host, args.port, args.client_id)
      .with_context(|| format!("connecting to {}:{}", args.host, args.port))?,
  };

  let config = ManagerConfig { tolerated_error_codes: args.tolerate.clone(), ..ManagerConfig::default() };
  let manager = client.primary_account_manager(config)?;

  if let Err(e) = manager.wait_ready(Duration::from_secs(args.timeout)) {
    error!("Account snapshot incomplete: {}", e);
    let partial = manager.snapshot();
    if !partial.values.is_empty() || !partial.portfolio.is_empty() {
      warn!("Printing partial snapshot");
      print_snapshot(&partial, args.json)?;
    }
    manager.close();
    let _ = client.disconnect();
    bail!(e);
  }
  print_snapshot(&manager.snapshot(), args.json)?;

  manager.close();
  client.disconnect()?;
  Ok(())
}

fn print_snapshot(snapshot: &AccountSnapshot, json: bool) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    return Ok(());
  }
  if let Some(ts) = snapshot.last_updated {
    println!("# as of {}", ts.format("%Y-%m-%d %H:%M:%S UTC"));
  }
  for account in snapshot.accounts() {
    println!("== {} ==", account);
    for v in snapshot.values_for(&account) {
      println!("  {:<32} {:>20} {}", v.key.key, v.value, v.key.currency);
    }
    let lines = snapshot.portfolio_for(&account);
    if !lines.is_empty() {
      println!("  {:<12} {:>6} {:>12} {:>12} {:>14} {:>14}",
               "symbol", "type", "position", "price", "value", "unrealized");
      for p in lines {
        println!("  {:<12} {:>6} {:>12} {:>12.4} {:>14.2} {:>14.2}",
                 p.contract.local_symbol.as_deref().unwrap_or(&p.contract.symbol),
                 p.contract.sec_type.to_string(), p.position, p.market_price,
                 p.market_value, p.unrealized_pnl);
      }
    }
  }
  Ok(())
}
