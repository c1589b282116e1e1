// tws_accounts/src/contract.rs
// The slice of contract data carried by portfolio updates

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Security type as reported in a portfolio line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum SecType {
  Stock,          // STK
  Option,         // OPT
  Future,         // FUT
  Forex,          // CASH
  Bond,           // BOND
  Cfd,            // CFD
  FutureOption,   // FOP
  Warrant,        // WAR
  Index,          // IND
  Fund,           // FUND
  Commodity,      // CMDTY
  Crypto,         // CRYPTO
  Other(String),
}

impl fmt::Display for SecType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SecType::Stock => "STK",
      SecType::Option => "OPT",
      SecType::Future => "FUT",
      SecType::Forex => "CASH",
      SecType::Bond => "BOND",
      SecType::Cfd => "CFD",
      SecType::FutureOption => "FOP",
      SecType::Warrant => "WAR",
      SecType::Index => "IND",
      SecType::Fund => "FUND",
      SecType::Commodity => "CMDTY",
      SecType::Crypto => "CRYPTO",
      SecType::Other(s) => s.as_str(),
    };
    write!(f, "{}", s)
  }
}

impl FromStr for SecType {
  type Err = std::convert::Infallible;

  // Unknown codes are kept verbatim rather than guessed at.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "STK" => SecType::Stock,
      "OPT" => SecType::Option,
      "FUT" => SecType::Future,
      "CASH" => SecType::Forex,
      "BOND" => SecType::Bond,
      "CFD" => SecType::Cfd,
      "FOP" => SecType::FutureOption,
      "WAR" => SecType::Warrant,
      "IND" => SecType::Index,
      "FUND" => SecType::Fund,
      "CMDTY" => SecType::Commodity,
      "CRYPTO" => SecType::Crypto,
      other => SecType::Other(other.to_string()),
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OptionRight {
  Call,
  Put,
}

impl OptionRight {
  /// Parses the right field of a portfolio message. TWS sends "0" or "?" for
  /// non-derivatives, which map to `None`.
  pub fn from_wire(s: &str) -> Option<Self> {
    match s {
      "C" | "CALL" => Some(OptionRight::Call),
      "P" | "PUT" => Some(OptionRight::Put),
      _ => None,
    }
  }
}

impl fmt::Display for OptionRight {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionRight::Call => write!(f, "C"),
      OptionRight::Put => write!(f, "P"),
    }
  }
}

/// Contract description attached to a `PortfolioValue`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
  pub con_id: i32,
  pub symbol: String,
  pub sec_type: SecType,
  /// Raw `YYYYMMDD` / `YYYYMM` string; empty for non-expiring instruments.
  pub last_trade_date_or_contract_month: String,
  pub strike: Option<f64>,
  pub right: Option<OptionRight>,
  pub multiplier: Option<String>,
  pub primary_exchange: Option<String>,
  pub currency: String,
  pub local_symbol: Option<String>,
  pub trading_class: Option<String>,
}

impl Contract {
  pub fn new() -> Self {
    Contract {
      con_id: 0,
      symbol: String::new(),
      sec_type: SecType::Stock,
      last_trade_date_or_contract_month: String::new(),
      strike: None,
      right: None,
      multiplier: None,
      primary_exchange: None,
      currency: String::new(),
      local_symbol: None,
      trading_class: None,
    }
  }

  /// Convenience constructor for a US stock line.
  pub fn stock(con_id: i32, symbol: &str) -> Self {
    Contract {
      con_id,
      symbol: symbol.to_string(),
      currency: "USD".to_string(),
      ..Self::new()
    }
  }
}

impl Default for Contract {
  fn default() -> Self {
    Self::new()
  }
}
