// tws_accounts/src/account.rs
// Account value and portfolio records keyed the way TWS streams them

use crate::contract::Contract;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Identity of one account value: the same tag in two currencies, or for two
/// accounts, is two separate entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AccountValueKey {
  pub account_code: String,
  pub key: String,
  /// Empty for tags that carry no currency (e.g. `AccountType`).
  pub currency: String,
}

impl AccountValueKey {
  pub fn new(account_code: &str, key: &str, currency: &str) -> Self {
    AccountValueKey {
      account_code: account_code.to_string(),
      key: key.to_string(),
      currency: currency.to_string(),
    }
  }

  /// The tag, decoded into the well-known set where possible.
  pub fn tag(&self) -> AccountTag {
    // Infallible
    AccountTag::from_str(&self.key).unwrap_or_else(|never| match never {})
  }
}

impl fmt::Display for AccountValueKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.currency.is_empty() {
      write!(f, "{}/{}", self.account_code, self.key)
    } else {
      write!(f, "{}/{}/{}", self.account_code, self.key, self.currency)
    }
  }
}

/// Latest value received for an `AccountValueKey`. Values are kept as the
/// gateway sent them; nothing here interprets them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountValue {
  pub key: AccountValueKey,
  pub value: String,
}

/// Identity of one portfolio line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PortfolioValueKey {
  pub account_code: String,
  pub con_id: i32,
}

impl PortfolioValueKey {
  pub fn new(account_code: &str, con_id: i32) -> Self {
    PortfolioValueKey { account_code: account_code.to_string(), con_id }
  }
}

/// A position line as reported by an account-updates subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioValue {
  pub key: PortfolioValueKey,
  pub contract: Contract,
  pub position: f64,
  pub market_price: f64,
  pub market_value: f64,
  pub average_cost: f64,
  pub unrealized_pnl: f64,
  pub realized_pnl: f64,
}

/// Well-known account value tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountTag {
  AccountType,
  NetLiquidation,
  TotalCashValue,
  CashBalance,
  SettledCash,
  AccruedCash,
  BuyingPower,
  EquityWithLoanValue,
  PreviousEquityWithLoanValue,
  GrossPositionValue,
  StockMarketValue,
  OptionMarketValue,
  FuturesPNL,
  ReqTEquity,
  ReqTMargin,
  SMA,
  InitMarginReq,
  MaintMarginReq,
  AvailableFunds,
  ExcessLiquidity,
  Cushion,
  FullInitMarginReq,
  FullMaintMarginReq,
  FullAvailableFunds,
  FullExcessLiquidity,
  LookAheadNextChange,
  LookAheadInitMarginReq,
  LookAheadMaintMarginReq,
  LookAheadAvailableFunds,
  LookAheadExcessLiquidity,
  HighestSeverity,
  DayTradesRemaining,
  LeverageS, // "Leverage-S" on the wire
  Currency,
  ExchangeRate,
  UnrealizedPnL,
  RealizedPnL,
  Other(String),
}

impl AccountTag {
  fn as_str(&self) -> &str {
    match self {
      AccountTag::AccountType => "AccountType",
      AccountTag::NetLiquidation => "NetLiquidation",
      AccountTag::TotalCashValue => "TotalCashValue",
      AccountTag::CashBalance => "CashBalance",
      AccountTag::SettledCash => "SettledCash",
      AccountTag::AccruedCash => "AccruedCash",
      AccountTag::BuyingPower => "BuyingPower",
      AccountTag::EquityWithLoanValue => "EquityWithLoanValue",
      AccountTag::PreviousEquityWithLoanValue => "PreviousEquityWithLoanValue",
      AccountTag::GrossPositionValue => "GrossPositionValue",
      AccountTag::StockMarketValue => "StockMarketValue",
      AccountTag::OptionMarketValue => "OptionMarketValue",
      AccountTag::FuturesPNL => "FuturesPNL",
      AccountTag::ReqTEquity => "ReqTEquity",
      AccountTag::ReqTMargin => "ReqTMargin",
      AccountTag::SMA => "SMA",
      AccountTag::InitMarginReq => "InitMarginReq",
      AccountTag::MaintMarginReq => "MaintMarginReq",
      AccountTag::AvailableFunds => "AvailableFunds",
      AccountTag::ExcessLiquidity => "ExcessLiquidity",
      AccountTag::Cushion => "Cushion",
      AccountTag::FullInitMarginReq => "FullInitMarginReq",
      AccountTag::FullMaintMarginReq => "FullMaintMarginReq",
      AccountTag::FullAvailableFunds => "FullAvailableFunds",
      AccountTag::FullExcessLiquidity => "FullExcessLiquidity",
      AccountTag::LookAheadNextChange => "LookAheadNextChange",
      AccountTag::LookAheadInitMarginReq => "LookAheadInitMarginReq",
      AccountTag::LookAheadMaintMarginReq => "LookAheadMaintMarginReq",
      AccountTag::LookAheadAvailableFunds => "LookAheadAvailableFunds",
      AccountTag::LookAheadExcessLiquidity => "LookAheadExcessLiquidity",
      AccountTag::HighestSeverity => "HighestSeverity",
      AccountTag::DayTradesRemaining => "DayTradesRemaining",
      AccountTag::LeverageS => "Leverage-S",
      AccountTag::Currency => "Currency",
      AccountTag::ExchangeRate => "ExchangeRate",
      AccountTag::UnrealizedPnL => "UnrealizedPnL",
      AccountTag::RealizedPnL => "RealizedPnL",
      AccountTag::Other(s) => s.as_str(),
    }
  }
}

impl fmt::Display for AccountTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for AccountTag {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "AccountType" => AccountTag::AccountType,
      "NetLiquidation" => AccountTag::NetLiquidation,
      "TotalCashValue" => AccountTag::TotalCashValue,
      "CashBalance" => AccountTag::CashBalance,
      "SettledCash" => AccountTag::SettledCash,
      "AccruedCash" => AccountTag::AccruedCash,
      "BuyingPower" => AccountTag::BuyingPower,
      "EquityWithLoanValue" => AccountTag::EquityWithLoanValue,
      "PreviousEquityWithLoanValue" => AccountTag::PreviousEquityWithLoanValue,
      "GrossPositionValue" => AccountTag::GrossPositionValue,
      "StockMarketValue" => AccountTag::StockMarketValue,
      "OptionMarketValue" => AccountTag::OptionMarketValue,
      "FuturesPNL" => AccountTag::FuturesPNL,
      "ReqTEquity" => AccountTag::ReqTEquity,
      "ReqTMargin" => AccountTag::ReqTMargin,
      "SMA" => AccountTag::SMA,
      "InitMarginReq" => AccountTag::InitMarginReq,
      "MaintMarginReq" => AccountTag::MaintMarginReq,
      "AvailableFunds" => AccountTag::AvailableFunds,
      "ExcessLiquidity" => AccountTag::ExcessLiquidity,
      "Cushion" => AccountTag::Cushion,
      "FullInitMarginReq" => AccountTag::FullInitMarginReq,
      "FullMaintMarginReq" => AccountTag::FullMaintMarginReq,
      "FullAvailableFunds" => AccountTag::FullAvailableFunds,
      "FullExcessLiquidity" => AccountTag::FullExcessLiquidity,
      "LookAheadNextChange" => AccountTag::LookAheadNextChange,
      "LookAheadInitMarginReq" => AccountTag::LookAheadInitMarginReq,
      "LookAheadMaintMarginReq" => AccountTag::LookAheadMaintMarginReq,
      "LookAheadAvailableFunds" => AccountTag::LookAheadAvailableFunds,
      "LookAheadExcessLiquidity" => AccountTag::LookAheadExcessLiquidity,
      "HighestSeverity" => AccountTag::HighestSeverity,
      "DayTradesRemaining" => AccountTag::DayTradesRemaining,
      "Leverage-S" => AccountTag::LeverageS,
      "Currency" => AccountTag::Currency,
      "ExchangeRate" => AccountTag::ExchangeRate,
      "UnrealizedPnL" => AccountTag::UnrealizedPnL,
      "RealizedPnL" => AccountTag::RealizedPnL,
      other => AccountTag::Other(other.to_string()),
    })
  }
}
