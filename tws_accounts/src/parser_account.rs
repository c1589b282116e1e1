// tws_accounts/src/parser_account.rs
// Decoders for the account-updates message family

use log::debug;
use std::str::FromStr;

use crate::account::{AccountValue, AccountValueKey, PortfolioValue, PortfolioValueKey};
use crate::base::IBKRError;
use crate::contract::{Contract, OptionRight, SecType};
use crate::protocol_dec_parser::FieldParser;
use crate::reply::{ErrorMessage, Reply};

/// Process account value message (type 6)
pub fn process_account_value(parser: &mut FieldParser) -> Result<Reply, IBKRError> {
  let version = parser.read_int()?;

  let key = parser.read_string()?;
  let value = parser.read_string()?;
  let currency = parser.read_string()?;

  let mut account_name = String::new();
  if version >= 2 {
    account_name = parser.read_string()?;
  }

  debug!("Parsed Account Value: Key={}, Value={}, Currency={}, Account={}",
         key, value, currency, account_name);

  Ok(Reply::AccountValue(AccountValue {
    key: AccountValueKey { account_code: account_name, key, currency },
    value,
  }))
}

/// Process portfolio value message (type 7). The contract layout grows with
/// the message version.
pub fn process_portfolio_value(parser: &mut FieldParser) -> Result<Reply, IBKRError> {
  let version = parser.read_int()?;

  let mut contract = Contract::new();
  if version >= 6 {
    contract.con_id = parser.read_int()?;
  }
  contract.symbol = parser.read_string()?;
  let sec_type = parser.read_string()?;
  contract.sec_type = SecType::from_str(&sec_type).unwrap_or_else(|never| match never {});
  contract.last_trade_date_or_contract_month = parser.read_string()?;
  let strike = parser.read_double()?;
  if strike > 0.0 {
    contract.strike = Some(strike);
  }
  contract.right = OptionRight::from_wire(&parser.read_string()?);
  if version >= 7 {
    contract.multiplier = non_empty(parser.read_string()?);
    contract.primary_exchange = non_empty(parser.read_string()?);
  }
  contract.currency = parser.read_string()?;
  if version >= 2 {
    contract.local_symbol = non_empty(parser.read_string()?);
  }
  if version >= 8 {
    contract.trading_class = non_empty(parser.read_string()?);
  }

  let position = parser.read_double()?;
  let market_price = parser.read_double()?;
  let market_value = parser.read_double()?;

  let (mut average_cost, mut unrealized_pnl, mut realized_pnl) = (0.0, 0.0, 0.0);
  if version >= 3 {
    average_cost = parser.read_double()?;
    unrealized_pnl = parser.read_double()?;
    realized_pnl = parser.read_double()?;
  }

  let mut account_name = String::new();
  if version >= 4 {
    account_name = parser.read_string()?;
  }

  debug!("Parsed Portfolio Value: Account={}, Symbol={}, Pos={}, MktPx={}, MktVal={}, AvgCost={}, UnPNL={}, RealPNL={}",
         account_name, contract.symbol, position, market_price, market_value, average_cost, unrealized_pnl, realized_pnl);

  Ok(Reply::PortfolioValue(PortfolioValue {
    key: PortfolioValueKey { account_code: account_name, con_id: contract.con_id },
    contract,
    position,
    market_price,
    market_value,
    average_cost,
    unrealized_pnl,
    realized_pnl,
  }))
}

/// Process account update time message (type 8)
pub fn process_account_update_time(parser: &mut FieldParser) -> Result<Reply, IBKRError> {
  let _version = parser.read_int()?;
  let time_stamp = parser.read_string()?;
  debug!("Parsed Account Update Time: {}", time_stamp);
  Ok(Reply::AccountUpdateTime { time_stamp })
}

/// Process account download end message (type 54)
pub fn process_account_download_end(parser: &mut FieldParser) -> Result<Reply, IBKRError> {
  let _version = parser.read_int()?;
  let account = parser.read_string()?;
  debug!("Parsed Account Download End: {}", account);
  Ok(Reply::AccountDownloadEnd { account })
}

/// Process managed accounts message (type 15). The list arrives as one comma
/// separated field, often with a trailing comma.
pub fn process_managed_accounts(parser: &mut FieldParser) -> Result<Reply, IBKRError> {
  let _version = parser.read_int()?;
  let accounts_list = parser.read_string()?;
  debug!("Parsed Managed Accounts: {}", accounts_list);
  let accounts = accounts_list
    .split(',')
    .map(str::trim)
    .filter(|code| !code.is_empty())
    .map(str::to_string)
    .collect();
  Ok(Reply::ManagedAccounts { accounts })
}

/// Process error message (type 4)
pub fn process_error_message(parser: &mut FieldParser) -> Result<Reply, IBKRError> {
  let version = parser.read_int()?;

  let mut id: i32 = -1;
  let code: i32;
  let message: String;
  let mut advanced_order_reject_json = None;

  if version < 2 {
    message = parser.read_string()?;
    code = 0;
  } else {
    id = parser.read_int()?;
    code = parser.read_int()?;
    message = parser.read_string()?;
    if parser.remaining_fields() > 0 {
      advanced_order_reject_json = non_empty(parser.read_string()?);
    }
  }

  debug!("Parsed Error: ID={}, Code={}, Msg={}", id, code, message);
  Ok(Reply::Error(ErrorMessage { id, code, message, advanced_order_reject_json }))
}

/// Process next valid id message (type 9)
pub fn process_next_valid_id(parser: &mut FieldParser) -> Result<Reply, IBKRError> {
  let _version = parser.read_int()?;
  let order_id = parser.read_int()?;
  debug!("Parsed Next valid ID: {}", order_id);
  Ok(Reply::NextValidId { order_id })
}

fn non_empty(s: String) -> Option<String> {
  if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fields(s: &str) -> Vec<u8> {
    s.replace('|', "\0").into_bytes()
  }

  #[test]
  fn account_value_without_account_field() {
    let data = fields("1|NetLiquidation|100.5|USD|");
    let reply = process_account_value(&mut FieldParser::new(&data)).unwrap();
    match reply {
      Reply::AccountValue(v) => {
        assert_eq!(v.key, AccountValueKey::new("", "NetLiquidation", "USD"));
        assert_eq!(v.value, "100.5");
      }
      other => panic!("unexpected reply {:?}", other),
    }
  }

  #[test]
  fn portfolio_value_version_8() {
    let data = fields("8|265598|AAPL|STK||0|0||NASDAQ|USD|AAPL|NMS|10|190.5|1905|150.25|402.5|0|DU1|");
    let reply = process_portfolio_value(&mut FieldParser::new(&data)).unwrap();
    let p = match reply {
      Reply::PortfolioValue(p) => p,
      other => panic!("unexpected reply {:?}", other),
    };
    assert_eq!(p.key, PortfolioValueKey::new("DU1", 265598));
    assert_eq!(p.contract.symbol, "AAPL");
    assert_eq!(p.contract.sec_type, SecType::Stock);
    assert_eq!(p.contract.strike, None);
    assert_eq!(p.contract.right, None);
    assert_eq!(p.contract.multiplier, None);
    assert_eq!(p.contract.primary_exchange.as_deref(), Some("NASDAQ"));
    assert_eq!(p.contract.trading_class.as_deref(), Some("NMS"));
    assert_eq!(p.position, 10.0);
    assert_eq!(p.market_value, 1905.0);
    assert_eq!(p.average_cost, 150.25);
    assert_eq!(p.unrealized_pnl, 402.5);
  }

  #[test]
  fn portfolio_value_option_contract() {
    let data = fields("8|123|SPY|OPT|20250620|450|P|100|AMEX|USD|SPY   250620P00450000|SPY|-2|3.1|-620|410|200|0|DU2|");
    let reply = process_portfolio_value(&mut FieldParser::new(&data)).unwrap();
    let p = match reply {
      Reply::PortfolioValue(p) => p,
      other => panic!("unexpected reply {:?}", other),
    };
    assert_eq!(p.contract.sec_type, SecType::Option);
    assert_eq!(p.contract.last_trade_date_or_contract_month, "20250620");
    assert_eq!(p.contract.strike, Some(450.0));
    assert_eq!(p.contract.right, Some(OptionRight::Put));
    assert_eq!(p.contract.multiplier.as_deref(), Some("100"));
    assert_eq!(p.position, -2.0);
  }

  #[test]
  fn managed_accounts_keep_order_and_duplicates() {
    let data = fields("1|DU2,DU1,DU2,|");
    let reply = process_managed_accounts(&mut FieldParser::new(&data)).unwrap();
    assert_eq!(reply, Reply::ManagedAccounts {
      accounts: vec!["DU2".to_string(), "DU1".to_string(), "DU2".to_string()],
    });
  }

  #[test]
  fn managed_accounts_empty_list() {
    let data = fields("1||");
    let reply = process_managed_accounts(&mut FieldParser::new(&data)).unwrap();
    assert_eq!(reply, Reply::ManagedAccounts { accounts: vec![] });
  }

  #[test]
  fn error_with_advanced_reject() {
    let data = fields("2|-1|2104|Market data farm connection is OK:usfarm|{\"x\":1}|");
    let reply = process_error_message(&mut FieldParser::new(&data)).unwrap();
    match reply {
      Reply::Error(e) => {
        assert_eq!(e.id, -1);
        assert_eq!(e.code, 2104);
        assert_eq!(e.advanced_order_reject_json.as_deref(), Some("{\"x\":1}"));
      }
      other => panic!("unexpected reply {:?}", other),
    }
  }
}
