// tws_accounts/src/snapshot.rs

//! Latest-value store for account values and portfolio lines.
//!
//! The store itself has no lock. The manager wraps it in a
//! `parking_lot::RwLock`; the event thread is the only writer and readers
//! get owned copies, so nothing a reader holds can change under it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::account::{AccountTag, AccountValue, AccountValueKey, PortfolioValue, PortfolioValueKey};

#[derive(Debug, Default)]
pub struct SnapshotStore {
  values: HashMap<AccountValueKey, AccountValue>,
  portfolio: HashMap<PortfolioValueKey, PortfolioValue>,
  last_updated: Option<DateTime<Utc>>,
}

impl SnapshotStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Last write wins per key.
  pub fn upsert_value(&mut self, entry: AccountValue) {
    self.values.insert(entry.key.clone(), entry);
    self.last_updated = Some(Utc::now());
  }

  pub fn upsert_portfolio(&mut self, entry: PortfolioValue) {
    self.portfolio.insert(entry.key.clone(), entry);
    self.last_updated = Some(Utc::now());
  }

  pub fn values(&self) -> HashMap<AccountValueKey, AccountValue> {
    self.values.clone()
  }

  pub fn portfolio(&self) -> HashMap<PortfolioValueKey, PortfolioValue> {
    self.portfolio.clone()
  }

  /// Both maps and the update time, copied together.
  pub fn snapshot(&self) -> AccountSnapshot {
    AccountSnapshot {
      values: self.values.clone(),
      portfolio: self.portfolio.clone(),
      last_updated: self.last_updated,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty() && self.portfolio.is_empty()
  }
}

/// A point-in-time copy of everything the store knew.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountSnapshot {
  #[serde(serialize_with = "values_in_key_order")]
  pub values: HashMap<AccountValueKey, AccountValue>,
  #[serde(serialize_with = "portfolio_in_key_order")]
  pub portfolio: HashMap<PortfolioValueKey, PortfolioValue>,
  pub last_updated: Option<DateTime<Utc>>,
}

// Struct keys cannot be JSON object keys, so the maps serialise as sorted lists.
fn values_in_key_order<S: serde::Serializer>(
  map: &HashMap<AccountValueKey, AccountValue>,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  let mut entries: Vec<&AccountValue> = map.values().collect();
  entries.sort_by(|a, b| a.key.cmp(&b.key));
  serializer.collect_seq(entries)
}

fn portfolio_in_key_order<S: serde::Serializer>(
  map: &HashMap<PortfolioValueKey, PortfolioValue>,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  let mut entries: Vec<&PortfolioValue> = map.values().collect();
  entries.sort_by(|a, b| a.key.cmp(&b.key));
  serializer.collect_seq(entries)
}

impl AccountSnapshot {
  pub fn value(&self, account_code: &str, tag: &AccountTag, currency: &str) -> Option<&AccountValue> {
    self.values.get(&AccountValueKey::new(account_code, &tag.to_string(), currency))
  }

  /// Every account code that contributed data, sorted.
  pub fn accounts(&self) -> Vec<String> {
    let codes: BTreeSet<&str> = self.values.keys().map(|k| k.account_code.as_str())
      .chain(self.portfolio.keys().map(|k| k.account_code.as_str()))
      .collect();
    codes.into_iter().map(str::to_string).collect()
  }

  /// Values for one account, sorted by tag then currency.
  pub fn values_for(&self, account_code: &str) -> Vec<&AccountValue> {
    let mut out: Vec<&AccountValue> = self.values.values()
      .filter(|v| v.key.account_code == account_code)
      .collect();
    out.sort_by(|a, b| a.key.cmp(&b.key));
    out
  }

  /// Portfolio lines for one account, sorted by contract id.
  pub fn portfolio_for(&self, account_code: &str) -> Vec<&PortfolioValue> {
    let mut out: Vec<&PortfolioValue> = self.portfolio.values()
      .filter(|p| p.key.account_code == account_code)
      .collect();
    out.sort_by(|a, b| a.key.cmp(&b.key));
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::contract::Contract;

  fn value(account: &str, key: &str, currency: &str, v: &str) -> AccountValue {
    AccountValue { key: AccountValueKey::new(account, key, currency), value: v.to_string() }
  }

  fn line(account: &str, con_id: i32, position: f64) -> PortfolioValue {
    PortfolioValue {
      key: PortfolioValueKey::new(account, con_id),
      contract: Contract::stock(con_id, "XYZ"),
      position,
      market_price: 1.0,
      market_value: position,
      average_cost: 1.0,
      unrealized_pnl: 0.0,
      realized_pnl: 0.0,
    }
  }

  #[test]
  fn later_value_overwrites_same_key() {
    let mut store = SnapshotStore::new();
    store.upsert_value(value("A", "NetLiquidation", "USD", "100"));
    store.upsert_value(value("A", "NetLiquidation", "USD", "250"));
    let values = store.values();
    assert_eq!(values.len(), 1);
    assert_eq!(values[&AccountValueKey::new("A", "NetLiquidation", "USD")].value, "250");
  }

  #[test]
  fn currencies_and_accounts_are_separate_keys() {
    let mut store = SnapshotStore::new();
    store.upsert_value(value("A", "CashBalance", "USD", "1"));
    store.upsert_value(value("A", "CashBalance", "EUR", "2"));
    store.upsert_value(value("B", "CashBalance", "USD", "3"));
    assert_eq!(store.values().len(), 3);
  }

  #[test]
  fn portfolio_overwrites_by_account_and_contract() {
    let mut store = SnapshotStore::new();
    store.upsert_portfolio(line("A", 1, 10.0));
    store.upsert_portfolio(line("A", 1, 12.0));
    store.upsert_portfolio(line("B", 1, 5.0));
    let portfolio = store.portfolio();
    assert_eq!(portfolio.len(), 2);
    assert_eq!(portfolio[&PortfolioValueKey::new("A", 1)].position, 12.0);
  }

  #[test]
  fn snapshot_is_an_independent_copy() {
    let mut store = SnapshotStore::new();
    assert!(store.is_empty());
    store.upsert_value(value("A", "NetLiquidation", "USD", "100"));
    let snap = store.snapshot();
    store.upsert_value(value("A", "NetLiquidation", "USD", "999"));
    assert_eq!(snap.value("A", &AccountTag::NetLiquidation, "USD").map(|v| v.value.as_str()), Some("100"));
    assert!(snap.last_updated.is_some());
  }

  #[test]
  fn lists_contributing_accounts() {
    let mut store = SnapshotStore::new();
    store.upsert_value(value("B", "NetLiquidation", "USD", "1"));
    store.upsert_portfolio(line("C", 7, 1.0));
    store.upsert_value(value("A", "NetLiquidation", "USD", "1"));
    let snap = store.snapshot();
    assert_eq!(snap.accounts(), vec!["A", "B", "C"]);
    assert_eq!(snap.values_for("B").len(), 1);
    assert_eq!(snap.portfolio_for("C")[0].key.con_id, 7);
  }

  #[test]
  fn snapshot_serialises_as_sorted_lists() {
    let mut store = SnapshotStore::new();
    store.upsert_value(value("B", "NetLiquidation", "USD", "2"));
    store.upsert_value(value("A", "NetLiquidation", "USD", "1"));
    let json = serde_json::to_value(store.snapshot()).unwrap();
    let values = json["values"].as_array().unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0]["key"]["account_code"], "A");
    assert_eq!(values[1]["value"], "2");
    assert_eq!(json["portfolio"].as_array().unwrap().len(), 0);
  }
}
