//! In-memory ledger gateway
//!
//! Serves a recorded snapshot (JSON) with real pagination, and can inject
//! failures per wallet or token. Used for offline replay from the CLI and
//! by the test suite.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::gateway::{
    BalanceRecord, CounterpartyRecord, DexTrade, LedgerGateway, Page, PageRequest, TradeSide,
    TransactionRecord,
};
use crate::types::{ActivityWindow, FundingEdge, FundingRelation, TokenId, WalletAddress};

/// Recorded ledger data, keyed by wallet (or token for trades)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureSnapshot {
    #[serde(default)]
    pub related: HashMap<WalletAddress, Vec<FundingEdge>>,
    #[serde(default)]
    pub balances: HashMap<WalletAddress, Vec<BalanceRecord>>,
    #[serde(default)]
    pub transactions: HashMap<WalletAddress, Vec<TransactionRecord>>,
    #[serde(default)]
    pub counterparties: HashMap<WalletAddress, Vec<CounterpartyRecord>>,
    #[serde(default)]
    pub trades: HashMap<TokenId, Vec<DexTrade>>,
}

impl FixtureSnapshot {
    /// Load a snapshot from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Failure injected for a key (wallet address or token id)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureFailure {
    /// Every call is unavailable
    Unavailable,
    /// The next `n` calls are unavailable, then data is served
    UnavailableTimes(u32),
    /// Every call reports the key as unknown
    NotFound,
    /// Every call returns a malformed record
    Malformed,
}

/// In-memory [`LedgerGateway`]
pub struct FixtureGateway {
    snapshot: FixtureSnapshot,
    page_size: Option<u32>,
    failures: DashMap<String, FixtureFailure>,
    call_log: Mutex<Vec<String>>,
}

impl Default for FixtureGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureGateway {
    pub fn new() -> Self {
        Self::from_snapshot(FixtureSnapshot::default())
    }

    pub fn from_snapshot(snapshot: FixtureSnapshot) -> Self {
        Self {
            snapshot,
            page_size: None,
            failures: DashMap::new(),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// Cap page size below what callers request, to exercise pagination
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    pub fn with_edge(mut self, edge: FundingEdge) -> Self {
        self.snapshot
            .related
            .entry(edge.child.clone())
            .or_default()
            .push(edge);
        self
    }

    /// Record `parent` as the first funder of `child`
    pub fn with_first_funder(self, child: &str, parent: &str) -> Self {
        self.with_edge(FundingEdge {
            child: child.into(),
            parent: parent.into(),
            relation: FundingRelation::FirstFunder,
            tx_hash: None,
            timestamp: None,
            order: 0,
        })
    }

    pub fn with_balances(mut self, wallet: &WalletAddress, balances: Vec<BalanceRecord>) -> Self {
        self.snapshot.balances.insert(wallet.clone(), balances);
        self
    }

    pub fn with_transactions(
        mut self,
        wallet: &WalletAddress,
        txs: Vec<TransactionRecord>,
    ) -> Self {
        self.snapshot.transactions.insert(wallet.clone(), txs);
        self
    }

    pub fn with_counterparties(
        mut self,
        wallet: &WalletAddress,
        counterparties: Vec<CounterpartyRecord>,
    ) -> Self {
        self.snapshot.counterparties.insert(wallet.clone(), counterparties);
        self
    }

    pub fn with_trades(mut self, token: &TokenId, trades: Vec<DexTrade>) -> Self {
        self.snapshot.trades.insert(token.clone(), trades);
        self
    }

    /// Inject a failure for every call keyed on `key`
    pub fn fail(self, key: &str, failure: FixtureFailure) -> Self {
        self.failures.insert(key.to_string(), failure);
        self
    }

    /// Calls received so far, as `"endpoint:key:page"`
    pub fn calls(&self) -> Vec<String> {
        self.call_log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn record(&self, endpoint: &str, key: &str, page: PageRequest) -> Result<()> {
        if let Ok(mut log) = self.call_log.lock() {
            log.push(format!("{}:{}:{}", endpoint, key, page.page));
        }

        let failure = self.failures.get(key).map(|f| *f.value());
        match failure {
            None => Ok(()),
            Some(FixtureFailure::Unavailable) => {
                Err(Error::GatewayUnavailable(format!("{} unavailable for {}", endpoint, key)))
            }
            Some(FixtureFailure::UnavailableTimes(remaining)) => {
                if remaining <= 1 {
                    self.failures.remove(key);
                } else {
                    self.failures
                        .insert(key.to_string(), FixtureFailure::UnavailableTimes(remaining - 1));
                }

                if remaining == 0 {
                    Ok(())
                } else {
                    Err(Error::GatewayUnavailable(format!("{} unavailable for {}", endpoint, key)))
                }
            }
            Some(FixtureFailure::NotFound) => Err(Error::NotFound(key.to_string())),
            Some(FixtureFailure::Malformed) => Err(Error::MalformedRecord(format!(
                "{} row for {} is missing required fields",
                endpoint, key
            ))),
        }
    }

    fn page_of<T: Clone>(&self, items: &[T], request: PageRequest) -> Page<T> {
        let per_page = self
            .page_size
            .map(|cap| cap.min(request.per_page))
            .unwrap_or(request.per_page)
            .max(1) as usize;
        let start = (request.page.saturating_sub(1) as usize) * per_page;
        let end = (start + per_page).min(items.len());

        Page {
            items: items.get(start..end).map(|s| s.to_vec()).unwrap_or_default(),
            is_last_page: end >= items.len(),
        }
    }
}

#[async_trait]
impl LedgerGateway for FixtureGateway {
    async fn related_wallets(
        &self,
        address: &WalletAddress,
        page: PageRequest,
    ) -> Result<Page<FundingEdge>> {
        self.record("related_wallets", address.as_str(), page)?;
        let edges = self.snapshot.related.get(address).cloned().unwrap_or_default();
        Ok(self.page_of(&edges, page))
    }

    async fn balances(
        &self,
        address: &WalletAddress,
        page: PageRequest,
    ) -> Result<Page<BalanceRecord>> {
        self.record("balances", address.as_str(), page)?;
        let rows = self.snapshot.balances.get(address).cloned().unwrap_or_default();
        Ok(self.page_of(&rows, page))
    }

    async fn transactions(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
        page: PageRequest,
    ) -> Result<Page<TransactionRecord>> {
        self.record("transactions", address.as_str(), page)?;
        let rows: Vec<TransactionRecord> = self
            .snapshot
            .transactions
            .get(address)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| tx.timestamp.map(|ts| window.contains(ts)).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(self.page_of(&rows, page))
    }

    async fn counterparties(
        &self,
        address: &WalletAddress,
        _window: &ActivityWindow,
        page: PageRequest,
    ) -> Result<Page<CounterpartyRecord>> {
        self.record("counterparties", address.as_str(), page)?;
        let rows = self.snapshot.counterparties.get(address).cloned().unwrap_or_default();
        Ok(self.page_of(&rows, page))
    }

    async fn dex_trades(
        &self,
        token: &TokenId,
        window: &ActivityWindow,
        side: TradeSide,
        page: PageRequest,
    ) -> Result<Page<DexTrade>> {
        self.record("dex_trades", token.as_str(), page)?;
        let rows: Vec<DexTrade> = self
            .snapshot
            .trades
            .get(token)
            .map(|trades| {
                trades
                    .iter()
                    .filter(|t| t.side == side && window.contains(t.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(self.page_of(&rows, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pages_respect_cap() {
        let wallet = WalletAddress::from("w");
        let rows = (0..5)
            .map(|i| BalanceRecord {
                symbol: format!("T{}", i),
                amount: Some(1.0),
                usd_value: None,
            })
            .collect();
        let gateway = FixtureGateway::new().with_page_size(2).with_balances(&wallet, rows);

        let first = gateway.balances(&wallet, PageRequest::first(100)).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(!first.is_last_page);

        let third = gateway
            .balances(&wallet, PageRequest { page: 3, per_page: 100 })
            .await
            .unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.is_last_page);
    }

    #[tokio::test]
    async fn test_transient_failure_clears() {
        let wallet = WalletAddress::from("w");
        let gateway = FixtureGateway::new().fail("w", FixtureFailure::UnavailableTimes(1));

        assert!(gateway.balances(&wallet, PageRequest::first(10)).await.is_err());
        assert!(gateway.balances(&wallet, PageRequest::first(10)).await.is_ok());
        assert_eq!(gateway.calls().len(), 2);
    }

    #[test]
    fn test_snapshot_from_json() {
        let json = r#"{
            "related": {
                "child": [{"child": "child", "parent": "cex", "relation": "first_funder",
                           "tx_hash": null, "timestamp": null, "order": 0}]
            },
            "balances": {"child": [{"symbol": "SOL", "amount": 2.5, "usd_value": null}]}
        }"#;
        let snapshot: FixtureSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.related.len(), 1);
        assert_eq!(snapshot.balances[&WalletAddress::from("child")][0].amount, Some(2.5));
        assert!(snapshot.trades.is_empty());
    }
}
