//! Ledger gateway: the read-only analytics API the analysis consumes
//!
//! [`LedgerGateway`] is the raw capability (one page per call).
//! [`Ledger`] wraps it with shared pacing, bounded retries and full
//! pagination, and is the only handle the analysis components see.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ActivityWindow, FundingEdge, TokenId, WalletAddress};

pub mod fixture;
pub mod http;
pub mod ledger;

pub use fixture::{FixtureGateway, FixtureSnapshot};
pub use http::HttpGateway;
pub use ledger::{Ledger, LedgerConfig};

/// Page selector sent to the gateway (1-based page)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn first(per_page: u32) -> Self {
        Self { page: 1, per_page }
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            per_page: self.per_page,
        }
    }
}

/// One page of results plus the server's explicit last-page signal
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub is_last_page: bool,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            is_last_page: true,
        }
    }
}

/// Balance row as reported by the gateway; amount may be absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub symbol: String,
    pub amount: Option<f64>,
    pub usd_value: Option<f64>,
}

/// Token movement inside a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub symbol: String,
    pub amount: f64,
    pub counterparty: Option<WalletAddress>,
}

/// Transaction in a wallet's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub signature: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sent: Vec<TransferRecord>,
    #[serde(default)]
    pub received: Vec<TransferRecord>,
    pub counterparty: Option<WalletAddress>,
}

/// Aggregated interactions with one counterparty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyRecord {
    pub address: Option<WalletAddress>,
    pub interaction_count: u64,
    pub volume_usd: Option<f64>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Side of a DEX trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A DEX trade on a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexTrade {
    pub trader: WalletAddress,
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub usd_value: Option<f64>,
}

/// Read-only analytics API, one page per call
///
/// Implementations report transport failures as
/// [`crate::Error::GatewayUnavailable`], absent wallets as
/// [`crate::Error::NotFound`] and rows missing required fields as
/// [`crate::Error::MalformedRecord`].
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Related-wallet relations (first funder, signer, deployer...) of `address`
    async fn related_wallets(
        &self,
        address: &WalletAddress,
        page: PageRequest,
    ) -> Result<Page<FundingEdge>>;

    /// Current token balances of `address`
    async fn balances(
        &self,
        address: &WalletAddress,
        page: PageRequest,
    ) -> Result<Page<BalanceRecord>>;

    /// Transactions of `address` inside `window`
    async fn transactions(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
        page: PageRequest,
    ) -> Result<Page<TransactionRecord>>;

    /// Counterparty aggregates of `address` inside `window`
    async fn counterparties(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
        page: PageRequest,
    ) -> Result<Page<CounterpartyRecord>>;

    /// DEX trades on `token` inside `window`, filtered to `side`
    async fn dex_trades(
        &self,
        token: &TokenId,
        window: &ActivityWindow,
        side: TradeSide,
        page: PageRequest,
    ) -> Result<Page<DexTrade>>;
}
