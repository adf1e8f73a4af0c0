//! HTTP client for the wallet analytics API
//!
//! Provides access to:
//! - Related-wallet relations (first funder, signer, deployer)
//! - Current balances, transaction history and counterparty aggregates
//! - DEX trades for a token
//!
//! Every endpoint is a JSON POST with a `pagination` request block; responses
//! carry `pagination.is_last_page`, which is the only accepted end-of-data
//! signal.

use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use async_trait::async_trait;

use crate::config::{GatewayConfig, API_KEY_ENV};
use crate::error::{Error, Result};
use crate::gateway::{
    BalanceRecord, CounterpartyRecord, DexTrade, LedgerGateway, Page, PageRequest, TradeSide,
    TransactionRecord, TransferRecord,
};
use crate::types::{ActivityWindow, FundingEdge, FundingRelation, TokenId, WalletAddress};

const RELATED_WALLETS_PATH: &str = "profiler/address/related-wallets";
const BALANCES_PATH: &str = "profiler/address/current-balance";
const TRANSACTIONS_PATH: &str = "profiler/address/transactions";
const COUNTERPARTIES_PATH: &str = "profiler/address/counterparties";
const DEX_TRADES_PATH: &str = "tgm/dex-trades";

/// Analytics API client
pub struct HttpGateway {
    /// HTTP client
    client: Client,
    /// API key, sent as the `apiKey` header
    api_key: String,
    /// Base URL, always ending in '/'
    base_url: Url,
    /// Chain every query is scoped to
    chain: String,
    /// Per-request timeout
    timeout: Duration,
    /// Related-wallet pages, which rarely change within a run
    related_cache: DashMap<String, (Instant, Page<FundingEdge>)>,
    related_cache_ttl: Duration,
}

impl HttpGateway {
    /// Create a client from gateway configuration
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::MissingEnvVar(API_KEY_ENV.to_string()));
        }

        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: normalize_base_url(&config.base_url)?,
            chain: config.chain.clone(),
            timeout,
            related_cache: DashMap::new(),
            related_cache_ttl: Duration::from_secs(config.funder_cache_ttl_secs),
        })
    }

    /// POST one page request and unwrap the response envelope
    async fn post_page<R: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(Vec<R>, bool)> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid endpoint {}: {}", path, e)))?;

        let response = self
            .client
            .post(url)
            .header("apiKey", &self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::GatewayUnavailable(format!("Request to {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(path, status.as_u16(), body));
        }

        let envelope: Envelope<R> = response
            .json()
            .await
            .map_err(|e| {
                Error::MalformedRecord(format!("Failed to parse {} response: {}", path, e))
            })?;

        envelope.into_rows(path)
    }

    /// Fresh cached related-wallet page; an expired entry is evicted
    fn cached_related(&self, key: &str) -> Option<Page<FundingEdge>> {
        let ttl = self.related_cache_ttl;
        if let Some(entry) = self.related_cache.get(key) {
            let (fetched_at, cached) = entry.value();
            if fetched_at.elapsed() < ttl {
                return Some(cached.clone());
            }
        }
        self.related_cache
            .remove_if(key, |_, (fetched_at, _)| fetched_at.elapsed() >= ttl);
        None
    }

    fn address_body(
        &self,
        address: &WalletAddress,
        window: Option<&ActivityWindow>,
        page: PageRequest,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "address": address.as_str(),
            "chain": self.chain,
            "pagination": { "page": page.page, "per_page": page.per_page },
        });
        if let Some(window) = window {
            body["date"] = date_range(window);
        }
        body
    }
}

#[async_trait]
impl LedgerGateway for HttpGateway {
    async fn related_wallets(
        &self,
        address: &WalletAddress,
        page: PageRequest,
    ) -> Result<Page<FundingEdge>> {
        let cache_key = format!("{}:{}:{}", address, page.page, page.per_page);
        if let Some(cached) = self.cached_related(&cache_key) {
            debug!(address = %address.short(), page = page.page, "Using cached related wallets");
            return Ok(cached);
        }

        debug!(address = %address.short(), page = page.page, "Fetching related wallets");
        let body = self.address_body(address, None, page);
        let (rows, is_last_page) = self
            .post_page::<RelatedWalletRow>(RELATED_WALLETS_PATH, body)
            .await?;

        let items = rows
            .into_iter()
            .map(|row| row.into_edge(address))
            .collect::<Result<Vec<_>>>()?;
        let page_result = Page { items, is_last_page };

        if !self.related_cache_ttl.is_zero() {
            self.related_cache
                .insert(cache_key, (Instant::now(), page_result.clone()));
        }
        Ok(page_result)
    }

    async fn balances(
        &self,
        address: &WalletAddress,
        page: PageRequest,
    ) -> Result<Page<BalanceRecord>> {
        debug!(address = %address.short(), page = page.page, "Fetching balances");
        let body = self.address_body(address, None, page);
        let (rows, is_last_page) = self
            .post_page::<BalanceRow>(BALANCES_PATH, body)
            .await?;

        let items = rows
            .into_iter()
            .map(BalanceRow::into_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, is_last_page })
    }

    async fn transactions(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
        page: PageRequest,
    ) -> Result<Page<TransactionRecord>> {
        debug!(address = %address.short(), page = page.page, "Fetching transactions");
        let body = self.address_body(address, Some(window), page);
        let (rows, is_last_page) = self
            .post_page::<TransactionRow>(TRANSACTIONS_PATH, body)
            .await?;

        let items = rows.into_iter().map(|row| row.into_record(address)).collect();
        Ok(Page { items, is_last_page })
    }

    async fn counterparties(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
        page: PageRequest,
    ) -> Result<Page<CounterpartyRecord>> {
        debug!(address = %address.short(), page = page.page, "Fetching counterparties");
        let body = self.address_body(address, Some(window), page);
        let (rows, is_last_page) = self
            .post_page::<CounterpartyRow>(COUNTERPARTIES_PATH, body)
            .await?;

        let items = rows.into_iter().map(CounterpartyRow::into_record).collect();
        Ok(Page { items, is_last_page })
    }

    async fn dex_trades(
        &self,
        token: &TokenId,
        window: &ActivityWindow,
        side: TradeSide,
        page: PageRequest,
    ) -> Result<Page<DexTrade>> {
        debug!(token = %token, page = page.page, "Fetching DEX trades");
        let action = match side {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        };
        let body = serde_json::json!({
            "token_address": token.as_str(),
            "chain": self.chain,
            "date": date_range(window),
            "filters": { "action": action },
            "order_by": [{ "field": "block_timestamp", "direction": "ASC" }],
            "pagination": { "page": page.page, "per_page": page.per_page },
        });
        let (rows, is_last_page) = self
            .post_page::<DexTradeRow>(DEX_TRADES_PATH, body)
            .await?;

        let items = rows
            .into_iter()
            .map(|row| row.into_trade(side))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, is_last_page })
    }
}

/// Ensure the base URL parses and ends with '/', so endpoint joins append
fn normalize_base_url(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash)
        .map_err(|e| Error::Config(format!("Invalid gateway base_url {}: {}", raw, e)))
}

/// Map a non-success HTTP status to the error taxonomy
fn status_error(path: &str, status: u16, body: String) -> Error {
    match status {
        404 => Error::NotFound(format!("{}: {}", path, body)),
        429 | 500..=599 => {
            Error::GatewayUnavailable(format!("{} returned {}: {}", path, status, body))
        }
        _ => Error::Gateway { status, body },
    }
}

fn date_range(window: &ActivityWindow) -> serde_json::Value {
    serde_json::json!({
        "from": window.from.to_rfc3339(),
        "to": window.to.to_rfc3339(),
    })
}

/// Parse the timestamp formats the API emits (RFC 3339 or naive UTC)
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

// ============ API Response Types ============
// Every row field is optional on the wire; conversion decides which gaps are fatal

#[derive(Debug, Deserialize)]
struct Envelope<R> {
    #[serde(default = "Vec::new")]
    data: Vec<R>,
    pagination: Option<PaginationInfo>,
}

impl<R> Envelope<R> {
    fn into_rows(self, path: &str) -> Result<(Vec<R>, bool)> {
        let pagination = self.pagination.ok_or_else(|| {
            Error::MalformedRecord(format!("{} response has no pagination block", path))
        })?;
        Ok((self.data, pagination.is_last_page))
    }
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct PaginationInfo {
    page: Option<u32>,
    per_page: Option<u32>,
    is_last_page: bool,
}

#[derive(Debug, Deserialize)]
struct RelatedWalletRow {
    address: Option<String>,
    relation: Option<String>,
    transaction_hash: Option<String>,
    block_timestamp: Option<String>,
    order: Option<u32>,
}

impl RelatedWalletRow {
    fn into_edge(self, child: &WalletAddress) -> Result<FundingEdge> {
        let parent = self.address.ok_or_else(|| {
            Error::MalformedRecord(format!("related wallet of {} has no address", child))
        })?;
        let relation = self.relation.ok_or_else(|| {
            Error::MalformedRecord(format!(
                "related wallet {} of {} has no relation",
                parent, child
            ))
        })?;

        Ok(FundingEdge {
            child: child.clone(),
            parent: WalletAddress::new(parent),
            relation: FundingRelation::from_label(&relation),
            tx_hash: self.transaction_hash,
            timestamp: self.block_timestamp.as_deref().and_then(parse_timestamp),
            order: self.order.unwrap_or(u32::MAX),
        })
    }
}

#[derive(Debug, Deserialize)]
struct BalanceRow {
    token_symbol: Option<String>,
    token_amount: Option<f64>,
    value_usd: Option<f64>,
}

impl BalanceRow {
    fn into_record(self) -> Result<BalanceRecord> {
        let symbol = self
            .token_symbol
            .ok_or_else(|| Error::MalformedRecord("balance row has no token_symbol".to_string()))?;
        Ok(BalanceRecord {
            symbol,
            amount: self.token_amount,
            usd_value: self.value_usd,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TransferRow {
    token_symbol: Option<String>,
    token_amount: Option<f64>,
    from_address: Option<String>,
    to_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionRow {
    transaction_hash: Option<String>,
    block_timestamp: Option<String>,
    #[serde(default)]
    tokens_sent: Vec<TransferRow>,
    #[serde(default)]
    tokens_received: Vec<TransferRow>,
}

impl TransactionRow {
    fn into_record(self, owner: &WalletAddress) -> TransactionRecord {
        let convert = |rows: Vec<TransferRow>, outgoing: bool| -> Vec<TransferRecord> {
            rows.into_iter()
                .map(|row| {
                    let other = if outgoing { row.to_address } else { row.from_address };
                    TransferRecord {
                        symbol: row.token_symbol.unwrap_or_default(),
                        amount: row.token_amount.unwrap_or(0.0),
                        counterparty: other
                            .filter(|a| a.as_str() != owner.as_str())
                            .map(WalletAddress::new),
                    }
                })
                .collect()
        };

        let sent = convert(self.tokens_sent, true);
        let received = convert(self.tokens_received, false);
        let counterparty = sent
            .iter()
            .chain(received.iter())
            .find_map(|t| t.counterparty.clone());

        TransactionRecord {
            signature: self.transaction_hash,
            timestamp: self.block_timestamp.as_deref().and_then(parse_timestamp),
            sent,
            received,
            counterparty,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CounterpartyRow {
    counterparty_address: Option<String>,
    interaction_count: Option<u64>,
    total_volume_usd: Option<f64>,
    #[serde(default)]
    counterparty_address_label: Vec<String>,
}

impl CounterpartyRow {
    fn into_record(self) -> CounterpartyRecord {
        CounterpartyRecord {
            address: self.counterparty_address.map(WalletAddress::new),
            interaction_count: self.interaction_count.unwrap_or(0),
            volume_usd: self.total_volume_usd,
            labels: self.counterparty_address_label,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DexTradeRow {
    trader_address: Option<String>,
    block_timestamp: Option<String>,
    value_usd: Option<f64>,
}

impl DexTradeRow {
    fn into_trade(self, side: TradeSide) -> Result<DexTrade> {
        let trader = self
            .trader_address
            .ok_or_else(|| Error::MalformedRecord("dex trade has no trader_address".to_string()))?;
        let timestamp = self
            .block_timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or_else(|| {
                Error::MalformedRecord(format!(
                    "dex trade by {} has no usable block_timestamp",
                    trader
                ))
            })?;

        Ok(DexTrade {
            trader: WalletAddress::new(trader),
            timestamp,
            side,
            usd_value: self.value_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        let url = normalize_base_url("https://api.example.com/api/v1").unwrap();
        assert_eq!(
            url.join(BALANCES_PATH).unwrap().as_str(),
            "https://api.example.com/api/v1/profiler/address/current-balance"
        );
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error("x", 404, String::new()), Error::NotFound(_)));
        assert!(status_error("x", 429, String::new()).is_retryable());
        assert!(status_error("x", 503, String::new()).is_retryable());
        assert!(matches!(
            status_error("x", 401, "bad key".into()),
            Error::Gateway { status: 401, .. }
        ));
    }

    #[test]
    fn test_expired_related_pages_are_evicted() {
        let config = GatewayConfig {
            api_key: "key".to_string(),
            funder_cache_ttl_secs: 60,
            ..GatewayConfig::default()
        };
        let gateway = HttpGateway::new(&config).unwrap();
        let page = Page {
            items: Vec::new(),
            is_last_page: true,
        };

        gateway
            .related_cache
            .insert("fresh".to_string(), (Instant::now(), page.clone()));
        assert!(gateway.cached_related("fresh").is_some());

        let stale = Instant::now() - Duration::from_secs(120);
        gateway.related_cache.insert("stale".to_string(), (stale, page));
        assert!(gateway.cached_related("stale").is_none());
        assert!(!gateway.related_cache.contains_key("stale"));
        assert!(gateway.related_cache.contains_key("fresh"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-05-01T12:00:00Z").is_some());
        assert!(parse_timestamp("2024-05-01T12:00:00.250").is_some());
        assert!(parse_timestamp("2024-05-01 12:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_envelope_requires_pagination() {
        let json = r#"{"data": [{"token_symbol": "SOL", "token_amount": 1.0, "value_usd": null}]}"#;
        let envelope: Envelope<BalanceRow> = serde_json::from_str(json).unwrap();
        assert!(matches!(envelope.into_rows("balances"), Err(Error::MalformedRecord(_))));

        let json =
            r#"{"data": [], "pagination": {"page": 1, "per_page": 100, "is_last_page": true}}"#;
        let envelope: Envelope<BalanceRow> = serde_json::from_str(json).unwrap();
        let (rows, last) = envelope.into_rows("balances").unwrap();
        assert!(rows.is_empty());
        assert!(last);
    }

    #[test]
    fn test_related_row_conversion() {
        let child = WalletAddress::from("child");
        let row: RelatedWalletRow = serde_json::from_str(
            r#"{"address": "funder", "relation": "First Funder", "transaction_hash": "sig",
                "block_timestamp": "2024-05-01T12:00:00Z", "order": 1}"#,
        )
        .unwrap();
        let edge = row.into_edge(&child).unwrap();
        assert_eq!(edge.parent.as_str(), "funder");
        assert_eq!(edge.relation, FundingRelation::FirstFunder);
        assert!(edge.timestamp.is_some());

        let row: RelatedWalletRow =
            serde_json::from_str(r#"{"relation": "First Funder"}"#).unwrap();
        assert!(matches!(row.into_edge(&child), Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn test_transaction_row_counterparty() {
        let owner = WalletAddress::from("me");
        let row: TransactionRow = serde_json::from_str(
            r#"{"transaction_hash": "sig", "block_timestamp": "2024-05-01T12:00:00Z",
                "tokens_sent": [{"token_symbol": "SOL", "token_amount": 1.5,
                                 "from_address": "me", "to_address": "them"}]}"#,
        )
        .unwrap();
        let tx = row.into_record(&owner);
        assert_eq!(tx.counterparty.as_ref().map(|a| a.as_str()), Some("them"));
        assert_eq!(tx.sent.len(), 1);
        assert!(tx.received.is_empty());
    }

    #[test]
    fn test_dex_trade_requires_timestamp() {
        let row: DexTradeRow =
            serde_json::from_str(r#"{"trader_address": "t", "block_timestamp": null}"#).unwrap();
        assert!(matches!(row.into_trade(TradeSide::Buy), Err(Error::MalformedRecord(_))));
    }
}
