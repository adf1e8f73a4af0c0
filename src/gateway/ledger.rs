//! Shared, rate-limited ledger client
//!
//! One `Ledger` is built per analysis run and shared (via `Arc`) by the
//! tracer, profile builder and correlator. Every page request, from every
//! concurrent work item, goes through the same governor limiter, so the
//! configured minimum inter-call interval holds in aggregate.

use backoff::{future::retry, ExponentialBackoff};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::gateway::{
    BalanceRecord, CounterpartyRecord, DexTrade, LedgerGateway, Page, PageRequest, TradeSide,
    TransactionRecord,
};
use crate::types::{ActivityWindow, FundingEdge, FundingRelation, TokenId, WalletAddress};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Pacing, retry and pagination policy for a [`Ledger`]
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Rows requested per page
    pub page_size: u32,
    /// Hard bound on pages drained per query
    pub max_pages: u32,
    /// Minimum spacing between any two gateway calls (zero disables pacing)
    pub min_call_interval: Duration,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// First backoff delay
    pub retry_base_delay: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 50,
            min_call_interval: Duration::from_millis(1500),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

impl From<&GatewayConfig> for LedgerConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            page_size: config.page_size,
            max_pages: config.max_pages,
            min_call_interval: Duration::from_millis(config.min_call_interval_ms),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

/// Rate-limited, paginating wrapper around a [`LedgerGateway`]
pub struct Ledger {
    gateway: Arc<dyn LedgerGateway>,
    config: LedgerConfig,
    limiter: Option<DirectLimiter>,
    calls: AtomicU64,
}

impl Ledger {
    /// Create a ledger over `gateway`
    pub fn new(gateway: Arc<dyn LedgerGateway>, config: LedgerConfig) -> Self {
        let limiter = Quota::with_period(config.min_call_interval).map(RateLimiter::direct);

        debug!(
            interval_ms = config.min_call_interval.as_millis() as u64,
            page_size = config.page_size,
            "Ledger initialized"
        );

        Self {
            gateway,
            config,
            limiter,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of gateway calls issued so far (retries included)
    pub fn calls_made(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Wait for the shared limiter to admit one more call
    async fn pace(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Run one paced gateway call, retrying transient failures with backoff
    async fn request<T, F, Fut>(&self, endpoint: &str, fetch: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = ExponentialBackoff {
            initial_interval: self.config.retry_base_delay,
            max_interval: self.config.retry_base_delay * 8,
            max_elapsed_time: None,
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);

        retry(policy, || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.pace().await;
            self.calls.fetch_add(1, Ordering::Relaxed);

            match fetch().await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    warn!(endpoint, attempt, error = %e, "Retryable gateway error");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    /// Drain every page of a query until the gateway signals the last page
    async fn collect_pages<T, F, Fut>(&self, endpoint: &str, fetch: F) -> Result<Vec<T>>
    where
        F: Fn(PageRequest) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
    {
        let mut items = Vec::new();
        let mut request = PageRequest::first(self.config.page_size);

        loop {
            if request.page > self.config.max_pages {
                return Err(Error::PaginationLimit {
                    endpoint: endpoint.to_string(),
                    pages: self.config.max_pages,
                });
            }

            let page = self.request(endpoint, || fetch(request)).await?;
            debug!(
                endpoint,
                page = request.page,
                rows = page.items.len(),
                last = page.is_last_page,
                "Fetched page"
            );
            items.extend(page.items);

            if page.is_last_page {
                return Ok(items);
            }
            request = request.next();
        }
    }

    /// All related-wallet relations of `address`
    pub async fn related_wallets(&self, address: &WalletAddress) -> Result<Vec<FundingEdge>> {
        self.collect_pages("related_wallets", move |page| {
            self.gateway.related_wallets(address, page)
        })
        .await
    }

    /// The wallet's first funder, if the ledger knows one
    ///
    /// With several first-funder edges the lowest `order` wins, then the
    /// earliest timestamp. A wallet the ledger has no data for has no funder.
    pub async fn first_funder(&self, address: &WalletAddress) -> Result<Option<FundingEdge>> {
        let edges = match self.related_wallets(address).await {
            Ok(edges) => edges,
            Err(Error::NotFound(_)) => {
                debug!(address = %address.short(), "No ledger data for wallet");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(edges
            .into_iter()
            .filter(|e| e.relation == FundingRelation::FirstFunder)
            .min_by(|a, b| {
                (a.order, a.timestamp.is_none(), a.timestamp, &a.parent)
                    .cmp(&(b.order, b.timestamp.is_none(), b.timestamp, &b.parent))
            }))
    }

    /// Current balances of `address`
    pub async fn balances(&self, address: &WalletAddress) -> Result<Vec<BalanceRecord>> {
        self.collect_pages("balances", move |page| self.gateway.balances(address, page))
            .await
    }

    /// Transactions of `address` inside `window`
    pub async fn transactions(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
    ) -> Result<Vec<TransactionRecord>> {
        self.collect_pages("transactions", move |page| {
            self.gateway.transactions(address, window, page)
        })
        .await
    }

    /// Counterparty aggregates of `address` inside `window`
    pub async fn counterparties(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
    ) -> Result<Vec<CounterpartyRecord>> {
        self.collect_pages("counterparties", move |page| {
            self.gateway.counterparties(address, window, page)
        })
        .await
    }

    /// DEX trades on `token` inside `window`
    pub async fn early_trades(
        &self,
        token: &TokenId,
        window: &ActivityWindow,
        side: TradeSide,
    ) -> Result<Vec<DexTrade>> {
        self.collect_pages("dex_trades", move |page| {
            self.gateway.dex_trades(token, window, side, page)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fixture::{FixtureFailure, FixtureGateway};
    use chrono::Utc;
    use std::time::Instant;

    fn fast_config() -> LedgerConfig {
        LedgerConfig {
            page_size: 2,
            max_pages: 10,
            min_call_interval: Duration::ZERO,
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    fn balance(symbol: &str) -> BalanceRecord {
        BalanceRecord {
            symbol: symbol.to_string(),
            amount: Some(1.0),
            usd_value: None,
        }
    }

    #[tokio::test]
    async fn test_drains_all_pages() {
        let wallet = WalletAddress::from("wallet1");
        let gateway = FixtureGateway::new().with_page_size(2).with_balances(
            &wallet,
            vec![balance("SOL"), balance("USDC"), balance("BONK"), balance("WIF"), balance("JUP")],
        );
        let ledger = Ledger::new(Arc::new(gateway), fast_config());

        let balances = ledger.balances(&wallet).await.unwrap();
        assert_eq!(balances.len(), 5);
        assert_eq!(ledger.calls_made(), 3);
    }

    #[tokio::test]
    async fn test_pagination_limit_is_an_error() {
        let wallet = WalletAddress::from("wallet1");
        let gateway = FixtureGateway::new()
            .with_page_size(1)
            .with_balances(&wallet, vec![balance("SOL"), balance("USDC"), balance("BONK")]);
        let config = LedgerConfig {
            max_pages: 2,
            ..fast_config()
        };
        let ledger = Ledger::new(Arc::new(gateway), config);

        let err = ledger.balances(&wallet).await.unwrap_err();
        assert!(matches!(err, Error::PaginationLimit { pages: 2, .. }));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let wallet = WalletAddress::from("wallet1");
        let gateway = FixtureGateway::new()
            .with_balances(&wallet, vec![balance("SOL")])
            .fail(wallet.as_str(), FixtureFailure::UnavailableTimes(2));
        let ledger = Ledger::new(Arc::new(gateway), fast_config());

        let balances = ledger.balances(&wallet).await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(ledger.calls_made(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let wallet = WalletAddress::from("wallet1");
        let gateway = FixtureGateway::new().fail(wallet.as_str(), FixtureFailure::Unavailable);
        let ledger = Ledger::new(Arc::new(gateway), fast_config());

        let err = ledger.balances(&wallet).await.unwrap_err();
        assert!(matches!(err, Error::GatewayUnavailable(_)));
        assert_eq!(ledger.calls_made(), 3);
    }

    #[tokio::test]
    async fn test_malformed_is_not_retried() {
        let wallet = WalletAddress::from("wallet1");
        let gateway = FixtureGateway::new().fail(wallet.as_str(), FixtureFailure::Malformed);
        let ledger = Ledger::new(Arc::new(gateway), fast_config());

        let err = ledger.balances(&wallet).await.unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(_)));
        assert_eq!(ledger.calls_made(), 1);
    }

    #[tokio::test]
    async fn test_first_funder_prefers_lowest_order() {
        let wallet = WalletAddress::from("child");
        let edge = |parent: &str, relation, order| FundingEdge {
            child: wallet.clone(),
            parent: parent.into(),
            relation,
            tx_hash: None,
            timestamp: Some(Utc::now()),
            order,
        };
        let gateway = FixtureGateway::new()
            .with_edge(edge("signer", FundingRelation::Signer, 0))
            .with_edge(edge("late", FundingRelation::FirstFunder, 2))
            .with_edge(edge("early", FundingRelation::FirstFunder, 1));
        let ledger = Ledger::new(Arc::new(gateway), fast_config());

        let funder = ledger.first_funder(&wallet).await.unwrap().unwrap();
        assert_eq!(funder.parent.as_str(), "early");
    }

    #[tokio::test]
    async fn test_not_found_means_no_funder() {
        let wallet = WalletAddress::from("ghost");
        let gateway = FixtureGateway::new().fail(wallet.as_str(), FixtureFailure::NotFound);
        let ledger = Ledger::new(Arc::new(gateway), fast_config());

        assert!(ledger.first_funder(&wallet).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_calls_are_paced() {
        let wallet = WalletAddress::from("wallet1");
        let gateway = FixtureGateway::new()
            .with_page_size(1)
            .with_balances(&wallet, vec![balance("SOL"), balance("USDC"), balance("BONK")]);
        let config = LedgerConfig {
            min_call_interval: Duration::from_millis(50),
            ..fast_config()
        };
        let ledger = Ledger::new(Arc::new(gateway), config);

        let started = Instant::now();
        ledger.balances(&wallet).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_interval_is_shared_by_concurrent_queries() {
        let wallets: Vec<WalletAddress> = (0..6).map(|i| format!("wallet{}", i).into()).collect();
        let mut gateway = FixtureGateway::new();
        for wallet in &wallets {
            gateway = gateway.with_balances(wallet, vec![balance("SOL")]);
        }
        let interval = Duration::from_millis(30);
        let config = LedgerConfig {
            min_call_interval: interval,
            ..fast_config()
        };
        let ledger = Arc::new(Ledger::new(Arc::new(gateway), config));

        let started = Instant::now();
        let results = futures::future::join_all(wallets.iter().map(|w| ledger.balances(w))).await;
        let elapsed = started.elapsed();

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(ledger.calls_made(), 6);
        assert!(elapsed >= interval * 4);
    }
}
