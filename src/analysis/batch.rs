//! Per-run wallet analysis
//!
//! Each wallet is traced, profiled and classified, strictly in that order,
//! over one shared ledger. Independent wallets run concurrently up to the
//! configured limit; one wallet's failure never aborts its siblings.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analysis::classifier::BehavioralClassifier;
use crate::analysis::profile::{AncestryRequest, WalletProfileBuilder};
use crate::analysis::tracer::FundingChainTracer;
use crate::error::Result;
use crate::types::{ActivityWindow, Classification, FundingChain, WalletAddress, WalletProfile};

/// Batch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Wallets analyzed at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Everything learned about one wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletReport {
    pub address: WalletAddress,
    pub chain: FundingChain,
    pub profile: WalletProfile,
    pub classification: Classification,
}

/// Result for one wallet of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WalletOutcome {
    Analyzed(Box<WalletReport>),
    Failed {
        address: WalletAddress,
        reason: String,
        retryable: bool,
    },
}

impl WalletOutcome {
    pub fn address(&self) -> &WalletAddress {
        match self {
            WalletOutcome::Analyzed(report) => &report.address,
            WalletOutcome::Failed { address, .. } => address,
        }
    }

    pub fn report(&self) -> Option<&WalletReport> {
        match self {
            WalletOutcome::Analyzed(report) => Some(report),
            WalletOutcome::Failed { .. } => None,
        }
    }
}

/// Trace + profile + classify, for one wallet or many
pub struct WalletAnalyzer {
    tracer: Arc<FundingChainTracer>,
    builder: Arc<WalletProfileBuilder>,
    classifier: Arc<BehavioralClassifier>,
    config: BatchConfig,
    cancel: CancellationToken,
}

impl WalletAnalyzer {
    pub fn new(
        tracer: Arc<FundingChainTracer>,
        builder: Arc<WalletProfileBuilder>,
        classifier: Arc<BehavioralClassifier>,
        config: BatchConfig,
    ) -> Self {
        Self {
            tracer,
            builder,
            classifier,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts in-flight traces; partial chains are still reported
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Analyze one wallet
    pub async fn analyze(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
    ) -> Result<WalletReport> {
        let chain = self.tracer.trace_with_cancel(address, &self.cancel).await;
        let profile = self
            .builder
            .build_with(address, window, AncestryRequest::FromChain(&chain))
            .await?;
        let classification = self.classifier.classify(&profile, Some(&chain));

        Ok(WalletReport {
            address: address.clone(),
            chain,
            profile,
            classification,
        })
    }

    /// Analyze many wallets; one outcome per input, in input order
    pub async fn analyze_many(
        &self,
        addresses: &[WalletAddress],
        window: &ActivityWindow,
    ) -> Vec<WalletOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("analysis_run", run_id = %run_id);

        async {
            info!(
                wallets = addresses.len(),
                concurrency = self.config.concurrency,
                "Starting analysis run"
            );

            let outcomes: Vec<WalletOutcome> = stream::iter(addresses)
                .map(|address| async move {
                    match self.analyze(address, window).await {
                        Ok(report) => WalletOutcome::Analyzed(Box::new(report)),
                        Err(e) => {
                            warn!(wallet = %address.short(), error = %e, "Wallet analysis failed");
                            WalletOutcome::Failed {
                                address: address.clone(),
                                reason: e.to_string(),
                                retryable: e.is_retryable(),
                            }
                        }
                    }
                })
                .buffered(self.config.concurrency.max(1))
                .collect()
                .await;

            let failed = outcomes
                .iter()
                .filter(|o| matches!(o, WalletOutcome::Failed { .. }))
                .count();
            info!(analyzed = outcomes.len() - failed, failed, "Analysis run complete");
            outcomes
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::ClassifierThresholds;
    use crate::analysis::entities::{KnownEntities, LaunchPlatformConfig, LaunchPlatformMatcher};
    use crate::analysis::profile::ProfileConfig;
    use crate::analysis::tracer::TracerConfig;
    use crate::gateway::fixture::{FixtureFailure, FixtureGateway};
    use crate::gateway::{BalanceRecord, Ledger, LedgerConfig};
    use crate::types::{ChainStatus, Confidence, EntityKind, ProfileGap, WalletLabel};
    use std::time::Duration;

    fn analyzer(gateway: FixtureGateway, entities: KnownEntities) -> WalletAnalyzer {
        paced_analyzer(gateway, entities, Duration::ZERO, 2).0
    }

    fn paced_analyzer(
        gateway: FixtureGateway,
        entities: KnownEntities,
        interval: Duration,
        concurrency: usize,
    ) -> (WalletAnalyzer, Arc<Ledger>) {
        let config = LedgerConfig {
            min_call_interval: interval,
            max_retries: 0,
            ..LedgerConfig::default()
        };
        let ledger = Arc::new(Ledger::new(Arc::new(gateway), config));
        let entities = Arc::new(entities);
        let tracer = Arc::new(FundingChainTracer::new(
            ledger.clone(),
            entities.clone(),
            TracerConfig::default(),
        ));
        let launch = LaunchPlatformMatcher::from_config(&LaunchPlatformConfig::default()).unwrap();
        let builder = Arc::new(WalletProfileBuilder::new(
            ledger.clone(),
            tracer.clone(),
            Arc::new(launch),
            ProfileConfig::default(),
        ));
        let classifier = Arc::new(BehavioralClassifier::new(
            ClassifierThresholds::default(),
            entities,
        ));
        let analyzer =
            WalletAnalyzer::new(tracer, builder, classifier, BatchConfig { concurrency });
        (analyzer, ledger)
    }

    fn sol(amount: f64) -> Vec<BalanceRecord> {
        vec![BalanceRecord {
            symbol: "SOL".to_string(),
            amount: Some(amount),
            usd_value: None,
        }]
    }

    #[tokio::test]
    async fn test_deployer_through_chain() {
        let wallet = WalletAddress::from("dev");
        let gateway = FixtureGateway::new()
            .with_first_funder("dev", "mid")
            .with_first_funder("mid", "root")
            .with_balances(&wallet, sol(9.0));
        let mut entities = KnownEntities::new();
        entities.insert("root", "ROOT", EntityKind::RootWallet);

        let report = analyzer(gateway, entities)
            .analyze(&wallet, &ActivityWindow::last_days(30))
            .await
            .unwrap();

        assert!(matches!(report.chain.status, ChainStatus::KnownEntity { .. }));
        assert_eq!(report.profile.first_funder.as_ref().map(|a| a.as_str()), Some("mid"));
        assert_eq!(report.classification.label, WalletLabel::DeployerCandidate);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_ordered() {
        let good = WalletAddress::from("good");
        let also_good = WalletAddress::from("also_good");
        let gateway = FixtureGateway::new()
            .with_balances(&good, sol(0.0))
            .with_balances(&also_good, sol(0.0))
            .fail("bad", FixtureFailure::Malformed);

        let outcomes = analyzer(gateway, KnownEntities::new())
            .analyze_many(
                &[good.clone(), "bad".into(), also_good.clone()],
                &ActivityWindow::last_days(30),
            )
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].address(), &good);
        assert_eq!(outcomes[2].address(), &also_good);
        assert!(outcomes[0].report().is_some());
        assert!(matches!(&outcomes[1], WalletOutcome::Failed { retryable: false, .. }));
        assert_eq!(
            outcomes[2].report().map(|r| r.classification.label),
            Some(WalletLabel::Dormant)
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_partial_chains() {
        let wallet = WalletAddress::from("w");
        let gateway = FixtureGateway::new()
            .with_first_funder("w", "p")
            .with_balances(&wallet, sol(1.0));
        let analyzer = analyzer(gateway, KnownEntities::new());
        analyzer.cancel_token().cancel();

        let report = analyzer.analyze(&wallet, &ActivityWindow::last_days(30)).await.unwrap();
        assert_eq!(report.chain.status, ChainStatus::Cancelled);
        assert!(!report.classification.data_complete);
    }

    #[tokio::test]
    async fn test_wallet_without_any_ledger_rows_is_dormant() {
        let wallet = WalletAddress::from("empty");
        let report = analyzer(FixtureGateway::new(), KnownEntities::new())
            .analyze(&wallet, &ActivityWindow::last_days(30))
            .await
            .unwrap();

        assert_eq!(report.profile.sol_balance, 0.0);
        assert_eq!(report.profile.transaction_count, 0);
        assert!(report.profile.gaps.contains(&ProfileGap::SolBalanceAbsent));
        assert_eq!(report.classification.label, WalletLabel::Dormant);
        assert_eq!(report.classification.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn test_interval_holds_across_concurrent_wallets() {
        let wallets: Vec<WalletAddress> =
            ["w1", "w2", "w3", "w4"].iter().map(|w| (*w).into()).collect();
        let mut gateway = FixtureGateway::new();
        for wallet in &wallets {
            gateway = gateway.with_balances(wallet, sol(1.0));
        }
        let interval = Duration::from_millis(20);
        let (analyzer, ledger) = paced_analyzer(gateway, KnownEntities::new(), interval, 4);

        let started = std::time::Instant::now();
        let outcomes = analyzer
            .analyze_many(&wallets, &ActivityWindow::last_days(30))
            .await;
        let elapsed = started.elapsed();

        assert!(outcomes.iter().all(|o| o.report().is_some()));
        let calls = ledger.calls_made();
        assert!(calls >= 16);
        // One interval of slack for clock granularity; unpaced this run takes ~0
        assert!(elapsed >= interval * (calls as u32 - 2));
    }
}
