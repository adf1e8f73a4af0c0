//! CLI command implementations

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::{
    cluster_by_funder, collect_launches, correlate_with, BehavioralClassifier, EarlyWindow,
    FundingChainTracer, FundingCluster, KnownEntities, LaunchPlatformMatcher, LaunchQuery,
    WalletAnalyzer, WalletOutcome, WalletProfileBuilder,
};
use crate::config::{validate_address, Config, CorrelatorConfig};
use crate::error::Error;
use crate::gateway::{
    FixtureGateway, FixtureSnapshot, HttpGateway, Ledger, LedgerConfig, LedgerGateway,
};
use crate::types::{ActivityWindow, CrossLaunchMatch, FundingChain, TokenId, WalletAddress};

/// Components wired for one CLI invocation (one analysis run)
pub struct Session {
    pub ledger: Arc<Ledger>,
    pub entities: Arc<KnownEntities>,
    pub tracer: Arc<FundingChainTracer>,
    pub builder: Arc<WalletProfileBuilder>,
    pub analyzer: WalletAnalyzer,
    config: Config,
    replay: bool,
}

impl Session {
    /// Wire the analysis over the live gateway, or over a recorded snapshot
    pub fn open(config: &Config, fixture: Option<&Path>) -> Result<Self> {
        let mut ledger_config = LedgerConfig::from(&config.gateway);

        let gateway: Arc<dyn LedgerGateway> = match fixture {
            Some(path) => {
                let snapshot = FixtureSnapshot::load(path)
                    .with_context(|| format!("Failed to load fixture {}", path.display()))?;
                info!(fixture = %path.display(), "Replaying recorded ledger snapshot");
                ledger_config.min_call_interval = Duration::ZERO;
                Arc::new(FixtureGateway::from_snapshot(snapshot))
            }
            None => Arc::new(HttpGateway::new(&config.gateway)?),
        };

        let ledger = Arc::new(Ledger::new(gateway, ledger_config));
        let entities = Arc::new(KnownEntities::from_config(
            &config.known_entities,
            &config.exclusions,
        ));
        let launch_platform = Arc::new(LaunchPlatformMatcher::from_config(
            &config.launch_platform,
        )?);

        let tracer = Arc::new(FundingChainTracer::new(
            ledger.clone(),
            entities.clone(),
            config.tracer.clone(),
        ));
        let builder = Arc::new(WalletProfileBuilder::new(
            ledger.clone(),
            tracer.clone(),
            launch_platform,
            config.profile.clone(),
        ));
        let classifier = Arc::new(BehavioralClassifier::new(
            config.classifier.clone(),
            entities.clone(),
        ));
        let analyzer = WalletAnalyzer::new(
            tracer.clone(),
            builder.clone(),
            classifier,
            config.batch.clone(),
        );

        Ok(Self {
            ledger,
            entities,
            tracer,
            builder,
            analyzer,
            config: config.clone(),
            replay: fixture.is_some(),
        })
    }

    /// Cancels in-flight traces (wired to Ctrl-C by the binary)
    pub fn cancel_token(&self) -> CancellationToken {
        self.analyzer.cancel_token()
    }

    /// Parse a wallet argument; live runs require a real public key
    pub fn address(&self, raw: &str) -> Result<WalletAddress> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidAddress("empty address".to_string()).into());
        }
        if !self.replay {
            validate_address(raw).map_err(|e| Error::InvalidAddress(e.to_string()))?;
        }
        Ok(WalletAddress::from(raw))
    }

    fn addresses(&self, raw: &[String]) -> Result<Vec<WalletAddress>> {
        raw.iter().map(|a| self.address(a)).collect()
    }

    fn window(&self, days: Option<u32>) -> ActivityWindow {
        ActivityWindow::last_days(days.unwrap_or(self.config.profile.window_days))
    }
}

#[derive(Serialize)]
struct TraceOutput {
    chains: Vec<FundingChain>,
    clusters: Vec<FundingCluster>,
}

#[derive(Serialize)]
struct ClassifyOutput {
    wallets: Vec<WalletOutcome>,
    clusters: Vec<FundingCluster>,
}

#[derive(Serialize)]
struct CorrelateOutput {
    launches: usize,
    failed_tokens: Vec<FailedToken>,
    matches: Vec<CrossLaunchMatch>,
}

#[derive(Serialize)]
struct FailedToken {
    token: TokenId,
    reason: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Trace funding chains for one or more wallets
pub async fn trace(session: &Session, addresses: &[String]) -> Result<()> {
    let addresses = session.addresses(addresses)?;
    let cancel = session.cancel_token();

    let mut chains = Vec::with_capacity(addresses.len());
    for address in &addresses {
        chains.push(session.tracer.trace_with_cancel(address, &cancel).await);
    }
    let clusters = cluster_by_funder(&chains, &session.entities);

    info!(wallets = chains.len(), calls = session.ledger.calls_made(), "Trace complete");
    print_json(&TraceOutput { chains, clusters })
}

/// Build the behavioral profile of one wallet
pub async fn profile(session: &Session, address: &str, days: Option<u32>) -> Result<()> {
    let address = session.address(address)?;
    let profile = session.builder.build(&address, &session.window(days)).await?;
    print_json(&profile)
}

/// Trace, profile and classify wallets
pub async fn classify(session: &Session, addresses: &[String], days: Option<u32>) -> Result<()> {
    let addresses = session.addresses(addresses)?;
    let outcomes = session
        .analyzer
        .analyze_many(&addresses, &session.window(days))
        .await;

    let chains: Vec<FundingChain> = outcomes
        .iter()
        .filter_map(|o| o.report().map(|r| r.chain.clone()))
        .collect();
    let clusters = cluster_by_funder(&chains, &session.entities);

    print_json(&ClassifyOutput {
        wallets: outcomes,
        clusters,
    })
}

/// Find wallets recurring among the early buyers of several launches
pub async fn correlate(
    session: &Session,
    tokens: &[String],
    days: Option<u32>,
    max_position: Option<u32>,
    max_delay_secs: Option<i64>,
) -> Result<()> {
    if tokens.len() < 2 {
        anyhow::bail!("correlate needs at least two tokens, got {}", tokens.len());
    }

    let config = &session.config.correlator;
    let window = early_window(config, max_position, max_delay_secs);
    let range = session.window(days);
    let queries: Vec<LaunchQuery> = tokens
        .iter()
        .map(|t| LaunchQuery {
            token_id: TokenId::from(t.trim()),
            range,
        })
        .collect();

    let collection = collect_launches(
        &session.ledger,
        &queries,
        &window,
        session.config.batch.concurrency,
    )
    .await;
    if !collection.failures.is_empty() {
        warn!(failed = collection.failures.len(), "Some launches could not be collected");
    }

    let matches = correlate_with(
        &collection.launches,
        &window,
        &session.entities.exclusion_set(),
        config.min_appearances,
    );

    print_json(&CorrelateOutput {
        launches: collection.launches.len(),
        failed_tokens: collection
            .failures
            .into_iter()
            .map(|(token, reason)| FailedToken { token, reason })
            .collect(),
        matches,
    })
}

/// Command-line cutoffs override the configured ones field by field
fn early_window(
    config: &CorrelatorConfig,
    max_position: Option<u32>,
    max_delay_secs: Option<i64>,
) -> EarlyWindow {
    let configured = config.early_window();
    EarlyWindow {
        max_position: max_position.or(configured.max_position),
        max_delay_secs: max_delay_secs.or(configured.max_delay_secs),
    }
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn snapshot_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "related": {{
                    "child": [{{"child": "child", "parent": "root", "relation": "first_funder",
                                "tx_hash": null, "timestamp": null, "order": 0}}]
                }},
                "balances": {{"child": [{{"symbol": "SOL", "amount": 0.0, "usd_value": null}}]}}
            }}"#
        )
        .unwrap();
        file
    }

    #[tokio::test]
    async fn test_session_over_fixture() {
        let file = snapshot_file();
        let session = Session::open(&Config::default(), Some(file.path())).unwrap();

        let address = session.address("child").unwrap();
        let chain = session.tracer.trace(&address).await;
        assert_eq!(chain.addresses.len(), 2);
        assert_eq!(session.ledger.config().min_call_interval, Duration::ZERO);
    }

    #[test]
    fn test_live_session_requires_api_key() {
        assert!(Session::open(&Config::default(), None).is_err());
    }

    #[test]
    fn test_live_addresses_are_validated() {
        let mut config = Config::default();
        config.gateway.api_key = "key".to_string();
        let session = Session::open(&config, None).unwrap();

        assert!(session.address("child").is_err());
        assert!(session
            .address("5tzFkiKscXHK5ZXCGbXZxdw7gTjjD1mBwuoFbhUvuAi9")
            .is_ok());
    }

    #[test]
    fn test_cutoff_overrides_fall_back_per_field() {
        let config = CorrelatorConfig::default();

        let window = early_window(&config, Some(10), None);
        assert_eq!(window.max_position, Some(10));
        assert_eq!(window.max_delay_secs, Some(300));

        let window = early_window(&config, None, Some(60));
        assert_eq!(window.max_position, Some(50));
        assert_eq!(window.max_delay_secs, Some(60));

        let window = early_window(&config, None, None);
        assert_eq!(window.max_position, Some(50));
        assert_eq!(window.max_delay_secs, Some(300));
    }
}
