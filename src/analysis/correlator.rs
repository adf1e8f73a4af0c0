//! Cross-launch correlator
//!
//! Finds wallets that recur among the early buyers of several token launches.
//! Early-buyer sets are cut by position and/or delay after the first trade,
//! excluded wallets are dropped, and the survivors are ranked by how often
//! and how early they appear.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::gateway::{DexTrade, Ledger, TradeSide};
use crate::types::{
    ActivityWindow, CrossLaunchMatch, EarlyBuyerRecord, Launch, TokenId, WalletAddress,
};

/// Early-window cutoff; a buyer must satisfy every bound that is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyWindow {
    /// Keep buyers ranked at or below this position
    pub max_position: Option<u32>,
    /// Keep buyers at most this many seconds after the first trade
    pub max_delay_secs: Option<i64>,
}

impl EarlyWindow {
    pub fn first_buyers(n: u32) -> Self {
        Self {
            max_position: Some(n),
            max_delay_secs: None,
        }
    }

    pub fn first_seconds(secs: i64) -> Self {
        Self {
            max_position: None,
            max_delay_secs: Some(secs),
        }
    }

    pub fn admits(&self, position: u32, delay_secs: i64) -> bool {
        self.max_position.map(|max| position <= max).unwrap_or(true)
            && self.max_delay_secs.map(|max| delay_secs <= max).unwrap_or(true)
    }
}

/// Correlator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    #[serde(default = "default_max_position")]
    pub max_position: Option<u32>,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: Option<i64>,

    /// Launches a wallet must appear in to be reported
    #[serde(default = "default_min_appearances")]
    pub min_appearances: usize,
}

fn default_max_position() -> Option<u32> {
    Some(50)
}

fn default_max_delay_secs() -> Option<i64> {
    Some(300)
}

fn default_min_appearances() -> usize {
    2
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            max_position: default_max_position(),
            max_delay_secs: default_max_delay_secs(),
            min_appearances: default_min_appearances(),
        }
    }
}

impl CorrelatorConfig {
    pub fn early_window(&self) -> EarlyWindow {
        EarlyWindow {
            max_position: self.max_position,
            max_delay_secs: self.max_delay_secs,
        }
    }
}

/// Rank the buyers of one token and cut them at the early window
///
/// Buys are ordered by timestamp, then wallet; each wallet keeps only its
/// first buy. Delays are measured from the token's first buy.
pub fn early_buyers(
    token: &TokenId,
    trades: &[DexTrade],
    window: &EarlyWindow,
) -> Vec<EarlyBuyerRecord> {
    let mut buys: Vec<&DexTrade> = trades.iter().filter(|t| t.side == TradeSide::Buy).collect();
    buys.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.trader.cmp(&b.trader)));

    let Some(first) = buys.first().map(|t| t.timestamp) else {
        return Vec::new();
    };

    let mut seen: HashSet<&WalletAddress> = HashSet::new();
    let mut records = Vec::new();
    for trade in buys {
        if !seen.insert(&trade.trader) {
            continue;
        }

        let position = records.len() as u32 + 1;
        let delay = (trade.timestamp - first).num_seconds();
        if !window.admits(position, delay) {
            break;
        }

        records.push(EarlyBuyerRecord {
            token_id: token.clone(),
            wallet: trade.trader.clone(),
            timestamp_of_buy: trade.timestamp,
            position,
            seconds_after_first_trade: delay,
            amount_usd: trade.usd_value,
        });
    }

    records
}

/// One token to collect, with the range its trades are queried over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchQuery {
    pub token_id: TokenId,
    pub range: ActivityWindow,
}

/// Launches collected from the ledger, plus the tokens that failed
#[derive(Debug, Default)]
pub struct LaunchCollection {
    pub launches: Vec<Launch>,
    pub failures: Vec<(TokenId, String)>,
}

/// Query early buyers for several launches, `concurrency` tokens at a time
///
/// Order follows `queries`. A token whose trades cannot be read is reported
/// in `failures` and does not stop the others.
pub async fn collect_launches(
    ledger: &Ledger,
    queries: &[LaunchQuery],
    window: &EarlyWindow,
    concurrency: usize,
) -> LaunchCollection {
    let results: Vec<_> = stream::iter(queries)
        .map(|query| async move {
            let trades = ledger
                .early_trades(&query.token_id, &query.range, TradeSide::Buy)
                .await;
            (query, trades)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut collection = LaunchCollection::default();
    for (query, trades) in results {
        match trades {
            Ok(trades) => {
                let buyers = early_buyers(&query.token_id, &trades, window);
                debug!(
                    token = %query.token_id,
                    trades = trades.len(),
                    buyers = buyers.len(),
                    "Launch collected"
                );
                collection.launches.push(Launch {
                    token_id: query.token_id.clone(),
                    buyers,
                });
            }
            Err(e) => {
                warn!(token = %query.token_id, error = %e, "Failed to collect launch");
                collection.failures.push((query.token_id.clone(), e.to_string()));
            }
        }
    }

    collection
}

/// Wallets appearing in at least two launches
pub fn correlate(
    launches: &[Launch],
    window: &EarlyWindow,
    exclusions: &HashSet<WalletAddress>,
) -> Vec<CrossLaunchMatch> {
    correlate_with(launches, window, exclusions, default_min_appearances())
}

/// Wallets appearing in at least `min_appearances` launches
///
/// Tokens in each match keep the order of `launches`. Results are sorted by
/// appearance count (descending), mean position, mean delay, then wallet.
pub fn correlate_with(
    launches: &[Launch],
    window: &EarlyWindow,
    exclusions: &HashSet<WalletAddress>,
    min_appearances: usize,
) -> Vec<CrossLaunchMatch> {
    let mut seen_tokens: HashSet<&TokenId> = HashSet::new();
    let mut index: HashMap<&WalletAddress, Vec<(&EarlyBuyerRecord, f64)>> = HashMap::new();

    for launch in launches {
        if !seen_tokens.insert(&launch.token_id) {
            warn!(token = %launch.token_id, "Duplicate launch ignored");
            continue;
        }

        let mut earliest: HashMap<&WalletAddress, &EarlyBuyerRecord> = HashMap::new();
        for record in launch
            .buyers
            .iter()
            .filter(|r| window.admits(r.position, r.seconds_after_first_trade))
        {
            earliest
                .entry(&record.wallet)
                .and_modify(|current| {
                    if (record.timestamp_of_buy, record.position)
                        < (current.timestamp_of_buy, current.position)
                    {
                        *current = record;
                    }
                })
                .or_insert(record);
        }

        let eligible = earliest.len().max(1) as f64;
        for (wallet, record) in earliest {
            if exclusions.contains(wallet) {
                continue;
            }
            index
                .entry(wallet)
                .or_default()
                .push((record, record.position as f64 / eligible));
        }
    }

    let min_appearances = min_appearances.max(2);
    let mut matches: Vec<CrossLaunchMatch> = index
        .into_iter()
        .filter(|(_, hits)| hits.len() >= min_appearances)
        .map(|(wallet, hits)| build_match(wallet, hits, launches))
        .collect();

    matches.sort_by(|a, b| {
        b.appearance_count
            .cmp(&a.appearance_count)
            .then_with(|| a.mean_position.total_cmp(&b.mean_position))
            .then_with(|| a.mean_delay_secs.total_cmp(&b.mean_delay_secs))
            .then_with(|| a.wallet.cmp(&b.wallet))
    });

    info!(
        launches = seen_tokens.len(),
        excluded = exclusions.len(),
        matches = matches.len(),
        "Cross-launch correlation complete"
    );
    matches
}

fn build_match(
    wallet: &WalletAddress,
    mut hits: Vec<(&EarlyBuyerRecord, f64)>,
    launches: &[Launch],
) -> CrossLaunchMatch {
    // Tokens follow the caller's launch order
    let launch_rank = |token: &TokenId| {
        launches
            .iter()
            .position(|l| &l.token_id == token)
            .unwrap_or(usize::MAX)
    };
    hits.sort_by_key(|(record, _)| launch_rank(&record.token_id));

    let count = hits.len();
    let positions: Vec<u32> = hits.iter().map(|(r, _)| r.position).collect();
    let delays: Vec<i64> = hits.iter().map(|(r, _)| r.seconds_after_first_trade).collect();

    CrossLaunchMatch {
        wallet: wallet.clone(),
        tokens: hits.iter().map(|(r, _)| r.token_id.clone()).collect(),
        appearance_count: count,
        mean_position: positions.iter().map(|&p| p as f64).sum::<f64>() / count as f64,
        mean_delay_secs: delays.iter().map(|&d| d as f64).sum::<f64>() / count as f64,
        position_percentiles: hits.iter().map(|(_, pct)| *pct).collect(),
        positions,
        delays,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fixture::{FixtureFailure, FixtureGateway};
    use crate::gateway::LedgerConfig;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn buy(trader: &str, secs: i64) -> DexTrade {
        DexTrade {
            trader: trader.into(),
            timestamp: t0() + Duration::seconds(secs),
            side: TradeSide::Buy,
            usd_value: Some(100.0),
        }
    }

    fn launch(token: &str, buyers: &[&str]) -> Launch {
        let trades: Vec<DexTrade> = buyers
            .iter()
            .enumerate()
            .map(|(i, b)| buy(b, i as i64 * 10))
            .collect();
        Launch {
            token_id: token.into(),
            buyers: early_buyers(&token.into(), &trades, &EarlyWindow::first_buyers(100)),
        }
    }

    fn tokens(m: &CrossLaunchMatch) -> Vec<&str> {
        m.tokens.iter().map(|t| t.as_str()).collect()
    }

    #[test]
    fn test_early_buyers_rank_and_cut() {
        let mut trades = vec![buy("c", 30), buy("a", 0), buy("b", 10), buy("a", 20), buy("d", 400)];
        trades.push(DexTrade {
            side: TradeSide::Sell,
            ..buy("z", 1)
        });

        let records = early_buyers(&"tok".into(), &trades, &EarlyWindow::first_seconds(60));
        let wallets: Vec<&str> = records.iter().map(|r| r.wallet.as_str()).collect();
        assert_eq!(wallets, vec!["a", "b", "c"]);
        assert_eq!(records.iter().map(|r| r.position).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(records[2].seconds_after_first_trade, 30);

        let by_rank = early_buyers(&"tok".into(), &trades, &EarlyWindow::first_buyers(2));
        assert_eq!(by_rank.len(), 2);
    }

    #[test]
    fn test_same_second_first_buyers_are_kept() {
        let trades = vec![buy("late", 0), buy("early", 0)];
        let records = early_buyers(&"tok".into(), &trades, &EarlyWindow::first_seconds(0));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].wallet.as_str(), "early");
        assert_eq!(records[0].position, 1);
        assert_eq!(records[0].seconds_after_first_trade, 0);
        assert_eq!(records[1].seconds_after_first_trade, 0);
    }

    #[test]
    fn test_recurring_wallets_ranked_by_appearances() {
        let launches = vec![
            launch("A", &["x", "y", "solo"]),
            launch("B", &["y", "x"]),
            launch("C", &["other", "y"]),
        ];

        let matches = correlate(&launches, &EarlyWindow::first_buyers(10), &HashSet::new());

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].wallet.as_str(), "y");
        assert_eq!(tokens(&matches[0]), vec!["A", "B", "C"]);
        assert_eq!(matches[0].positions, vec![2, 1, 2]);
        assert_eq!(matches[1].wallet.as_str(), "x");
        assert_eq!(tokens(&matches[1]), vec!["A", "B"]);
        assert_eq!(matches[1].delays, vec![0, 10]);
        assert_eq!(matches[1].mean_position, 1.5);
    }

    #[test]
    fn test_ties_break_on_mean_position() {
        let launches = vec![
            launch("A", &["late", "early"]),
            launch("B", &["early", "late"]),
            launch("C", &["early"]),
        ];
        let window = EarlyWindow::first_buyers(10);

        let matches = correlate_with(&launches[..2], &window, &HashSet::new(), 2);
        assert_eq!(matches[0].mean_position, matches[1].mean_position);
        assert_eq!(matches[0].wallet.as_str(), "early");

        let matches = correlate(&launches, &window, &HashSet::new());
        assert_eq!(matches[0].wallet.as_str(), "early");
        assert_eq!(matches[0].appearance_count, 3);
    }

    #[test]
    fn test_exclusions_apply_before_ranking() {
        let launches = vec![launch("A", &["mm", "x"]), launch("B", &["mm", "x"])];
        let exclusions = HashSet::from([WalletAddress::from("mm")]);

        let matches = correlate(&launches, &EarlyWindow::first_buyers(10), &exclusions);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].wallet.as_str(), "x");
        assert_eq!(matches[0].position_percentiles, vec![1.0, 1.0]);
    }

    #[test]
    fn test_cutoff_applies_to_supplied_records() {
        let launches = vec![launch("A", &["a", "b", "c"]), launch("B", &["a", "b", "c"])];

        let matches = correlate(&launches, &EarlyWindow::first_buyers(2), &HashSet::new());
        let wallets: Vec<&str> = matches.iter().map(|m| m.wallet.as_str()).collect();
        assert_eq!(wallets, vec!["a", "b"]);
    }

    #[test]
    fn test_last_position_every_time_still_counts() {
        let launches = vec![
            launch("A", &["a", "tail"]),
            launch("B", &["b", "tail"]),
            launch("C", &["c", "tail"]),
        ];
        let matches = correlate(&launches, &EarlyWindow::first_buyers(2), &HashSet::new());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].wallet.as_str(), "tail");
        assert_eq!(matches[0].appearance_count, 3);
    }

    #[test]
    fn test_duplicate_launch_is_ignored() {
        let launches = vec![launch("A", &["x"]), launch("A", &["x"])];
        assert!(correlate(&launches, &EarlyWindow::first_buyers(10), &HashSet::new()).is_empty());
    }

    #[tokio::test]
    async fn test_collect_launches_reports_failures() {
        let token_a = TokenId::from("A");
        let gateway = FixtureGateway::new()
            .with_trades(&token_a, vec![buy("x", 0), buy("y", 5)])
            .fail("B", FixtureFailure::Unavailable);
        let config = LedgerConfig {
            min_call_interval: StdDuration::ZERO,
            max_retries: 0,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::new(Arc::new(gateway), config);
        let range = ActivityWindow::new(t0() - Duration::hours(1), t0() + Duration::hours(1));
        let queries = vec![
            LaunchQuery {
                token_id: token_a.clone(),
                range,
            },
            LaunchQuery {
                token_id: "B".into(),
                range,
            },
        ];

        let collection =
            collect_launches(&ledger, &queries, &EarlyWindow::first_buyers(10), 2).await;
        assert_eq!(collection.launches.len(), 1);
        assert_eq!(collection.launches[0].buyers.len(), 2);
        assert_eq!(collection.failures.len(), 1);
        assert_eq!(collection.failures[0].0.as_str(), "B");
    }
}
