//! Wallet profile builder
//!
//! Folds the balance, transaction and counterparty reads of one wallet into
//! a [`WalletProfile`]. Reads are issued one after another through the shared
//! ledger. Absent optional fields become [`ProfileGap`]s; only a failed read
//! fails the profile.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analysis::entities::LaunchPlatformMatcher;
use crate::analysis::tracer::FundingChainTracer;
use crate::error::Result;
use crate::gateway::{BalanceRecord, CounterpartyRecord, Ledger, TransactionRecord};
use crate::types::{
    ActivityWindow, Ancestry, ChainStatus, FundingChain, ProfileGap, TokenBalance, WalletAddress,
    WalletProfile,
};

/// Configuration for profile building
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Days of activity considered when no explicit window is given
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Resolve the first funder when profiling
    #[serde(default = "default_include_ancestry")]
    pub include_ancestry: bool,

    /// Symbol of the chain's native balance
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
}

fn default_window_days() -> u32 {
    30
}

fn default_include_ancestry() -> bool {
    true
}

fn default_native_symbol() -> String {
    "SOL".to_string()
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            include_ancestry: default_include_ancestry(),
            native_symbol: default_native_symbol(),
        }
    }
}

/// Where the profile's first funder comes from
#[derive(Debug, Clone, Copy)]
pub enum AncestryRequest<'a> {
    /// Leave the funder unresolved
    Skip,
    /// One-hop lookup through the tracer
    Lookup,
    /// Reuse a chain that was already traced for this wallet
    FromChain(&'a FundingChain),
}

/// Builds [`WalletProfile`]s over the shared ledger
pub struct WalletProfileBuilder {
    ledger: Arc<Ledger>,
    tracer: Arc<FundingChainTracer>,
    launch_platform: Arc<LaunchPlatformMatcher>,
    config: ProfileConfig,
}

impl WalletProfileBuilder {
    pub fn new(
        ledger: Arc<Ledger>,
        tracer: Arc<FundingChainTracer>,
        launch_platform: Arc<LaunchPlatformMatcher>,
        config: ProfileConfig,
    ) -> Self {
        Self {
            ledger,
            tracer,
            launch_platform,
            config,
        }
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    /// Window ending now, `window_days` long
    pub fn default_window(&self) -> ActivityWindow {
        ActivityWindow::last_days(self.config.window_days)
    }

    /// Build a profile, resolving ancestry when configured to
    pub async fn build(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
    ) -> Result<WalletProfile> {
        let ancestry = if self.config.include_ancestry {
            AncestryRequest::Lookup
        } else {
            AncestryRequest::Skip
        };
        self.build_with(address, window, ancestry).await
    }

    /// Build a profile with an explicit ancestry source
    pub async fn build_with(
        &self,
        address: &WalletAddress,
        window: &ActivityWindow,
        ancestry: AncestryRequest<'_>,
    ) -> Result<WalletProfile> {
        let balances = self.ledger.balances(address).await?;
        let transactions = self.ledger.transactions(address, window).await?;
        let counterparties = self.ledger.counterparties(address, window).await?;

        let mut profile = WalletProfile::empty(address.clone(), *window);
        apply_balances(&mut profile, &balances, &self.config.native_symbol);
        let tx_counterparties = apply_transactions(&mut profile, &transactions);
        apply_counterparties(
            &mut profile,
            &counterparties,
            tx_counterparties,
            &self.launch_platform,
        );

        if let Some(entity) = self.tracer.entities().lookup(address) {
            profile.is_known_entity = true;
            profile.known_entity_label = Some(entity.label.clone());
        }

        let ancestry = match ancestry {
            AncestryRequest::Skip => None,
            AncestryRequest::Lookup => Some(match self.tracer.first_hop(address).await {
                Ok(Some(edge)) => Ancestry::Found {
                    funder: edge.parent,
                },
                Ok(None) => Ancestry::NoFunder,
                Err(e) => Ancestry::Unavailable {
                    reason: e.to_string(),
                },
            }),
            AncestryRequest::FromChain(chain) => Some(ancestry_from_chain(chain)),
        };
        if let Some(ancestry) = ancestry {
            set_ancestry(&mut profile, ancestry);
        }

        if profile.has_gaps() {
            warn!(wallet = %address.short(), gaps = profile.gaps.len(), "Profile built with gaps");
        }
        debug!(
            wallet = %address.short(),
            sol = profile.sol_balance,
            txs = profile.transaction_count,
            active_days = profile.active_days,
            counterparties = profile.unique_counterparty_count,
            "Profile built"
        );

        Ok(profile)
    }
}

fn set_ancestry(profile: &mut WalletProfile, ancestry: Ancestry) {
    match &ancestry {
        Ancestry::Found { funder } => profile.first_funder = Some(funder.clone()),
        Ancestry::Unavailable { reason } => profile.gaps.push(ProfileGap::FunderLookupFailed {
            reason: reason.clone(),
        }),
        Ancestry::NoFunder | Ancestry::NotRequested => {}
    }
    profile.ancestry = ancestry;
}

/// First-funder ancestry implied by an already traced chain
pub fn ancestry_from_chain(chain: &FundingChain) -> Ancestry {
    if let Some(funder) = chain.first_funder() {
        return Ancestry::Found {
            funder: funder.clone(),
        };
    }

    match &chain.status {
        ChainStatus::DeadEnd => Ancestry::NoFunder,
        // Only a self-funded wallet cycles with a one-address chain
        ChainStatus::CycleDetected { repeated } => Ancestry::Found {
            funder: repeated.clone(),
        },
        ChainStatus::KnownEntity { .. } => Ancestry::NotRequested,
        ChainStatus::Unknown { reason } => Ancestry::Unavailable {
            reason: reason.clone(),
        },
        ChainStatus::Cancelled => Ancestry::Unavailable {
            reason: "trace cancelled".to_string(),
        },
        ChainStatus::MaxDepthExceeded { max_depth } => Ancestry::Unavailable {
            reason: format!("max depth {} exceeded", max_depth),
        },
    }
}

/// Fold balance rows: native balance, other tokens, distinct holdings
pub fn apply_balances(profile: &mut WalletProfile, records: &[BalanceRecord], native_symbol: &str) {
    let mut native_seen = false;
    let mut held: HashSet<String> = HashSet::new();

    for record in records {
        let amount = match record.amount {
            Some(amount) => amount,
            None => {
                profile.gaps.push(ProfileGap::BalanceAmountAbsent {
                    symbol: record.symbol.clone(),
                });
                0.0
            }
        };

        if amount > 0.0 {
            held.insert(record.symbol.to_ascii_uppercase());
        }

        if record.symbol.eq_ignore_ascii_case(native_symbol) {
            native_seen = true;
            profile.sol_balance += amount;
        } else {
            profile.other_token_balances.push(TokenBalance {
                symbol: record.symbol.clone(),
                amount,
                usd_value: record.usd_value,
            });
        }
    }

    if !native_seen {
        profile.gaps.push(ProfileGap::SolBalanceAbsent);
    }
    profile.distinct_tokens_held = held.len() as u32;
}

/// Fold transactions; returns the counterparties they name
pub fn apply_transactions(
    profile: &mut WalletProfile,
    transactions: &[TransactionRecord],
) -> HashSet<WalletAddress> {
    let mut days: HashSet<NaiveDate> = HashSet::new();
    let mut undated = 0u32;
    let mut counterparties = HashSet::new();

    for tx in transactions {
        match tx.timestamp {
            Some(ts) => {
                days.insert(ts.date_naive());
            }
            None => undated += 1,
        }

        let transfer_parties = tx
            .sent
            .iter()
            .chain(tx.received.iter())
            .filter_map(|t| t.counterparty.as_ref());
        for party in tx.counterparty.iter().chain(transfer_parties) {
            if party != &profile.address {
                counterparties.insert(party.clone());
            }
        }
    }

    if undated > 0 {
        profile
            .gaps
            .push(ProfileGap::TransactionTimestampAbsent { count: undated });
    }

    profile.transaction_count = transactions.len() as u64;
    profile.active_days = days.len() as u32;
    profile.average_tx_per_active_day = if profile.active_days == 0 {
        0.0
    } else {
        profile.transaction_count as f64 / profile.active_days as f64
    };

    counterparties
}

/// Fold counterparty aggregates into the counterparty and launch-platform counts
pub fn apply_counterparties(
    profile: &mut WalletProfile,
    records: &[CounterpartyRecord],
    mut seen: HashSet<WalletAddress>,
    launch_platform: &LaunchPlatformMatcher,
) {
    let mut unaddressed = 0u32;
    let mut launch_addresses: HashSet<&WalletAddress> = HashSet::new();
    let mut launch_unaddressed = 0u32;

    for record in records {
        let is_launch = launch_platform.matches_counterparty(record);
        match &record.address {
            Some(address) => {
                if address != &profile.address {
                    seen.insert(address.clone());
                }
                if is_launch {
                    launch_addresses.insert(address);
                }
            }
            None => {
                unaddressed += 1;
                if is_launch {
                    launch_unaddressed += 1;
                }
            }
        }
    }

    if unaddressed > 0 {
        profile
            .gaps
            .push(ProfileGap::CounterpartyAddressAbsent { count: unaddressed });
    }

    profile.unique_counterparty_count = seen.len() as u32;
    profile.launch_platform_interactions = launch_addresses.len() as u32 + launch_unaddressed;
}
