//! Shared data model for provenance analysis
//!
//! Every value here is transient: built per analysis run from live ledger
//! data and never persisted by the crate.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain-scoped wallet identifier
///
/// Opaque on purpose: the crate never interprets the bytes, it only compares
/// addresses that came from the same chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WalletAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Token (mint) identifier for a launch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TokenId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Inclusive time range used for activity and trade queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl ActivityWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Window ending now and reaching back `days`
    pub fn last_days(days: u32) -> Self {
        let to = Utc::now();
        Self {
            from: to - Duration::days(days as i64),
            to,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts <= self.to
    }
}

// ============ Funding graph ============

/// Kind of "related wallet" relation reported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingRelation {
    FirstFunder,
    Signer,
    DeployedVia,
    Other,
}

impl FundingRelation {
    /// Parse the relation names used by analytics APIs ("First Funder", "Deployed via", ...)
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "firstfunder" => FundingRelation::FirstFunder,
            "signer" => FundingRelation::Signer,
            "deployedvia" => FundingRelation::DeployedVia,
            _ => FundingRelation::Other,
        }
    }
}

/// Directed "funded by" edge: `child` was funded by `parent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingEdge {
    pub child: WalletAddress,
    pub parent: WalletAddress,
    pub relation: FundingRelation,
    pub tx_hash: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Ordering hint supplied by the ledger (lower = earlier relation)
    pub order: u32,
}

/// Category of a pre-identified wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Exchange,
    RootWallet,
    LaunchPlatform,
    MarketMaker,
    Other,
}

impl Default for EntityKind {
    fn default() -> Self {
        Self::Other
    }
}

/// How a funding-chain traversal ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainStatus {
    /// The last wallet has no first funder
    DeadEnd,
    /// The next parent was already on the chain
    CycleDetected { repeated: WalletAddress },
    /// The chain reached a pre-identified wallet
    KnownEntity {
        address: WalletAddress,
        label: String,
        kind: EntityKind,
    },
    /// The depth budget ran out before a terminal wallet was reached
    MaxDepthExceeded { max_depth: usize },
    /// The caller aborted the traversal
    Cancelled,
    /// A gateway read failed; the chain holds what was resolved before it
    Unknown { reason: String },
}

impl ChainStatus {
    /// True when the traversal reached a natural end (dead end, cycle or known entity)
    pub fn is_conclusive(&self) -> bool {
        matches!(
            self,
            ChainStatus::DeadEnd
                | ChainStatus::CycleDetected { .. }
                | ChainStatus::KnownEntity { .. }
        )
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, ChainStatus::CycleDetected { .. })
    }
}

/// Ordered provenance chain `[candidate, parent1, ..., root_or_deadend]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingChain {
    pub addresses: Vec<WalletAddress>,
    /// Edges followed, one per consecutive address pair
    pub edges: Vec<FundingEdge>,
    pub status: ChainStatus,
}

impl FundingChain {
    pub fn start(&self) -> &WalletAddress {
        &self.addresses[0]
    }

    /// Last address reached (root, dead end, or where traversal stopped)
    pub fn terminal(&self) -> &WalletAddress {
        &self.addresses[self.addresses.len() - 1]
    }

    /// Immediate first funder of the start wallet, if resolved
    pub fn first_funder(&self) -> Option<&WalletAddress> {
        self.addresses.get(1)
    }

    pub fn hops(&self) -> usize {
        self.addresses.len().saturating_sub(1)
    }

    pub fn contains(&self, address: &WalletAddress) -> bool {
        self.addresses.contains(address)
    }

    /// Label of the known entity the chain terminated at
    pub fn known_entity(&self) -> Option<(&WalletAddress, &str)> {
        match &self.status {
            ChainStatus::KnownEntity { address, label, .. } => Some((address, label.as_str())),
            _ => None,
        }
    }
}

// ============ Wallet profile ============

/// Balance of one token held by a wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub symbol: String,
    pub amount: f64,
    pub usd_value: Option<f64>,
}

/// Outcome of the optional one-hop ancestry lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Ancestry {
    NotRequested,
    NoFunder,
    Found { funder: WalletAddress },
    Unavailable { reason: String },
}

/// A field the gateway left out, recorded instead of failing the profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gap", rename_all = "snake_case")]
pub enum ProfileGap {
    /// No SOL entry in the balance list
    SolBalanceAbsent,
    /// A balance entry without an amount
    BalanceAmountAbsent { symbol: String },
    /// Transactions without a timestamp (counted, but not placed on a day)
    TransactionTimestampAbsent { count: u32 },
    /// Counterparty rows without an address
    CounterpartyAddressAbsent { count: u32 },
    /// The first-funder lookup failed
    FunderLookupFailed { reason: String },
}

/// Point-in-time behavioral snapshot of a wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletProfile {
    pub address: WalletAddress,
    pub window: ActivityWindow,
    pub sol_balance: f64,
    pub other_token_balances: Vec<TokenBalance>,
    /// Tokens (SOL included) with a positive balance
    pub distinct_tokens_held: u32,
    pub transaction_count: u64,
    pub active_days: u32,
    pub unique_counterparty_count: u32,
    pub average_tx_per_active_day: f64,
    /// Counterparties that are launch programs / bonding curves
    pub launch_platform_interactions: u32,
    pub first_funder: Option<WalletAddress>,
    pub ancestry: Ancestry,
    pub is_known_entity: bool,
    pub known_entity_label: Option<String>,
    pub gaps: Vec<ProfileGap>,
    pub built_at: DateTime<Utc>,
}

impl WalletProfile {
    /// Empty profile for a wallet, before any ledger data is folded in
    pub fn empty(address: WalletAddress, window: ActivityWindow) -> Self {
        Self {
            address,
            window,
            sol_balance: 0.0,
            other_token_balances: Vec::new(),
            distinct_tokens_held: 0,
            transaction_count: 0,
            active_days: 0,
            unique_counterparty_count: 0,
            average_tx_per_active_day: 0.0,
            launch_platform_interactions: 0,
            first_funder: None,
            ancestry: Ancestry::NotRequested,
            is_known_entity: false,
            known_entity_label: None,
            gaps: Vec::new(),
            built_at: Utc::now(),
        }
    }

    pub fn has_gaps(&self) -> bool {
        !self.gaps.is_empty()
    }
}

// ============ Classification ============

/// Behavioral label, listed in rule priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletLabel {
    Bot,
    DeployerCandidate,
    InsiderCandidate,
    Dormant,
    Unclassified,
}

/// Ordinal confidence in a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// One step lower, saturating at Low
    pub fn downgrade(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// Signals the classifier evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalName {
    // Bot
    HighTxFrequency,
    ManyCounterparties,
    HoldsEverything,
    // Deployer
    DeployerBalance,
    KnownAncestry,
    LaunchPlatformInteraction,
    // Insider
    SelectiveTrading,
    NarrowCounterparties,
    // Dormant
    DormantBalance,
    NoWindowActivity,
    // Informational, from the funding chain
    FundingCycle,
    ChainIncomplete,
}

/// Whether a signal's threshold fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    Crossed,
    NotCrossed,
    /// The input needed to evaluate the signal was missing
    Undetermined,
}

impl SignalOutcome {
    pub fn from_bool(crossed: bool) -> Self {
        if crossed {
            SignalOutcome::Crossed
        } else {
            SignalOutcome::NotCrossed
        }
    }

    pub fn is_crossed(&self) -> bool {
        matches!(self, SignalOutcome::Crossed)
    }
}

/// Observed value behind a piece of evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvidenceValue {
    Number(f64),
    Address(WalletAddress),
    Text(String),
    Missing,
}

/// One audited signal evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub signal: SignalName,
    pub value: EvidenceValue,
    /// Threshold compared against, when the signal is numeric
    pub threshold: Option<f64>,
    pub outcome: SignalOutcome,
}

impl Evidence {
    pub fn numeric(signal: SignalName, value: f64, threshold: f64, crossed: bool) -> Self {
        Self {
            signal,
            value: EvidenceValue::Number(value),
            threshold: Some(threshold),
            outcome: SignalOutcome::from_bool(crossed),
        }
    }

    pub fn undetermined(signal: SignalName, threshold: Option<f64>) -> Self {
        Self {
            signal,
            value: EvidenceValue::Missing,
            threshold,
            outcome: SignalOutcome::Undetermined,
        }
    }
}

/// Classifier verdict with the evidence that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub address: WalletAddress,
    pub label: WalletLabel,
    pub confidence: Confidence,
    pub evidence: Vec<Evidence>,
    /// False when any signal was undetermined or the profile had gaps
    pub data_complete: bool,
}

impl Classification {
    pub fn evidence_for(&self, signal: SignalName) -> Option<&Evidence> {
        self.evidence.iter().find(|e| e.signal == signal)
    }

    pub fn fired(&self) -> impl Iterator<Item = &Evidence> {
        self.evidence.iter().filter(|e| e.outcome.is_crossed())
    }
}

// ============ Launch correlation ============

/// Earliest buy of one wallet on one token launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyBuyerRecord {
    pub token_id: TokenId,
    pub wallet: WalletAddress,
    pub timestamp_of_buy: DateTime<Utc>,
    /// 1-based rank among the token's buyers
    pub position: u32,
    pub seconds_after_first_trade: i64,
    pub amount_usd: Option<f64>,
}

/// Early buyers of a single launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Launch {
    pub token_id: TokenId,
    pub buyers: Vec<EarlyBuyerRecord>,
}

/// A wallet recurring among the early buyers of several launches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossLaunchMatch {
    pub wallet: WalletAddress,
    pub tokens: Vec<TokenId>,
    pub appearance_count: usize,
    /// Aligned with `tokens`
    pub positions: Vec<u32>,
    /// Aligned with `tokens`, seconds after that token's first trade
    pub delays: Vec<i64>,
    /// Aligned with `tokens`, position / eligible buyers on that launch
    pub position_percentiles: Vec<f64>,
    pub mean_position: f64,
    pub mean_delay_secs: f64,
}
