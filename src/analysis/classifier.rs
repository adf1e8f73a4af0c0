//! Behavioral classifier
//!
//! A fixed rule ladder over a [`WalletProfile`] (and optionally its funding
//! chain). Rule priority: Bot > DeployerCandidate > InsiderCandidate >
//! Dormant > Unclassified. Every evaluated signal is returned as evidence,
//! including the ones that did not fire or could not be evaluated.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::analysis::entities::KnownEntities;
use crate::types::{
    Ancestry, ChainStatus, Classification, Confidence, Evidence, EvidenceValue, FundingChain,
    SignalName, SignalOutcome, WalletAddress, WalletLabel, WalletProfile,
};

/// One authoritative threshold per signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierThresholds {
    /// Bot when average tx per active day is above this
    #[serde(default = "default_bot_tx_per_day")]
    pub bot_tx_per_day: f64,

    /// Bot when unique counterparties are above this
    #[serde(default = "default_bot_counterparties")]
    pub bot_counterparties: u32,

    /// Bot when distinct tokens held are above this
    #[serde(default = "default_bot_distinct_tokens")]
    pub bot_distinct_tokens: u32,

    /// Deployer-sized native balance (inclusive)
    #[serde(default = "default_deployer_min_sol")]
    pub deployer_min_sol: f64,

    /// Selective trading: average tx per active day at or below this
    #[serde(default = "default_insider_max_tx_per_day")]
    pub insider_max_tx_per_day: f64,

    /// Narrow counterparty set: unique counterparties at or below this
    #[serde(default = "default_insider_max_counterparties")]
    pub insider_max_counterparties: u32,

    /// Insider needs at least this many transactions in the window
    #[serde(default = "default_insider_min_transactions")]
    pub insider_min_transactions: u64,

    /// Dormant balance floor (inclusive)
    #[serde(default = "default_dormant_max_sol")]
    pub dormant_max_sol: f64,
}

fn default_bot_tx_per_day() -> f64 {
    20.0
}

fn default_bot_counterparties() -> u32 {
    200
}

fn default_bot_distinct_tokens() -> u32 {
    50
}

fn default_deployer_min_sol() -> f64 {
    5.0
}

fn default_insider_max_tx_per_day() -> f64 {
    5.0
}

fn default_insider_max_counterparties() -> u32 {
    20
}

fn default_insider_min_transactions() -> u64 {
    1
}

fn default_dormant_max_sol() -> f64 {
    0.01
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            bot_tx_per_day: default_bot_tx_per_day(),
            bot_counterparties: default_bot_counterparties(),
            bot_distinct_tokens: default_bot_distinct_tokens(),
            deployer_min_sol: default_deployer_min_sol(),
            insider_max_tx_per_day: default_insider_max_tx_per_day(),
            insider_max_counterparties: default_insider_max_counterparties(),
            insider_min_transactions: default_insider_min_transactions(),
            dormant_max_sol: default_dormant_max_sol(),
        }
    }
}

/// Stateless rule ladder; the same inputs always give the same output
pub struct BehavioralClassifier {
    thresholds: ClassifierThresholds,
    entities: Arc<KnownEntities>,
}

impl BehavioralClassifier {
    pub fn new(thresholds: ClassifierThresholds, entities: Arc<KnownEntities>) -> Self {
        Self {
            thresholds,
            entities,
        }
    }

    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    /// Classify a profile, using the traced chain for ancestry when given
    pub fn classify(
        &self,
        profile: &WalletProfile,
        chain: Option<&FundingChain>,
    ) -> Classification {
        let t = &self.thresholds;
        // An absent native balance row is evaluated as zero; the profile gap still marks it
        let frequency_known = profile.transaction_count == 0 || profile.active_days > 0;
        let avg = profile.average_tx_per_active_day;

        let high_frequency = if frequency_known {
            Evidence::numeric(
                SignalName::HighTxFrequency,
                avg,
                t.bot_tx_per_day,
                avg > t.bot_tx_per_day,
            )
        } else {
            Evidence::undetermined(SignalName::HighTxFrequency, Some(t.bot_tx_per_day))
        };
        let many_counterparties = Evidence::numeric(
            SignalName::ManyCounterparties,
            profile.unique_counterparty_count as f64,
            t.bot_counterparties as f64,
            profile.unique_counterparty_count > t.bot_counterparties,
        );
        let holds_everything = Evidence::numeric(
            SignalName::HoldsEverything,
            profile.distinct_tokens_held as f64,
            t.bot_distinct_tokens as f64,
            profile.distinct_tokens_held > t.bot_distinct_tokens,
        );

        let deployer_balance = Evidence::numeric(
            SignalName::DeployerBalance,
            profile.sol_balance,
            t.deployer_min_sol,
            profile.sol_balance >= t.deployer_min_sol,
        );
        let known_ancestry = self.known_ancestry(profile, chain);
        let launch_interaction = Evidence::numeric(
            SignalName::LaunchPlatformInteraction,
            profile.launch_platform_interactions as f64,
            0.0,
            profile.launch_platform_interactions > 0,
        );

        let selective = if frequency_known {
            Evidence::numeric(
                SignalName::SelectiveTrading,
                avg,
                t.insider_max_tx_per_day,
                avg <= t.insider_max_tx_per_day,
            )
        } else {
            Evidence::undetermined(SignalName::SelectiveTrading, Some(t.insider_max_tx_per_day))
        };
        let narrow = Evidence::numeric(
            SignalName::NarrowCounterparties,
            profile.unique_counterparty_count as f64,
            t.insider_max_counterparties as f64,
            profile.unique_counterparty_count <= t.insider_max_counterparties,
        );

        let dormant_balance = Evidence::numeric(
            SignalName::DormantBalance,
            profile.sol_balance,
            t.dormant_max_sol,
            profile.sol_balance <= t.dormant_max_sol,
        );
        let no_activity = Evidence::numeric(
            SignalName::NoWindowActivity,
            profile.transaction_count as f64,
            0.0,
            profile.transaction_count == 0,
        );

        let bot_signals = [&high_frequency, &many_counterparties, &holds_everything]
            .iter()
            .filter(|e| e.outcome.is_crossed())
            .count();
        let is_dormant = dormant_balance.outcome.is_crossed() && no_activity.outcome.is_crossed();
        // An empty, inactive wallet is Dormant even if it still holds dust of many tokens
        let is_bot = bot_signals > 0 && !is_dormant;
        let is_deployer = deployer_balance.outcome.is_crossed()
            && known_ancestry.outcome.is_crossed()
            && launch_interaction.outcome == SignalOutcome::NotCrossed;
        let is_insider = bot_signals == 0
            && profile.transaction_count >= t.insider_min_transactions
            && selective.outcome.is_crossed()
            && narrow.outcome.is_crossed();

        let mut evidence = vec![
            high_frequency,
            many_counterparties,
            holds_everything,
            deployer_balance,
            known_ancestry,
            launch_interaction,
            selective,
            narrow,
            dormant_balance,
            no_activity,
        ];
        if let Some(chain) = chain {
            evidence.extend(chain_evidence(chain));
        }

        let all_determined = evidence
            .iter()
            .all(|e| e.outcome != SignalOutcome::Undetermined);
        let data_complete = all_determined && !profile.has_gaps();

        let (label, confidence) = if is_bot {
            let confidence = if bot_signals >= 2 {
                Confidence::High
            } else {
                Confidence::Medium
            };
            (WalletLabel::Bot, confidence)
        } else if is_deployer {
            (WalletLabel::DeployerCandidate, Confidence::High)
        } else if is_insider {
            (WalletLabel::InsiderCandidate, Confidence::Medium)
        } else if is_dormant {
            (WalletLabel::Dormant, Confidence::High)
        } else if all_determined {
            (WalletLabel::Unclassified, Confidence::Medium)
        } else {
            (WalletLabel::Unclassified, Confidence::Low)
        };

        let confidence = if !data_complete && label != WalletLabel::Unclassified {
            confidence.downgrade()
        } else {
            confidence
        };

        debug!(
            wallet = %profile.address.short(),
            label = ?label,
            confidence = ?confidence,
            data_complete,
            "Wallet classified"
        );

        Classification {
            address: profile.address.clone(),
            label,
            confidence,
            evidence,
            data_complete,
        }
    }

    /// Is the first funder, or any chain ancestor, a known entity?
    fn known_ancestry(&self, profile: &WalletProfile, chain: Option<&FundingChain>) -> Evidence {
        let funder = profile
            .first_funder
            .as_ref()
            .or_else(|| chain.and_then(|c| c.first_funder()));

        if let Some(funder) = funder.filter(|f| self.entities.contains(f)) {
            return known_ancestry_match(funder.clone());
        }

        if let Some(chain) = chain {
            if let Some((address, _)) = chain.known_entity() {
                if address != &profile.address {
                    return known_ancestry_match(address.clone());
                }
            }
            if chain.status.is_conclusive() {
                return Evidence {
                    signal: SignalName::KnownAncestry,
                    value: funder
                        .map(|f| EvidenceValue::Address(f.clone()))
                        .unwrap_or(EvidenceValue::Missing),
                    threshold: None,
                    outcome: SignalOutcome::NotCrossed,
                };
            }
            return Evidence::undetermined(SignalName::KnownAncestry, None);
        }

        match &profile.ancestry {
            Ancestry::Found { funder } => Evidence {
                signal: SignalName::KnownAncestry,
                value: EvidenceValue::Address(funder.clone()),
                threshold: None,
                outcome: SignalOutcome::NotCrossed,
            },
            Ancestry::NoFunder => Evidence {
                signal: SignalName::KnownAncestry,
                value: EvidenceValue::Missing,
                threshold: None,
                outcome: SignalOutcome::NotCrossed,
            },
            Ancestry::NotRequested | Ancestry::Unavailable { .. } => {
                Evidence::undetermined(SignalName::KnownAncestry, None)
            }
        }
    }
}

fn known_ancestry_match(address: WalletAddress) -> Evidence {
    Evidence {
        signal: SignalName::KnownAncestry,
        value: EvidenceValue::Address(address),
        threshold: None,
        outcome: SignalOutcome::Crossed,
    }
}

fn status_name(status: &ChainStatus) -> &'static str {
    match status {
        ChainStatus::DeadEnd => "dead_end",
        ChainStatus::CycleDetected { .. } => "cycle_detected",
        ChainStatus::KnownEntity { .. } => "known_entity",
        ChainStatus::MaxDepthExceeded { .. } => "max_depth_exceeded",
        ChainStatus::Cancelled => "cancelled",
        ChainStatus::Unknown { .. } => "unknown",
    }
}

/// Informational evidence about how the funding chain ended
fn chain_evidence(chain: &FundingChain) -> [Evidence; 2] {
    let cycle = match &chain.status {
        ChainStatus::CycleDetected { repeated } => Evidence {
            signal: SignalName::FundingCycle,
            value: EvidenceValue::Address(repeated.clone()),
            threshold: None,
            outcome: SignalOutcome::Crossed,
        },
        other => Evidence {
            signal: SignalName::FundingCycle,
            value: EvidenceValue::Text(status_name(other).to_string()),
            threshold: None,
            outcome: SignalOutcome::NotCrossed,
        },
    };

    let incomplete = Evidence {
        signal: SignalName::ChainIncomplete,
        value: EvidenceValue::Text(status_name(&chain.status).to_string()),
        threshold: None,
        outcome: SignalOutcome::from_bool(!chain.status.is_conclusive()),
    };

    [cycle, incomplete]
}
