//! Funding clusters
//!
//! Groups traced wallets that share a funding source:
//! - Same first funder (one hop)
//! - Same terminal root (end of a conclusive chain)
//!
//! A cluster funded by an exchange is weak evidence on its own; the funder's
//! entity kind is reported so callers can weigh it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::analysis::entities::KnownEntities;
use crate::types::{EntityKind, FundingChain, WalletAddress};

/// What the members of a cluster share
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterBasis {
    FirstFunder,
    Root,
}

/// Wallets sharing one funding source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingCluster {
    /// The shared funder or root
    pub anchor: WalletAddress,
    pub basis: ClusterBasis,
    /// Sorted member wallets (chain start addresses)
    pub members: Vec<WalletAddress>,
    pub anchor_label: Option<String>,
    pub anchor_kind: Option<EntityKind>,
}

impl FundingCluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Group chains by first funder and by terminal root
///
/// Only groups of two or more wallets are returned, largest first. A root
/// group identical to a first-funder group on the same anchor is dropped.
pub fn cluster_by_funder(
    chains: &[FundingChain],
    entities: &KnownEntities,
) -> Vec<FundingCluster> {
    let mut groups: BTreeMap<(ClusterBasis, &WalletAddress), BTreeSet<&WalletAddress>> =
        BTreeMap::new();

    for chain in chains {
        if let Some(funder) = chain.first_funder() {
            groups
                .entry((ClusterBasis::FirstFunder, funder))
                .or_default()
                .insert(chain.start());
        }
        if chain.hops() > 0 && chain.status.is_conclusive() {
            groups
                .entry((ClusterBasis::Root, chain.terminal()))
                .or_default()
                .insert(chain.start());
        }
    }

    let mut clusters: Vec<FundingCluster> = groups
        .iter()
        .filter(|(_, members)| members.len() >= 2)
        .filter(|((basis, anchor), members)| {
            *basis == ClusterBasis::FirstFunder
                || groups.get(&(ClusterBasis::FirstFunder, *anchor)) != Some(*members)
        })
        .map(|((basis, anchor), members)| {
            let entity = entities.lookup(anchor);
            FundingCluster {
                anchor: (*anchor).clone(),
                basis: *basis,
                members: members.iter().map(|m| (*m).clone()).collect(),
                anchor_label: entity.map(|e| e.label.clone()),
                anchor_kind: entity.map(|e| e.kind),
            }
        })
        .collect();

    clusters.sort_by(|a, b| {
        b.size()
            .cmp(&a.size())
            .then_with(|| a.basis.cmp(&b.basis))
            .then_with(|| a.anchor.cmp(&b.anchor))
    });

    debug!(chains = chains.len(), clusters = clusters.len(), "Funding clusters built");
    clusters
}

/// Nearest address on `a`'s chain that also appears on `b`'s chain
pub fn shared_ancestor<'a>(a: &'a FundingChain, b: &FundingChain) -> Option<&'a WalletAddress> {
    a.addresses.iter().find(|address| b.contains(address))
}
