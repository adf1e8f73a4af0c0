//! Funding-chain tracer
//!
//! Walks the first-funder relation backward from a wallet until it reaches a
//! known entity, a wallet with no funder, a repeat, or the depth budget.
//! Hops are strictly sequential: the visited set and the known-entity table
//! are checked before the next lookup is issued.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::entities::KnownEntities;
use crate::error::Result;
use crate::gateway::Ledger;
use crate::types::{ChainStatus, FundingChain, FundingEdge, WalletAddress};

/// Configuration for funding-chain traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    /// Traversal stops once the chain holds more than this many addresses
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    8
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Resolves funding provenance over the shared ledger
pub struct FundingChainTracer {
    ledger: Arc<Ledger>,
    entities: Arc<KnownEntities>,
    config: TracerConfig,
}

impl FundingChainTracer {
    pub fn new(ledger: Arc<Ledger>, entities: Arc<KnownEntities>, config: TracerConfig) -> Self {
        Self {
            ledger,
            entities,
            config,
        }
    }

    pub fn entities(&self) -> &KnownEntities {
        &self.entities
    }

    /// One-hop lookup: the wallet's first funder edge, if any
    pub async fn first_hop(&self, address: &WalletAddress) -> Result<Option<FundingEdge>> {
        self.ledger.first_funder(address).await
    }

    /// Trace `start` back toward its root
    pub async fn trace(&self, start: &WalletAddress) -> FundingChain {
        self.trace_with_cancel(start, &CancellationToken::new()).await
    }

    /// Trace `start`, stopping with [`ChainStatus::Cancelled`] when `cancel` fires
    ///
    /// Never fails: gateway errors end the chain with [`ChainStatus::Unknown`]
    /// and the addresses resolved so far.
    pub async fn trace_with_cancel(
        &self,
        start: &WalletAddress,
        cancel: &CancellationToken,
    ) -> FundingChain {
        let mut addresses = vec![start.clone()];
        let mut edges: Vec<FundingEdge> = Vec::new();
        let mut visited: HashSet<WalletAddress> = HashSet::from([start.clone()]);

        if let Some(entity) = self.entities.lookup(start) {
            let status = ChainStatus::KnownEntity {
                address: start.clone(),
                label: entity.label.clone(),
                kind: entity.kind,
            };
            return self.finish(addresses, edges, status);
        }

        let mut current = start.clone();
        loop {
            if cancel.is_cancelled() {
                return self.finish(addresses, edges, ChainStatus::Cancelled);
            }

            let lookup = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.ledger.first_funder(&current) => Some(result),
            };
            let Some(lookup) = lookup else {
                return self.finish(addresses, edges, ChainStatus::Cancelled);
            };

            let edge = match lookup {
                Ok(Some(edge)) => edge,
                Ok(None) => return self.finish(addresses, edges, ChainStatus::DeadEnd),
                Err(e) => {
                    warn!(wallet = %current.short(), error = %e, "Funder lookup failed");
                    let status = ChainStatus::Unknown {
                        reason: e.to_string(),
                    };
                    return self.finish(addresses, edges, status);
                }
            };

            let parent = edge.parent.clone();
            debug!(
                child = %current.short(),
                parent = %parent.short(),
                hop = addresses.len(),
                "Resolved first funder"
            );

            if visited.contains(&parent) {
                let status = ChainStatus::CycleDetected { repeated: parent };
                return self.finish(addresses, edges, status);
            }

            if let Some(entity) = self.entities.lookup(&parent) {
                let status = ChainStatus::KnownEntity {
                    address: parent.clone(),
                    label: entity.label.clone(),
                    kind: entity.kind,
                };
                addresses.push(parent);
                edges.push(edge);
                return self.finish(addresses, edges, status);
            }

            visited.insert(parent.clone());
            addresses.push(parent.clone());
            edges.push(edge);

            if addresses.len() > self.config.max_depth {
                let status = ChainStatus::MaxDepthExceeded {
                    max_depth: self.config.max_depth,
                };
                return self.finish(addresses, edges, status);
            }

            current = parent;
        }
    }

    fn finish(
        &self,
        addresses: Vec<WalletAddress>,
        edges: Vec<FundingEdge>,
        status: ChainStatus,
    ) -> FundingChain {
        let chain = FundingChain {
            addresses,
            edges,
            status,
        };

        info!(
            wallet = %chain.start().short(),
            hops = chain.hops(),
            terminal = %chain.terminal().short(),
            status = ?chain.status,
            "Funding chain traced"
        );
        chain
    }
}
