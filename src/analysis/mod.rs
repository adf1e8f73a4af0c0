//! Provenance and insider analysis
//!
//! Components:
//! - Tracer: funding chains back to a known entity or dead end
//! - Profile: per-wallet behavioral snapshot
//! - Classifier: rule ladder with audited evidence
//! - Correlator: wallets recurring across launch early-buyer sets
//! - Clustering: wallets sharing a funder or root
//! - Batch: per-run orchestration over a shared ledger

pub mod batch;
pub mod classifier;
pub mod clustering;
pub mod correlator;
pub mod entities;
pub mod profile;
pub mod tracer;

pub use batch::{BatchConfig, WalletAnalyzer, WalletOutcome, WalletReport};
pub use classifier::{BehavioralClassifier, ClassifierThresholds};
pub use clustering::{cluster_by_funder, shared_ancestor, ClusterBasis, FundingCluster};
pub use correlator::{
    collect_launches, correlate, correlate_with, early_buyers, CorrelatorConfig, EarlyWindow,
    LaunchCollection, LaunchQuery,
};
pub use entities::{
    KnownEntities, KnownEntity, KnownEntityConfig, LaunchPlatformConfig, LaunchPlatformMatcher,
};
pub use profile::{AncestryRequest, ProfileConfig, WalletProfileBuilder};
pub use tracer::{FundingChainTracer, TracerConfig};
