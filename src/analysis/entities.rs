//! Known-entity and launch-platform tables
//!
//! Exchanges, root funders and launch programs are configuration, injected
//! into the tracer and classifier; nothing here is compiled into rules.

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::{Error, Result};
use crate::gateway::CounterpartyRecord;
use crate::types::{EntityKind, WalletAddress};

/// Pump.fun bonding-curve program
pub const PUMP_PROGRAM_ID_STR: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// A known entity as written in config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownEntityConfig {
    pub address: String,
    pub label: String,
    #[serde(default)]
    pub kind: EntityKind,
}

/// Launch programs a deployer candidate must not have touched yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchPlatformConfig {
    /// Program / bonding-curve addresses
    #[serde(default = "default_launch_addresses")]
    pub addresses: Vec<String>,

    /// Regexes matched against counterparty labels
    #[serde(default = "default_label_patterns")]
    pub label_patterns: Vec<String>,
}

fn default_launch_addresses() -> Vec<String> {
    vec![PUMP_PROGRAM_ID_STR.to_string()]
}

fn default_label_patterns() -> Vec<String> {
    vec![
        r"(?i)bonding\s*curve".to_string(),
        r"(?i)pump\.?fun".to_string(),
    ]
}

impl Default for LaunchPlatformConfig {
    fn default() -> Self {
        Self {
            addresses: default_launch_addresses(),
            label_patterns: default_label_patterns(),
        }
    }
}

/// A pre-identified wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownEntity {
    pub label: String,
    pub kind: EntityKind,
}

/// Address -> label table of pre-identified wallets, plus exclusions
#[derive(Debug, Clone, Default)]
pub struct KnownEntities {
    entries: HashMap<WalletAddress, KnownEntity>,
    exclusions: HashSet<WalletAddress>,
}

impl KnownEntities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from config entries and extra exclusions
    pub fn from_config(entities: &[KnownEntityConfig], exclusions: &[String]) -> Self {
        let mut table = Self::new();
        for entity in entities {
            table.insert(entity.address.as_str(), entity.label.as_str(), entity.kind);
        }
        for address in exclusions {
            table.exclude(address.as_str());
        }

        info!(
            entities = table.entries.len(),
            exclusions = table.exclusions.len(),
            "Known-entity table loaded"
        );
        table
    }

    pub fn insert(
        &mut self,
        address: impl Into<WalletAddress>,
        label: impl Into<String>,
        kind: EntityKind,
    ) {
        self.entries.insert(
            address.into(),
            KnownEntity {
                label: label.into(),
                kind,
            },
        );
    }

    /// Exclude a wallet from launch correlation without labelling it
    pub fn exclude(&mut self, address: impl Into<WalletAddress>) {
        self.exclusions.insert(address.into());
    }

    pub fn lookup(&self, address: &WalletAddress) -> Option<&KnownEntity> {
        self.entries.get(address)
    }

    pub fn contains(&self, address: &WalletAddress) -> bool {
        self.entries.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wallets to drop from early-buyer sets: every known entity plus explicit exclusions
    pub fn exclusion_set(&self) -> HashSet<WalletAddress> {
        self.entries
            .keys()
            .cloned()
            .chain(self.exclusions.iter().cloned())
            .collect()
    }
}

/// Recognizes launch-program counterparties by address or label
#[derive(Debug, Clone)]
pub struct LaunchPlatformMatcher {
    addresses: HashSet<WalletAddress>,
    labels: RegexSet,
}

impl LaunchPlatformMatcher {
    pub fn from_config(config: &LaunchPlatformConfig) -> Result<Self> {
        let labels = RegexSet::new(&config.label_patterns)
            .map_err(|e| Error::Config(format!("Invalid launch_platform label pattern: {}", e)))?;

        Ok(Self {
            addresses: config.addresses.iter().map(|a| WalletAddress::from(a.as_str())).collect(),
            labels,
        })
    }

    pub fn matches_address(&self, address: &WalletAddress) -> bool {
        self.addresses.contains(address)
    }

    pub fn matches_label(&self, label: &str) -> bool {
        self.labels.is_match(label)
    }

    pub fn matches_counterparty(&self, record: &CounterpartyRecord) -> bool {
        record
            .address
            .as_ref()
            .map(|a| self.matches_address(a))
            .unwrap_or(false)
            || record.labels.iter().any(|l| self.matches_label(l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_exclusions() {
        let entities = KnownEntities::from_config(
            &[KnownEntityConfig {
                address: "cex1".to_string(),
                label: "Coinbase".to_string(),
                kind: EntityKind::Exchange,
            }],
            &["mm1".to_string()],
        );

        assert_eq!(entities.lookup(&"cex1".into()).map(|e| e.label.as_str()), Some("Coinbase"));
        assert!(!entities.contains(&"mm1".into()));

        let excluded = entities.exclusion_set();
        assert!(excluded.contains(&WalletAddress::from("cex1")));
        assert!(excluded.contains(&WalletAddress::from("mm1")));
    }

    #[test]
    fn test_launch_matcher_default() {
        let matcher = LaunchPlatformMatcher::from_config(&LaunchPlatformConfig::default()).unwrap();

        let by_label = CounterpartyRecord {
            address: Some("curve123".into()),
            interaction_count: 3,
            volume_usd: None,
            labels: vec!["Pump.fun Bonding Curve".to_string()],
        };
        assert!(matcher.matches_counterparty(&by_label));

        let by_address = CounterpartyRecord {
            address: Some(PUMP_PROGRAM_ID_STR.into()),
            interaction_count: 1,
            volume_usd: None,
            labels: Vec::new(),
        };
        assert!(matcher.matches_counterparty(&by_address));

        let unrelated = CounterpartyRecord {
            address: Some("friend".into()),
            interaction_count: 1,
            volume_usd: None,
            labels: vec!["Binance 14".to_string()],
        };
        assert!(!matcher.matches_counterparty(&unrelated));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let config = LaunchPlatformConfig {
            addresses: Vec::new(),
            label_patterns: vec!["(unclosed".to_string()],
        };
        assert!(LaunchPlatformMatcher::from_config(&config).is_err());
    }
}
