//! Wallet Provenance Library
//!
//! Funding-chain tracing, wallet profiling, behavioral classification and
//! cross-launch early-buyer correlation over a rate-limited ledger API.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
