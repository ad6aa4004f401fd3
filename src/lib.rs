//! Subscout - proxy subscription aggregator
//!
//! Discovers panel subscription URLs, validates and decodes them, and
//! republishes the nodes they carry as curated subscription files.
//!
//! ## Features
//!
//! - Candidate discovery from seed files and a search API
//! - Tolerant decoding of plain, base64 and clash payloads with a
//!   consistency check against the structured variant
//! - Per-source rate-limit backoff carried across runs
//! - Search-API key scheduling by remaining quota and reset date
//! - Per-protocol, per-region, curated and top-ranked outputs

pub mod aggregate;
pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod keys;
pub mod models;
pub mod repository;
pub mod services;
pub mod source;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{Result, SubError};
