//! # Blockswap Test Suite
//!
//! Cross-crate scenarios that no single subsystem crate can run alone.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Shared setup helpers
//! └── integration/
//!     ├── blockstore_flows.rs   # round-trip, tamper detection, Bloom filter
//!     ├── exchange_flows.rs     # two-peer fetch, fan-out, ledgers
//!     ├── pinning_flows.rs      # GC against recursive pins
//!     └── provider_flows.rs     # provider record lifetime
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bx-tests
//! cargo test -p bx-tests integration::exchange_flows
//! cargo bench -p bx-tests
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod fixtures;
pub mod integration;
