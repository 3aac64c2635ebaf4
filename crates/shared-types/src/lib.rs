//! # Shared Types Crate
//!
//! Types and outbound ports shared by every blockswap subsystem.
//!
//! ## Contents
//!
//! - **Content**: [`Block`], [`BlockKind`], CID construction and digest
//!   verification.
//! - **Networking**: [`PeerId`], [`PeerInfo`].
//! - **Datastore port**: the [`Datastore`] trait, [`Key`] paths and the
//!   in-memory and file-backed adapters.
//! - **Routing port**: [`ContentRouting`] (provide / find providers).
//! - **DAG**: DAG-PB decoding and the [`LinkSource`] port.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: cross-subsystem types live here only.
//! - **Ports, not backends**: storage and routing are traits; concrete
//!   backends live with the subsystem or in `node-runtime`.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod dag;
pub mod datastore;
pub mod entities;
pub mod errors;
pub mod rate_limiter;
pub mod routing;
pub mod time;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cid::Cid;
pub use dag::{links, LinkSource, PbLink, PbNode};
pub use datastore::{
    Batch, BatchOperation, Datastore, FileDatastore, Key, MemoryDatastore, Query, QueryEntry,
    QueryResults,
};
pub use entities::*;
pub use errors::*;
pub use rate_limiter::RateLimiter;
pub use routing::{ContentRouting, NullRouting};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
