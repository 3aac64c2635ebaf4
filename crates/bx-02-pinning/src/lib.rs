//! # Pinning and Garbage Collection (bx-02)
//!
//! Keeps chosen DAGs alive and removes everything else.
//!
//! ## Pin modes
//!
//! | Mode | Meaning |
//! |------|---------|
//! | Recursive | Root and every descendant are kept |
//! | Direct | Only the block itself is kept |
//! | Indirect | Reachable from a recursive root (derived, never stored) |
//! | Internal | Node bookkeeping roots, kept with descendants |
//!
//! ## Collection
//!
//! [`GarbageCollector::run`] holds the exclusive GC lock from
//! `bx-01-blockstore` for a whole mark and sweep, so writers holding a pin
//! lock never lose a freshly written block. Pinning takes the shared pin
//! lock while it fetches the DAG.
//!
//! ## Invariants
//!
//! - After `pin(c, recursive = true)` succeeds, no GC run deletes any CID
//!   reachable from `c`.
//! - A GC whose strict marking fails deletes nothing.
//! - An undecodable pin snapshot refuses to load rather than starting empty.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod domain;
pub mod service;

pub use adapters::OfflineLinks;
pub use domain::{ColoredSet, GcError, GcResult, PinError, PinMode, Pinned, Strictness};
pub use service::{collect, GarbageCollector, Pinner};
