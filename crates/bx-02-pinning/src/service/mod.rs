//! # Service Layer
//!
//! - [`Pinner`] - pin sets and their persistence
//! - [`GarbageCollector`] - mark and sweep over the blockstore

pub mod gc;
pub mod pinner;

pub use gc::{collect, GarbageCollector};
pub use pinner::Pinner;
