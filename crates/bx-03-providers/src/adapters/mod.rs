//! # Adapters
//!
//! Datastore wrappers used by the provider store.

pub mod autobatch;

pub use autobatch::AutoBatch;
