//! # Adapter Implementations
//!
//! Concrete implementations of the outbound ports used by the node.
//!
//! - [`storage`]: datastore backends behind the `Datastore` port

pub mod storage;

pub use storage::open_datastore;
