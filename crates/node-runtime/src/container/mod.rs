//! # Node Container
//!
//! Configuration and the [`Node`] that owns every subsystem instance.
//!
//! - Subsystems are built in dependency order by [`Node::start`]
//! - Background loops hang off one cancellation token and stop together

pub mod config;
pub mod node;

pub use config::{ConfigError, DatastoreBackend, DatastoreConfig, GcConfig, NodeConfig};
pub use node::{Node, NodeError};
