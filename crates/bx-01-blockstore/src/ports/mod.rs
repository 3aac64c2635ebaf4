//! # Ports Layer
//!
//! - `inbound.rs` - the [`Blockstore`](inbound::Blockstore) API every layer implements
//!
//! The driven side is the [`Datastore`](shared_types::Datastore) port from
//! `shared-types`.

pub mod inbound;
