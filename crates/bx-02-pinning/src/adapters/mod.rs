//! # Adapters
//!
//! - `offline_links` - resolves links from the local blockstore only

pub mod offline_links;

pub use offline_links::OfflineLinks;
