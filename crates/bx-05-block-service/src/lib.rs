//! # Block Service (bx-05)
//!
//! The public block API of a node: add, get and delete blocks without
//! caring whether they are stored locally or must come from the network.
//!
//! | Operation | Behaviour |
//! |-----------|-----------|
//! | `add_block` / `add_blocks` | verify, store under the pin lock, announce to the exchange |
//! | `get_block` / `get_blocks` | blockstore first, exchange on miss |
//! | `delete_block` | remove the block and any filestore reference |
//! | `new_session` | related fetches through one exchange session |
//!
//! Blocks are dispatched on their [`BlockKind`](shared_types::BlockKind):
//! DAG-PB blocks must decode, filestore blocks record where their bytes
//! live.
//!
//! [`BlockService`] also implements [`LinkSource`](shared_types::LinkSource),
//! so a recursive pin fetches missing descendants from the network.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod service;

pub use domain::{filestore_key, BlockServiceError, FilestoreRef, Result, FILESTORE_PREFIX};
pub use service::{BlockService, BlockSession, DEFAULT_LINK_TIMEOUT};
