//! # Shared Bus - Block Notifications
//!
//! Wakes everyone waiting for a block when that block becomes available
//! locally, whether it was fetched from a peer or added by the user.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Exchange    │                    │ get_blocks() │
//! │              │    publish()       │   callers    │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Notifier    │          │
//!                  │  (per CID)   │ ─────────┘
//!                  └──────────────┘  subscribe(cids)
//! ```
//!
//! Each subscription receives every awaited CID exactly once and then
//! finishes, so callers can simply drain it.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::BlockFilter;
pub use publisher::{BlockPublisher, InMemoryNotifier};
pub use subscriber::Subscription;
