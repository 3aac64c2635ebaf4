//! # Service Layer
//!
//! - [`ProviderManager`]: actor owning the provider record store
//! - [`Reprovider`]: periodic re-announcement of local content

pub mod provider_manager;
pub mod reprovider;

pub use provider_manager::ProviderManager;
pub use reprovider::{
    key_chooser, AllKeysChooser, KeyChooser, PinnedKeysChooser, Reprovider, StreamingCidSet,
};
