//! # Domain Layer
//!
//! Provider record encoding, configuration and errors.

pub mod config;
pub mod errors;
pub mod records;

pub use config::{ProviderConfig, ReproviderConfig, ReproviderStrategy};
pub use errors::ProviderError;
pub use records::{cid_prefix, parse_provider_key, provider_key, providers_prefix};
