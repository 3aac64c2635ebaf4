//! # Integration Flows

pub mod blockstore_flows;
pub mod exchange_flows;
pub mod pinning_flows;
pub mod provider_flows;
