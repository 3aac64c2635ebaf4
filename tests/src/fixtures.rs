//! Setup helpers shared by the integration flows.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bx_01_blockstore::{BaseBlockstore, Blockstore};
use node_runtime::NodeConfig;
use shared_types::test_utils::CountingDatastore;
use shared_types::MemoryDatastore;

/// Upper bound for any single network scenario step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// A blockstore over a counting in-memory datastore.
pub fn counting_blockstore() -> (Arc<CountingDatastore<MemoryDatastore>>, BaseBlockstore<Arc<CountingDatastore<MemoryDatastore>>>) {
    let datastore = Arc::new(CountingDatastore::new(MemoryDatastore::new()));
    let blockstore = BaseBlockstore::new(Arc::clone(&datastore));
    (datastore, blockstore)
}

pub fn memory_blockstore() -> Arc<dyn Blockstore> {
    Arc::new(BaseBlockstore::new(MemoryDatastore::new()))
}

/// Node settings for a peer that only downloads: it never announces what
/// it fetched, so no other peer is routed to it.
pub fn leecher_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.exchange.provide_enabled = false;
    config
}

/// Await `fut`, panicking with `what` after `limit`.
pub async fn within<T>(limit: Duration, what: &str, fut: impl Future<Output = T>) -> T {
    match tokio::time::timeout(limit, fut).await {
        Ok(value) => value,
        Err(_) => panic!("{what} did not finish within {limit:?}"),
    }
}

/// Poll `cond` every 10ms until it holds, panicking after [`STEP_TIMEOUT`].
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    within(STEP_TIMEOUT, what, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}
