//! # Provider Flows
//!
//! Provider record lifetime against a controllable clock, and the
//! reprovider announcing pinned content to the test DHT.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bx_03_providers::{ProviderConfig, ProviderManager, ReproviderStrategy};
    use node_runtime::testnet::Testnet;
    use node_runtime::NodeConfig;
    use shared_types::test_utils::{dag_node, raw_block};
    use shared_types::{ManualTimeSource, MemoryDatastore, PeerId};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_provider_record_expires_after_ttl() {
        let ttl = Duration::from_secs(3600);
        let config = ProviderConfig {
            provide_validity: ttl,
            ..ProviderConfig::default()
        };
        let clock = Arc::new(ManualTimeSource::default());
        let cancel = CancellationToken::new();
        let manager = ProviderManager::spawn(
            Arc::new(MemoryDatastore::new()),
            config,
            clock.clone(),
            cancel.clone(),
        );
        let cid = *raw_block("announced").cid();
        let peer = PeerId::from_bytes(b"provider");

        manager.add_provider(cid, peer.clone()).await.unwrap();
        clock.advance(ttl - Duration::from_secs(1));
        assert_eq!(manager.get_providers(&cid).await.unwrap(), vec![peer]);

        clock.advance(Duration::from_secs(2));
        manager.cleanup().await.unwrap();
        assert!(manager.get_providers(&cid).await.unwrap().is_empty());
        cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_roots_strategy_announces_pinned_roots_only() {
        let net = Testnet::new();
        let mut config = NodeConfig::default();
        config.exchange.provide_enabled = false;
        config.reprovider.strategy = ReproviderStrategy::Roots;
        let node = net.spawn_node("reprovider", config).await.unwrap();

        let leaf = raw_block("leaf");
        let root = dag_node("root", &[&leaf]);
        let loose = raw_block("loose");
        node.block_service()
            .add_blocks(vec![leaf.clone(), root.clone(), loose.clone()])
            .await
            .unwrap();
        node.pinner().pin(root.cid(), true).await.unwrap();

        assert_eq!(node.reprovide().await.unwrap(), 1);
        let providers = net.dht().providers();
        let me = node.peer_id().unwrap();
        assert_eq!(providers.get_providers(root.cid()).await.unwrap(), vec![me]);
        assert!(providers.get_providers(leaf.cid()).await.unwrap().is_empty());
        assert!(providers.get_providers(loose.cid()).await.unwrap().is_empty());
    }
}
