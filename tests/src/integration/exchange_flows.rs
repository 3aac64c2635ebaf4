//! # Exchange Flows
//!
//! Full nodes on the in-process test network.
//!
//! ## Flows Tested
//!
//! 1. **Two peers**: B fetches a block held by A through a session; both
//!    ledgers agree on the bytes exchanged
//! 2. **Fan-out**: nine peers fetch the same 101 blocks from one seeder
//! 3. **Provider routing**: a peer with no open connection finds the
//!    holder through the DHT

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use futures::future::join_all;
    use futures::StreamExt;
    use node_runtime::testnet::Testnet;
    use node_runtime::{Node, NodeConfig};
    use shared_types::test_utils::{random_blocks, raw_block};
    use shared_types::Cid;
    use tokio_util::sync::CancellationToken;

    use crate::fixtures::{leecher_config, wait_until, within, STEP_TIMEOUT};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_peer_exchange() {
        let net = Testnet::new();
        let a = net.spawn_node("peer-a", NodeConfig::default()).await.unwrap();
        let b = net.spawn_node("peer-b", leecher_config()).await.unwrap();
        let block = raw_block("beep boop");
        a.block_service().add_block(block.clone()).await.unwrap();
        net.connect(&a, &b).await.unwrap();

        let session = b.block_service().new_session(CancellationToken::new());
        let fetched = within(
            Duration::from_secs(5),
            "session fetch",
            session.get_block(block.cid(), &CancellationToken::new()),
        )
        .await
        .unwrap();
        assert_eq!(fetched.data(), block.data());

        let a_id = a.peer_id().unwrap();
        let b_id = b.peer_id().unwrap();
        let a_swap = a.bitswap().unwrap();
        let expected = block.data().len() as u64;
        wait_until("A's ledger records the send", || {
            a_swap.ledger_for_peer(&b_id).map(|r| r.sent) == Some(expected)
        })
        .await;

        let received = b.bitswap().unwrap().ledger_for_peer(&a_id).unwrap();
        assert_eq!(received.recv, expected);
        assert_eq!(a_swap.ledger_for_peer(&b_id).unwrap().sent, received.recv);

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    async fn fetch_all(node: &Node, cids: Vec<Cid>) -> Vec<Cid> {
        let session = node.block_service().new_session(CancellationToken::new());
        let stream = session.get_blocks(cids, CancellationToken::new()).await.unwrap();
        stream.map(|block| *block.cid()).collect().await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fan_out_to_nine_peers() {
        let net = Testnet::new();
        let seeder = net.spawn_node("seeder", NodeConfig::default()).await.unwrap();
        let blocks = random_blocks(101, 512);
        seeder.block_service().add_blocks(blocks.clone()).await.unwrap();
        let wanted: Vec<Cid> = blocks.iter().map(|b| *b.cid()).collect();

        let mut leechers = Vec::new();
        for i in 1..10 {
            let node = net
                .spawn_node(&format!("leecher-{i}"), leecher_config())
                .await
                .unwrap();
            net.connect(&seeder, &node).await.unwrap();
            leechers.push(node);
        }

        let fetches = leechers.iter().map(|node| fetch_all(node, wanted.clone()));
        let results = within(STEP_TIMEOUT, "fan-out fetch", join_all(fetches)).await;

        let expected: HashSet<Cid> = wanted.iter().copied().collect();
        for (node, got) in leechers.iter().zip(&results) {
            let unique: HashSet<Cid> = got.iter().copied().collect();
            assert_eq!(got.len(), 101, "duplicate or missing blocks");
            assert_eq!(unique, expected);
            for cid in &wanted {
                assert!(node.blockstore().has(cid).unwrap());
            }
        }

        // Leechers only ever talk to the seeder.
        let ids: Vec<_> = leechers.iter().map(|n| n.peer_id().unwrap()).collect();
        for from in &ids {
            for to in &ids {
                assert_eq!(net.network().messages_between(from, to), 0);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unconnected_peer_found_through_dht() {
        let net = Testnet::new();
        let holder = net.spawn_node("holder", NodeConfig::default()).await.unwrap();
        let block = raw_block("routed content");
        holder.block_service().add_block(block.clone()).await.unwrap();

        // The announcement is asynchronous.
        let providers = net.dht().providers().clone();
        let cid = *block.cid();
        within(STEP_TIMEOUT, "provide", async {
            while providers.get_providers(&cid).await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        let seeker = net.spawn_node("seeker", leecher_config()).await.unwrap();
        let fetched = within(
            STEP_TIMEOUT,
            "routed fetch",
            seeker
                .block_service()
                .get_block(block.cid(), &CancellationToken::new()),
        )
        .await
        .unwrap();
        assert_eq!(fetched, block);
        assert!(net
            .network()
            .is_connected(&holder.peer_id().unwrap(), &seeker.peer_id().unwrap()));
    }
}
