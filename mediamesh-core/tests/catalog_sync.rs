//! Catalog stores syncing through in-process relays.

use std::sync::Arc;
use std::time::Duration;

use mediamesh_core::catalog::{CatalogEntry, CatalogStore, MediaKind};
use mediamesh_core::config::MediaMeshConfig;
use mediamesh_core::relay::{MemoryRelay, RelayClient, RelayLink};

const MAGNET: &str = "magnet:?xt=urn:btih:08ada5a7a6183aae1e09d831df6748d566095a10";
const CID: &str = "QmQc6vqZAnpUfTy7FW9zqXd9RCqLdCU7GqQN1GE5LqAqBb";

fn store_on(relays: &[&MemoryRelay], namespace: &str) -> CatalogStore {
    let mut config = MediaMeshConfig::for_testing();
    config.catalog.namespace = namespace.to_string();

    let links = relays
        .iter()
        .map(|relay| Arc::new(relay.link()) as Arc<dyn RelayLink>)
        .collect();
    let client = Arc::new(RelayClient::new(links, config.relay.clone()));
    CatalogStore::new(client, &config.catalog).unwrap()
}

fn entry(id: &str, title: &str, created_at: i64) -> CatalogEntry {
    CatalogEntry::new(id, title, MAGNET, CID, MediaKind::Video).with_created_at(created_at)
}

fn titles(store: &CatalogStore) -> Vec<(String, String)> {
    store
        .snapshot()
        .into_iter()
        .map(|entry| (entry.id, entry.title))
        .collect()
}

async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn test_put_propagates_to_peer() {
    let relay = MemoryRelay::new("memory://relay");
    let alice = store_on(&[&relay], "catalog");
    let bob = store_on(&[&relay], "catalog");

    let stored = alice.put(entry("m1", "Sintel", 1_000)).await.unwrap();

    eventually("bob to see m1", || bob.get("m1").is_some()).await;
    assert_eq!(bob.get("m1"), Some(stored));
    assert!(bob.is_connected());
}

#[tokio::test]
async fn test_remove_on_one_peer_hides_everywhere() {
    let relay = MemoryRelay::new("memory://relay");
    let alice = store_on(&[&relay], "catalog");
    let bob = store_on(&[&relay], "catalog");

    alice.put(entry("m1", "Sintel", 1_000)).await.unwrap();
    eventually("bob to see m1", || bob.get("m1").is_some()).await;

    bob.remove("m1").await.unwrap();
    eventually("alice to drop m1", || alice.get("m1").is_none()).await;

    let record = alice.record("m1").expect("tombstone stays resident");
    assert!(record.tombstone);
    assert!(alice.snapshot().is_empty());
}

#[tokio::test]
async fn test_late_joiner_receives_current_state() {
    let relay = MemoryRelay::new("memory://relay");
    let alice = store_on(&[&relay], "catalog");

    alice.put(entry("m1", "Sintel", 1_000)).await.unwrap();
    alice.put(entry("m2", "Big Buck Bunny", 2_000)).await.unwrap();
    alice.remove("m1").await.unwrap();
    eventually("relay to hold both keys", || relay.log().key_count("catalog") == 2).await;

    let carol = store_on(&[&relay], "catalog");
    eventually("carol to see m2", || carol.get("m2").is_some()).await;
    assert_eq!(titles(&carol), vec![("m2".to_string(), "Big Buck Bunny".to_string())]);
}

#[tokio::test]
async fn test_concurrent_writers_converge() {
    let relay = MemoryRelay::new("memory://relay");
    let alice = store_on(&[&relay], "catalog");
    let bob = store_on(&[&relay], "catalog");

    tokio::join!(
        async {
            for round in 0..5 {
                alice
                    .put(entry("shared", &format!("alice {round}"), 1_000))
                    .await
                    .unwrap();
                alice.put(entry("a-only", "Alice", 500)).await.unwrap();
            }
        },
        async {
            for round in 0..5 {
                bob.put(entry("shared", &format!("bob {round}"), 1_000))
                    .await
                    .unwrap();
                if round == 2 {
                    bob.remove("a-only").await.unwrap();
                }
            }
        }
    );

    eventually("both stores to agree", || {
        titles(&alice) == titles(&bob) && alice.get("shared").is_some()
    })
    .await;

    // Settle, then check agreement still holds.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(titles(&alice), titles(&bob));
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let relay = MemoryRelay::new("memory://relay");
    let first = store_on(&[&relay], "catalog-a");
    let second = store_on(&[&relay], "catalog-b");
    let first_peer = store_on(&[&relay], "catalog-a");

    first.put(entry("m1", "Sintel", 1_000)).await.unwrap();
    eventually("peer in same namespace to sync", || first_peer.get("m1").is_some()).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(second.snapshot().is_empty());
    assert_eq!(second.key_count(), 0);
}

#[tokio::test]
async fn test_writes_survive_relay_outage() {
    let relay = MemoryRelay::new("memory://relay");
    let alice = store_on(&[&relay], "catalog");
    let bob = store_on(&[&relay], "catalog");

    relay.set_online(false);
    alice.put(entry("m1", "Sintel", 1_000)).await.unwrap();
    assert!(alice.get("m1").is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bob.get("m1").is_none());

    relay.set_online(true);
    eventually("bob to see m1 after outage", || bob.get("m1").is_some()).await;
}

#[tokio::test]
async fn test_relay_restart_resyncs_peers() {
    let relay = MemoryRelay::new("memory://relay");
    let alice = store_on(&[&relay], "catalog");
    let bob = store_on(&[&relay], "catalog");

    alice.put(entry("m1", "Sintel", 1_000)).await.unwrap();
    alice.put(entry("m2", "Big Buck Bunny", 2_000)).await.unwrap();
    alice.put(entry("m3", "Tears of Steel", 3_000)).await.unwrap();
    eventually("bob to see three entries", || bob.snapshot().len() == 3).await;

    relay.restart();

    // New writes after the restart reach peers whose cursors predate it.
    alice.put(entry("m4", "Cosmos Laundromat", 4_000)).await.unwrap();
    eventually("bob to see m4 after restart", || bob.get("m4").is_some()).await;

    // The peers repopulate the relay, so a newcomer sees the whole catalog.
    eventually("relay to hold every key again", || {
        relay.log().key_count("catalog") == 4
    })
    .await;
    let carol = store_on(&[&relay], "catalog");
    eventually("carol to see four entries", || carol.snapshot().len() == 4).await;
    assert_eq!(titles(&carol), titles(&alice));
}

#[tokio::test]
async fn test_two_relays_bridge_disjoint_peers() {
    let east = MemoryRelay::new("memory://east");
    let west = MemoryRelay::new("memory://west");
    let both = store_on(&[&east, &west], "catalog");
    let east_only = store_on(&[&east], "catalog");
    let west_only = store_on(&[&west], "catalog");

    east_only.put(entry("m1", "Sintel", 1_000)).await.unwrap();
    eventually("dual-homed peer to see m1", || both.get("m1").is_some()).await;

    // Not re-broadcast: a store only relays its own writes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(west_only.get("m1").is_none());

    both.put(entry("m2", "Tears of Steel", 2_000)).await.unwrap();
    eventually("west-only peer to see m2", || west_only.get("m2").is_some()).await;
    eventually("east-only peer to see m2", || east_only.get("m2").is_some()).await;
}

#[tokio::test]
async fn test_subscriber_sees_remote_changes() {
    let relay = MemoryRelay::new("memory://relay");
    let alice = store_on(&[&relay], "catalog");
    let bob = store_on(&[&relay], "catalog");

    let seen = Arc::new(parking_lot::Mutex::new(Vec::<usize>::new()));
    let sink = seen.clone();
    let _subscription = bob.subscribe(move |entries| sink.lock().push(entries.len()));

    alice.put(entry("m1", "Sintel", 1_000)).await.unwrap();
    alice.put(entry("m2", "Big Buck Bunny", 2_000)).await.unwrap();

    eventually("bob's listener to see both entries", || {
        seen.lock().last() == Some(&2)
    })
    .await;
    assert_eq!(seen.lock().first(), Some(&0));
}
