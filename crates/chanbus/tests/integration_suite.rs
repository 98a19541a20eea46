//! Multi-node tests: routers joined by in-process peer links.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chanbus::BusConfig;
use chanbus::Channel;
use chanbus::DuplexTransport;
use chanbus::Envelope;
use chanbus::PeerLink;
use chanbus::Router;
use chanbus::ServiceClient;
use chanbus::ServiceContract;
use chanbus::ServiceOwner;
use chanbus::Transport;
use chanbus::discovery;
use chanbus::store::MemoryObjectStore;
use chanbus::store::StoreClient;
use chanbus::store::StoreService;

fn node(id: u32) -> Arc<Router> {
    let config = BusConfig::default()
        .with_node_id(id)
        .with_reply_timeout(Duration::from_secs(2))
        .with_discovery_timeout(Duration::from_millis(500));
    Router::new(config).expect("router")
}

/// Links two routers both ways.
fn link(a: &Arc<Router>, b: &Arc<Router>) -> (PeerLink, PeerLink) {
    let (a_end, b_end) = DuplexTransport::pair();
    let to_b = PeerLink::connect(a, format!("node-{}", b.config().node_id), Box::new(a_end));
    let to_a = PeerLink::connect(b, format!("node-{}", a.config().node_id), Box::new(b_end));
    (to_b, to_a)
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}

fn recorder(router: &Router, channel: Channel) -> Arc<Mutex<Vec<u32>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    router
        .subscribe(channel, move |env| {
            sink.lock().unwrap().push(env.code());
            Ok(())
        })
        .expect("subscribe");
    seen
}

fn greeter_contract() -> ServiceContract {
    ServiceContract::builder("foo").call("Greet", 20, 21).build().expect("contract")
}

// --- Discovery across nodes ---

#[tokio::test]
async fn test_discover_foo_on_channel_42_across_nodes() {
    let node_a = node(1);
    let node_b = node(2);
    let _links = link(&node_a, &node_b);

    let foo = ServiceOwner::on_channel(&node_b, Channel(42)).unwrap().named("foo");
    foo.start().unwrap();

    let channel = discovery::resolve(&node_a, "foo").await.unwrap();
    assert_eq!(channel, Channel(42));
}

#[tokio::test]
async fn test_call_across_nodes() {
    let node_a = node(1);
    let node_b = node(2);
    let _links = link(&node_a, &node_b);

    let contract = greeter_contract();
    let greet = contract.member("Greet").unwrap().clone();
    let owner = ServiceOwner::new(&node_b).unwrap().named("foo");
    let reply = greet.clone();
    owner
        .register_member(&greet, move |req| {
            let who: String = req.args()?;
            req.respond(&reply, &format!("hello {}", who))?;
            Ok(())
        })
        .unwrap();
    owner.start().unwrap();

    let client = ServiceClient::discover(&node_a, "foo").await.unwrap();
    assert_eq!(client.target(), owner.channel());
    assert_eq!(client.target().node(), 2);

    let answer: String = client.call(&greet, &"a".to_string()).await.unwrap();
    assert_eq!(answer, "hello a");
}

#[tokio::test]
async fn test_store_across_nodes() {
    let node_a = node(1);
    let node_b = node(2);
    let _links = link(&node_a, &node_b);
    let _service = StoreService::start(&node_b, Arc::new(MemoryObjectStore::new())).unwrap();

    let store = StoreClient::discover(&node_a).await.unwrap();
    store.set_object(3, b"chest").await.unwrap();
    assert_eq!(store.get_object(3).await.unwrap(), Some(b"chest".to_vec()));
    assert_eq!(store.get_object(4).await.unwrap(), None);
}

// --- Forwarding rules ---

#[tokio::test]
async fn test_local_subscriber_suppresses_forwarding() {
    let node_a = node(1);
    let node_b = node(2);
    let _links = link(&node_a, &node_b);
    let _local = recorder(&node_a, Channel(5000));

    let delivery = node_a.route(Envelope::direct(Channel(5000), Channel(9), 16, vec![])).unwrap();
    assert_eq!(delivery.local, 1);
    assert_eq!(delivery.forwarded, 0);
}

#[tokio::test]
async fn test_unknown_channel_is_forwarded_once_per_link() {
    let node_a = node(1);
    let node_b = node(2);
    let _links = link(&node_a, &node_b);
    let remote = recorder(&node_b, Channel(5000));

    let delivery = node_a.route(Envelope::direct(Channel(5000), Channel(9), 17, vec![])).unwrap();
    assert_eq!(delivery.forwarded, 1);

    eventually("remote delivery", || remote.lock().unwrap().len() == 1).await;
    assert_eq!(*remote.lock().unwrap(), vec![17]);
}

#[tokio::test]
async fn test_forwarded_envelope_keeps_locally_delivered_destinations() {
    let node_a = node(1);
    let node_b = node(2);
    let _links = link(&node_a, &node_b);
    let here = recorder(&node_a, Channel::SINGLETON);
    let there = recorder(&node_b, Channel::SINGLETON);

    let both = Envelope::new([Channel::SINGLETON, Channel(5000)], Channel(9), 18, vec![]).unwrap();
    let delivery = node_a.route(both).unwrap();
    assert_eq!(delivery.local, 1);
    assert_eq!(delivery.forwarded, 1);

    eventually("singleton delivered on the peer too", || there.lock().unwrap().len() == 1).await;
    assert_eq!(*here.lock().unwrap(), vec![18]);
}

#[tokio::test]
async fn test_discovery_is_forwarded_despite_local_owner() {
    let node_a = node(1);
    let node_b = node(2);
    let _links = link(&node_a, &node_b);
    let local = ServiceOwner::new(&node_a).unwrap().named("here");
    local.start().unwrap();

    let ask = Envelope::packed(
        Channel::DISCOVERY,
        Channel(9),
        chanbus::codes::DISCOVER_SERVICE,
        &discovery::DiscoveryRequest { name: "elsewhere".into() },
    )
    .unwrap();
    let delivery = node_a.route(ask).unwrap();
    assert_eq!(delivery.local, 1);
    assert_eq!(delivery.forwarded, 1);
}

#[tokio::test]
async fn test_peer_envelopes_are_not_forwarded_again() {
    // a <-> b <-> c, nothing subscribed anywhere
    let node_a = node(1);
    let node_b = node(2);
    let node_c = node(3);
    let _ab = link(&node_a, &node_b);
    let _bc = link(&node_b, &node_c);

    node_a.route(Envelope::direct(Channel(6000), Channel(9), 16, vec![])).unwrap();

    eventually("b sees the envelope", || node_b.stats().routed == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node_b.stats().forwarded, 0);
    assert_eq!(node_c.stats().routed, 0);
    // and it never bounced back to a
    assert_eq!(node_a.stats().routed, 1);
}

#[tokio::test]
async fn test_link_preserves_order() {
    let node_a = node(1);
    let node_b = node(2);
    let _links = link(&node_a, &node_b);
    let remote = recorder(&node_b, Channel(7000));

    for code in 16..116 {
        node_a.route(Envelope::direct(Channel(7000), Channel(9), code, vec![])).unwrap();
    }

    eventually("all envelopes", || remote.lock().unwrap().len() == 100).await;
    let expected: Vec<u32> = (16..116).collect();
    assert_eq!(*remote.lock().unwrap(), expected);
}

// --- Link failure ---

#[tokio::test]
async fn test_closed_transport_unregisters_peer() {
    let node_a = node(1);
    let (a_end, b_end) = DuplexTransport::pair();
    let link = PeerLink::connect(&node_a, "gone", Box::new(a_end));
    assert_eq!(node_a.peer_count(), 1);

    drop(b_end);

    eventually("peer removed", || node_a.peer_count() == 0).await;
    eventually("link tasks ended", || !link.is_alive()).await;
    let delivery = node_a.route(Envelope::direct(Channel(8000), Channel(9), 16, vec![])).unwrap();
    assert!(delivery.is_dropped());
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let node_a = node(1);
    let (a_end, raw) = DuplexTransport::pair();
    let _link = PeerLink::connect(&node_a, "raw", Box::new(a_end));
    let seen = recorder(&node_a, Channel(9000));

    raw.send(&[0xFF, 0x00, 0x01]).await.unwrap();
    let good = Envelope::direct(Channel(9000), Channel(9), 30, vec![]).to_frame().unwrap();
    raw.send(&good).await.unwrap();

    eventually("valid frame delivered", || seen.lock().unwrap().len() == 1).await;
    assert_eq!(node_a.peer_count(), 1);
}

#[tokio::test]
async fn test_dropping_link_unregisters_peer() {
    let node_a = node(1);
    let node_b = node(2);
    let (to_b, _to_a) = link(&node_a, &node_b);
    assert_eq!(node_a.peer_count(), 1);

    drop(to_b);
    assert_eq!(node_a.peer_count(), 0);
}
