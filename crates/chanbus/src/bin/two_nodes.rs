//! Two nodes joined by an in-process link.
//!
//! Node B serves `foo` on channel 42 and the object store; node A discovers both
//! and calls them across the link.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use chanbus::BusConfig;
use chanbus::Channel;
use chanbus::DuplexTransport;
use chanbus::PeerLink;
use chanbus::Router;
use chanbus::ServiceClient;
use chanbus::ServiceContract;
use chanbus::ServiceOwner;
use chanbus::store::MemoryObjectStore;
use chanbus::store::StoreClient;
use chanbus::store::StoreService;

#[tokio::main]
async fn main() -> Result<()> {
    chanbus::telemetry::init();
    let config = BusConfig::from_env().context("reading CHANBUS_* configuration")?;

    let node_a = Router::new(config.clone().with_node_id(1))?;
    let node_b = Router::new(config.with_node_id(2))?;
    let (a_end, b_end) = DuplexTransport::pair();
    let _a_link = PeerLink::connect(&node_a, "node-b", Box::new(a_end));
    let _b_link = PeerLink::connect(&node_b, "node-a", Box::new(b_end));

    let contract = ServiceContract::builder("foo").call("Greet", 20, 21).push("Greeted", 22).build()?;
    let greet = contract.member("Greet").context("Greet member")?.clone();
    let greeted = contract.member("Greeted").context("Greeted member")?.clone();

    let foo = Arc::new(ServiceOwner::on_channel(&node_b, Channel(42))?.named("foo"));
    let pushed = greeted.clone();
    let reply_member = greet.clone();
    let notifier = Arc::downgrade(&foo);
    foo.register_member(&greet, move |request| {
        let who: String = request.args()?;
        request.respond(&reply_member, &format!("hello, {}", who))?;
        if let Some(owner) = notifier.upgrade() {
            owner.notify(&greeted, [request.origin()], &who)?;
        }
        Ok(())
    })?;
    foo.start()?;

    let store = StoreService::start(&node_b, Arc::new(MemoryObjectStore::new()))?;

    let client = ServiceClient::discover(&node_a, "foo").await?;
    tracing::info!(channel = %client.target(), "discovered foo");
    client.on_push(&pushed, |args| {
        let who: String = args.unpack()?;
        tracing::info!(%who, "foo pushed a greeting");
        Ok(())
    })?;
    let answer: String = client.call(&greet, &"node a".to_string()).await?;
    tracing::info!(%answer, "foo answered");

    let objects = StoreClient::discover(&node_a).await?;
    objects.set_object(7, b"sword of testing").await?;
    let loaded = objects.get_object(7).await?;
    tracing::info!(store = %store.channel(), found = loaded.is_some(), "object round trip");

    tracing::info!(a = ?node_a.stats(), b = ?node_b.stats(), "done");
    Ok(())
}
