//! # Router
//!
//! Delivers envelopes to the handlers subscribed on each destination channel and
//! forwards them to connected peer nodes.
//!
//! ## Invariants
//!
//! - **Snapshot delivery**: the subscriber list of a channel is a copy-on-write
//!   `Arc<[Subscription]>`. Routing clones the snapshot and releases the table
//!   before calling any handler, so handlers may subscribe, unsubscribe or route.
//! - **Isolation**: a failing or panicking handler is logged and never stops
//!   delivery to the remaining subscribers.
//! - **Single hop**: envelopes that arrived from a peer are delivered locally only.
//!   Locally routed envelopes are offered to each peer at most once, when some
//!   destination has no local subscriber or is cluster-wide. Forwarded envelopes
//!   keep their whole destination set, so a channel subscribed on both nodes
//!   (such as `SINGLETON`) is delivered on both when it shares an envelope with
//!   a channel that has no local subscriber.
//! - **Unsubscribe is a barrier**: once `unsubscribe` returns, the handler is not
//!   running and will not run again.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::channel;
use crate::channel::Channel;
use crate::channel::ChannelAllocator;
use crate::config::BusConfig;
use crate::envelope;
use crate::envelope::Envelope;
use crate::gate::Gate;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Receives envelopes delivered on a channel.
///
/// Runs synchronously on the routing task; long work should be spawned.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, envelope: &Arc<Envelope>) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&Arc<Envelope>) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, envelope: &Arc<Envelope>) -> HandlerResult {
        self(envelope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The router has been shut down.
    Disconnected,
    UnknownSubscription { channel: Channel, id: SubscriptionId },
    Channel(channel::Error),
    Envelope(envelope::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Router is disconnected"),
            Self::UnknownSubscription { channel, id } => {
                write!(f, "No subscription {} on {}", id.0, channel)
            }
            Self::Channel(e) => write!(f, "{}", e),
            Self::Envelope(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        Self::Channel(e)
    }
}

impl From<envelope::Error> for Error {
    fn from(e: envelope::Error) -> Self {
        Self::Envelope(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct PeerId(u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn Handler>,
    gate: Arc<Gate>,
    /// Plain subscriptions own their gate and close it on unsubscribe; grouped
    /// ones leave that to the group.
    owns_gate: bool,
}

struct PeerEntry {
    name: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// What happened to one routed envelope.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Handlers invoked on this node.
    pub local: usize,
    /// Peer links the envelope was queued on.
    pub forwarded: usize,
}

impl Delivery {
    pub fn is_dropped(&self) -> bool {
        self.local == 0 && self.forwarded == 0
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub routed: u64,
    pub delivered: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub handler_failures: u64,
}

#[derive(Default)]
struct Counters {
    routed: AtomicU64,
    delivered: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
}

pub struct Router {
    config: BusConfig,
    channels: ChannelAllocator,
    subscriptions: DashMap<Channel, Arc<[Subscription]>>,
    peers: DashMap<PeerId, PeerEntry>,
    next_subscription: AtomicU64,
    next_peer: AtomicU64,
    connected: watch::Sender<bool>,
    counters: Counters,
}

impl Router {
    pub fn new(config: BusConfig) -> Result<Arc<Self>> {
        let channels = ChannelAllocator::new(config.node_id)?;
        let (connected, _) = watch::channel(true);
        tracing::debug!(node_id = config.node_id, "router created");
        Ok(Arc::new(Self {
            config,
            channels,
            subscriptions: DashMap::new(),
            peers: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            next_peer: AtomicU64::new(1),
            connected,
            counters: Counters::default(),
        }))
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The channel space of this node.
    pub fn channels(&self) -> &ChannelAllocator {
        &self.channels
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Observes connectivity; flips to `false` on shutdown.
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Subscribes a closure with its own gate.
    pub fn subscribe<F>(&self, channel: Channel, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Arc<Envelope>) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(channel, Arc::new(handler), Gate::new(), true)
    }

    /// Subscribes a handler that belongs to a group sharing `gate`.
    ///
    /// Unsubscribing does not close the gate; the group closes it when it tears down.
    pub fn subscribe_gated(
        &self,
        channel: Channel,
        handler: Arc<dyn Handler>,
        gate: Arc<Gate>,
    ) -> Result<SubscriptionId> {
        self.insert(channel, handler, gate, false)
    }

    fn insert(
        &self,
        channel: Channel,
        handler: Arc<dyn Handler>,
        gate: Arc<Gate>,
        owns_gate: bool,
    ) -> Result<SubscriptionId> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription { id, handler, gate, owns_gate };

        let mut entry = self.subscriptions.entry(channel).or_insert_with(|| Arc::from(Vec::new()));
        let mut list: Vec<Subscription> = entry.iter().cloned().collect();
        list.push(subscription);
        *entry = Arc::from(list);

        tracing::trace!(%channel, subscription = id.0, "subscribed");
        Ok(id)
    }

    /// Removes a subscription. When this returns the handler is not running.
    pub fn unsubscribe(&self, channel: Channel, id: SubscriptionId) -> Result<()> {
        let removed = {
            let Some(mut entry) = self.subscriptions.get_mut(&channel) else {
                return Err(Error::UnknownSubscription { channel, id });
            };
            let Some(found) = entry.iter().find(|s| s.id == id).cloned() else {
                return Err(Error::UnknownSubscription { channel, id });
            };
            let rest: Vec<Subscription> = entry.iter().filter(|s| s.id != id).cloned().collect();
            *entry = Arc::from(rest);
            found
        };
        self.subscriptions.remove_if(&channel, |_, list| list.is_empty());

        if removed.owns_gate {
            removed.gate.close();
        }
        tracing::trace!(%channel, subscription = id.0, "unsubscribed");
        Ok(())
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.subscriptions.get(&channel).map(|list| list.len()).unwrap_or(0)
    }

    /// Routes an envelope originating on this node.
    pub fn route(&self, envelope: Envelope) -> Result<Delivery> {
        self.dispatch(Arc::new(envelope), None)
    }

    /// Routes an envelope that arrived from `from`. Never forwarded again.
    pub(crate) fn route_from_peer(&self, envelope: Envelope, from: PeerId) -> Result<Delivery> {
        self.dispatch(Arc::new(envelope), Some(from))
    }

    fn dispatch(&self, envelope: Arc<Envelope>, from: Option<PeerId>) -> Result<Delivery> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        self.counters.routed.fetch_add(1, Ordering::Relaxed);

        let mut delivery = Delivery::default();
        let mut offer_to_peers = false;

        for &channel in envelope.destinations() {
            let snapshot = self.subscriptions.get(&channel).map(|list| list.value().clone());
            match snapshot {
                Some(list) if !list.is_empty() => {
                    for subscription in list.iter() {
                        if self.deliver(subscription, channel, &envelope) {
                            delivery.local += 1;
                        }
                    }
                }
                _ => offer_to_peers = true,
            }
            if channel.is_cluster_wide() {
                offer_to_peers = true;
            }
        }

        if offer_to_peers && from.is_none() {
            delivery.forwarded = self.forward(&envelope);
        }

        self.counters.delivered.fetch_add(delivery.local as u64, Ordering::Relaxed);
        self.counters.forwarded.fetch_add(delivery.forwarded as u64, Ordering::Relaxed);
        if delivery.is_dropped() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                code = envelope.code(),
                destinations = ?envelope.destinations(),
                "no subscriber for envelope, dropped"
            );
        }
        Ok(delivery)
    }

    fn deliver(&self, subscription: &Subscription, channel: Channel, envelope: &Arc<Envelope>) -> bool {
        let Some(_guard) = subscription.gate.enter() else {
            return false;
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| subscription.handler.handle(envelope)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%channel, code = envelope.code(), %error, "handler failed");
            }
            Err(_) => {
                self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%channel, code = envelope.code(), "handler panicked");
            }
        }
        true
    }

    fn forward(&self, envelope: &Envelope) -> usize {
        if self.peers.is_empty() {
            return 0;
        }
        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(code = envelope.code(), %error, "cannot encode envelope for peers");
                return 0;
            }
        };
        let mut forwarded = 0;
        for peer in self.peers.iter() {
            if peer.outbound.send(frame.clone()).is_ok() {
                forwarded += 1;
            } else {
                tracing::debug!(peer = %peer.key(), name = %peer.name, "peer link closed, not forwarding");
            }
        }
        forwarded
    }

    /// Registers an outbound frame queue for a peer node.
    pub(crate) fn add_peer(&self, name: &str, outbound: mpsc::UnboundedSender<Vec<u8>>) -> PeerId {
        let id = PeerId(self.next_peer.fetch_add(1, Ordering::Relaxed));
        self.peers.insert(id, PeerEntry { name: name.to_string(), outbound });
        tracing::info!(peer = %id, name, "peer link added");
        id
    }

    pub(crate) fn remove_peer(&self, id: PeerId) {
        if let Some((_, entry)) = self.peers.remove(&id) {
            tracing::info!(peer = %id, name = %entry.name, "peer link removed");
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            routed: self.counters.routed.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Disconnects the router. Routing and subscribing fail from now on, every
    /// subscription is dropped and waiting callers are woken.
    pub fn shutdown(&self) {
        if !self.connected.send_replace(false) {
            return;
        }
        let channels: Vec<Channel> = self.subscriptions.iter().map(|e| *e.key()).collect();
        for channel in channels {
            if let Some((_, list)) = self.subscriptions.remove(&channel) {
                for subscription in list.iter().filter(|s| s.owns_gate) {
                    subscription.gate.close();
                }
            }
        }
        self.peers.clear();
        tracing::info!(node_id = self.config.node_id, "router shut down");
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("node_id", &self.config.node_id)
            .field("channels", &self.subscriptions.len())
            .field("peers", &self.peers.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
