//! # Channel Space
//!
//! Channels are plain 64-bit addresses. A handful of structural channels are fixed
//! cluster-wide; everything else is generated per node and stays unique for as long
//! as its `ChannelLease` is alive.
//!
//! Generated layout: `[node_id: 24 bits][counter: 40 bits]`.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use wirepack::Pack;
use wirepack::Reader;
use wirepack::Unpack;
use wirepack::Writer;

const COUNTER_BITS: u32 = 40;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// An address on the bus. A value, not an owned object.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Channel(pub u64);

impl Channel {
    /// Conventional channel of singleton services.
    pub const SINGLETON: Channel = Channel(0);
    /// Well-known channel for service discovery requests.
    pub const DISCOVERY: Channel = Channel(1);
    /// Values below this are reserved for structural channels.
    pub const FIRST_GENERATED: u64 = 1024;

    pub fn is_structural(self) -> bool {
        self.0 < Self::FIRST_GENERATED
    }

    /// Cluster-wide channels are offered to every peer even when a local
    /// subscriber exists.
    pub fn is_cluster_wide(self) -> bool {
        self == Self::DISCOVERY
    }

    /// Node that generated this channel. Meaningless for structural channels.
    pub fn node(self) -> u32 {
        (self.0 >> COUNTER_BITS) as u32
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

impl Pack for Channel {
    fn pack(&self, w: &mut Writer) -> wirepack::Result<()> {
        w.u64(self.0);
        Ok(())
    }
}

impl Unpack for Channel {
    fn unpack(r: &mut Reader<'_>) -> wirepack::Result<Self> {
        Ok(Channel(r.u64()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The channel is already held by a live lease.
    ChannelInUse(Channel),
    /// The node's 40-bit counter space is used up.
    Exhausted { node_id: u32 },
    /// Node ids are limited to 24 bits.
    NodeIdTooLarge(u32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelInUse(ch) => write!(f, "Channel {} is already in use", ch),
            Self::Exhausted { node_id } => write!(f, "Channel space exhausted on node {}", node_id),
            Self::NodeIdTooLarge(id) => write!(f, "Node id {} does not fit in 24 bits", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

struct AllocatorInner {
    node_id: u32,
    next: AtomicU64,
    live: DashMap<Channel, &'static str>,
}

/// Hands out channels and tracks which ones are live.
///
/// Cloning shares the same channel space.
#[derive(Clone)]
pub struct ChannelAllocator {
    inner: Arc<AllocatorInner>,
}

impl ChannelAllocator {
    pub fn new(node_id: u32) -> Result<Self> {
        if node_id >= 1 << (64 - COUNTER_BITS) {
            return Err(Error::NodeIdTooLarge(node_id));
        }
        Ok(Self {
            inner: Arc::new(AllocatorInner {
                node_id,
                next: AtomicU64::new(Channel::FIRST_GENERATED),
                live: DashMap::new(),
            }),
        })
    }

    pub fn node_id(&self) -> u32 {
        self.inner.node_id
    }

    /// Generates a fresh channel unique for the lifetime of the returned lease.
    ///
    /// # Errors
    /// `ChannelInUse` if the generated value collides with a reserved channel.
    pub fn allocate(&self, purpose: &'static str) -> Result<ChannelLease> {
        let counter = self.inner.next.fetch_add(1, Ordering::Relaxed);
        if counter > COUNTER_MASK {
            return Err(Error::Exhausted { node_id: self.inner.node_id });
        }
        let channel = Channel(((self.inner.node_id as u64) << COUNTER_BITS) | counter);
        self.claim(channel, purpose)
    }

    /// Claims a conventional, fixed channel (e.g. `Channel::SINGLETON`).
    ///
    /// # Errors
    /// `ChannelInUse` if another lease already holds it.
    pub fn reserve(&self, channel: Channel, purpose: &'static str) -> Result<ChannelLease> {
        self.claim(channel, purpose)
    }

    fn claim(&self, channel: Channel, purpose: &'static str) -> Result<ChannelLease> {
        match self.inner.live.entry(channel) {
            Entry::Occupied(held) => {
                tracing::error!(%channel, held_by = *held.get(), wanted_by = purpose, "channel claimed twice");
                Err(Error::ChannelInUse(channel))
            }
            Entry::Vacant(slot) => {
                slot.insert(purpose);
                Ok(ChannelLease { channel, inner: self.inner.clone() })
            }
        }
    }

    pub fn is_live(&self, channel: Channel) -> bool {
        self.inner.live.contains_key(&channel)
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.len()
    }
}

impl std::fmt::Debug for ChannelAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAllocator")
            .field("node_id", &self.inner.node_id)
            .field("live", &self.inner.live.len())
            .finish()
    }
}

/// Exclusive hold on a channel. Dropping it frees the channel.
pub struct ChannelLease {
    channel: Channel,
    inner: Arc<AllocatorInner>,
}

impl ChannelLease {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.inner.live.remove(&self.channel);
    }
}

impl std::fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChannelLease({})", self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_channels_are_unique_and_tagged_with_node() {
        let alloc = ChannelAllocator::new(7).unwrap();
        let a = alloc.allocate("a").unwrap();
        let b = alloc.allocate("b").unwrap();

        assert_ne!(a.channel(), b.channel());
        assert_eq!(a.channel().node(), 7);
        assert!(!a.channel().is_structural());
        assert_eq!(alloc.live_count(), 2);
    }

    #[test]
    fn test_reserve_twice_fails_loudly() {
        let alloc = ChannelAllocator::new(0).unwrap();
        let _lease = alloc.reserve(Channel::SINGLETON, "first").unwrap();
        let err = alloc.reserve(Channel::SINGLETON, "second").unwrap_err();
        assert_eq!(err, Error::ChannelInUse(Channel::SINGLETON));
    }

    #[test]
    fn test_dropping_lease_frees_channel() {
        let alloc = ChannelAllocator::new(0).unwrap();
        let lease = alloc.reserve(Channel(42), "svc").unwrap();
        assert!(alloc.is_live(Channel(42)));
        drop(lease);
        assert!(!alloc.is_live(Channel(42)));
        alloc.reserve(Channel(42), "svc again").unwrap();
    }

    #[test]
    fn test_generated_collides_with_reservation() {
        let alloc = ChannelAllocator::new(0).unwrap();
        let _held = alloc.reserve(Channel(Channel::FIRST_GENERATED), "squatter").unwrap();
        let err = alloc.allocate("fresh").unwrap_err();
        assert_eq!(err, Error::ChannelInUse(Channel(Channel::FIRST_GENERATED)));
        // the next one is fine
        alloc.allocate("fresh").unwrap();
    }

    #[test]
    fn test_node_id_bounds() {
        assert!(ChannelAllocator::new(1 << 24).is_err());
        assert!(ChannelAllocator::new((1 << 24) - 1).is_ok());
    }

    #[test]
    fn test_structural_channels() {
        assert!(Channel::DISCOVERY.is_structural());
        assert!(Channel::DISCOVERY.is_cluster_wide());
        assert!(!Channel::SINGLETON.is_cluster_wide());
        assert_eq!(Channel(5).to_string(), "ch-5");
    }
}
