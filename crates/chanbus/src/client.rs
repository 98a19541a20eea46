//! # Service Clients
//!
//! A client owns a generated reply channel and talks to one service channel.
//!
//! ## Correlation
//!
//! Replies are matched by `(reply channel, reply code)`. A client has at most one
//! outstanding call per reply code; a second concurrent call with the same code
//! fails fast with `CallInFlight` instead of racing for the reply. Replies nobody
//! waits for (late, duplicate) are logged and dropped, unless their code has a
//! push handler installed with `on_push`.
//!
//! ## Teardown
//!
//! Dropping the client unsubscribes its reply handler and waits for any reply
//! delivery in progress, then frees the reply channel.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::sync::watch;
use wirepack::Pack;
use wirepack::Reader;
use wirepack::Unpack;
use wirepack::Writer;

use crate::channel::Channel;
use crate::channel::ChannelLease;
use crate::contract::Direction;
use crate::contract::Member;
use crate::discovery;
use crate::envelope;
use crate::envelope::Envelope;
use crate::envelope::MessageCode;
use crate::envelope::codes;
use crate::gate::Gate;
use crate::router;
use crate::router::Delivery;
use crate::router::Handler;
use crate::router::HandlerResult;
use crate::router::Router;
use crate::router::SubscriptionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The router is shut down or gone.
    Disconnected,
    Timeout { code: MessageCode, after: Duration },
    /// A call expecting the same reply code is already outstanding.
    CallInFlight(MessageCode),
    /// The member is pushed by owners, clients cannot send it.
    NotRemote(&'static str),
    /// `call` on a member that does not answer.
    NoReplyCode(&'static str),
    /// `on_push` for a member clients send rather than receive.
    NotPush(&'static str),
    /// A push handler for this code is already installed.
    DuplicatePush(MessageCode),
    /// Batched members cannot answer.
    ReplyInBatch(&'static str),
    /// No owner answered discovery for this service name.
    ServiceNotFound(String),
    /// Arguments or reply did not encode/decode.
    Protocol(wirepack::Error),
    Router(router::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Router is disconnected"),
            Self::Timeout { code, after } => write!(f, "No reply with code {} after {:?}", code, after),
            Self::CallInFlight(code) => write!(f, "A call waiting on reply code {} is already in flight", code),
            Self::NotRemote(name) => write!(f, "Member {} is not sent by clients", name),
            Self::NoReplyCode(name) => write!(f, "Member {} has no reply code", name),
            Self::NotPush(name) => write!(f, "Member {} is not pushed by owners", name),
            Self::DuplicatePush(code) => write!(f, "Push handler for code {} installed twice", code),
            Self::ReplyInBatch(name) => write!(f, "Member {} answers and cannot be batched", name),
            Self::ServiceNotFound(name) => write!(f, "No owner answered discovery for {:?}", name),
            Self::Protocol(e) => write!(f, "Protocol error: {}", e),
            Self::Router(e) => write!(f, "Router error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<router::Error> for Error {
    fn from(e: router::Error) -> Self {
        match e {
            router::Error::Disconnected => Self::Disconnected,
            other => Self::Router(other),
        }
    }
}

impl From<wirepack::Error> for Error {
    fn from(e: wirepack::Error) -> Self {
        Self::Protocol(e)
    }
}

impl From<envelope::Error> for Error {
    fn from(e: envelope::Error) -> Self {
        match e {
            envelope::Error::Wire(e) => Self::Protocol(e),
            other => Self::Router(router::Error::Envelope(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A caller waiting on a reply code. `call` tells apart successive callers.
struct Waiter {
    call: u64,
    reply: oneshot::Sender<Arc<Envelope>>,
}

type Pending = DashMap<MessageCode, Waiter>;

/// Frees the caller's pending slot however the request future ends, including
/// when it is dropped before completing.
struct PendingSlot<'a> {
    pending: &'a Pending,
    code: MessageCode,
    call: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove_if(&self.code, |_, waiter| waiter.call == self.call);
    }
}

type PushFn = Arc<dyn Fn(&mut Reader<'_>) -> HandlerResult + Send + Sync>;

struct ReplyHandler {
    channel: Channel,
    pending: Arc<Pending>,
    pushes: Arc<DashMap<MessageCode, PushFn>>,
}

impl Handler for ReplyHandler {
    fn handle(&self, envelope: &Arc<Envelope>) -> HandlerResult {
        if let Some((_, waiter)) = self.pending.remove(&envelope.code()) {
            // The caller may have timed out in the meantime.
            let _ = waiter.reply.send(envelope.clone());
            return Ok(());
        }
        let push = self.pushes.get(&envelope.code()).map(|p| p.value().clone());
        match push {
            Some(push) => push(&mut envelope.reader()),
            None => {
                tracing::debug!(channel = %self.channel, code = envelope.code(), "unsolicited reply dropped");
                Ok(())
            }
        }
    }
}

/// Reply-correlation machinery bound to one leased channel.
pub(crate) struct ReplyPort {
    router: Weak<Router>,
    lease: ChannelLease,
    pending: Arc<Pending>,
    pushes: Arc<DashMap<MessageCode, PushFn>>,
    gate: Arc<Gate>,
    subscription: Mutex<Option<SubscriptionId>>,
    next_call: AtomicU64,
}

impl ReplyPort {
    pub(crate) fn open(router: &Arc<Router>, purpose: &'static str) -> Result<Self> {
        let lease = router.channels().allocate(purpose).map_err(router::Error::from)?;
        Ok(Self {
            router: Arc::downgrade(router),
            lease,
            pending: Arc::new(DashMap::new()),
            pushes: Arc::new(DashMap::new()),
            gate: Gate::new(),
            subscription: Mutex::new(None),
            next_call: AtomicU64::new(1),
        })
    }

    pub(crate) fn channel(&self) -> Channel {
        self.lease.channel()
    }

    pub(crate) fn router(&self) -> Result<Arc<Router>> {
        match self.router.upgrade() {
            Some(router) if router.is_connected() => Ok(router),
            _ => Err(Error::Disconnected),
        }
    }

    /// Subscribes the reply handler on first use. Idempotent.
    fn ensure_subscribed(&self, router: &Router) -> Result<()> {
        let mut slot = self.subscription.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            let handler = ReplyHandler {
                channel: self.channel(),
                pending: self.pending.clone(),
                pushes: self.pushes.clone(),
            };
            let id = router.subscribe_gated(self.channel(), Arc::new(handler), self.gate.clone())?;
            *slot = Some(id);
        }
        Ok(())
    }

    /// Routes `envelope` and waits for the envelope that answers with `reply`.
    pub(crate) async fn request(
        &self,
        envelope: Envelope,
        reply: MessageCode,
        timeout: Duration,
    ) -> Result<Arc<Envelope>> {
        let router = self.router()?;
        self.ensure_subscribed(&router)?;

        let (tx, rx) = oneshot::channel();
        let call = self.next_call.fetch_add(1, Ordering::Relaxed);
        match self.pending.entry(reply) {
            // The previous caller is gone without cleaning up.
            Entry::Occupied(mut slot) if slot.get().reply.is_closed() => {
                slot.insert(Waiter { call, reply: tx });
            }
            Entry::Occupied(_) => return Err(Error::CallInFlight(reply)),
            Entry::Vacant(slot) => {
                slot.insert(Waiter { call, reply: tx });
            }
        }
        let _slot = PendingSlot { pending: &self.pending, code: reply, call };

        let mut connected = router.connection_state();
        router.route(envelope)?;
        drop(router);

        tokio::select! {
            answer = rx => answer.map_err(|_| Error::Disconnected),
            _ = tokio::time::sleep(timeout) => Err(Error::Timeout { code: reply, after: timeout }),
            _ = disconnected(&mut connected) => Err(Error::Disconnected),
        }
    }

    fn install_push(&self, code: MessageCode, push: PushFn) -> Result<()> {
        let router = self.router()?;
        match self.pushes.entry(code) {
            Entry::Occupied(_) => return Err(Error::DuplicatePush(code)),
            Entry::Vacant(slot) => {
                slot.insert(push);
            }
        }
        self.ensure_subscribed(&router)
    }

    pub(crate) fn route(&self, envelope: Envelope) -> Result<Delivery> {
        Ok(self.router()?.route(envelope)?)
    }
}

impl Drop for ReplyPort {
    fn drop(&mut self) {
        let id = self.subscription.get_mut().unwrap_or_else(|p| p.into_inner()).take();
        if let (Some(id), Some(router)) = (id, self.router.upgrade()) {
            // Fails only if the router already dropped every subscription on shutdown.
            let _ = router.unsubscribe(self.channel(), id);
        }
        self.gate.close();
        self.pending.clear();
    }
}

/// Resolves once the router reports it is disconnected (or is gone).
async fn disconnected(state: &mut watch::Receiver<bool>) {
    while *state.borrow_and_update() {
        if state.changed().await.is_err() {
            return;
        }
    }
}

/// A handle to one remote service.
pub struct ServiceClient {
    port: ReplyPort,
    target: Channel,
    timeout: Duration,
}

impl ServiceClient {
    /// A client for the service listening on `target`.
    pub fn new(router: &Arc<Router>, target: Channel) -> Result<Self> {
        let port = ReplyPort::open(router, "service client")?;
        Ok(Self { port, target, timeout: router.config().reply_timeout })
    }

    /// A client for the service that answers discovery for `name`.
    ///
    /// # Errors
    /// `ServiceNotFound` if nobody answers within the discovery timeout.
    pub async fn discover(router: &Arc<Router>, name: &str) -> Result<Self> {
        let port = ReplyPort::open(router, "service client")?;
        let target = discovery::resolve_on(&port, name, router.config().discovery_timeout).await?;
        Ok(Self { port, target, timeout: router.config().reply_timeout })
    }

    /// Overrides the router's reply timeout for this client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Where this client's replies (and owner pushes) arrive.
    pub fn channel(&self) -> Channel {
        self.port.channel()
    }

    pub fn target(&self) -> Channel {
        self.target
    }

    fn check_remote(member: &Member) -> Result<()> {
        if member.direction() != Direction::ToOwner {
            return Err(Error::NotRemote(member.name()));
        }
        Ok(())
    }

    fn envelope<A: Pack + ?Sized>(&self, member: &Member, args: &A) -> Result<Envelope> {
        Ok(Envelope::packed(self.target, self.channel(), member.code(), args)?)
    }

    /// Fire-and-forget. Succeeds even when nothing is subscribed on the target.
    pub fn send<A: Pack + ?Sized>(&self, member: &Member, args: &A) -> Result<()> {
        Self::check_remote(member)?;
        let delivery = self.port.route(self.envelope(member, args)?)?;
        if delivery.is_dropped() {
            tracing::debug!(target = %self.target, member = member.name(), "sent to a channel with no subscriber");
        }
        Ok(())
    }

    /// Sends `member` and waits for its reply, decoded as `R`.
    pub async fn call<A, R>(&self, member: &Member, args: &A) -> Result<R>
    where
        A: Pack + ?Sized,
        R: Unpack,
    {
        Self::check_remote(member)?;
        let reply = member.reply().ok_or(Error::NoReplyCode(member.name()))?;
        let envelope = self.envelope(member, args)?;

        let answer = self.port.request(envelope, reply, self.timeout).await?;
        let mut r = answer.reader();
        let value = R::unpack(&mut r)?;
        r.finish()?;
        Ok(value)
    }

    /// Runs `handler` for each `ToClients` member pushed to this client's channel.
    ///
    /// The handler reads the push arguments from the reader it is given.
    pub fn on_push<F>(&self, member: &Member, handler: F) -> Result<()>
    where
        F: Fn(&mut Reader<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        if member.direction() != Direction::ToClients {
            return Err(Error::NotPush(member.name()));
        }
        self.port.install_push(member.code(), Arc::new(handler))
    }

    /// Collects one-way calls into a single envelope.
    pub fn batch(&self) -> Batch<'_> {
        Batch { client: self, body: Writer::new(), count: 0 }
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("channel", &self.channel())
            .field("target", &self.target)
            .finish()
    }
}

/// One-way calls packed as `[Count: u32]([Code: u32][Args: blob])*` under `BATCH`.
///
/// The owner runs them in order.
pub struct Batch<'a> {
    client: &'a ServiceClient,
    body: Writer,
    count: u32,
}

impl Batch<'_> {
    pub fn add<A: Pack + ?Sized>(&mut self, member: &Member, args: &A) -> Result<&mut Self> {
        ServiceClient::check_remote(member)?;
        if member.reply().is_some() {
            return Err(Error::ReplyInBatch(member.name()));
        }
        let mut w = Writer::new();
        args.pack(&mut w)?;
        self.body.u32(member.code());
        self.body.bytes(w.as_bytes())?;
        self.count += 1;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Sends the batch. An empty batch sends nothing.
    pub fn send(self) -> Result<()> {
        if self.count == 0 {
            return Ok(());
        }
        let mut w = Writer::with_capacity(4 + self.body.len());
        w.u32(self.count).raw(self.body.as_bytes());
        let envelope = Envelope::direct(self.client.target, self.client.channel(), codes::BATCH, w.into_bytes());
        self.client.port.route(envelope)?;
        Ok(())
    }
}
