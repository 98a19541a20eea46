//! # Service Owners
//!
//! An owner listens on one channel and dispatches each inbound envelope by its
//! message code to a registered route. Routes run synchronously on the routing
//! task and answer through `Request::reply`, which addresses the envelope's origin.
//!
//! Unknown codes are logged and dropped. `BATCH` envelopes are unpacked and
//! their calls dispatched in order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::Weak;

use wirepack::Pack;
use wirepack::Reader;
use wirepack::Unpack;

use crate::channel::Channel;
use crate::channel::ChannelLease;
use crate::contract::Direction;
use crate::contract::Member;
use crate::discovery::Advertiser;
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
    Disconnected,
    DuplicateRoute(MessageCode),
    /// Codes below `codes::FIRST_APPLICATION` are handled by the bus itself.
    ReservedCode(MessageCode),
    AlreadyStarted,
    /// Stopped owners cannot be started again.
    Stopped,
    /// Only `ToClients` members can be pushed by an owner.
    NotPushable(&'static str),
    Router(router::Error),
    Protocol(wirepack::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Router is disconnected"),
            Self::DuplicateRoute(code) => write!(f, "Route for code {} registered twice", code),
            Self::ReservedCode(code) => write!(f, "Code {} is reserved for the bus", code),
            Self::AlreadyStarted => write!(f, "Owner already started"),
            Self::Stopped => write!(f, "Owner was stopped"),
            Self::NotPushable(name) => write!(f, "Member {} is not pushed to clients", name),
            Self::Router(e) => write!(f, "Router error: {}", e),
            Self::Protocol(e) => write!(f, "Protocol error: {}", e),
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

type Route = Arc<dyn Fn(&mut Request<'_>) -> HandlerResult + Send + Sync>;

/// Sends envelopes from the owner's channel. Owned, so routes can move it into
/// spawned tasks to answer later.
#[derive(Clone)]
pub struct Responder {
    router: Weak<Router>,
    channel: Channel,
    origin: Channel,
}

impl Responder {
    /// The channel that asked.
    pub fn origin(&self) -> Channel {
        self.origin
    }

    /// Sends `value` with `code` back to the asker.
    pub fn reply<T: Pack + ?Sized>(&self, code: MessageCode, value: &T) -> Result<Delivery> {
        let router = self.router.upgrade().ok_or(Error::Disconnected)?;
        let envelope = Envelope::packed(self.origin, self.channel, code, value)?;
        Ok(router.route(envelope)?)
    }
}

/// One inbound call being dispatched.
pub struct Request<'a> {
    code: MessageCode,
    reader: Reader<'a>,
    responder: Responder,
}

impl<'a> Request<'a> {
    pub fn code(&self) -> MessageCode {
        self.code
    }

    pub fn origin(&self) -> Channel {
        self.responder.origin
    }

    /// Cursor over the arguments, at the first byte.
    pub fn reader(&mut self) -> &mut Reader<'a> {
        &mut self.reader
    }

    /// Decodes the whole argument payload as `T`.
    pub fn args<T: Unpack>(&mut self) -> Result<T> {
        let value = T::unpack(&mut self.reader)?;
        self.reader.finish()?;
        Ok(value)
    }

    pub fn reply<T: Pack + ?Sized>(&self, code: MessageCode, value: &T) -> Result<Delivery> {
        self.responder.reply(code, value)
    }

    /// Replies with the member's reply code. A no-op for members that do not answer.
    pub fn respond<T: Pack + ?Sized>(&self, member: &Member, value: &T) -> Result<()> {
        if let Some(code) = member.reply() {
            self.responder.reply(code, value)?;
        }
        Ok(())
    }

    pub fn responder(&self) -> Responder {
        self.responder.clone()
    }
}

struct Dispatcher {
    channel: Channel,
    router: Weak<Router>,
    routes: RwLock<Arc<HashMap<MessageCode, Route>>>,
}

impl Dispatcher {
    fn routes(&self) -> Arc<HashMap<MessageCode, Route>> {
        self.routes.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn run(&self, routes: &HashMap<MessageCode, Route>, code: MessageCode, args: &[u8], origin: Channel) -> HandlerResult {
        let Some(route) = routes.get(&code) else {
            tracing::debug!(channel = %self.channel, code, "no route for message code, dropped");
            return Ok(());
        };
        let mut request = Request {
            code,
            reader: Reader::new(args),
            responder: Responder { router: self.router.clone(), channel: self.channel, origin },
        };
        route(&mut request)
    }

    fn run_batch(&self, routes: &HashMap<MessageCode, Route>, envelope: &Envelope) -> HandlerResult {
        let mut r = envelope.reader();
        let count = r.u32()?;
        for _ in 0..count {
            let code = r.u32()?;
            let args = r.bytes()?;
            if let Err(error) = self.run(routes, code, args, envelope.origin()) {
                tracing::warn!(channel = %self.channel, code, %error, "batched call failed");
            }
        }
        r.finish()?;
        Ok(())
    }
}

impl Handler for Dispatcher {
    fn handle(&self, envelope: &Arc<Envelope>) -> HandlerResult {
        let routes = self.routes();
        if envelope.code() == codes::BATCH {
            return self.run_batch(&routes, envelope);
        }
        self.run(&routes, envelope.code(), envelope.payload(), envelope.origin())
    }
}

/// The serving side of a service.
pub struct ServiceOwner {
    router: Arc<Router>,
    lease: ChannelLease,
    name: Option<String>,
    dispatcher: Arc<Dispatcher>,
    gate: Arc<Gate>,
    subscriptions: Mutex<Vec<(Channel, SubscriptionId)>>,
}

impl ServiceOwner {
    /// An owner on a freshly generated channel.
    pub fn new(router: &Arc<Router>) -> Result<Self> {
        let lease = router.channels().allocate("service owner").map_err(router::Error::from)?;
        Ok(Self::with_lease(router, lease))
    }

    /// An owner on a conventional channel, such as `Channel::SINGLETON`.
    ///
    /// # Errors
    /// Fails if another owner on this node holds the channel.
    pub fn on_channel(router: &Arc<Router>, channel: Channel) -> Result<Self> {
        let lease = router.channels().reserve(channel, "service owner").map_err(router::Error::from)?;
        Ok(Self::with_lease(router, lease))
    }

    fn with_lease(router: &Arc<Router>, lease: ChannelLease) -> Self {
        let dispatcher = Arc::new(Dispatcher {
            channel: lease.channel(),
            router: Arc::downgrade(router),
            routes: RwLock::new(Arc::new(HashMap::new())),
        });
        Self {
            router: router.clone(),
            lease,
            name: None,
            dispatcher,
            gate: Gate::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Answers discovery for `name` once started.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn channel(&self) -> Channel {
        self.lease.channel()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Adds the handler for one message code.
    ///
    /// # Errors
    /// `ReservedCode` below `codes::FIRST_APPLICATION`, `DuplicateRoute` if the
    /// code already has a handler.
    pub fn register_route<F>(&self, code: MessageCode, route: F) -> Result<()>
    where
        F: Fn(&mut Request<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        if code < codes::FIRST_APPLICATION {
            return Err(Error::ReservedCode(code));
        }
        let mut routes = self.dispatcher.routes.write().unwrap_or_else(|p| p.into_inner());
        if routes.contains_key(&code) {
            return Err(Error::DuplicateRoute(code));
        }
        let mut next: HashMap<MessageCode, Route> = (**routes).clone();
        next.insert(code, Arc::new(route));
        *routes = Arc::new(next);
        Ok(())
    }

    /// `register_route` keyed by a contract member.
    pub fn register_member<F>(&self, member: &Member, route: F) -> Result<()>
    where
        F: Fn(&mut Request<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_route(member.code(), route)
    }

    pub fn route_count(&self) -> usize {
        self.dispatcher.routes().len()
    }

    /// Subscribes the owner to its channel, and to discovery when named.
    pub fn start(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|p| p.into_inner());
        if !subscriptions.is_empty() {
            return Err(Error::AlreadyStarted);
        }
        if self.gate.is_closed() {
            return Err(Error::Stopped);
        }

        let channel = self.channel();
        let id = self.router.subscribe_gated(channel, self.dispatcher.clone(), self.gate.clone())?;
        subscriptions.push((channel, id));

        if let Some(name) = &self.name {
            let advertiser = Advertiser { name: name.clone(), channel, router: Arc::downgrade(&self.router) };
            match self.router.subscribe_gated(Channel::DISCOVERY, Arc::new(advertiser), self.gate.clone()) {
                Ok(id) => subscriptions.push((Channel::DISCOVERY, id)),
                Err(e) => {
                    let _ = self.router.unsubscribe(channel, id);
                    subscriptions.clear();
                    return Err(e.into());
                }
            }
        }
        tracing::info!(%channel, name = ?self.name, routes = self.route_count(), "service owner started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        !self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()).is_empty()
    }

    /// Routes an arbitrary envelope.
    pub fn send_message(&self, envelope: Envelope) -> Result<Delivery> {
        Ok(self.router.route(envelope)?)
    }

    /// Pushes a `ToClients` member to one or more client channels.
    pub fn notify<A: Pack + ?Sized>(
        &self,
        member: &Member,
        destinations: impl IntoIterator<Item = Channel>,
        args: &A,
    ) -> Result<Delivery> {
        if member.direction() != Direction::ToClients {
            return Err(Error::NotPushable(member.name()));
        }
        let mut w = wirepack::Writer::new();
        args.pack(&mut w)?;
        let envelope = Envelope::new(destinations, self.channel(), member.code(), w.into_bytes())?;
        self.send_message(envelope)
    }

    /// Unsubscribes everything and waits for running routes to return.
    ///
    /// Calling it from one of this owner's routes does not wait for that route.
    pub fn stop(&self) {
        let subscriptions: Vec<_> = std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()));
        for (channel, id) in subscriptions {
            let _ = self.router.unsubscribe(channel, id);
        }
        self.gate.close();
    }
}

impl Drop for ServiceOwner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ServiceOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceOwner")
            .field("channel", &self.channel())
            .field("name", &self.name)
            .finish()
    }
}
