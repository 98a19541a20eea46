//! # Object Store Service
//!
//! A persistence backend exposed on the bus as the `object-store` service.
//!
//! Backends are async (`ObjectStore`); routes run synchronously, so the service
//! hands each call to a tokio task that answers through a `Responder` when the
//! backend finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::Mutex;

use wirepack::Pack;
use wirepack::Reader;
use wirepack::Unpack;
use wirepack::Writer;

use crate::client;
use crate::client::ServiceClient;
use crate::contract::Member;
use crate::contract::ServiceContract;
use crate::owner;
use crate::owner::Request;
use crate::owner::Responder;
use crate::owner::ServiceOwner;
use crate::router::HandlerResult;
use crate::router::Router;

pub const SERVICE_NAME: &str = "object-store";

pub static CONTRACT: LazyLock<ServiceContract> = LazyLock::new(|| {
    ServiceContract::builder(SERVICE_NAME)
        .call("GetObject", 32, 33)
        .call("SetObject", 34, 35)
        .build()
        .expect("object store contract is well formed")
});

fn member(name: &str) -> &'static Member {
    CONTRACT.member(name).expect("member declared in CONTRACT")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The backend failed.
    Backend(String),
    /// The remote backend failed; carries its message.
    Remote(String),
    Client(client::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "Store backend error: {}", msg),
            Self::Remote(msg) => write!(f, "Remote store error: {}", msg),
            Self::Client(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<client::Error> for Error {
    fn from(e: client::Error) -> Self {
        Self::Client(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stores opaque object payloads by id.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get_object(&self, id: u64) -> Result<Option<Vec<u8>>>;

    async fn set_object(&self, id: u64, payload: Vec<u8>) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<u64, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object(&self, id: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn set_object(&self, id: u64, payload: Vec<u8>) -> Result<()> {
        self.lock().insert(id, payload);
        Ok(())
    }
}

/// Reply body: `[Ok: bool]` then the value, or the error message.
#[derive(Debug, PartialEq)]
enum Outcome<T> {
    Done(T),
    Failed(String),
}

impl<T: Pack> Pack for Outcome<T> {
    fn pack(&self, w: &mut Writer) -> wirepack::Result<()> {
        match self {
            Self::Done(value) => {
                w.bool(true);
                value.pack(w)
            }
            Self::Failed(message) => {
                w.bool(false).str(message)?;
                Ok(())
            }
        }
    }
}

impl<T: Unpack> Unpack for Outcome<T> {
    fn unpack(r: &mut Reader<'_>) -> wirepack::Result<Self> {
        if r.bool()? {
            Ok(Self::Done(T::unpack(r)?))
        } else {
            Ok(Self::Failed(r.unpack()?))
        }
    }
}

fn answer<T: Pack>(responder: &Responder, member: &Member, result: Result<T>) {
    let outcome = match result {
        Ok(value) => Outcome::Done(value),
        Err(e) => {
            tracing::warn!(member = member.name(), error = %e, "object store call failed");
            Outcome::Failed(e.to_string())
        }
    };
    let Some(code) = member.reply() else { return };
    if let Err(error) = responder.reply(code, &outcome) {
        tracing::warn!(member = member.name(), %error, "object store reply not sent");
    }
}

/// Serves an `ObjectStore` on the bus.
pub struct StoreService {
    owner: ServiceOwner,
}

impl StoreService {
    /// Starts serving `store` under the discovery name `object-store`.
    ///
    /// Must be called inside a tokio runtime; calls are served on spawned tasks.
    pub fn start(router: &Arc<Router>, store: Arc<dyn ObjectStore>) -> owner::Result<Self> {
        let owner = ServiceOwner::new(router)?.named(SERVICE_NAME);

        let get = member("GetObject");
        let backend = store.clone();
        owner.register_member(get, move |request: &mut Request<'_>| -> HandlerResult {
            let id: u64 = request.args()?;
            let responder = request.responder();
            let backend = backend.clone();
            tokio::runtime::Handle::try_current()?.spawn(async move {
                let result = backend.get_object(id).await;
                answer(&responder, get, result);
            });
            Ok(())
        })?;

        let set = member("SetObject");
        owner.register_member(set, move |request: &mut Request<'_>| -> HandlerResult {
            let (id, payload): (u64, Vec<u8>) = request.args()?;
            let responder = request.responder();
            let backend = store.clone();
            tokio::runtime::Handle::try_current()?.spawn(async move {
                let result = backend.set_object(id, payload).await;
                answer(&responder, set, result);
            });
            Ok(())
        })?;

        owner.start()?;
        Ok(Self { owner })
    }

    pub fn channel(&self) -> crate::channel::Channel {
        self.owner.channel()
    }

    pub fn stop(&self) {
        self.owner.stop();
    }
}

/// Typed client of the `object-store` service.
pub struct StoreClient {
    client: ServiceClient,
}

impl StoreClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    /// Finds the store through discovery.
    pub async fn discover(router: &Arc<Router>) -> Result<Self> {
        Ok(Self { client: ServiceClient::discover(router, SERVICE_NAME).await? })
    }

    pub async fn get_object(&self, id: u64) -> Result<Option<Vec<u8>>> {
        let outcome: Outcome<Option<Vec<u8>>> = self.client.call(member("GetObject"), &id).await?;
        match outcome {
            Outcome::Done(value) => Ok(value),
            Outcome::Failed(message) => Err(Error::Remote(message)),
        }
    }

    pub async fn set_object(&self, id: u64, payload: &[u8]) -> Result<()> {
        let outcome: Outcome<()> = self.client.call(member("SetObject"), &(id, payload)).await?;
        match outcome {
            Outcome::Done(()) => Ok(()),
            Outcome::Failed(message) => Err(Error::Remote(message)),
        }
    }
}
