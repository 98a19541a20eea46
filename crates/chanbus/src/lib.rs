//! # Chanbus
//!
//! A channel-addressed message bus for game server nodes.
//!
//! ## Layers
//!
//! - **Channels** (`channel`): 64-bit addresses, generated per node or fixed by convention.
//! - **Envelopes** (`envelope`): a code, destinations, an origin and an opaque payload.
//! - **Router** (`router`): delivers envelopes to subscribed handlers and forwards them
//!   one hop to peer nodes over `PeerLink`s.
//! - **Services** (`contract`, `owner`, `client`, `discovery`): request/reply and push
//!   messaging built on top of the router, with name-based discovery.
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use chanbus::{BusConfig, Router, ServiceClient, ServiceContract, ServiceOwner};
//!
//! let contract = ServiceContract::builder("echo").call("Echo", 20, 21).build()?;
//! let echo = contract.member("Echo").unwrap().clone();
//!
//! let router = Router::new(BusConfig::default())?;
//! let owner = ServiceOwner::new(&router)?.named("echo");
//! let member = echo.clone();
//! owner.register_member(&echo, move |req| {
//!     let text: String = req.args()?;
//!     req.respond(&member, &text)?;
//!     Ok(())
//! })?;
//! owner.start()?;
//!
//! let client = ServiceClient::discover(&router, "echo").await?;
//! let answer: String = client.call(&echo, &"hi".to_string()).await?;
//! assert_eq!(answer, "hi");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod contract;
pub mod discovery;
pub mod envelope;
pub mod gate;
pub mod owner;
pub mod peer;
pub mod router;
pub mod store;
pub mod telemetry;
pub mod transport;


pub use channel::Channel;
pub use channel::ChannelAllocator;
pub use channel::ChannelLease;
pub use client::Batch;
pub use client::ServiceClient;
pub use config::BusConfig;
pub use contract::Direction;
pub use contract::Member;
pub use contract::ServiceContract;
pub use envelope::Envelope;
pub use envelope::MessageCode;
pub use envelope::codes;
pub use gate::Gate;
pub use owner::Request;
pub use owner::Responder;
pub use owner::ServiceOwner;
pub use peer::PeerLink;
pub use router::Delivery;
pub use router::Handler;
pub use router::HandlerResult;
pub use router::Router;
pub use router::RouterStats;
pub use router::SubscriptionId;
pub use transport::DuplexTransport;
pub use transport::Transport;
