//! # Discovery
//!
//! Resolves a service name to the channel its owner listens on.
//!
//! A client sends `DISCOVER_SERVICE { name }` to `Channel::DISCOVERY` with its own
//! reply channel as origin. Every named owner subscribes to `DISCOVERY`; the one
//! whose name matches answers `DISCOVER_SERVICE_RESP { name, channel }` directly
//! to the asker. The first answer wins, later ones are dropped as unsolicited.
//!
//! The discovery channel is cluster-wide, so requests also reach peer nodes.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use wirepack::Pack;
use wirepack::Reader;
use wirepack::Unpack;
use wirepack::Writer;

use crate::channel::Channel;
use crate::client;
use crate::client::ReplyPort;
use crate::envelope::Envelope;
use crate::envelope::codes;
use crate::router::Handler;
use crate::router::HandlerResult;
use crate::router::Router;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub name: String,
}

impl Pack for DiscoveryRequest {
    fn pack(&self, w: &mut Writer) -> wirepack::Result<()> {
        w.str(&self.name)?;
        Ok(())
    }
}

impl Unpack for DiscoveryRequest {
    fn unpack(r: &mut Reader<'_>) -> wirepack::Result<Self> {
        Ok(Self { name: r.unpack()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub name: String,
    pub channel: Channel,
}

impl Pack for DiscoveryResponse {
    fn pack(&self, w: &mut Writer) -> wirepack::Result<()> {
        w.str(&self.name)?.pack(&self.channel)?;
        Ok(())
    }
}

impl Unpack for DiscoveryResponse {
    fn unpack(r: &mut Reader<'_>) -> wirepack::Result<Self> {
        Ok(Self { name: r.unpack()?, channel: r.unpack()? })
    }
}

/// Answers discovery requests for one named owner.
pub(crate) struct Advertiser {
    pub(crate) name: String,
    pub(crate) channel: Channel,
    pub(crate) router: Weak<Router>,
}

impl Handler for Advertiser {
    fn handle(&self, envelope: &Arc<Envelope>) -> HandlerResult {
        if envelope.code() != codes::DISCOVER_SERVICE {
            return Ok(());
        }
        let mut r = envelope.reader();
        let request = DiscoveryRequest::unpack(&mut r)?;
        r.finish()?;
        if request.name != self.name {
            return Ok(());
        }

        let Some(router) = self.router.upgrade() else { return Ok(()) };
        let response = DiscoveryResponse { name: self.name.clone(), channel: self.channel };
        let reply = Envelope::packed(envelope.origin(), self.channel, codes::DISCOVER_SERVICE_RESP, &response)?;
        router.route(reply)?;
        tracing::debug!(name = %self.name, channel = %self.channel, asker = %envelope.origin(), "answered discovery");
        Ok(())
    }
}

/// Looks up `name` on the cluster using a temporary reply channel.
pub async fn resolve(router: &Arc<Router>, name: &str) -> client::Result<Channel> {
    let port = ReplyPort::open(router, "discovery")?;
    resolve_on(&port, name, router.config().discovery_timeout).await
}

pub(crate) async fn resolve_on(port: &ReplyPort, name: &str, timeout: Duration) -> client::Result<Channel> {
    let request = DiscoveryRequest { name: name.to_string() };
    let envelope = Envelope::packed(Channel::DISCOVERY, port.channel(), codes::DISCOVER_SERVICE, &request)?;

    let answer = match port.request(envelope, codes::DISCOVER_SERVICE_RESP, timeout).await {
        Ok(answer) => answer,
        Err(client::Error::Timeout { .. }) => {
            tracing::debug!(name, ?timeout, "discovery timed out");
            return Err(client::Error::ServiceNotFound(name.to_string()));
        }
        Err(e) => return Err(e),
    };

    let mut r = answer.reader();
    let response = DiscoveryResponse::unpack(&mut r)?;
    r.finish()?;
    if response.name != name {
        return Err(client::Error::Protocol(wirepack::Error::Invalid(format!(
            "discovery for {:?} answered for {:?}",
            name, response.name
        ))));
    }
    tracing::debug!(name, channel = %response.channel, "service discovered");
    Ok(response.channel)
}
