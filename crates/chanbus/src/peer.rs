//! # Peer Links
//!
//! Connects a router to one remote node over a `Transport`.
//!
//! Two tasks per link:
//! - a **writer** draining the link's FIFO queue, so envelopes reach the remote
//!   node in the order this router forwarded them;
//! - a **pump** decoding inbound frames and routing them locally.
//!
//! Either task failing tears the link down: the peer is unregistered from the
//! router and the failure is logged. Nothing is retried.

use std::sync::Arc;
use std::sync::Weak;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::envelope::Envelope;
use crate::router;
use crate::router::PeerId;
use crate::router::Router;
use crate::transport::Transport;

pub struct PeerLink {
    id: PeerId,
    name: String,
    router: Weak<Router>,
    writer: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl PeerLink {
    /// Registers the peer with `router` and spawns the link tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect(router: &Arc<Router>, name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        let name = name.into();
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let (outbound, queue) = mpsc::unbounded_channel();
        let id = router.add_peer(&name, outbound);

        let writer = tokio::spawn(Self::write_loop(
            Arc::downgrade(router),
            id,
            name.clone(),
            transport.clone(),
            queue,
        ));
        let pump = tokio::spawn(Self::pump_loop(Arc::downgrade(router), id, name.clone(), transport));

        Self { id, name, router: Arc::downgrade(router), writer, pump }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while both link tasks are running.
    pub fn is_alive(&self) -> bool {
        !self.writer.is_finished() && !self.pump.is_finished()
    }

    async fn write_loop(
        router: Weak<Router>,
        id: PeerId,
        name: String,
        transport: Arc<dyn Transport>,
        mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(frame) = queue.recv().await {
            if let Err(error) = transport.send(&frame).await {
                tracing::warn!(peer = %id, %name, %error, "peer send failed, dropping link");
                break;
            }
        }
        if let Some(router) = router.upgrade() {
            router.remove_peer(id);
        }
    }

    async fn pump_loop(router: Weak<Router>, id: PeerId, name: String, transport: Arc<dyn Transport>) {
        loop {
            let frame = match transport.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!(peer = %id, %name, "peer closed the link");
                    break;
                }
                Err(error) => {
                    tracing::warn!(peer = %id, %name, %error, "peer receive failed, dropping link");
                    break;
                }
            };
            let Some(router) = router.upgrade() else { break };

            if frame.len() > router.config().max_frame_len {
                tracing::warn!(peer = %id, len = frame.len(), "oversized frame from peer dropped");
                continue;
            }
            let envelope = match Envelope::from_frame(&frame) {
                Ok(envelope) => envelope,
                Err(error) => {
                    tracing::warn!(peer = %id, %error, "malformed frame from peer dropped");
                    continue;
                }
            };
            match router.route_from_peer(envelope, id) {
                Ok(_) => {}
                Err(router::Error::Disconnected) => break,
                Err(error) => tracing::warn!(peer = %id, %error, "routing peer envelope failed"),
            }
        }
        if let Some(router) = router.upgrade() {
            router.remove_peer(id);
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.writer.abort();
        self.pump.abort();
        if let Some(router) = self.router.upgrade() {
            router.remove_peer(self.id);
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink").field("id", &self.id).field("name", &self.name).finish()
    }
}
