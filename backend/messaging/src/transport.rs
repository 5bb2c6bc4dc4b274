//! In-memory cross-context channel.
//!
//! Connects two bridges the way `window.postMessage` connects two browsing
//! contexts: each side stamps its own origin on outgoing messages and the
//! sender names the origin it expects the receiver to have.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use canopy_core::sync::lock;
use canopy_core::{HostError, HostResult, InboundMessage, MessageTransport};

/// Default channel buffer size for each direction.
const DEFAULT_BUFFER_SIZE: usize = 256;

pub struct ChannelTransport {
    origin: String,
    peer_origin: String,
    peer_tx: mpsc::Sender<InboundMessage>,
    inbound: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
}

impl ChannelTransport {
    /// Two connected endpoints: the first lives at `origin_a`, the second at `origin_b`.
    pub fn pair(
        origin_a: impl Into<String>,
        origin_b: impl Into<String>,
    ) -> (ChannelTransport, ChannelTransport) {
        Self::pair_with_buffer(origin_a, origin_b, DEFAULT_BUFFER_SIZE)
    }

    pub fn pair_with_buffer(
        origin_a: impl Into<String>,
        origin_b: impl Into<String>,
        buffer: usize,
    ) -> (ChannelTransport, ChannelTransport) {
        let origin_a = origin_a.into();
        let origin_b = origin_b.into();
        let (a_tx, a_rx) = mpsc::channel(buffer);
        let (b_tx, b_rx) = mpsc::channel(buffer);
        let a = ChannelTransport {
            origin: origin_a.clone(),
            peer_origin: origin_b.clone(),
            peer_tx: b_tx,
            inbound: Mutex::new(Some(a_rx)),
        };
        let b = ChannelTransport {
            origin: origin_b,
            peer_origin: origin_a,
            peer_tx: a_tx,
            inbound: Mutex::new(Some(b_rx)),
        };
        (a, b)
    }

    pub fn peer_origin(&self) -> &str {
        &self.peer_origin
    }
}

impl MessageTransport for ChannelTransport {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn post(&self, message: String, target_origin: &str) -> HostResult<()> {
        if target_origin != "*" && target_origin != self.peer_origin {
            // postMessage drops silently when the receiver's origin differs.
            debug!(
                target_origin = %target_origin,
                peer_origin = %self.peer_origin,
                "Message not delivered: target origin mismatch"
            );
            return Ok(());
        }
        self.peer_tx
            .try_send(InboundMessage {
                origin: self.origin.clone(),
                data: message,
            })
            .map_err(|e| HostError::Transport(e.to_string()))
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        lock(&self.inbound).take()
    }
}
