use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use pokelink_protocol::{ChatContent, Frame, Message};

use crate::PeerError;
use crate::events::encode_sticker;
use crate::registry::PeerRegistry;
use crate::transport::UdpTransport;

/// Cloneable sender for chat and stickers.
///
/// Shares the session's socket and registry, so a UI task can chat while
/// the session is blocked in a turn. Chat is unsequenced and best effort.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    transport: UdpTransport,
    registry: Arc<RwLock<PeerRegistry>>,
    sender: String,
}

impl ChatHandle {
    pub(crate) fn new(
        transport: UdpTransport,
        registry: Arc<RwLock<PeerRegistry>>,
        sender: String,
    ) -> Self {
        Self {
            transport,
            registry,
            sender,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Send a text line to the opponent and all spectators.
    /// Returns the number of recipients.
    pub async fn send_text(&self, text: &str) -> Result<usize, PeerError> {
        self.broadcast(ChatContent::Text(single_line(text))).await
    }

    /// Send raw sticker bytes, base64-encoded on the wire
    pub async fn send_sticker(&self, data: &[u8]) -> Result<usize, PeerError> {
        self.broadcast(encode_sticker(data)).await
    }

    async fn broadcast(&self, content: ChatContent) -> Result<usize, PeerError> {
        let recipients = self.recipients(None);
        if recipients.is_empty() {
            return Err(PeerError::NotConnected);
        }

        let frame = Frame::unsequenced(Message::Chat {
            sender: self.sender.clone(),
            content,
        });
        let bytes = frame.to_bytes();
        for addr in &recipients {
            self.transport.send_to(&bytes, *addr).await?;
        }
        tracing::debug!(recipients = recipients.len(), "Sent chat message");
        Ok(recipients.len())
    }

    /// Forward a message to every participant except `except`, logging failures
    pub(crate) async fn relay(&self, message: Message, except: Option<SocketAddr>) {
        let recipients = self.recipients(except);
        self.relay_to(message, &recipients).await;
    }

    pub(crate) async fn relay_to_spectators(&self, message: Message) {
        let spectators = self.read_registry().spectators().to_vec();
        self.relay_to(message, &spectators).await;
    }

    async fn relay_to(&self, message: Message, recipients: &[SocketAddr]) {
        if recipients.is_empty() {
            return;
        }
        let frame = Frame::unsequenced(message);
        let bytes = frame.to_bytes();
        for addr in recipients {
            if let Err(e) = self.transport.send_to(&bytes, *addr).await {
                tracing::warn!(to = %addr, kind = %frame.kind(), error = %e, "Relay failed");
            }
        }
    }

    fn recipients(&self, except: Option<SocketAddr>) -> Vec<SocketAddr> {
        self.read_registry().chat_recipients(except)
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, PeerRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The wire format is line based, so embedded line breaks become spaces
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}
