use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use pokelink_protocol::Message;
use tokio::net::ToSocketAddrs;
use tokio::time::Instant;

use crate::PeerError;
use crate::chat::ChatHandle;
use crate::config::SessionConfig;
use crate::events::{BattleEvent, chat_event};
use crate::registry::PeerRegistry;
use crate::reliability::{Received, ReliableChannel};
use crate::transport::UdpTransport;

/// Read-only observer of a host's battle.
///
/// Receives every commit and the final GAME_OVER relayed by the host, and
/// may chat through it. A spectator never influences battle state.
pub struct Spectator {
    channel: ReliableChannel,
    chat: ChatHandle,
    host: SocketAddr,
    battle_state: String,
}

impl Spectator {
    /// Send SPECTATOR_REQUEST to `host` until it answers, using the
    /// handshake retry policy.
    pub async fn join(
        addr: impl ToSocketAddrs,
        host: SocketAddr,
        config: &SessionConfig,
    ) -> Result<Self, PeerError> {
        let transport = UdpTransport::bind(addr).await?;
        let mut channel = ReliableChannel::new(transport.clone());
        let policy = config.handshake;

        for attempt in 1..=policy.attempts() {
            tracing::info!(host = %host, attempt, "Sending spectator request");
            channel
                .send_unreliable(Message::SpectatorRequest, host)
                .await?;

            let deadline = Instant::now() + policy.timeout;
            while let Some(received) = channel.recv_until(deadline).await? {
                match received {
                    Received::Message {
                        from,
                        message: Message::SpectatorResponse { status, battle_state },
                    } if from == host => {
                        tracing::info!(host = %host, status = %status, battle_state = %battle_state, "Joined as spectator");

                        let mut registry = PeerRegistry::new();
                        registry.set_opponent(host);
                        let chat = ChatHandle::new(
                            transport,
                            Arc::new(RwLock::new(registry)),
                            config.player_name.clone(),
                        );
                        return Ok(Self {
                            channel,
                            chat,
                            host,
                            battle_state,
                        });
                    }
                    other => tracing::debug!(from = %other.from(), kind = %other.kind(), "Ignoring message before join"),
                }
            }
        }

        tracing::error!(host = %host, attempts = policy.attempts(), "Host never accepted spectator");
        Err(PeerError::HandshakeFailed {
            attempts: policy.attempts(),
        })
    }

    pub fn host(&self) -> SocketAddr {
        self.host
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    /// Battle state the host reported when accepting this spectator
    pub fn battle_state(&self) -> &str {
        &self.battle_state
    }

    pub fn chat_handle(&self) -> ChatHandle {
        self.chat.clone()
    }

    /// Chat goes to the host, which relays it to everyone else
    pub async fn send_chat(&self, text: &str) -> Result<usize, PeerError> {
        self.chat.send_text(text).await
    }

    pub async fn send_sticker(&self, data: &[u8]) -> Result<usize, PeerError> {
        self.chat.send_sticker(data).await
    }

    /// Next relayed event from the host, or `None` on timeout
    pub async fn next_event(&mut self, timeout: Duration) -> Result<Option<BattleEvent>, PeerError> {
        let deadline = Instant::now() + timeout;
        while let Some(received) = self.channel.recv_until(deadline).await? {
            let Received::Message { from, message } = received else {
                continue;
            };
            if from != self.host {
                tracing::debug!(from = %from, "Ignoring message from non-host");
                continue;
            }

            let event = match message {
                Message::CalculationReport(report) => Some(BattleEvent::TurnReported(report)),
                Message::GameOver { winner, loser } => {
                    self.battle_state = "GAME_OVER".to_string();
                    Some(BattleEvent::GameOver { winner, loser })
                }
                Message::Chat { sender, content } => chat_event(sender, &content),
                other => {
                    tracing::debug!(kind = %other.kind(), "Ignoring message as spectator");
                    None
                }
            };
            if event.is_some() {
                return Ok(event);
            }
        }
        Ok(None)
    }
}
