use std::net::SocketAddr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use pokelink_protocol::{CalculationReport, ChatContent, CommunicationMode};

use crate::state::TurnState;

/// How a turn's result was agreed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agreement {
    /// The defender's recomputation matched the commit
    Confirmed,
    /// One resolution round brought both peers to the same values
    Resolved,
    /// The values still differed after resolution; the battle is over
    Diverged,
}

/// Result of one completed turn, from this peer's point of view
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub turn: u32,
    /// Whether this peer was the attacker
    pub attacking: bool,
    /// This peer's own computation of the turn
    pub report: CalculationReport,
    pub hit: bool,
    pub agreement: Agreement,
    /// Session state once the turn was settled
    pub state: TurnState,
}

/// Everything a UI may want to show, queued by the session as it happens
#[derive(Debug, Clone, PartialEq)]
pub enum BattleEvent {
    Connected {
        seed: u64,
        opponent: SocketAddr,
    },
    SpectatorJoined(SocketAddr),
    OpponentReady {
        pokemon_name: String,
        communication_mode: CommunicationMode,
    },
    TurnResolved(TurnOutcome),
    /// A commit relayed to spectators by the host
    TurnReported(CalculationReport),
    Chat {
        sender: String,
        text: String,
    },
    Sticker {
        sender: String,
        data: Vec<u8>,
    },
    GameOver {
        winner: String,
        loser: String,
    },
    /// Ended in TERMINATED or ERROR
    Terminated {
        state: TurnState,
        reason: String,
    },
}

/// Turn a received chat payload into an event. Stickers that are not
/// valid base64 yield `None`.
pub(crate) fn chat_event(sender: String, content: &ChatContent) -> Option<BattleEvent> {
    match content {
        ChatContent::Text(text) => Some(BattleEvent::Chat {
            sender,
            text: text.clone(),
        }),
        ChatContent::Sticker(encoded) => match STANDARD.decode(encoded.trim()) {
            Ok(data) => Some(BattleEvent::Sticker { sender, data }),
            Err(e) => {
                tracing::warn!(sender = %sender, error = %e, "Dropping sticker with invalid base64");
                None
            }
        },
    }
}

pub(crate) fn encode_sticker(data: &[u8]) -> ChatContent {
    ChatContent::Sticker(STANDARD.encode(data))
}
