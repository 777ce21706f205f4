//! Async UDP peer for the pokelink battle protocol.
//!
//! A [`BattleSession`] drives one side of a two-player battle: handshake and
//! seed exchange, battle setup, then alternating turns where the attacker
//! commits its locally computed result in a `CALCULATION_REPORT` and the
//! defender recomputes and confirms it. Spectators join with a
//! [`Spectator`] and only ever receive relayed traffic.
//!
//! ```text
//! UdpTransport ──> ReliableChannel ──> BattleSession ──> Handler / BattleEvent
//!  (datagrams)     (seq, ACK, resend)   (turn states)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let config = SessionConfig::default().with_player_name("Ash");
//! let mut session = BattleSession::host("0.0.0.0:5000", config).await?;
//! session.accept_player(Duration::from_secs(60)).await?;
//! session.setup_battle(pikachu, StatBoosts::default(), CommunicationMode::P2P).await?;
//! session.run(&mut MyHandler).await?;
//! ```

mod chat;
mod config;
mod events;
mod handler;
mod registry;
mod reliability;
mod session;
mod spectator;
mod state;
mod transport;

use pokelink_protocol::ParseError;
use thiserror::Error;

pub use chat::ChatHandle;
pub use config::{RetryPolicy, SessionConfig};
pub use events::{Agreement, BattleEvent, TurnOutcome};
pub use handler::{Handler, MoveChoice, dispatch};
pub use registry::PeerRegistry;
pub use reliability::{ReceiveTracker, Received, ReliableChannel};
pub use session::{BattleSession, PokemonStatus, SessionStatus};
pub use spectator::Spectator;
pub use state::{Role, TurnState};
pub use transport::{MAX_DATAGRAM_SIZE, UdpTransport};

pub use pokelink_battle::{BattleError, BattlePokemon, Species, StatBoosts};
pub use pokelink_protocol::{CalculationReport, CommunicationMode, Message};

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Parse(#[from] ParseError),

    #[error("Battle error: {0}")]
    Battle(#[from] BattleError),

    #[error("No ACK for sequence number {sequence_number} after {attempts} attempts")]
    AckTimeout { sequence_number: u32, attempts: u32 },

    #[error("No handshake response after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("No opponent connected")]
    NotConnected,

    #[error("Operation is only available to the {0}")]
    WrongRole(Role),

    #[error("It is not this peer's turn to {0}")]
    OutOfTurn(&'static str),

    #[error("Invalid battle setup: {0}")]
    InvalidSetup(String),

    #[error("Expected state {expected}, but session is {actual}")]
    InvalidState {
        expected: TurnState,
        actual: TurnState,
    },
}
