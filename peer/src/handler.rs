use std::net::SocketAddr;

use async_trait::async_trait;
use pokelink_battle::{BattleError, BattlePokemon};
use pokelink_protocol::CalculationReport;

use crate::events::{BattleEvent, TurnOutcome};
use crate::state::TurnState;

/// A move to attack with, and whether to spend a special attack boost on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveChoice {
    pub move_name: String,
    pub use_boost: bool,
}

impl MoveChoice {
    pub fn new(move_name: impl Into<String>) -> Self {
        Self {
            move_name: move_name.into(),
            use_boost: false,
        }
    }

    pub fn boosted(move_name: impl Into<String>) -> Self {
        Self {
            move_name: move_name.into(),
            use_boost: true,
        }
    }
}

/// Trait for reacting to a running battle.
///
/// Implement this trait to drive [`crate::BattleSession::run`]. All methods
/// have default implementations, so you only need to implement the events
/// you care about. The default [`Handler::choose_move`] always picks the
/// first move in the list.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// #[async_trait]
/// impl Handler for Printer {
///     async fn on_turn(&mut self, outcome: &TurnOutcome) {
///         println!("{}", outcome.report.status_message);
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send {
    /// Called when it is this peer's turn to attack.
    async fn choose_move(&mut self, me: &BattlePokemon, opponent: &BattlePokemon) -> MoveChoice {
        let _ = opponent;
        MoveChoice::new(me.moves().first().map(String::as_str).unwrap_or("Tackle"))
    }

    /// Called when the engine refuses a chosen move, such as one the pokemon
    /// does not know. Nothing was sent and [`Handler::choose_move`] is asked again.
    async fn on_move_rejected(&mut self, choice: &MoveChoice, error: &BattleError) {
        let _ = (choice, error);
    }

    /// Called once the handshake has completed and the seed is known.
    async fn on_connected(&mut self, seed: u64, opponent: SocketAddr) {
        let _ = (seed, opponent);
    }

    async fn on_spectator_joined(&mut self, addr: SocketAddr) {
        let _ = addr;
    }

    /// Called when the opponent's BATTLE_SETUP has been accepted.
    async fn on_opponent_ready(&mut self, pokemon_name: &str) {
        let _ = pokemon_name;
    }

    /// Called after every settled turn, attacking or defending.
    async fn on_turn(&mut self, outcome: &TurnOutcome) {
        let _ = outcome;
    }

    /// Called for commits relayed to a spectator.
    async fn on_turn_reported(&mut self, report: &CalculationReport) {
        let _ = report;
    }

    async fn on_chat(&mut self, sender: &str, text: &str) {
        let _ = (sender, text);
    }

    async fn on_sticker(&mut self, sender: &str, data: &[u8]) {
        let _ = (sender, data);
    }

    async fn on_game_over(&mut self, winner: &str, loser: &str) {
        let _ = (winner, loser);
    }

    /// Called when the session ends in TERMINATED or ERROR.
    async fn on_terminated(&mut self, state: TurnState, reason: &str) {
        let _ = (state, reason);
    }
}

/// Route one event to the matching handler method
pub async fn dispatch<H: Handler + ?Sized>(handler: &mut H, event: &BattleEvent) {
    match event {
        BattleEvent::Connected { seed, opponent } => handler.on_connected(*seed, *opponent).await,
        BattleEvent::SpectatorJoined(addr) => handler.on_spectator_joined(*addr).await,
        BattleEvent::OpponentReady { pokemon_name, .. } => {
            handler.on_opponent_ready(pokemon_name).await
        }
        BattleEvent::TurnResolved(outcome) => handler.on_turn(outcome).await,
        BattleEvent::TurnReported(report) => handler.on_turn_reported(report).await,
        BattleEvent::Chat { sender, text } => handler.on_chat(sender, text).await,
        BattleEvent::Sticker { sender, data } => handler.on_sticker(sender, data).await,
        BattleEvent::GameOver { winner, loser } => handler.on_game_over(winner, loser).await,
        BattleEvent::Terminated { state, reason } => handler.on_terminated(*state, reason).await,
    }
}
