use std::fmt;

/// Which side of the handshake this peer plays. The host attacks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Joiner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "HOST",
            Role::Joiner => "JOINER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol state of one peer.
///
/// ```text
/// DISCONNECTED → CONNECTED → BATTLE_READY → WAITING_FOR_MOVE ⇄ WAITING_FOR_CONFIRM
///                                                  └─> GAME_OVER | TERMINATED | ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    Disconnected,
    /// Handshake done, seed shared
    Connected,
    /// Own BATTLE_SETUP delivered, waiting for the opponent's
    BattleReady,
    WaitingForMove,
    /// A commit is out and its verdict has not arrived yet
    WaitingForConfirm,
    GameOver,
    /// Engines diverged or the end of the battle could not be confirmed
    Terminated,
    /// A bounded wait or retry cycle ran out
    Error,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Disconnected => "DISCONNECTED",
            TurnState::Connected => "CONNECTED",
            TurnState::BattleReady => "BATTLE_READY",
            TurnState::WaitingForMove => "WAITING_FOR_MOVE",
            TurnState::WaitingForConfirm => "WAITING_FOR_CONFIRM",
            TurnState::GameOver => "GAME_OVER",
            TurnState::Terminated => "TERMINATED",
            TurnState::Error => "ERROR",
        }
    }

    /// No protocol message is sent from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnState::GameOver | TurnState::Terminated | TurnState::Error
        )
    }

    /// Whether a battle is under way (setup finished, not yet over)
    pub fn in_battle(&self) -> bool {
        matches!(
            self,
            TurnState::WaitingForMove | TurnState::WaitingForConfirm
        )
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
