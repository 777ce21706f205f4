//! Structured payloads carried inside protocol messages
//!
//! `PokemonRecord` and `StatBoosts` travel as single-line JSON values inside
//! `BATTLE_SETUP`; the report types map one-to-one onto message fields.

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Default number of uses for each limited boost
pub const DEFAULT_BOOST_USES: u32 = 5;

/// Normalized species record as exchanged during battle setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonRecord {
    pub name: String,

    #[serde(default)]
    pub pokedex_number: u32,

    /// Primary type name (e.g. "grass")
    pub type1: String,

    /// Secondary type name, absent for single-typed species
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type2: Option<String>,

    pub hp: u32,
    pub attack: u32,
    pub defense: u32,
    pub special_attack: u32,
    pub special_defense: u32,

    #[serde(default)]
    pub speed: u32,

    #[serde(default)]
    pub abilities: Vec<String>,
}

impl PokemonRecord {
    /// Serialize to the single-line JSON used on the wire
    pub fn to_json(&self) -> String {
        // A struct of strings and integers cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        serde_json::from_str(json)
            .map_err(|e| ParseError::InvalidFormat(format!("invalid pokemon json: {}", e)))
    }
}

/// Limited-use boost allocation chosen at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBoosts {
    pub special_attack_uses: u32,
    pub special_defense_uses: u32,
}

impl StatBoosts {
    pub fn new(special_attack_uses: u32, special_defense_uses: u32) -> Self {
        Self {
            special_attack_uses,
            special_defense_uses,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        serde_json::from_str(json)
            .map_err(|e| ParseError::InvalidFormat(format!("invalid stat_boosts json: {}", e)))
    }
}

impl Default for StatBoosts {
    fn default() -> Self {
        Self::new(DEFAULT_BOOST_USES, DEFAULT_BOOST_USES)
    }
}

/// How battle messages are addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommunicationMode {
    /// Sent only to the opponent
    #[default]
    P2P,
    /// Also mirrored to spectators
    Broadcast,
}

impl CommunicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationMode::P2P => "P2P",
            CommunicationMode::Broadcast => "BROADCAST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "P2P" => Some(CommunicationMode::P2P),
            "BROADCAST" => Some(CommunicationMode::Broadcast),
            _ => None,
        }
    }
}

/// Contents of a `BATTLE_SETUP` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleSetup {
    pub communication_mode: CommunicationMode,
    pub pokemon_name: String,
    pub pokemon: PokemonRecord,
    pub stat_boosts: StatBoosts,
}

/// The attacker's committed outcome for one turn.
///
/// Announces the move and reports its already-applied damage in one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculationReport {
    /// Attacking pokemon's name
    pub attacker: String,

    /// Name of the move used
    pub move_used: String,

    /// Attacker's HP after the turn
    pub remaining_health: u32,

    pub damage_dealt: u32,

    /// Defender's HP after damage was applied
    pub defender_hp_remaining: u32,

    /// Human-readable description of the turn
    pub status_message: String,

    /// Whether the attacker spent a special-attack boost
    pub special_attack_boost: bool,
}

impl CalculationReport {
    /// The subset of fields both peers must agree on
    pub fn resolution(&self) -> Resolution {
        Resolution {
            attacker: self.attacker.clone(),
            move_used: self.move_used.clone(),
            damage_dealt: self.damage_dealt,
            defender_hp_remaining: self.defender_hp_remaining,
        }
    }
}

/// Values carried by a `RESOLUTION_REQUEST`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub attacker: String,
    pub move_used: String,
    pub damage_dealt: u32,
    pub defender_hp_remaining: u32,
}
