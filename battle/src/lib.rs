//! Species data and the deterministic battle engine for pokelink.
//!
//! # Overview
//!
//! `pokelink-battle` sits between `pokelink-protocol` (wire format) and the
//! networked peer:
//!
//! ```text
//! pokelink-protocol (wire format)
//!        │
//!        ▼
//! pokelink-battle (domain types + damage engine) ← THIS CRATE
//!        │
//!        └─> pokelink-peer (UDP sessions, reliability, spectators)
//! ```
//!
//! # Main Types
//!
//! - [`Type`] and [`TypeChart`] - Pokemon types and effectiveness lookup
//! - [`Species`] - Static stats, validated from a [`PokemonRecord`]
//! - [`Move`] - Entries of the built-in move table
//! - [`BattlePokemon`] - HP, fainted flag and remaining boosts during a battle
//! - [`Pokedex`] - Species lookup by name or number
//! - [`BattleEngine`] - Seeded damage calculation shared by both peers
//!
//! # Example Usage
//!
//! ```ignore
//! use pokelink_battle::{BattleEngine, BattlePokemon, SpeciesLookup, starters};
//! use pokelink_protocol::StatBoosts;
//!
//! let dex = starters();
//! let mut me = BattlePokemon::new(dex.lookup("Pikachu").unwrap().clone(), StatBoosts::default());
//! let mut them = BattlePokemon::new(dex.lookup("7").unwrap().clone(), StatBoosts::default());
//!
//! let mut engine = BattleEngine::new(seed);
//! let turn = engine.execute_turn(&mut me, &mut them, "Thunderbolt", true)?;
//! println!("{}", turn.report.status_message);
//! ```

use thiserror::Error;

pub mod engine;
pub mod pokedex;
pub mod types;

pub use engine::{BattleEngine, DamageOutcome, TurnResult};
pub use pokedex::{Pokedex, SpeciesLookup, starters};
pub use types::{
    BattlePokemon, MOVES, Move, MoveCategory, Species, StandardChart, TYPE_CHART, Type,
    TypeChart, find_move, moves_for,
};

// Re-export commonly used protocol types
pub use pokelink_protocol::{PokemonRecord, StatBoosts};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BattleError {
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Unknown move: {0}")]
    UnknownMove(String),

    #[error("{pokemon} cannot use {move_name}")]
    MoveNotAvailable { pokemon: String, move_name: String },

    #[error("Invalid species record: {0}")]
    InvalidRecord(String),
}
