//! Domain types for battles

mod moves;
mod pokemon;
mod pokemon_type;
mod species;

pub use moves::{MAX_MOVES, MOVES, Move, MoveCategory, find_move, moves_for};
pub use pokemon::BattlePokemon;
pub use pokemon_type::{StandardChart, TYPE_CHART, Type, TypeChart};
pub use species::Species;
