//! Move table

use super::pokemon_type::Type;
use super::species::Species;

/// Which stat pair a move uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveCategory {
    /// attack vs defense
    Physical,
    /// special_attack vs special_defense, boostable
    Special,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub name: &'static str,
    pub move_type: Type,
    pub category: MoveCategory,
    pub power: u32,
    /// Hit chance in percent (1-100)
    pub accuracy: u32,
}

impl Move {
    pub fn is_special(&self) -> bool {
        self.category == MoveCategory::Special
    }
}

const fn mv(
    name: &'static str,
    move_type: Type,
    category: MoveCategory,
    power: u32,
    accuracy: u32,
) -> Move {
    Move {
        name,
        move_type,
        category,
        power,
        accuracy,
    }
}

/// Every move the engine knows
pub static MOVES: [Move; 12] = [
    mv("Tackle", Type::Normal, MoveCategory::Physical, 40, 100),
    mv("Ember", Type::Fire, MoveCategory::Special, 40, 100),
    mv("Water Gun", Type::Water, MoveCategory::Special, 40, 100),
    mv("Vine Whip", Type::Grass, MoveCategory::Physical, 45, 100),
    mv("Thunderbolt", Type::Electric, MoveCategory::Special, 90, 100),
    mv("Flamethrower", Type::Fire, MoveCategory::Special, 90, 100),
    mv("Hydro Pump", Type::Water, MoveCategory::Special, 110, 80),
    mv("Solar Beam", Type::Grass, MoveCategory::Special, 120, 100),
    mv("Earthquake", Type::Ground, MoveCategory::Physical, 100, 100),
    mv("Ice Beam", Type::Ice, MoveCategory::Special, 90, 100),
    mv("Psychic", Type::Psychic, MoveCategory::Special, 90, 100),
    mv("Shadow Ball", Type::Ghost, MoveCategory::Special, 80, 100),
];

/// Maximum number of moves a battle pokemon carries
pub const MAX_MOVES: usize = 4;

/// Look up a move by name, case-insensitive
pub fn find_move(name: &str) -> Option<&'static Move> {
    let name = name.trim();
    MOVES.iter().find(|m| m.name.eq_ignore_ascii_case(name))
}

fn moves_for_type(t: Type) -> &'static [&'static str] {
    match t {
        Type::Grass => &["Vine Whip", "Solar Beam", "Tackle"],
        Type::Fire => &["Ember", "Flamethrower", "Tackle"],
        Type::Water => &["Water Gun", "Hydro Pump", "Tackle"],
        Type::Electric => &["Thunderbolt", "Tackle"],
        Type::Psychic => &["Psychic", "Tackle"],
        Type::Ghost => &["Shadow Ball", "Tackle"],
        Type::Ice => &["Ice Beam", "Tackle"],
        Type::Ground => &["Earthquake", "Tackle"],
        _ => &[],
    }
}

/// Moves available to a species: its types' moves in order, deduplicated,
/// Tackle guaranteed, at most [`MAX_MOVES`].
pub fn moves_for(species: &Species) -> Vec<&'static str> {
    let mut moves: Vec<&'static str> = Vec::new();
    for t in species.types() {
        for name in moves_for_type(t) {
            if !moves.contains(name) {
                moves.push(name);
            }
        }
    }
    if !moves.contains(&"Tackle") {
        moves.push("Tackle");
    }
    moves.truncate(MAX_MOVES);
    moves
}
