//! Pokemon state during a battle

use pokelink_protocol::StatBoosts;

use super::moves::moves_for;
use super::pokemon_type::Type;
use super::species::Species;

/// One side's pokemon as tracked by either peer.
///
/// Both peers hold a copy of both pokemon and apply the same damage to
/// them, so HP and boost counters stay in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct BattlePokemon {
    /// Static stats
    pub species: Species,

    // === HP ===
    current_hp: u32,
    fainted: bool,

    // === Boosts ===
    /// Remaining special attack / special defense boost uses
    boosts: StatBoosts,

    /// Moves this pokemon may use
    moves: Vec<String>,
}

impl BattlePokemon {
    /// Create at full HP with the given boost allocation
    pub fn new(species: Species, boosts: StatBoosts) -> Self {
        let moves = moves_for(&species)
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            current_hp: species.hp,
            fainted: species.hp == 0,
            boosts,
            moves,
            species,
        }
    }

    pub fn name(&self) -> &str {
        &self.species.name
    }

    pub fn types(&self) -> Vec<Type> {
        self.species.types()
    }

    pub fn max_hp(&self) -> u32 {
        self.species.hp
    }

    pub fn current_hp(&self) -> u32 {
        self.current_hp
    }

    pub fn is_fainted(&self) -> bool {
        self.fainted
    }

    /// Remaining boost uses
    pub fn boosts(&self) -> StatBoosts {
        self.boosts
    }

    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    /// Case-insensitive check against the move list
    pub fn knows_move(&self, name: &str) -> bool {
        let name = name.trim();
        self.moves.iter().any(|m| m.eq_ignore_ascii_case(name))
    }

    /// Subtract `amount` HP, clamping at zero. Returns the HP actually lost.
    ///
    /// A fainted pokemon stays fainted.
    pub fn apply_damage(&mut self, amount: u32) -> u32 {
        let lost = amount.min(self.current_hp);
        self.current_hp -= lost;
        if self.current_hp == 0 {
            self.fainted = true;
        }
        lost
    }

    pub fn has_special_attack_boost(&self) -> bool {
        self.boosts.special_attack_uses > 0
    }

    pub fn has_special_defense_boost(&self) -> bool {
        self.boosts.special_defense_uses > 0
    }

    /// Spend one special attack boost. Returns false if none remain.
    pub fn consume_special_attack_boost(&mut self) -> bool {
        if self.boosts.special_attack_uses == 0 {
            return false;
        }
        self.boosts.special_attack_uses -= 1;
        true
    }

    /// Spend one special defense boost. Returns false if none remain.
    pub fn consume_special_defense_boost(&mut self) -> bool {
        if self.boosts.special_defense_uses == 0 {
            return false;
        }
        self.boosts.special_defense_uses -= 1;
        true
    }
}
