//! Deterministic damage calculation
//!
//! Each [`BattleEngine`] owns a ChaCha20 stream seeded from the shared
//! handshake seed. Both peers make exactly one [`BattleEngine::calculate_damage`]
//! call per turn, in the same order, so their streams never diverge.

use pokelink_protocol::CalculationReport;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::BattleError;
use crate::types::{BattlePokemon, Move, StandardChart, TypeChart, find_move};

/// Multiplier for a consumed boost and for same-type attacks
pub const BOOST_MULTIPLIER: f64 = 1.5;
pub const STAB_MULTIPLIER: f64 = 1.5;

/// Random damage spread, inclusive
pub const RANDOM_FACTOR_MIN: f64 = 0.85;
pub const RANDOM_FACTOR_MAX: f64 = 1.0;

/// Result of one damage roll
#[derive(Debug, Clone, PartialEq)]
pub struct DamageOutcome {
    /// 0 on a miss, at least 1 on a hit
    pub damage: u32,
    pub hit: bool,
    pub message: String,
    pub type_effectiveness: f64,
    pub stab: f64,
}

/// Everything a peer needs after resolving a turn locally
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub outcome: DamageOutcome,
    /// Whether the attacker spent a special attack boost
    pub attack_boosted: bool,
    /// Whether the defender spent a special defense boost
    pub defense_boosted: bool,
    pub report: CalculationReport,
    pub defender_fainted: bool,
}

#[derive(Debug, Clone)]
pub struct BattleEngine<C: TypeChart = StandardChart> {
    seed: u64,
    rng: ChaCha20Rng,
    chart: C,
}

impl BattleEngine {
    pub fn new(seed: u64) -> Self {
        Self::with_chart(seed, StandardChart)
    }
}

impl<C: TypeChart> BattleEngine<C> {
    pub fn with_chart(seed: u64, chart: C) -> Self {
        Self {
            seed,
            rng: ChaCha20Rng::seed_from_u64(seed),
            chart,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Restart the stream from `seed`
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = ChaCha20Rng::seed_from_u64(seed);
    }

    /// Roll accuracy, then damage.
    ///
    /// Draws one integer in 1..=100 for accuracy and, on a hit, one float in
    /// [0.85, 1.0] for the damage spread.
    pub fn calculate_damage(
        &mut self,
        attacker: &BattlePokemon,
        defender: &BattlePokemon,
        mv: &Move,
        use_attacker_boost: bool,
        use_defender_boost: bool,
    ) -> DamageOutcome {
        let roll: u32 = self.rng.gen_range(1..=100);
        if roll > mv.accuracy {
            return DamageOutcome {
                damage: 0,
                hit: false,
                message: format!("{} used {}... but it missed!", attacker.name(), mv.name),
                type_effectiveness: 1.0,
                stab: 1.0,
            };
        }

        let (mut attack, mut defense) = if mv.is_special() {
            (
                attacker.species.special_attack,
                defender.species.special_defense,
            )
        } else {
            (attacker.species.attack, defender.species.defense)
        };
        if mv.is_special() {
            if use_attacker_boost {
                attack = boosted(attack);
            }
            if use_defender_boost {
                defense = boosted(defense);
            }
        }
        let defense = defense.max(1);

        let type_effectiveness = self
            .chart
            .effectiveness_against(mv.move_type, &defender.types());
        let stab = if attacker.species.has_type(mv.move_type) {
            STAB_MULTIPLIER
        } else {
            1.0
        };
        let random_factor = self.rng.gen_range(RANDOM_FACTOR_MIN..=RANDOM_FACTOR_MAX);

        let base = mv.power as f64 * attack as f64 * type_effectiveness * stab / defense as f64;
        let damage = ((base * random_factor).floor() as u32).max(1);

        DamageOutcome {
            damage,
            hit: true,
            message: format!(
                "{} used {}!{}",
                attacker.name(),
                mv.name,
                effectiveness_text(type_effectiveness)
            ),
            type_effectiveness,
            stab,
        }
    }

    /// Resolve a full turn against local copies of both pokemon.
    ///
    /// The attacker's boost is spent when requested for a special move; the
    /// defender's is spent automatically whenever a special move hits it.
    /// Both peers call this with the same inputs, so their copies stay equal.
    pub fn execute_turn(
        &mut self,
        attacker: &mut BattlePokemon,
        defender: &mut BattlePokemon,
        move_name: &str,
        use_attacker_boost: bool,
    ) -> Result<TurnResult, BattleError> {
        let mv = find_move(move_name).ok_or_else(|| BattleError::UnknownMove(move_name.to_string()))?;
        if !attacker.knows_move(mv.name) {
            return Err(BattleError::MoveNotAvailable {
                pokemon: attacker.name().to_string(),
                move_name: mv.name.to_string(),
            });
        }

        let attack_boosted =
            use_attacker_boost && mv.is_special() && attacker.has_special_attack_boost();
        let defense_candidate = mv.is_special() && defender.has_special_defense_boost();

        let outcome = self.calculate_damage(attacker, defender, mv, attack_boosted, defense_candidate);

        if attack_boosted {
            attacker.consume_special_attack_boost();
        }
        let defense_boosted = defense_candidate && outcome.hit;
        if defense_boosted {
            defender.consume_special_defense_boost();
        }
        defender.apply_damage(outcome.damage);

        let report = CalculationReport {
            attacker: attacker.name().to_string(),
            move_used: mv.name.to_string(),
            remaining_health: attacker.current_hp(),
            damage_dealt: outcome.damage,
            defender_hp_remaining: defender.current_hp(),
            status_message: outcome.message.clone(),
            special_attack_boost: attack_boosted,
        };

        Ok(TurnResult {
            defender_fainted: defender.is_fainted(),
            outcome,
            attack_boosted,
            defense_boosted,
            report,
        })
    }
}

fn boosted(stat: u32) -> u32 {
    (stat as f64 * BOOST_MULTIPLIER) as u32
}

fn effectiveness_text(effectiveness: f64) -> &'static str {
    if effectiveness > 1.0 {
        " It was super effective!"
    } else if effectiveness == 0.0 {
        " It had no effect!"
    } else if effectiveness < 1.0 {
        " It was not very effective..."
    } else {
        ""
    }
}
