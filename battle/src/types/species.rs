//! Static species data

use pokelink_protocol::PokemonRecord;

use super::pokemon_type::Type;
use crate::BattleError;

/// Validated species stats, as loaded from the Pokedex or received in setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Species {
    pub name: String,
    pub pokedex_number: u32,
    pub type1: Type,
    pub type2: Option<Type>,
    pub hp: u32,
    pub attack: u32,
    pub defense: u32,
    pub special_attack: u32,
    pub special_defense: u32,
    pub speed: u32,
    pub abilities: Vec<String>,
}

impl Species {
    /// The species' one or two types
    pub fn types(&self) -> Vec<Type> {
        std::iter::once(self.type1).chain(self.type2).collect()
    }

    pub fn has_type(&self, t: Type) -> bool {
        self.type1 == t || self.type2 == Some(t)
    }

    /// Validate a wire record.
    ///
    /// Empty or "none" secondary types are treated as absent; a secondary
    /// type equal to the primary is dropped.
    pub fn from_record(record: &PokemonRecord) -> Result<Self, BattleError> {
        let name = record.name.trim();
        if name.is_empty() {
            return Err(BattleError::InvalidRecord("empty name".to_string()));
        }
        if record.hp == 0 {
            return Err(BattleError::InvalidRecord(format!("{} has 0 hp", name)));
        }

        let type1: Type = record.type1.parse()?;
        let type2 = match record.type2.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) if s.eq_ignore_ascii_case("none") => None,
            Some(s) => Some(s.parse::<Type>()?).filter(|t| *t != type1),
        };

        Ok(Self {
            name: name.to_string(),
            pokedex_number: record.pokedex_number,
            type1,
            type2,
            hp: record.hp,
            attack: record.attack,
            defense: record.defense,
            special_attack: record.special_attack,
            special_defense: record.special_defense,
            speed: record.speed,
            abilities: record.abilities.clone(),
        })
    }

    pub fn to_record(&self) -> PokemonRecord {
        PokemonRecord {
            name: self.name.clone(),
            pokedex_number: self.pokedex_number,
            type1: self.type1.as_key().to_string(),
            type2: self.type2.map(|t| t.as_key().to_string()),
            hp: self.hp,
            attack: self.attack,
            defense: self.defense,
            special_attack: self.special_attack,
            special_defense: self.special_defense,
            speed: self.speed,
            abilities: self.abilities.clone(),
        }
    }
}

impl TryFrom<&PokemonRecord> for Species {
    type Error = BattleError;

    fn try_from(record: &PokemonRecord) -> Result<Self, Self::Error> {
        Species::from_record(record)
    }
}
