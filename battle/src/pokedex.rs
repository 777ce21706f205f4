//! Species lookup
//!
//! A [`Pokedex`] can be loaded from a JSON array of species records or built
//! from the small set of [`starters`] compiled into the crate.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use pokelink_protocol::PokemonRecord;

use crate::BattleError;
use crate::types::{Species, Type};

/// Read access to species data
pub trait SpeciesLookup {
    /// Case-insensitive name lookup
    fn by_name(&self, name: &str) -> Option<&Species>;

    fn by_number(&self, number: u32) -> Option<&Species>;

    /// Resolve user input: a pokedex number if it parses as one, otherwise a name
    fn lookup(&self, query: &str) -> Option<&Species> {
        let query = query.trim();
        match query.parse::<u32>() {
            Ok(number) => self.by_number(number),
            Err(_) => self.by_name(query),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pokedex {
    species: Vec<Species>,
    names: HashMap<String, usize>,
}

impl Pokedex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_species(species: impl IntoIterator<Item = Species>) -> Self {
        let mut dex = Self::new();
        for s in species {
            dex.insert(s);
        }
        dex
    }

    pub fn from_records(records: &[PokemonRecord]) -> Result<Self, BattleError> {
        let species = records
            .iter()
            .map(Species::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_species(species))
    }

    /// Parse a JSON array of species records
    pub fn from_json_str(json: &str) -> Result<Self> {
        let records: Vec<PokemonRecord> =
            serde_json::from_str(json).context("Failed to parse pokedex JSON")?;
        Self::from_records(&records).context("Invalid species record in pokedex")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pokedex from {}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Add a species, replacing any existing entry with the same name
    pub fn insert(&mut self, species: Species) {
        let key = species.name.to_lowercase();
        match self.names.get(&key) {
            Some(&index) => self.species[index] = species,
            None => {
                self.names.insert(key, self.species.len());
                self.species.push(species);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Species> {
        self.species.iter()
    }
}

impl SpeciesLookup for Pokedex {
    fn by_name(&self, name: &str) -> Option<&Species> {
        self.names
            .get(&name.trim().to_lowercase())
            .map(|&index| &self.species[index])
    }

    fn by_number(&self, number: u32) -> Option<&Species> {
        self.species.iter().find(|s| s.pokedex_number == number)
    }
}

fn species(
    name: &str,
    pokedex_number: u32,
    type1: Type,
    type2: Option<Type>,
    stats: [u32; 6],
    ability: &str,
) -> Species {
    let [hp, attack, defense, special_attack, special_defense, speed] = stats;
    Species {
        name: name.to_string(),
        pokedex_number,
        type1,
        type2,
        hp,
        attack,
        defense,
        special_attack,
        special_defense,
        speed,
        abilities: vec![ability.to_string()],
    }
}

/// Built-in species covering every type with a dedicated move list
#[rustfmt::skip]
pub fn starters() -> Pokedex {
    Pokedex::from_species([
        species("Bulbasaur", 1, Type::Grass, Some(Type::Poison), [45, 49, 49, 65, 65, 45], "Overgrow"),
        species("Charmander", 4, Type::Fire, None, [39, 52, 43, 60, 50, 65], "Blaze"),
        species("Squirtle", 7, Type::Water, None, [44, 48, 65, 50, 64, 43], "Torrent"),
        species("Pikachu", 25, Type::Electric, None, [35, 55, 40, 50, 50, 90], "Static"),
        species("Diglett", 50, Type::Ground, None, [10, 55, 25, 35, 45, 95], "Sand Veil"),
        species("Abra", 63, Type::Psychic, None, [25, 20, 15, 105, 55, 90], "Synchronize"),
        species("Gastly", 92, Type::Ghost, Some(Type::Poison), [30, 35, 30, 100, 35, 80], "Levitate"),
        species("Jynx", 124, Type::Ice, Some(Type::Psychic), [65, 50, 35, 115, 95, 95], "Oblivious"),
        species("Eevee", 133, Type::Normal, None, [55, 55, 50, 45, 65, 55], "Run Away"),
    ])
}
