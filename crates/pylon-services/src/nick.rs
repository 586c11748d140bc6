//! Fleet-wide nickname allocation.
//!
//! The hub owns one [`NickRegistry`]. Every nickname a leaf presents on the
//! relay network is registered here first, so no two leaves ever hold the
//! same identity at once.

use std::sync::Arc;

use dashmap::DashSet;
use rand::seq::SliceRandom;
use rand::Rng;

/// Registry of nicknames currently held by leaves.
///
/// Cloning shares the same underlying set.
#[derive(Clone, Default)]
pub struct NickRegistry {
    taken: Arc<DashSet<String>>,
}

impl NickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and return `base` if free, otherwise the first free
    /// `base{suffix}` for suffix 0, 1, 2, … where suffix 0 renders as the
    /// empty string. A first collision therefore yields `base1`.
    ///
    /// Each candidate is claimed with a single atomic insert, so concurrent
    /// callers never receive the same name.
    pub fn allocate_unique(&self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }
        let mut suffix: u64 = 0;
        loop {
            let candidate = if suffix == 0 {
                base.to_string()
            } else {
                format!("{base}{suffix}")
            };
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Forget a nickname. Releasing an unknown name is a no-op.
    pub fn release(&self, nick: &str) -> bool {
        self.taken.remove(nick).is_some()
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.taken.contains(nick)
    }

    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

const MONSTER_NAMES: &[&str] = &[
    "Bulbasaur", "Ivysaur", "Venusaur", "Charmander", "Charmeleon", "Charizard",
    "Squirtle", "Wartortle", "Blastoise", "Caterpie", "Metapod", "Butterfree",
    "Weedle", "Kakuna", "Beedrill", "Pidgey", "Pidgeotto", "Pidgeot", "Rattata",
    "Raticate", "Spearow", "Fearow", "Ekans", "Arbok", "Pikachu", "Raichu",
    "Sandshrew", "Sandslash", "Nidorina", "Nidoqueen", "Nidorino", "Nidoking",
    "Clefairy", "Clefable", "Vulpix", "Ninetales", "Jigglypuff", "Wigglytuff",
    "Zubat", "Golbat", "Oddish", "Gloom", "Vileplume", "Paras", "Parasect",
    "Venonat", "Venomoth", "Diglett", "Dugtrio", "Meowth", "Persian", "Psyduck",
    "Golduck", "Mankey", "Primeape", "Growlithe", "Arcanine", "Poliwag",
    "Poliwhirl", "Poliwrath", "Abra", "Kadabra", "Alakazam", "Machop", "Machoke",
    "Machamp", "Bellsprout", "Weepinbell", "Victreebel", "Tentacool", "Tentacruel",
    "Geodude", "Graveler", "Golem", "Ponyta", "Rapidash", "Slowpoke", "Slowbro",
    "Magnemite", "Magneton", "Farfetchd", "Doduo", "Dodrio", "Seel", "Dewgong",
    "Grimer", "Muk", "Shellder", "Cloyster", "Gastly", "Haunter", "Gengar", "Onix",
    "Drowzee", "Hypno", "Krabby", "Kingler", "Voltorb", "Electrode", "Exeggcute",
    "Exeggutor", "Cubone", "Marowak", "Hitmonlee", "Hitmonchan", "Lickitung",
    "Koffing", "Weezing", "Rhyhorn", "Rhydon", "Chansey", "Tangela", "Kangaskhan",
    "Horsea", "Seadra", "Goldeen", "Seaking", "Staryu", "Starmie", "MrMime",
    "Scyther", "Jynx", "Electabuzz", "Magmar", "Pinsir", "Tauros", "Magikarp",
    "Gyarados", "Lapras", "Ditto", "Eevee", "Vaporeon", "Jolteon", "Flareon",
    "Porygon", "Omanyte", "Omastar", "Kabuto", "Kabutops", "Aerodactyl", "Snorlax",
    "Articuno", "Zapdos", "Moltres", "Dratini", "Dragonair", "Dragonite", "Mewtwo",
    "Mew",
];

/// A fresh nickname suggestion, e.g. `Pikachu417`. Not registered.
pub fn generate_nick() -> String {
    let mut rng = rand::thread_rng();
    let name = MONSTER_NAMES.choose(&mut rng).copied().unwrap_or("Leaf");
    format!("{name}{}", rng.gen_range(100..1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn free_base_is_returned_as_is() {
        let nicks = NickRegistry::new();
        assert_eq!(nicks.allocate_unique("Pikachu"), "Pikachu");
        assert!(nicks.contains("Pikachu"));
    }

    #[test]
    fn collisions_probe_numeric_suffixes_in_order() {
        let nicks = NickRegistry::new();
        assert_eq!(nicks.allocate_unique("Pikachu"), "Pikachu");
        assert_eq!(nicks.allocate_unique("Pikachu"), "Pikachu1");
        assert_eq!(nicks.allocate_unique("Pikachu"), "Pikachu2");
    }

    #[test]
    fn repeated_allocations_are_pairwise_distinct() {
        let nicks = NickRegistry::new();
        let all: Vec<String> = (0..50).map(|_| nicks.allocate_unique("Pikachu")).collect();
        let distinct: HashSet<_> = all.iter().collect();
        assert_eq!(distinct.len(), all.len());
        assert_eq!(nicks.len(), 50);
    }

    #[test]
    fn released_name_becomes_allocatable_again() {
        let nicks = NickRegistry::new();
        nicks.allocate_unique("Pikachu");
        let second = nicks.allocate_unique("Pikachu");
        nicks.allocate_unique("Pikachu");

        assert!(nicks.release(&second));
        assert_eq!(nicks.allocate_unique("Pikachu"), second);
    }

    #[test]
    fn release_is_idempotent() {
        let nicks = NickRegistry::new();
        nicks.allocate_unique("Mew");
        assert!(nicks.release("Mew"));
        assert!(!nicks.release("Mew"));
        assert!(!nicks.release("NeverSeen"));
        assert!(nicks.is_empty());
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        let nicks = NickRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let nicks = nicks.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| nicks.allocate_unique("Eevee"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for h in handles {
            for nick in h.join().unwrap() {
                assert!(all.insert(nick), "duplicate allocation");
            }
        }
        assert_eq!(all.len(), 200);
    }

    #[test]
    fn generated_nicks_have_three_digit_suffix() {
        for _ in 0..20 {
            let nick = generate_nick();
            let digits: String = nick.chars().rev().take(3).collect();
            assert!(digits.chars().all(|c| c.is_ascii_digit()), "{nick}");
            assert!(nick.len() > 3);
        }
    }
}
