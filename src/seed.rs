//! Bundled roster used when the store cannot provide one.

use crate::{
    models::PlayerProfile,
    sync::{self, DeckIdGenerator, StoredCardEntry, StoredDeck, StoredPlayerProfile},
};

struct SeedDeck {
    id: &'static str,
    name: &'static str,
    cards: &'static [(&'static str, u32)],
    sideboard: &'static [(&'static str, u32)],
}

struct SeedPlayer {
    id: &'static str,
    display_name: &'static str,
    missing: &'static [(&'static str, u32)],
    deck: SeedDeck,
}

const SEED_PLAYERS: &[SeedPlayer] = &[
    SeedPlayer {
        id: "dennis",
        display_name: "Dennis",
        missing: &[("Blazing Scorcher", 2), ("Radiant Shield", 1)],
        deck: SeedDeck {
            id: "dennis-alpha",
            name: "Dennis Alpha",
            cards: &[("Blazing Scorcher", 2), ("Whispering Oaks", 1)],
            sideboard: &[("Smoke Screen", 2)],
        },
    },
    SeedPlayer {
        id: "lukas",
        display_name: "Lukas",
        missing: &[("Clockwork Drake", 1)],
        deck: SeedDeck {
            id: "lukas-mech",
            name: "Mechanized Control",
            cards: &[("Clockwork Drake", 2), ("Chemtech Enforcer", 1)],
            sideboard: &[("Thermo Beam", 2)],
        },
    },
    SeedPlayer {
        id: "toan",
        display_name: "Toan",
        missing: &[("Starfall Mystic", 3)],
        deck: SeedDeck {
            id: "toan-starlight",
            name: "Starlight Vigil",
            cards: &[("Starfall Mystic", 3), ("Luminous Blade", 1)],
            sideboard: &[("Progress Day", 1)],
        },
    },
    SeedPlayer {
        id: "tung",
        display_name: "Tung",
        missing: &[("Temporal Shift", 2)],
        deck: SeedDeck {
            id: "tung-tempest",
            name: "Arcane Tempest",
            cards: &[("Temporal Shift", 3), ("Adaptatron", 1)],
            sideboard: &[("Void Seeker", 2)],
        },
    },
    SeedPlayer {
        id: "trung",
        display_name: "Trung",
        missing: &[("Whispering Oaks", 2)],
        deck: SeedDeck {
            id: "trung-forest",
            name: "Forest Guardians",
            cards: &[("Whispering Oaks", 2), ("Radiant Shield", 2)],
            sideboard: &[("Mega-Mech", 1)],
        },
    },
    SeedPlayer {
        id: "tim",
        display_name: "Tim",
        missing: &[("Dragonfire Sigil", 1)],
        deck: SeedDeck {
            id: "tim-sigil",
            name: "Sigil Surge",
            cards: &[("Dragonfire Sigil", 2), ("Flame Chompers", 1)],
            sideboard: &[("Void Seeker", 1)],
        },
    },
];

fn stored_entries(cards: &[(&str, u32)]) -> Option<Vec<StoredCardEntry>> {
    Some(
        cards
            .iter()
            .map(|&(name, count)| StoredCardEntry::Entry {
                name: Some(name.to_owned()),
                count: Some(count.into()),
            })
            .collect(),
    )
}

fn stored_players() -> Vec<StoredPlayerProfile> {
    SEED_PLAYERS
        .iter()
        .map(|p| StoredPlayerProfile {
            id: Some(p.id.to_owned()),
            display_name: Some(p.display_name.to_owned()),
            missing_cards: stored_entries(p.missing),
            decks: Some(vec![StoredDeck {
                id: Some(p.deck.id.to_owned()),
                name: Some(p.deck.name.to_owned()),
                cards: stored_entries(p.deck.cards),
                sideboard: stored_entries(p.deck.sideboard),
            }]),
        })
        .collect()
}

/// The bundled roster in canonical form.
pub fn players(deck_ids: &DeckIdGenerator) -> Vec<PlayerProfile> {
    sync::normalize_players(stored_players(), deck_ids)
}
