//! Per-player card-count ledger.
//!
//! Entry-list primitives are pure: they take the current entries and return
//! the next ones, sorted by name, with no duplicate names (compared
//! case-insensitively) and no zero counts.
//!
//! [`Roster`] is an immutable snapshot of every player. Applying a
//! [`Command`] yields a new snapshot that shares every player and deck the
//! command did not touch.

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    decklist::{self, ParsedDeck},
    error::ImportParseError,
    models::{compare_names, CardCountEntry, DeckDefinition, PlayerProfile},
};

/// Copies of a single card allowed in a deck list.
pub const MAX_DECK_COPIES: u32 = 3;

pub fn sort_entries(entries: &mut [CardCountEntry]) {
    entries.sort_by(|a, b| compare_names(&a.name, &b.name));
}

fn clamp(value: i64, max: Option<u32>) -> u32 {
    let upper = max.map_or(i64::from(u32::MAX), i64::from);
    value.clamp(0, upper) as u32
}

/// Shift the count of `name` by `delta`, clamped to `0..=max`.
///
/// Entries that fall to zero are dropped. An absent card is inserted only
/// when `delta` is positive.
pub fn adjust(
    entries: &[CardCountEntry],
    name: &str,
    delta: i64,
    max: Option<u32>,
) -> Vec<CardCountEntry> {
    let name = name.trim();
    if name.is_empty() || delta == 0 {
        return entries.to_vec();
    }

    let key = name.to_lowercase();
    let mut found = false;
    let mut next = entries
        .iter()
        .map(|entry| {
            if entry.key() != key {
                return entry.clone();
            }
            found = true;
            CardCountEntry {
                name: entry.name.clone(),
                count: clamp(i64::from(entry.count) + delta, max),
            }
        })
        .filter(|entry| entry.count > 0)
        .collect::<Vec<_>>();

    if !found && delta > 0 {
        let count = clamp(delta, max);
        if count > 0 {
            next.push(CardCountEntry::new(name, count));
        }
    }

    sort_entries(&mut next);
    next
}

/// Replace the count of `name` with `count` clamped to `0..=max`.
pub fn set_count(
    entries: &[CardCountEntry],
    name: &str,
    count: i64,
    max: Option<u32>,
) -> Vec<CardCountEntry> {
    let name = name.trim();
    if name.is_empty() {
        return entries.to_vec();
    }

    let sanitized = clamp(count, max);
    let key = name.to_lowercase();
    let mut next = entries
        .iter()
        .map(|entry| {
            if entry.key() == key {
                CardCountEntry {
                    name: entry.name.clone(),
                    count: sanitized,
                }
            } else {
                entry.clone()
            }
        })
        .filter(|entry| entry.count > 0)
        .collect::<Vec<_>>();

    if sanitized > 0 && !next.iter().any(|entry| entry.key() == key) {
        next.push(CardCountEntry::new(name, sanitized));
    }

    sort_entries(&mut next);
    next
}

/// Fold raw `(name, count)` pairs into a deduplicated, sorted entry list.
///
/// Names are trimmed; blank names and non-positive counts are discarded.
/// The first spelling seen for a name is the one kept.
pub fn merge_list<I, S>(raw: I) -> Vec<CardCountEntry>
where
    I: IntoIterator<Item = (S, i64)>,
    S: AsRef<str>,
{
    let mut order = Vec::<CardCountEntry>::new();
    let mut positions = HashMap::<String, usize>::new();

    for (name, count) in raw {
        let name = name.as_ref().trim();
        if name.is_empty() || count <= 0 {
            continue;
        }
        let count = clamp(count, None);
        match positions.get(&name.to_lowercase()) {
            Some(&i) => order[i].count = order[i].count.saturating_add(count),
            None => {
                positions.insert(name.to_lowercase(), order.len());
                order.push(CardCountEntry::new(name, count));
            }
        }
    }

    sort_entries(&mut order);
    order
}

fn merge_entries<'a>(entries: impl IntoIterator<Item = &'a CardCountEntry>) -> Vec<CardCountEntry> {
    merge_list(
        entries
            .into_iter()
            .map(|e| (e.name.as_str(), i64::from(e.count))),
    )
}

/// Cap every entry of an already merged list at `max`.
pub fn clamp_entries(entries: &[CardCountEntry], max: u32) -> Vec<CardCountEntry> {
    entries
        .iter()
        .map(|e| CardCountEntry {
            name: e.name.clone(),
            count: e.count.min(max),
        })
        .collect()
}

pub fn tracked_count(entries: &[CardCountEntry], name: &str) -> u32 {
    let key = name.trim().to_lowercase();
    entries
        .iter()
        .find(|e| e.key() == key)
        .map_or(0, |e| e.count)
}

pub fn can_add(entries: &[CardCountEntry], name: &str, max: Option<u32>) -> bool {
    max.map_or(true, |max| tracked_count(entries, name) < max)
}

/// Every player's missing cards summed per card name.
pub fn list_all_missing_cards<'a>(
    players: impl IntoIterator<Item = &'a PlayerProfile>,
) -> Vec<CardCountEntry> {
    merge_entries(players.into_iter().flat_map(|p| p.missing_cards.iter()))
}

/// Which list of a deck a card command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckSection {
    Main,
    Sideboard,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddMissingCard {
        player_id: String,
        name: String,
        count: u32,
    },
    RemoveMissingCard {
        player_id: String,
        name: String,
        count: u32,
    },
    SetMissingCardCount {
        player_id: String,
        name: String,
        count: i64,
    },
    CreateDeck {
        player_id: String,
        deck_id: String,
        name: Option<String>,
    },
    RenameDeck {
        player_id: String,
        deck_id: String,
        name: String,
    },
    DeleteDeck {
        player_id: String,
        deck_id: String,
    },
    SaveDeck {
        player_id: String,
        deck: DeckDefinition,
    },
    AddDeckCard {
        player_id: String,
        deck_id: String,
        section: DeckSection,
        name: String,
        count: u32,
    },
    RemoveDeckCard {
        player_id: String,
        deck_id: String,
        section: DeckSection,
        name: String,
        count: u32,
    },
    SetDeckCardCount {
        player_id: String,
        deck_id: String,
        section: DeckSection,
        name: String,
        count: i64,
    },
    ImportDeck {
        player_id: String,
        deck_id: String,
        text: String,
    },
}

impl Command {
    fn player_id(&self) -> &str {
        match self {
            Command::AddMissingCard { player_id, .. }
            | Command::RemoveMissingCard { player_id, .. }
            | Command::SetMissingCardCount { player_id, .. }
            | Command::CreateDeck { player_id, .. }
            | Command::RenameDeck { player_id, .. }
            | Command::DeleteDeck { player_id, .. }
            | Command::SaveDeck { player_id, .. }
            | Command::AddDeckCard { player_id, .. }
            | Command::RemoveDeckCard { player_id, .. }
            | Command::SetDeckCardCount { player_id, .. }
            | Command::ImportDeck { player_id, .. } => player_id,
        }
    }
}

/// Immutable roster snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    players: Arc<Vec<Arc<PlayerProfile>>>,
}

impl Roster {
    pub fn new(players: Vec<PlayerProfile>) -> Self {
        Self {
            players: Arc::new(players.into_iter().map(Arc::new).collect()),
        }
    }

    pub fn players(&self) -> &[Arc<PlayerProfile>] {
        &self.players
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn player(&self, id: &str) -> Option<&PlayerProfile> {
        self.players
            .iter()
            .find(|p| p.id == id)
            .map(Arc::as_ref)
    }

    pub fn deck(&self, player_id: &str, deck_id: &str) -> Option<&DeckDefinition> {
        self.player(player_id)?.deck(deck_id)
    }

    pub fn list_all_missing_cards(&self) -> Vec<CardCountEntry> {
        list_all_missing_cards(self.players.iter().map(Arc::as_ref))
    }

    /// Run `command` against this snapshot.
    ///
    /// Returns `Ok(None)` when nothing changed, which covers unknown player
    /// or deck ids and blank card names.
    pub fn apply(&self, command: &Command) -> Result<Option<Roster>, ImportParseError> {
        // Parse before touching anything so a bad import leaves no trace.
        let parsed = match command {
            Command::ImportDeck { text, .. } => Some(decklist::parse(text)?),
            _ => None,
        };

        let Some(index) = self
            .players
            .iter()
            .position(|p| p.id == command.player_id())
        else {
            debug!(player = command.player_id(), "command for unknown player ignored");
            return Ok(None);
        };

        let current = &self.players[index];
        let next = apply_to_player(current, command, parsed);
        if next == **current {
            return Ok(None);
        }

        let mut players = self.players.as_ref().clone();
        players[index] = Arc::new(next);
        Ok(Some(Roster {
            players: Arc::new(players),
        }))
    }
}

fn apply_to_player(
    player: &PlayerProfile,
    command: &Command,
    parsed: Option<ParsedDeck>,
) -> PlayerProfile {
    match command {
        Command::AddMissingCard { name, count, .. } => PlayerProfile {
            missing_cards: adjust(&player.missing_cards, name, i64::from(*count), None),
            ..player.clone()
        },
        Command::RemoveMissingCard { name, count, .. } => PlayerProfile {
            missing_cards: adjust(&player.missing_cards, name, -i64::from(*count), None),
            ..player.clone()
        },
        Command::SetMissingCardCount { name, count, .. } => PlayerProfile {
            missing_cards: set_count(&player.missing_cards, name, *count, None),
            ..player.clone()
        },
        Command::CreateDeck { deck_id, name, .. } => {
            let name = name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map_or_else(|| format!("Deck {}", player.decks.len() + 1), str::to_owned);
            let mut decks = player.decks.clone();
            decks.push(Arc::new(DeckDefinition {
                id: deck_id.clone(),
                name,
                cards: Vec::new(),
                sideboard: Some(Vec::new()),
            }));
            PlayerProfile {
                decks,
                ..player.clone()
            }
        }
        Command::DeleteDeck { deck_id, .. } => PlayerProfile {
            decks: player
                .decks
                .iter()
                .filter(|d| d.id != *deck_id)
                .cloned()
                .collect(),
            ..player.clone()
        },
        Command::RenameDeck { deck_id, name, .. } => update_deck(player, deck_id, |deck| {
            let name = name.trim();
            if name.is_empty() {
                return deck.clone();
            }
            DeckDefinition {
                name: name.to_owned(),
                ..deck.clone()
            }
        }),
        Command::SaveDeck { deck, .. } => update_deck(player, &deck.id, |existing| {
            let name = deck.name.trim();
            DeckDefinition {
                id: existing.id.clone(),
                name: if name.is_empty() {
                    existing.name.clone()
                } else {
                    name.to_owned()
                },
                cards: clamp_entries(&merge_entries(&deck.cards), MAX_DECK_COPIES),
                sideboard: deck
                    .sideboard
                    .as_ref()
                    .map(|s| clamp_entries(&merge_entries(s), MAX_DECK_COPIES)),
            }
        }),
        Command::AddDeckCard {
            deck_id,
            section,
            name,
            count,
            ..
        } => update_section(player, deck_id, *section, |entries| {
            adjust(entries, name, i64::from(*count), Some(MAX_DECK_COPIES))
        }),
        Command::RemoveDeckCard {
            deck_id,
            section,
            name,
            count,
            ..
        } => update_section(player, deck_id, *section, |entries| {
            adjust(entries, name, -i64::from(*count), Some(MAX_DECK_COPIES))
        }),
        Command::SetDeckCardCount {
            deck_id,
            section,
            name,
            count,
            ..
        } => update_section(player, deck_id, *section, |entries| {
            set_count(entries, name, *count, Some(MAX_DECK_COPIES))
        }),
        Command::ImportDeck { deck_id, .. } => match parsed {
            Some(parsed) => update_deck(player, deck_id, |deck| DeckDefinition {
                cards: clamp_entries(&parsed.main, MAX_DECK_COPIES),
                sideboard: Some(clamp_entries(&parsed.sideboard, MAX_DECK_COPIES)),
                ..deck.clone()
            }),
            None => player.clone(),
        },
    }
}

fn update_deck(
    player: &PlayerProfile,
    deck_id: &str,
    projector: impl FnOnce(&DeckDefinition) -> DeckDefinition,
) -> PlayerProfile {
    let Some(index) = player.decks.iter().position(|d| d.id == deck_id) else {
        debug!(player = %player.id, deck = deck_id, "command for unknown deck ignored");
        return player.clone();
    };

    let next = projector(&player.decks[index]);
    if next == *player.decks[index] {
        return player.clone();
    }

    let mut decks = player.decks.clone();
    decks[index] = Arc::new(next);
    PlayerProfile {
        decks,
        ..player.clone()
    }
}

fn update_section(
    player: &PlayerProfile,
    deck_id: &str,
    section: DeckSection,
    update: impl FnOnce(&[CardCountEntry]) -> Vec<CardCountEntry>,
) -> PlayerProfile {
    update_deck(player, deck_id, |deck| match section {
        DeckSection::Main => DeckDefinition {
            cards: update(&deck.cards),
            ..deck.clone()
        },
        DeckSection::Sideboard => {
            let sideboard = update(deck.sideboard());
            DeckDefinition {
                sideboard: if sideboard.is_empty() && deck.sideboard.is_none() {
                    None
                } else {
                    Some(sideboard)
                },
                ..deck.clone()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(raw: &[(&str, u32)]) -> Vec<CardCountEntry> {
        raw.iter().map(|&(n, c)| CardCountEntry::new(n, c)).collect()
    }

    fn assert_canonical(list: &[CardCountEntry]) {
        let mut keys = list.iter().map(CardCountEntry::key).collect::<Vec<_>>();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), list.len(), "duplicate names in {list:?}");
        assert!(list.iter().all(|e| e.count >= 1), "zero count in {list:?}");
    }

    fn roster() -> Roster {
        Roster::new(vec![
            PlayerProfile {
                id: "dennis".into(),
                display_name: "Dennis".into(),
                missing_cards: entries(&[("Radiant Shield", 1)]),
                decks: vec![Arc::new(DeckDefinition {
                    id: "alpha".into(),
                    name: "Alpha".into(),
                    cards: entries(&[("Blazing Scorcher", 2)]),
                    sideboard: None,
                })],
            },
            PlayerProfile {
                id: "lukas".into(),
                display_name: "Lukas".into(),
                missing_cards: entries(&[("Clockwork Drake", 1)]),
                decks: Vec::new(),
            },
        ])
    }

    fn add_deck_card(name: &str) -> Command {
        Command::AddDeckCard {
            player_id: "dennis".into(),
            deck_id: "alpha".into(),
            section: DeckSection::Main,
            name: name.into(),
            count: 1,
        }
    }

    #[test]
    fn adjust_clamps_new_entry_at_max() {
        assert_eq!(adjust(&[], "Foo", 5, Some(3)), entries(&[("Foo", 3)]));
    }

    #[test]
    fn adjust_removes_entry_instead_of_going_negative() {
        assert_eq!(adjust(&entries(&[("Foo", 2)]), "foo", -5, None), Vec::<CardCountEntry>::new());
    }

    #[test]
    fn adjust_matches_case_insensitively_and_keeps_spelling() {
        let next = adjust(&entries(&[("Foo", 1)]), "  FOO ", 2, None);
        assert_eq!(next, entries(&[("Foo", 3)]));
    }

    #[test]
    fn adjust_ignores_blank_name_and_zero_delta() {
        let list = entries(&[("Foo", 1)]);
        assert_eq!(adjust(&list, "   ", 3, None), list);
        assert_eq!(adjust(&list, "Foo", 0, None), list);
    }

    #[test]
    fn adjust_negative_delta_on_absent_card_is_noop() {
        let list = entries(&[("Foo", 1)]);
        assert_eq!(adjust(&list, "Bar", -1, None), list);
    }

    #[test]
    fn adjust_keeps_list_sorted() {
        let next = adjust(&entries(&[("beta", 1), ("Delta", 1)]), "Alpha", 1, None);
        let names = next.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["Alpha", "beta", "Delta"]);
    }

    #[test]
    fn set_count_replaces_inserts_and_drops() {
        let list = entries(&[("Foo", 2)]);
        assert_eq!(set_count(&list, "foo", 7, Some(3)), entries(&[("Foo", 3)]));
        assert_eq!(set_count(&list, "foo", 0, None), Vec::<CardCountEntry>::new());
        assert_eq!(set_count(&list, "foo", -4, None), Vec::<CardCountEntry>::new());
        assert_eq!(
            set_count(&list, "Bar", 2, None),
            entries(&[("Bar", 2), ("Foo", 2)])
        );
        assert_eq!(set_count(&list, "", 2, None), list);
    }

    #[test]
    fn merge_list_sums_duplicates_and_discards_junk() {
        let merged = merge_list([("Foo", 1), ("foo", 1), ("Bar", 1), ("  ", 4), ("Baz", 0)]);
        assert_eq!(merged, entries(&[("Bar", 1), ("Foo", 2)]));
        assert_canonical(&merged);
    }

    #[test]
    fn primitives_never_leave_duplicates_or_zeroes() {
        let mut list = Vec::new();
        for (name, delta) in [("a", 3), ("A", -1), ("b", 2), ("B", 2), ("a", -9), ("c", 1)] {
            list = adjust(&list, name, delta, Some(3));
            assert_canonical(&list);
        }
        list = set_count(&list, "C", 0, None);
        assert_canonical(&list);
        assert_eq!(list, entries(&[("b", 3)]));
    }

    #[test]
    fn all_missing_cards_are_summed_across_players() {
        let players = vec![
            PlayerProfile {
                id: "one".into(),
                display_name: "One".into(),
                missing_cards: entries(&[("X", 1)]),
                decks: vec![],
            },
            PlayerProfile {
                id: "two".into(),
                display_name: "Two".into(),
                missing_cards: entries(&[("X", 2), ("Y", 1)]),
                decks: vec![],
            },
        ];
        assert_eq!(
            list_all_missing_cards(&players),
            entries(&[("X", 3), ("Y", 1)])
        );
    }

    #[test]
    fn deck_count_never_exceeds_three() {
        let mut roster = roster();
        for _ in 0..2 {
            if let Some(next) = roster.apply(&add_deck_card("Blazing Scorcher")).unwrap() {
                roster = next;
            }
        }
        let deck = roster.deck("dennis", "alpha").unwrap();
        assert_eq!(deck.cards, entries(&[("Blazing Scorcher", 3)]));
        assert_eq!(roster.apply(&add_deck_card("blazing scorcher")).unwrap(), None);
    }

    #[test]
    fn unknown_ids_are_silent_noops() {
        let roster = roster();
        let unknown_player = Command::AddMissingCard {
            player_id: "nobody".into(),
            name: "Foo".into(),
            count: 1,
        };
        let unknown_deck = Command::DeleteDeck {
            player_id: "dennis".into(),
            deck_id: "gone".into(),
        };
        assert_eq!(roster.apply(&unknown_player).unwrap(), None);
        assert_eq!(roster.apply(&unknown_deck).unwrap(), None);
    }

    #[test]
    fn untouched_players_and_decks_are_shared() {
        let roster = roster();
        let next = roster
            .apply(&Command::AddMissingCard {
                player_id: "dennis".into(),
                name: "Smoke Screen".into(),
                count: 2,
            })
            .unwrap()
            .unwrap();

        assert!(Arc::ptr_eq(&roster.players()[1], &next.players()[1]));
        assert!(Arc::ptr_eq(&roster.players()[0].decks[0], &next.players()[0].decks[0]));
        assert_eq!(
            next.player("dennis").unwrap().missing_cards,
            entries(&[("Radiant Shield", 1), ("Smoke Screen", 2)])
        );
        // the old snapshot is untouched
        assert_eq!(roster.player("dennis").unwrap().missing_cards.len(), 1);
    }

    #[test]
    fn create_deck_uses_default_name() {
        let next = roster()
            .apply(&Command::CreateDeck {
                player_id: "dennis".into(),
                deck_id: "new".into(),
                name: Some("   ".into()),
            })
            .unwrap()
            .unwrap();
        let deck = next.deck("dennis", "new").unwrap();
        assert_eq!(deck.name, "Deck 2");
        assert!(deck.cards.is_empty());
        assert_eq!(deck.sideboard, Some(Vec::new()));
    }

    #[test]
    fn save_deck_merges_sorts_and_clamps() {
        let deck = DeckDefinition {
            id: "alpha".into(),
            name: "Renamed".into(),
            cards: entries(&[("Zeta", 2), ("alpha", 2), ("Alpha", 3)]),
            sideboard: Some(entries(&[("Smoke Screen", 1)])),
        };
        let next = roster()
            .apply(&Command::SaveDeck {
                player_id: "dennis".into(),
                deck,
            })
            .unwrap()
            .unwrap();
        let saved = next.deck("dennis", "alpha").unwrap();
        assert_eq!(saved.name, "Renamed");
        assert_eq!(saved.cards, entries(&[("alpha", 3), ("Zeta", 2)]));
        assert_eq!(saved.sideboard(), entries(&[("Smoke Screen", 1)]).as_slice());
    }

    #[test]
    fn sideboard_commands_create_the_list_on_demand() {
        let next = roster()
            .apply(&Command::SetDeckCardCount {
                player_id: "dennis".into(),
                deck_id: "alpha".into(),
                section: DeckSection::Sideboard,
                name: "Thermo Beam".into(),
                count: 9,
            })
            .unwrap()
            .unwrap();
        let deck = next.deck("dennis", "alpha").unwrap();
        assert_eq!(deck.sideboard(), entries(&[("Thermo Beam", 3)]).as_slice());
        assert_eq!(deck.main_count(), 2);
        assert_eq!(deck.sideboard_count(), 3);
    }

    #[test]
    fn failed_import_leaves_roster_untouched() {
        let roster = roster();
        let err = roster
            .apply(&Command::ImportDeck {
                player_id: "dennis".into(),
                deck_id: "alpha".into(),
                text: "not a line".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ImportParseError::MalformedLine { line: 1, .. }));
        assert_eq!(
            roster.deck("dennis", "alpha").unwrap().cards,
            entries(&[("Blazing Scorcher", 2)])
        );
    }

    #[test]
    fn import_replaces_deck_lists() {
        let next = roster()
            .apply(&Command::ImportDeck {
                player_id: "dennis".into(),
                deck_id: "alpha".into(),
                text: "2 Alpha\n1 Beta\n5 beta\nSideboard\n3 Gamma".into(),
            })
            .unwrap()
            .unwrap();
        let deck = next.deck("dennis", "alpha").unwrap();
        assert_eq!(deck.name, "Alpha");
        assert_eq!(deck.cards, entries(&[("Alpha", 2), ("Beta", 3)]));
        assert_eq!(deck.sideboard(), entries(&[("Gamma", 3)]).as_slice());
    }

    #[test]
    fn tracked_count_and_can_add() {
        let list = entries(&[("Foo", 3)]);
        assert_eq!(tracked_count(&list, "FOO"), 3);
        assert_eq!(tracked_count(&list, "Bar"), 0);
        assert!(!can_add(&list, "foo", Some(3)));
        assert!(can_add(&list, "foo", None));
        assert!(can_add(&list, "Bar", Some(3)));
    }
}
