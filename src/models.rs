use std::{cmp::Ordering, sync::Arc};

use serde::{Deserialize, Serialize};

/// A card as published in the metadata set. Keyed by name, case-insensitively.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub name: String,
    pub image_url: String,
    pub file_path: String,
    pub colors: Vec<String>,
    #[serde(rename = "type")]
    pub card_type: Option<String>,
    pub set: Option<String>,
}

impl CardRecord {
    pub fn readable_type(&self) -> &str {
        match self.card_type.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => "Unknown type",
        }
    }

    /// Colours joined for display, leaving out the `origin` pseudo-colour.
    pub fn readable_colors(&self) -> String {
        let colors = self
            .colors
            .iter()
            .filter(|c| !c.eq_ignore_ascii_case("origin"))
            .map(String::as_str)
            .collect::<Vec<_>>();

        if colors.is_empty() {
            "No color".to_owned()
        } else {
            colors.join(", ")
        }
    }

    pub fn preview_image(&self) -> &str {
        if self.image_url.is_empty() {
            &self.file_path
        } else {
            &self.image_url
        }
    }

    pub fn has_color(&self, lowercase_color: &str) -> bool {
        self.colors
            .iter()
            .any(|c| c.to_lowercase() == lowercase_color)
    }
}

/// One record of the raw metadata file, before trimming and colour splitting.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RawCardMetadata {
    pub name: Option<String>,
    pub img_url: Option<String>,
    pub file_path: Option<String>,
    pub color: Option<String>,
    pub set: Option<String>,
    #[serde(rename = "type")]
    pub card_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CardCountEntry {
    pub name: String,
    pub count: u32,
}

impl CardCountEntry {
    pub fn new(name: &str, count: u32) -> Self {
        Self {
            name: name.to_owned(),
            count,
        }
    }

    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DeckDefinition {
    pub id: String,
    pub name: String,
    pub cards: Vec<CardCountEntry>,
    pub sideboard: Option<Vec<CardCountEntry>>,
}

impl DeckDefinition {
    pub fn main_count(&self) -> u32 {
        self.cards.iter().map(|c| c.count).sum()
    }

    pub fn sideboard_count(&self) -> u32 {
        self.sideboard
            .iter()
            .flatten()
            .map(|c| c.count)
            .sum()
    }

    pub fn sideboard(&self) -> &[CardCountEntry] {
        self.sideboard.as_deref().unwrap_or_default()
    }
}

/// A player's ledger. Decks sit behind `Arc` so that a snapshot copy only
/// clones the deck that actually changed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub id: String,
    pub display_name: String,
    pub missing_cards: Vec<CardCountEntry>,
    pub decks: Vec<Arc<DeckDefinition>>,
}

impl PlayerProfile {
    pub fn deck(&self, deck_id: &str) -> Option<&DeckDefinition> {
        self.decks
            .iter()
            .find(|d| d.id == deck_id)
            .map(Arc::as_ref)
    }
}

/// Name ordering used for every sorted list: case-insensitive first, then
/// lowercase before uppercase so the order is total.
///
/// Letters compare by code point after lowercasing, so accented names sort
/// after `z` rather than next to their base letter.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| b.cmp(a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_compare_case_insensitively_lowercase_first() {
        assert_eq!(compare_names("alpha", "Beta"), Ordering::Less);
        assert_eq!(compare_names("foo", "Foo"), Ordering::Less);
        assert_eq!(compare_names("Foo", "foo"), Ordering::Greater);
        assert_eq!(compare_names("Foo", "Foo"), Ordering::Equal);

        let mut names = vec!["Foo", "bar", "foo", "Éclair", "zeta"];
        names.sort_by(|a, b| compare_names(a, b));
        assert_eq!(names, ["bar", "foo", "Foo", "zeta", "Éclair"]);
    }

    #[test]
    fn deck_totals() {
        let deck = DeckDefinition {
            id: "d".into(),
            name: "D".into(),
            cards: vec![CardCountEntry::new("A", 3), CardCountEntry::new("B", 1)],
            sideboard: None,
        };
        assert_eq!(deck.main_count(), 4);
        assert_eq!(deck.sideboard_count(), 0);
        assert!(deck.sideboard().is_empty());
    }
}
