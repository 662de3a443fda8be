use crate::{
    catalog::CatalogIndex,
    error::ImportParseError,
    ledger,
    models::CardCountEntry,
};

const SUGGESTIONS_PER_CARD: usize = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedDeck {
    pub main: Vec<CardCountEntry>,
    pub sideboard: Vec<CardCountEntry>,
}

/// An imported name the catalog does not know, with close matches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedCard {
    pub card_name: String,
    pub suggestions: Vec<String>,
}

impl UnresolvedCard {
    pub fn new(card_name: &str, suggestions: Vec<String>) -> Self {
        Self {
            card_name: card_name.to_owned(),
            suggestions,
        }
    }
}

fn is_sideboard_marker(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower == "sideboard" || lower == "sideboard:"
}

/// Split `"<quantity> <card name>"`. The quantity must be a positive integer;
/// oversized quantities saturate, since deck lists clamp them anyway.
fn parse_line(line: &str) -> Option<(&str, i64)> {
    let (quantity, name) = line.split_once(char::is_whitespace)?;
    if quantity.is_empty() || !quantity.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // only digits are left, so overflow is the one way parsing can fail
    let quantity = quantity.parse::<i64>().unwrap_or(i64::MAX);
    if quantity == 0 {
        return None;
    }
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, quantity))
}

/// Parse pasted deck text into main and sideboard lists.
///
/// All or nothing: the first malformed line rejects the whole text.
pub fn parse(raw: &str) -> Result<ParsedDeck, ImportParseError> {
    if raw.trim().is_empty() {
        return Err(ImportParseError::Empty);
    }

    let mut main = Vec::new();
    let mut sideboard = Vec::new();
    let mut in_sideboard = false;

    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_sideboard_marker(line) {
            in_sideboard = true;
            continue;
        }

        let card = parse_line(line).ok_or_else(|| ImportParseError::MalformedLine {
            line: index + 1,
            text: line.to_owned(),
        })?;

        if in_sideboard {
            sideboard.push(card);
        } else {
            main.push(card);
        }
    }

    let parsed = ParsedDeck {
        main: ledger::merge_list(main),
        sideboard: ledger::merge_list(sideboard),
    };

    if parsed.main.is_empty() {
        return Err(ImportParseError::NoMainDeck);
    }

    Ok(parsed)
}

/// Names in `deck` with no catalog entry, each with fuzzy suggestions.
pub fn unresolved_cards(deck: &ParsedDeck, catalog: &CatalogIndex) -> Vec<UnresolvedCard> {
    deck.main
        .iter()
        .chain(deck.sideboard.iter())
        .filter(|card| catalog.find_by_name(&card.name).is_none())
        .map(|card| {
            let suggestions = catalog
                .suggest(&card.name, SUGGESTIONS_PER_CARD)
                .into_iter()
                .map(|c| c.name.clone())
                .collect();
            UnresolvedCard::new(&card.name, suggestions)
        })
        .collect()
}
