//! Roster persistence.
//!
//! [`PersistenceSync`] holds the live [`Roster`] snapshot, loads it once from the
//! configured store (falling back to the bundled seed roster), and writes
//! every later change back through a single background writer. Writes are
//! best effort: a failed write is logged and the in-memory roster stays as
//! it is.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::{
    error::{ImportParseError, PersistWriteError, RosterLoadError},
    ledger::{self, Command, DeckSection, Roster},
    models::{CardCountEntry, DeckDefinition, PlayerProfile},
    seed,
    store::KeyValueStore,
};

/// Store path of the roster collection.
pub const PLAYERS_PATH: &str = "players";

/// A card entry as found in stored payloads. Older payloads list bare names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StoredCardEntry {
    Name(String),
    Entry {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        count: Option<Value>,
    },
    Other(Value),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoredDeck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cards: Option<Vec<StoredCardEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sideboard: Option<Vec<StoredCardEntry>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StoredPlayerProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_cards: Option<Vec<StoredCardEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decks: Option<Vec<StoredDeck>>,
}

/// Deck id source. Random v4 UUIDs by default; the sequential form
/// (`deck-{millis}-{n}`) needs no random source at all.
pub struct DeckIdGenerator {
    sequential: bool,
    counter: AtomicU64,
}

impl Default for DeckIdGenerator {
    fn default() -> Self {
        Self::random()
    }
}

impl DeckIdGenerator {
    pub fn random() -> Self {
        Self {
            sequential: false,
            counter: AtomicU64::new(0),
        }
    }

    pub fn sequential() -> Self {
        Self {
            sequential: true,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        if !self.sequential {
            return Uuid::new_v4().to_string();
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        format!("deck-{millis}-{n}")
    }
}

/// A stored count, floored. Numeric strings count; anything else is zero.
fn stored_count(count: Option<&Value>) -> i64 {
    let count = match count {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    count.filter(|c| c.is_finite()).map_or(0, |c| c.floor() as i64)
}

fn normalize_card_list(list: Option<&[StoredCardEntry]>) -> Vec<CardCountEntry> {
    ledger::merge_list(list.unwrap_or_default().iter().filter_map(|entry| match entry {
        StoredCardEntry::Name(name) => Some((name.as_str(), 1)),
        StoredCardEntry::Entry {
            name: Some(name),
            count,
        } => Some((name.as_str(), stored_count(count.as_ref()))),
        _ => None,
    }))
}

fn normalize_decks(decks: Option<&[StoredDeck]>, deck_ids: &DeckIdGenerator) -> Vec<Arc<DeckDefinition>> {
    decks
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(position, deck)| {
            let name = deck
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map_or_else(|| format!("Deck {}", position + 1), str::to_owned);
            Arc::new(DeckDefinition {
                id: deck.id.clone().unwrap_or_else(|| deck_ids.next_id()),
                name,
                cards: normalize_card_list(deck.cards.as_deref()),
                sideboard: Some(normalize_card_list(deck.sideboard.as_deref())),
            })
        })
        .collect()
}

fn map_player(key: String, stored: StoredPlayerProfile, deck_ids: &DeckIdGenerator) -> PlayerProfile {
    let id = stored.id.unwrap_or(key);
    PlayerProfile {
        display_name: stored.display_name.unwrap_or_else(|| id.clone()),
        missing_cards: normalize_card_list(stored.missing_cards.as_deref()),
        decks: normalize_decks(stored.decks.as_deref(), deck_ids),
        id,
    }
}

/// Canonicalise a list of stored players, numbering id-less ones by position.
pub fn normalize_players(players: Vec<StoredPlayerProfile>, deck_ids: &DeckIdGenerator) -> Vec<PlayerProfile> {
    players
        .into_iter()
        .enumerate()
        .map(|(i, p)| map_player(format!("player-{}", i + 1), p, deck_ids))
        .collect()
}

fn stored_player(key: &str, value: Value) -> Option<StoredPlayerProfile> {
    match serde_json::from_value(value) {
        Ok(player) => Some(player),
        Err(e) => {
            warn!(player = key, error = %e, "skipping unreadable stored player");
            None
        }
    }
}

/// Canonicalise a remote payload: either `{id: player}` or `[player, ...]`.
pub fn normalize_remote(payload: Value, deck_ids: &DeckIdGenerator) -> Result<Vec<PlayerProfile>, RosterLoadError> {
    match payload {
        Value::Null => Ok(Vec::new()),
        Value::Array(list) => {
            let stored = list
                .into_iter()
                .filter(|v| !v.is_null())
                .enumerate()
                .filter_map(|(i, v)| stored_player(&format!("#{}", i + 1), v))
                .collect();
            Ok(normalize_players(stored, deck_ids))
        }
        Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .filter_map(|(key, v)| {
                let stored = stored_player(&key, v)?;
                Some(map_player(key, stored, deck_ids))
            })
            .collect()),
        Value::Bool(_) => Err(RosterLoadError::Malformed("a boolean")),
        Value::Number(_) => Err(RosterLoadError::Malformed("a number")),
        Value::String(_) => Err(RosterLoadError::Malformed("a string")),
    }
}

/// The keyed payload written back to the store. Sideboards are always
/// written, empty or not.
pub fn serialize_players(players: &[Arc<PlayerProfile>]) -> Value {
    let mut payload = Map::new();
    for player in players {
        let decks = player
            .decks
            .iter()
            .map(|deck| {
                json!({
                    "id": deck.id,
                    "name": deck.name,
                    "cards": deck.cards,
                    "sideboard": deck.sideboard(),
                })
            })
            .collect::<Vec<_>>();
        payload.insert(
            player.id.clone(),
            json!({
                "displayName": player.display_name,
                "missingCards": player.missing_cards,
                "decks": decks,
            }),
        );
    }
    Value::Object(payload)
}

/// Where the live roster came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOrigin {
    Store,
    /// Bundled seed data. Nothing is written back until the roster changes.
    Seed,
}

enum WriteRequest {
    Put(Value),
    Flush(oneshot::Sender<()>),
}

async fn put_players(store: &dyn KeyValueStore, payload: &Value) -> Result<(), PersistWriteError> {
    store.put(PLAYERS_PATH, payload).await?;
    Ok(())
}

async fn write_back(store: Arc<dyn KeyValueStore>, mut requests: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(request) = requests.recv().await {
        match request {
            WriteRequest::Put(payload) => match put_players(store.as_ref(), &payload).await {
                Ok(()) => debug!("roster persisted"),
                Err(e) => error!(error = ?e, "failed to persist roster"),
            },
            WriteRequest::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

pub struct PersistenceSync {
    roster: watch::Sender<Roster>,
    origin: watch::Sender<Option<LoadOrigin>>,
    store: Option<Arc<dyn KeyValueStore>>,
    writer: OnceLock<mpsc::UnboundedSender<WriteRequest>>,
    deck_ids: DeckIdGenerator,
    load_started: AtomicBool,
}

impl PersistenceSync {
    /// An empty, not yet loaded roster. Without a store nothing is persisted.
    pub fn new(store: Option<Arc<dyn KeyValueStore>>, deck_ids: DeckIdGenerator) -> Self {
        Self {
            roster: watch::Sender::new(Roster::default()),
            origin: watch::Sender::new(None),
            store,
            writer: OnceLock::new(),
            deck_ids,
            load_started: AtomicBool::new(false),
        }
    }

    async fn fetch(&self) -> Result<Vec<PlayerProfile>, RosterLoadError> {
        let store = self.store.as_ref().ok_or(RosterLoadError::NotConfigured)?;
        match store.get(PLAYERS_PATH).await? {
            Some(payload) => normalize_remote(payload, &self.deck_ids),
            None => Ok(Vec::new()),
        }
    }

    /// Load the roster from the store, or the seed roster when that fails or
    /// comes back empty, then start persisting changes. Only the first call
    /// loads; later calls wait for it and report its origin.
    #[instrument(skip(self))]
    pub async fn load(&self) -> LoadOrigin {
        if self.load_started.swap(true, Ordering::SeqCst) {
            warn!("roster is already loaded, keeping the live roster");
            return self.ready().await.unwrap_or(LoadOrigin::Seed);
        }

        let (players, origin) = match self.fetch().await {
            Ok(players) if !players.is_empty() => {
                info!(players = players.len(), "roster loaded from store");
                (players, LoadOrigin::Store)
            }
            // TODO: tell a deliberately emptied roster apart from a fresh store
            // once the payload carries a marker; both are re-seeded today.
            Ok(_) => {
                warn!("roster store is empty, using bundled seed data");
                (seed::players(&self.deck_ids), LoadOrigin::Seed)
            }
            Err(RosterLoadError::NotConfigured) => {
                warn!("roster store is not configured, using bundled seed data");
                (seed::players(&self.deck_ids), LoadOrigin::Seed)
            }
            Err(e) => {
                error!(error = ?e, "failed to load roster, using bundled seed data");
                (seed::players(&self.deck_ids), LoadOrigin::Seed)
            }
        };

        self.roster.send_replace(Roster::new(players));
        if let Some(store) = &self.store {
            self.writer.get_or_init(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(write_back(store.clone(), rx).in_current_span());
                tx
            });
        }
        self.origin.send_replace(Some(origin));
        origin
    }

    /// Wait until the first load has finished.
    pub async fn ready(&self) -> Option<LoadOrigin> {
        let mut origin = self.origin.subscribe();
        origin
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|loaded| *loaded)
    }

    pub fn origin(&self) -> Option<LoadOrigin> {
        *self.origin.borrow()
    }

    pub fn snapshot(&self) -> Roster {
        self.roster.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Roster> {
        self.roster.subscribe()
    }

    pub fn players(&self) -> Vec<Arc<PlayerProfile>> {
        self.roster.borrow().players().to_vec()
    }

    pub fn player(&self, id: &str) -> Option<PlayerProfile> {
        self.roster.borrow().player(id).cloned()
    }

    pub fn list_all_missing_cards(&self) -> Vec<CardCountEntry> {
        self.roster.borrow().list_all_missing_cards()
    }

    /// Apply `command` to the live roster. Returns whether anything changed;
    /// changes are queued for write-back in the order they were made.
    pub fn apply(&self, command: Command) -> Result<bool, ImportParseError> {
        let mut outcome = Ok(false);
        self.roster.send_if_modified(|roster| match roster.apply(&command) {
            Ok(Some(next)) => {
                *roster = next;
                if let Some(writer) = self.writer.get() {
                    if writer.send(WriteRequest::Put(serialize_players(roster.players()))).is_err() {
                        warn!("roster writer has stopped, change kept in memory only");
                    }
                }
                outcome = Ok(true);
                true
            }
            Ok(None) => false,
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        debug!(?command, ?outcome, "ledger command applied");
        outcome
    }

    fn apply_infallible(&self, command: Command) -> bool {
        self.apply(command).unwrap_or(false)
    }

    /// Wait for every write queued so far to finish.
    pub async fn flush(&self) {
        let Some(writer) = self.writer.get() else {
            return;
        };
        let (done, finished) = oneshot::channel();
        if writer.send(WriteRequest::Flush(done)).is_ok() {
            let _ = finished.await;
        }
    }

    pub fn add_missing_card(&self, player_id: &str, name: &str, count: u32) -> bool {
        self.apply_infallible(Command::AddMissingCard {
            player_id: player_id.to_owned(),
            name: name.to_owned(),
            count,
        })
    }

    pub fn remove_missing_card(&self, player_id: &str, name: &str, count: u32) -> bool {
        self.apply_infallible(Command::RemoveMissingCard {
            player_id: player_id.to_owned(),
            name: name.to_owned(),
            count,
        })
    }

    pub fn set_missing_card_count(&self, player_id: &str, name: &str, count: i64) -> bool {
        self.apply_infallible(Command::SetMissingCardCount {
            player_id: player_id.to_owned(),
            name: name.to_owned(),
            count,
        })
    }

    /// Create an empty deck and return its id, or `None` for an unknown player.
    pub fn create_deck(&self, player_id: &str, name: Option<&str>) -> Option<String> {
        let deck_id = self.deck_ids.next_id();
        let created = self.apply_infallible(Command::CreateDeck {
            player_id: player_id.to_owned(),
            deck_id: deck_id.clone(),
            name: name.map(str::to_owned),
        });
        created.then_some(deck_id)
    }

    pub fn rename_deck(&self, player_id: &str, deck_id: &str, name: &str) -> bool {
        self.apply_infallible(Command::RenameDeck {
            player_id: player_id.to_owned(),
            deck_id: deck_id.to_owned(),
            name: name.to_owned(),
        })
    }

    pub fn delete_deck(&self, player_id: &str, deck_id: &str) -> bool {
        self.apply_infallible(Command::DeleteDeck {
            player_id: player_id.to_owned(),
            deck_id: deck_id.to_owned(),
        })
    }

    pub fn save_deck(&self, player_id: &str, deck: DeckDefinition) -> bool {
        self.apply_infallible(Command::SaveDeck {
            player_id: player_id.to_owned(),
            deck,
        })
    }

    pub fn add_deck_card(&self, player_id: &str, deck_id: &str, section: DeckSection, name: &str, count: u32) -> bool {
        self.apply_infallible(Command::AddDeckCard {
            player_id: player_id.to_owned(),
            deck_id: deck_id.to_owned(),
            section,
            name: name.to_owned(),
            count,
        })
    }

    pub fn remove_deck_card(&self, player_id: &str, deck_id: &str, section: DeckSection, name: &str, count: u32) -> bool {
        self.apply_infallible(Command::RemoveDeckCard {
            player_id: player_id.to_owned(),
            deck_id: deck_id.to_owned(),
            section,
            name: name.to_owned(),
            count,
        })
    }

    pub fn set_deck_card_count(&self, player_id: &str, deck_id: &str, section: DeckSection, name: &str, count: i64) -> bool {
        self.apply_infallible(Command::SetDeckCardCount {
            player_id: player_id.to_owned(),
            deck_id: deck_id.to_owned(),
            section,
            name: name.to_owned(),
            count,
        })
    }

    /// Replace a deck with pasted deck text. On a parse error the roster is
    /// left exactly as it was.
    pub fn import_deck(&self, player_id: &str, deck_id: &str, text: &str) -> Result<bool, ImportParseError> {
        self.apply(Command::ImportDeck {
            player_id: player_id.to_owned(),
            deck_id: deck_id.to_owned(),
            text: text.to_owned(),
        })
    }
}
