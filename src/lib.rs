pub mod catalog;
pub mod config;
pub mod decklist;
pub mod error;
pub mod ledger;
pub mod models;
pub mod search;
pub mod seed;
pub mod store;
pub mod sync;
pub mod telemetry;

pub use catalog::{CardCatalog, CatalogIndex, CatalogSource};
pub use config::Settings;
pub use ledger::{Command, DeckSection, Roster};
pub use models::{CardCountEntry, CardRecord, DeckDefinition, PlayerProfile};
pub use search::{SearchPipeline, SearchResults};
pub use store::{FileStore, HttpStore, KeyValueStore, MemoryStore};
pub use sync::{DeckIdGenerator, LoadOrigin, PersistenceSync};
