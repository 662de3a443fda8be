use thiserror::Error;

/// Failure to fetch or decode the card metadata set.
///
/// Never reaches the ledger API: the catalog logs it and carries on empty.
#[derive(Error, Debug)]
pub enum CatalogLoadError {
    #[error("failed to fetch card metadata")]
    Transport(#[from] reqwest::Error),
    #[error("card metadata request returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to read card metadata file")]
    Io(#[from] std::io::Error),
    #[error("card metadata is not a JSON array of records")]
    Decode(#[from] serde_json::Error),
}

/// Failure of the injected key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store request failed")]
    Transport(#[from] reqwest::Error),
    #[error("store returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("store file access failed")]
    Io(#[from] std::io::Error),
    #[error("store payload is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("store is unavailable")]
    Unavailable,
}

#[derive(Error, Debug)]
pub enum RosterLoadError {
    #[error("no roster store is configured")]
    NotConfigured,
    #[error("failed to read roster from store")]
    Store(#[from] StoreError),
    #[error("roster payload must be a keyed mapping or a list, got {0}")]
    Malformed(&'static str),
}

#[derive(Error, Debug)]
pub enum PersistWriteError {
    #[error("failed to write roster to store")]
    Store(#[from] StoreError),
}

/// Rejected deck import. The roster is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportParseError {
    #[error("deck list is empty")]
    Empty,
    #[error("line {line} is not of the form \"<quantity> <card name>\": {text:?}")]
    MalformedLine { line: usize, text: String },
    #[error("deck list has no main deck cards")]
    NoMainDeck,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration build/deserialize error")]
    Config(#[from] config::ConfigError),
}
