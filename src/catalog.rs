//! Card catalog: loads the metadata set once and answers lookups and searches.
//!
//! The set is fetched through a [`CatalogSource`] on first use and cached for
//! the lifetime of the [`CardCatalog`]. Concurrent first callers share the
//! same fetch. A failed fetch is logged and leaves an empty catalog behind.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::PathBuf,
    sync::Arc,
};

use async_trait::async_trait;
use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};
use tokio::sync::OnceCell;
use tracing::{error, info, instrument};

use crate::{
    error::CatalogLoadError,
    models::{compare_names, CardCountEntry, CardRecord, RawCardMetadata},
};

/// The closed colour vocabulary offered as search filters.
pub const COLOR_FILTERS: [&str; 6] = ["Chaos", "Calm", "Fury", "Mind", "Body", "Order"];

pub const UNKNOWN_TYPE: &str = "Unknown";
pub const OTHER_CATEGORY: &str = "Other";

pub const DEFAULT_SEARCH_LIMIT: usize = 40;

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawCardMetadata>, CatalogLoadError>;
}

pub struct HttpCatalogSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalogSource {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_owned(),
        }
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch(&self) -> Result<Vec<RawCardMetadata>, CatalogLoadError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(CatalogLoadError::Status(response.status()));
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub struct FileCatalogSource {
    path: PathBuf,
}

impl FileCatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for FileCatalogSource {
    async fn fetch(&self) -> Result<Vec<RawCardMetadata>, CatalogLoadError> {
        let json = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Pick the source for a configured location: URLs go over HTTP, anything
/// else is read from disk.
pub fn source_for(location: &str) -> Box<dyn CatalogSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpCatalogSource::new(location))
    } else {
        Box::new(FileCatalogSource::new(location))
    }
}

fn trimmed(field: Option<String>) -> Option<String> {
    field.map(|s| s.trim().to_owned())
}

fn parse_colors(field: Option<&str>) -> Vec<String> {
    let mut colors = Vec::new();
    for color in field.unwrap_or_default().split(',').map(str::trim) {
        if !color.is_empty() && !colors.iter().any(|c| c == color) {
            colors.push(color.to_owned());
        }
    }
    colors
}

fn normalize_entry(raw: RawCardMetadata) -> CardRecord {
    CardRecord {
        colors: parse_colors(raw.color.as_deref()),
        name: trimmed(raw.name).unwrap_or_default(),
        image_url: trimmed(raw.img_url).unwrap_or_default(),
        file_path: trimmed(raw.file_path).unwrap_or_default(),
        card_type: trimmed(raw.card_type),
        set: trimmed(raw.set),
    }
}

/// The loaded, normalized catalog. Read-only once built.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    cards: Vec<CardRecord>,
    by_name: HashMap<String, CardRecord>,
    types: Vec<String>,
}

impl CatalogIndex {
    pub fn from_raw(raw: Vec<RawCardMetadata>) -> Self {
        let mut cards = raw
            .into_iter()
            .map(normalize_entry)
            .filter(|card| !card.name.is_empty())
            .collect::<Vec<_>>();
        cards.sort_by(|a, b| compare_names(&a.name, &b.name));

        let mut by_name = HashMap::with_capacity(cards.len());
        for card in &cards {
            by_name
                .entry(card.name.to_lowercase())
                .or_insert_with(|| card.clone());
        }

        let mut types = cards
            .iter()
            .map(|card| card.card_type.as_deref().unwrap_or(UNKNOWN_TYPE).trim())
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        types.sort_by(|a, b| compare_names(a, b));

        Self {
            cards,
            by_name,
            types,
        }
    }

    pub fn cards(&self) -> &[CardRecord] {
        &self.cards
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn list_types(&self) -> &[String] {
        &self.types
    }

    pub fn find_by_name(&self, name: &str) -> Option<&CardRecord> {
        self.by_name.get(&name.trim().to_lowercase())
    }

    pub fn index_by_name(&self) -> &HashMap<String, CardRecord> {
        &self.by_name
    }

    /// Cards matching all three filters, in catalog order, at most `limit`.
    ///
    /// The term matches name or type as a case-insensitive substring. A card
    /// passes the colour filter when it has any selected colour. Empty
    /// filters match everything.
    pub fn search<C, T>(&self, term: &str, colors: C, types: T, limit: usize) -> Vec<CardRecord>
    where
        C: IntoIterator,
        C::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        let term = term.trim().to_lowercase();
        let colors = colors
            .into_iter()
            .map(|c| c.as_ref().to_lowercase())
            .collect::<BTreeSet<_>>();
        let types = types
            .into_iter()
            .map(|t| t.as_ref().to_lowercase())
            .collect::<BTreeSet<_>>();

        self.cards
            .iter()
            .filter(|card| {
                let card_type = card.card_type.as_deref().unwrap_or_default().to_lowercase();

                let matches_term = term.is_empty()
                    || card.name.to_lowercase().contains(&term)
                    || card_type.contains(&term);
                let matches_color =
                    colors.is_empty() || colors.iter().any(|c| card.has_color(c));
                let matches_type = types.is_empty()
                    || (card.card_type.is_some() && types.contains(&card_type));

                matches_term && matches_color && matches_type
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Category a free-text card name falls into: its catalog type, or
    /// [`OTHER_CATEGORY`] when the card is unknown or untyped.
    pub fn category_for(&self, name: &str) -> &str {
        self.find_by_name(name)
            .and_then(|card| card.card_type.as_deref())
            .filter(|t| !t.is_empty())
            .unwrap_or(OTHER_CATEGORY)
    }

    /// Group ledger entries by category. Categories are sorted with
    /// [`OTHER_CATEGORY`] last; entries keep their order.
    pub fn group_by_category(&self, entries: &[CardCountEntry]) -> Vec<(String, Vec<CardCountEntry>)> {
        let mut groups = BTreeMap::<String, Vec<CardCountEntry>>::new();
        for entry in entries {
            groups
                .entry(self.category_for(&entry.name).to_owned())
                .or_default()
                .push(entry.clone());
        }

        let other = groups.remove(OTHER_CATEGORY);
        let mut grouped = groups.into_iter().collect::<Vec<_>>();
        grouped.sort_by(|(a, _), (b, _)| compare_names(a, b));
        if let Some(other) = other {
            grouped.push((OTHER_CATEGORY.to_owned(), other));
        }
        grouped
    }

    /// Best fuzzy matches for `name`, highest score first.
    pub fn suggest(&self, name: &str, limit: usize) -> Vec<&CardRecord> {
        let query = name.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let matcher = SkimMatcherV2::default().ignore_case();
        let mut scored = self
            .cards
            .iter()
            .filter_map(|card| {
                matcher
                    .fuzzy_match(&card.name, query)
                    .filter(|&score| score > 0)
                    .map(|score| (card, score))
            })
            .collect::<Vec<_>>();
        // stable, so equal scores keep catalog order
        scored.sort_by(|(_, a), (_, b)| b.cmp(a));

        scored.into_iter().take(limit).map(|(card, _)| card).collect()
    }
}

/// Lazily loaded catalog shared by every consumer.
pub struct CardCatalog {
    source: Box<dyn CatalogSource>,
    index: OnceCell<Arc<CatalogIndex>>,
}

impl CardCatalog {
    pub fn new(source: Box<dyn CatalogSource>) -> Self {
        Self {
            source,
            index: OnceCell::new(),
        }
    }

    /// An already loaded catalog, mostly useful for tests and embedding.
    pub fn from_index(index: CatalogIndex) -> Self {
        Self {
            source: Box::new(NoSource),
            index: OnceCell::new_with(Some(Arc::new(index))),
        }
    }

    /// Load the catalog, fetching on the first call only.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Arc<CatalogIndex> {
        self.index
            .get_or_init(|| async {
                match self.source.fetch().await {
                    Ok(raw) => {
                        let index = CatalogIndex::from_raw(raw);
                        info!(cards = index.cards().len(), "card catalog loaded");
                        Arc::new(index)
                    }
                    Err(e) => {
                        error!(error = %e, "failed to load card metadata, continuing with an empty catalog");
                        Arc::new(CatalogIndex::default())
                    }
                }
            })
            .await
            .clone()
    }

    /// The catalog if it has finished loading.
    pub fn loaded(&self) -> Option<Arc<CatalogIndex>> {
        self.index.get().cloned()
    }

    pub async fn list_all(&self) -> Vec<CardRecord> {
        self.load().await.cards().to_vec()
    }

    pub async fn list_types(&self) -> Vec<String> {
        self.load().await.list_types().to_vec()
    }

    pub fn available_colors(&self) -> &'static [&'static str] {
        &COLOR_FILTERS
    }

    pub async fn find_by_name(&self, name: &str) -> Option<CardRecord> {
        self.load().await.find_by_name(name).cloned()
    }

    pub async fn search<C, T>(&self, term: &str, colors: C, types: T, limit: usize) -> Vec<CardRecord>
    where
        C: IntoIterator,
        C::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        self.load().await.search(term, colors, types, limit)
    }
}

struct NoSource;

#[async_trait]
impl CatalogSource for NoSource {
    async fn fetch(&self) -> Result<Vec<RawCardMetadata>, CatalogLoadError> {
        Ok(Vec::new())
    }
}
