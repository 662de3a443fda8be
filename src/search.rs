//! Reactive search over the card catalog.
//!
//! A [`SearchPipeline`] owns the current query. Term edits are debounced and
//! deduplicated against the last term that actually ran; colour and type
//! toggles run at once. Each new query aborts the filter pass still in
//! flight, and a pass only publishes if its generation is still the latest,
//! so subscribers never see a stale result.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, instrument, Instrument};

use crate::{catalog::CardCatalog, config::Settings, models::CardRecord};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filters {
    pub colors: BTreeSet<String>,
    pub types: BTreeSet<String>,
}

fn toggle(set: &mut BTreeSet<String>, value: &str) {
    if !set.remove(value) {
        set.insert(value.to_owned());
    }
}

/// A query exactly as it was handed to the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub filters: Filters,
    pub limit: usize,
}

/// Latest delivered result. `generation` 0 means nothing has run yet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchResults {
    pub generation: u64,
    pub query: SearchQuery,
    pub cards: Vec<CardRecord>,
}

pub struct SearchPipeline {
    term_tx: watch::Sender<String>,
    filters_tx: watch::Sender<Filters>,
    results_rx: watch::Receiver<SearchResults>,
    driver: JoinHandle<()>,
}

impl SearchPipeline {
    /// Start the pipeline on the current tokio runtime.
    pub fn spawn(catalog: Arc<CardCatalog>, debounce: Duration, limit: usize) -> Self {
        let (term_tx, mut term_rx) = watch::channel(String::new());
        let (filters_tx, filters_rx) = watch::channel(Filters::default());
        // The empty term goes through the debounce like any other edit,
        // timed from now rather than from the driver's first poll.
        let initial = term_rx.borrow_and_update().clone();
        let first_deadline = Instant::now() + debounce;
        let (results_tx, results_rx) = watch::channel(SearchResults::default());

        // Start the catalog load outside the query tasks, so aborting a
        // superseded query never cancels the shared fetch.
        let warm = catalog.clone();
        tokio::spawn(async move { warm.load().await }.in_current_span());

        let driver = Driver {
            catalog,
            debounce,
            limit,
            results_tx: Arc::new(results_tx),
            latest: Arc::new(AtomicU64::new(0)),
            in_flight: None,
        };
        let handle = tokio::spawn(
            driver
                .run(initial, first_deadline, term_rx, filters_rx)
                .in_current_span(),
        );

        Self {
            term_tx,
            filters_tx,
            results_rx,
            driver: handle,
        }
    }

    /// Start the pipeline with the configured debounce window and result limit.
    pub fn with_settings(catalog: Arc<CardCatalog>, settings: &Settings) -> Self {
        Self::spawn(catalog, settings.search_debounce(), settings.search_limit)
    }

    pub fn set_term(&self, term: &str) {
        self.term_tx.send_replace(term.to_owned());
    }

    pub fn toggle_color(&self, color: &str) {
        self.filters_tx.send_modify(|f| toggle(&mut f.colors, color));
    }

    pub fn toggle_type(&self, card_type: &str) {
        self.filters_tx.send_modify(|f| toggle(&mut f.types, card_type));
    }

    pub fn clear_filters(&self) {
        self.filters_tx.send_if_modified(|f| {
            let changed = !f.colors.is_empty() || !f.types.is_empty();
            *f = Filters::default();
            changed
        });
    }

    pub fn is_color_selected(&self, color: &str) -> bool {
        self.filters_tx.borrow().colors.contains(color)
    }

    pub fn is_type_selected(&self, card_type: &str) -> bool {
        self.filters_tx.borrow().types.contains(card_type)
    }

    /// Subscribe to delivered results.
    pub fn results(&self) -> watch::Receiver<SearchResults> {
        self.results_rx.clone()
    }

    pub fn current(&self) -> SearchResults {
        self.results_rx.borrow().clone()
    }
}

impl Drop for SearchPipeline {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

struct Driver {
    catalog: Arc<CardCatalog>,
    debounce: Duration,
    limit: usize,
    results_tx: Arc<watch::Sender<SearchResults>>,
    latest: Arc<AtomicU64>,
    in_flight: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(
        mut self,
        initial: String,
        first_deadline: Instant,
        mut term_rx: watch::Receiver<String>,
        mut filters_rx: watch::Receiver<Filters>,
    ) {
        let mut pending = Some(initial);
        let mut deadline = Some(first_deadline);
        let mut term: Option<String> = None;
        let mut filters = filters_rx.borrow_and_update().clone();

        loop {
            tokio::select! {
                changed = term_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    pending = Some(term_rx.borrow_and_update().clone());
                    deadline = Some(Instant::now() + self.debounce);
                }
                changed = filters_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    filters = filters_rx.borrow_and_update().clone();
                    if let Some(term) = &term {
                        self.dispatch(term, &filters);
                    }
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    let Some(next) = pending.take() else { continue };
                    if term.as_ref() == Some(&next) {
                        debug!(term = %next, "term unchanged, skipping search");
                        continue;
                    }
                    self.dispatch(&next, &filters);
                    term = Some(next);
                }
            }
        }

        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }

    #[instrument(skip(self, filters), fields(colors = filters.colors.len(), types = filters.types.len()))]
    fn dispatch(&mut self, term: &str, filters: &Filters) {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }

        let query = SearchQuery {
            term: term.to_owned(),
            filters: filters.clone(),
            limit: self.limit,
        };
        let catalog = self.catalog.clone();
        let results_tx = self.results_tx.clone();
        let latest = self.latest.clone();

        self.in_flight = Some(tokio::spawn(
            async move {
                let cards = catalog
                    .search(&query.term, &query.filters.colors, &query.filters.types, query.limit)
                    .await;
                results_tx.send_if_modified(|current| {
                    if latest.load(Ordering::SeqCst) != generation {
                        debug!(generation, "discarding superseded search result");
                        return false;
                    }
                    debug!(generation, found = cards.len(), "search result delivered");
                    *current = SearchResults {
                        generation,
                        query,
                        cards,
                    };
                    true
                });
            }
            .in_current_span(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        catalog::{tests::sample, CatalogSource},
        error::CatalogLoadError,
        models::RawCardMetadata,
    };

    struct SlowSource {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CatalogSource for SlowSource {
        async fn fetch(&self) -> Result<Vec<RawCardMetadata>, CatalogLoadError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(sample())
        }
    }

    fn catalog() -> Arc<CardCatalog> {
        Arc::new(CardCatalog::from_index(crate::catalog::CatalogIndex::from_raw(sample())))
    }

    fn names(results: &SearchResults) -> Vec<&str> {
        results.cards.iter().map(|c| c.name.as_str()).collect()
    }

    /// Let spawned tasks run without moving the paused clock.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initial_empty_query_runs_after_debounce() {
        let pipeline = SearchPipeline::spawn(catalog(), DEFAULT_DEBOUNCE, 2);
        settle().await;
        assert_eq!(pipeline.current().generation, 0);

        tokio::time::advance(DEFAULT_DEBOUNCE).await;
        settle().await;

        let results = pipeline.current();
        assert_eq!(results.generation, 1);
        assert_eq!(names(&results), ["blazing Scorcher", "Clockwork Drake"]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_window_starts_at_spawn() {
        let pipeline = SearchPipeline::spawn(catalog(), DEFAULT_DEBOUNCE, 3);
        // no yield before the clock moves, so the driver has not run yet
        tokio::time::advance(DEFAULT_DEBOUNCE).await;
        settle().await;
        assert_eq!(pipeline.current().generation, 1);
        assert_eq!(pipeline.current().cards.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_drive_debounce_and_limit() {
        let settings = Settings {
            search_debounce_ms: 10,
            search_limit: 2,
            ..Settings::default()
        };
        let pipeline = SearchPipeline::with_settings(catalog(), &settings);
        tokio::time::advance(Duration::from_millis(10)).await;
        settle().await;

        let results = pipeline.current();
        assert_eq!(results.generation, 1);
        assert_eq!(results.query.limit, 2);
        assert_eq!(names(&results), ["blazing Scorcher", "Clockwork Drake"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_term_edits_coalesce() {
        let pipeline = SearchPipeline::spawn(catalog(), DEFAULT_DEBOUNCE, 10);
        tokio::time::advance(DEFAULT_DEBOUNCE).await;
        settle().await;
        assert_eq!(pipeline.current().generation, 1);

        for term in ["c", "cl", "clo", "clock"] {
            pipeline.set_term(term);
            settle().await;
            tokio::time::advance(Duration::from_millis(50)).await;
        }
        assert_eq!(pipeline.current().generation, 1);

        tokio::time::advance(DEFAULT_DEBOUNCE).await;
        settle().await;
        let results = pipeline.current();
        assert_eq!(results.generation, 2);
        assert_eq!(results.query.term, "clock");
        assert_eq!(names(&results), ["Clockwork Drake"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_term_does_not_rerun() {
        let pipeline = SearchPipeline::spawn(catalog(), DEFAULT_DEBOUNCE, 10);
        pipeline.set_term("oaks");
        settle().await;
        tokio::time::advance(DEFAULT_DEBOUNCE).await;
        settle().await;
        assert_eq!(pipeline.current().generation, 1);

        pipeline.set_term("oak");
        settle().await;
        pipeline.set_term("oaks");
        settle().await;
        tokio::time::advance(DEFAULT_DEBOUNCE).await;
        settle().await;
        assert_eq!(pipeline.current().generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn filter_toggles_apply_without_debounce() {
        let pipeline = SearchPipeline::spawn(catalog(), DEFAULT_DEBOUNCE, 10);
        tokio::time::advance(DEFAULT_DEBOUNCE).await;
        settle().await;

        pipeline.toggle_color("Calm");
        settle().await;
        let results = pipeline.current();
        assert_eq!(results.generation, 2);
        assert!(pipeline.is_color_selected("Calm"));
        assert_eq!(names(&results), ["Whispering Oaks"]);

        pipeline.toggle_type("Spell");
        settle().await;
        assert!(pipeline.current().cards.is_empty());

        pipeline.toggle_color("Calm");
        settle().await;
        assert!(!pipeline.is_color_selected("Calm"));
        assert!(pipeline.is_type_selected("Spell"));
        assert_eq!(names(&pipeline.current()), ["blazing Scorcher"]);

        pipeline.clear_filters();
        settle().await;
        assert_eq!(pipeline.current().cards.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn only_latest_query_is_delivered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let catalog = Arc::new(CardCatalog::new(Box::new(SlowSource { calls: calls.clone() })));
        let pipeline = SearchPipeline::spawn(catalog, DEFAULT_DEBOUNCE, 10);
        let mut results = pipeline.results();

        pipeline.set_term("drake");
        settle().await;
        tokio::time::advance(DEFAULT_DEBOUNCE).await;
        settle().await;
        // first pass is now waiting on the slow catalog load
        assert_eq!(pipeline.current().generation, 0);
        pipeline.toggle_color("Calm");
        settle().await;

        tokio::time::advance(Duration::from_millis(400)).await;
        settle().await;

        results.changed().await.unwrap();
        let delivered = results.borrow_and_update().clone();
        assert_eq!(delivered.generation, 2);
        assert!(delivered.query.filters.colors.contains("Calm"));
        assert!(delivered.cards.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
