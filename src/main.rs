use std::{path::Path, sync::Arc};

use card_ledger::{
    catalog::{self, CardCatalog},
    config::Settings,
    search::SearchPipeline,
    store::{FileStore, HttpStore, KeyValueStore},
    sync::{DeckIdGenerator, PersistenceSync},
    telemetry,
};
use tracing::{error, info};

fn roster_store(settings: &Settings) -> Option<Arc<dyn KeyValueStore>> {
    if let Some(url) = settings.database_url() {
        return Some(Arc::new(HttpStore::new(url, settings.api_key())));
    }
    settings
        .roster_file
        .as_deref()
        .map(|dir| Arc::new(FileStore::new(dir)) as Arc<dyn KeyValueStore>)
}

#[tokio::main]
async fn main() {
    let settings = match Settings::new(Path::new(".")) {
        Ok(settings) => settings,
        Err(e) => {
            telemetry::init("info");
            error!(error = ?e, "invalid configuration, using defaults");
            Settings::default()
        }
    };
    telemetry::init(&settings.log_filter);

    let catalog = Arc::new(CardCatalog::new(catalog::source_for(&settings.catalog_source)));
    let index = catalog.load().await;
    info!(
        cards = index.cards().len(),
        types = index.list_types().len(),
        colors = ?catalog.available_colors(),
        "catalog ready"
    );

    let search = SearchPipeline::with_settings(catalog.clone(), &settings);
    let mut results = search.results();
    if let Ok(first) = results.wait_for(|r| r.generation > 0).await {
        info!(shown = first.cards.len(), limit = first.query.limit, "initial search delivered");
    }

    let sync = PersistenceSync::new(roster_store(&settings), DeckIdGenerator::default());
    let origin = sync.load().await;
    let roster = sync.snapshot();
    info!(?origin, players = roster.players().len(), "roster ready");

    for player in roster.players() {
        let missing: u32 = player.missing_cards.iter().map(|c| c.count).sum();
        info!(player = %player.display_name, decks = player.decks.len(), missing, "player");
    }

    for (category, entries) in index.group_by_category(&roster.list_all_missing_cards()) {
        for entry in entries {
            info!(%category, card = %entry.name, count = entry.count, "missing");
        }
    }

    sync.flush().await;
}
