//! One [`Extractor`] per `(game, source)` pair (spec §4.D). Shared crawl
//! machinery lives in [`pipeline`]; each site module only supplies the
//! listing/detail parsing and wires it up through a [`pipeline::SiteAdapter`].

pub mod mtg_deckbox;
pub mod mtg_goldfish;
pub mod mtg_mtgtop8;
pub mod pipeline;
pub mod pokemon_limitless;
pub mod pokemon_tcg;
pub mod ygo_ygoprodeck;
pub mod ygo_ygoprodeck_tournament;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::blobstore::BlobStore;
use crate::config::ExtractOpts;
use crate::context::OpContext;
use crate::error::ExtractError;
use crate::model::{Collection, Game};
use crate::net::Scraper;
use pipeline::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceId {
    pub game: Game,
    pub source: &'static str,
}

/// The only contract the [`Registry`]/orchestrator sees (spec §4.D, §9: "a
/// tagged-variant registry keyed by source slug; do not build inheritance
/// hierarchies of parsers").
#[async_trait]
pub trait Extractor: Send + Sync {
    fn describe(&self) -> SourceId;

    async fn extract(
        &self,
        ctx: &OpContext,
        scraper: &Scraper,
        store: &BlobStore,
        opts: &ExtractOpts,
    ) -> Result<RunSummary, ExtractError>;

    fn iterate<'a>(&'a self, store: &'a BlobStore) -> BoxStream<'a, Result<Collection, ExtractError>>;
}

/// Keyed by source slug, not inheritance (spec §9).
pub struct Registry {
    extractors: HashMap<&'static str, Arc<dyn Extractor>>,
}

impl Registry {
    pub fn new() -> Self {
        let all: Vec<Arc<dyn Extractor>> = vec![
            Arc::new(mtg_mtgtop8::MtgTop8Extractor::new()),
            Arc::new(mtg_goldfish::GoldfishExtractor::new()),
            Arc::new(mtg_deckbox::DeckboxExtractor::new()),
            Arc::new(pokemon_tcg::PokemonTcgExtractor::new()),
            Arc::new(pokemon_limitless::LimitlessExtractor::new()),
            Arc::new(ygo_ygoprodeck::YgoProDeckExtractor::new()),
            Arc::new(ygo_ygoprodeck_tournament::YgoProDeckTournamentExtractor::new()),
        ];
        let extractors = all
            .into_iter()
            .map(|e| (e.describe().source, e))
            .collect();
        Registry { extractors }
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(source).cloned()
    }

    pub fn sources(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.extractors.keys().copied()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
