//! The Pokémon TCG API (spec §4.D: "analogous [to MTG sites], each with its
//! own HTML/JSON shape"). This source is pure JSON: listing pages are the
//! API's own pagination, and each card is already a self-contained detail
//! resource — no separate card page to fetch a second time, but the pipeline
//! contract still wants one `Fetch` per card so caching/rate-limiting apply
//! uniformly, so the "detail URL" is simply the card's own API endpoint.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use url::Url;

use crate::blobstore::BlobStore;
use crate::config::ExtractOpts;
use crate::context::OpContext;
use crate::error::ExtractError;
use crate::model::{CardFields, Collection, CollectionType, Game, Strictness};
use crate::net::{Response, Scraper};

use super::pipeline::{self, RunSummary, SiteAdapter};
use super::{Extractor, SourceId};

const BASE: &str = "https://api.pokemontcg.io/v2/cards";
const PAGE_SIZE: u32 = 250;

pub struct PokemonTcgExtractor;

impl PokemonTcgExtractor {
    pub fn new() -> Self {
        PokemonTcgExtractor
    }
}

impl Default for PokemonTcgExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for PokemonTcgExtractor {
    fn describe(&self) -> SourceId {
        SourceId {
            game: Game::Pokemon,
            source: "pokemontcg",
        }
    }

    async fn extract(
        &self,
        ctx: &OpContext,
        scraper: &Scraper,
        store: &BlobStore,
        opts: &ExtractOpts,
    ) -> Result<RunSummary, ExtractError> {
        pipeline::run(ctx, scraper, store, opts, self).await
    }

    fn iterate<'a>(&'a self, store: &'a BlobStore) -> BoxStream<'a, Result<Collection, ExtractError>> {
        pipeline::iterate(store, Game::Pokemon, "pokemontcg")
    }
}

#[derive(Debug, Deserialize)]
struct ListPage {
    data: Vec<ListedCard>,
}

#[derive(Debug, Deserialize)]
struct ListedCard {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CardPage {
    data: CardJson,
}

#[derive(Debug, Deserialize)]
struct CardJson {
    id: String,
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    rarity: Option<String>,
    #[serde(default)]
    types: Vec<String>,
    set: SetJson,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SetJson {
    id: String,
}

impl SiteAdapter for PokemonTcgExtractor {
    fn game(&self) -> Game {
        Game::Pokemon
    }

    fn source(&self) -> &'static str {
        "pokemontcg"
    }

    fn listing_url(&self, _opts: &ExtractOpts, page: u32) -> Option<Url> {
        Url::parse(&format!("{BASE}?page={page}&pageSize={PAGE_SIZE}")).ok()
    }

    fn parse_listing(&self, listing_url: &Url, body: &[u8]) -> Result<Vec<Url>, ExtractError> {
        let page: ListPage = serde_json::from_slice(body)
            .map_err(|e| ExtractError::ParseFailure(format!("{listing_url}: {e}")))?;
        Ok(page
            .data
            .into_iter()
            .filter_map(|card| Url::parse(&format!("{BASE}/{}", card.id)).ok())
            .collect())
    }

    fn parse_detail(&self, detail_url: &Url, response: &Response) -> Result<Collection, ExtractError> {
        let page: CardPage = serde_json::from_slice(&response.body)
            .map_err(|e| ExtractError::ParseFailure(format!("{detail_url}: {e}")))?;
        let card = page.data;

        Collection::build(
            card.id,
            Game::Pokemon,
            "pokemontcg".into(),
            detail_url.clone(),
            None,
            response.fetched_at,
            CollectionType::Card(CardFields {
                set_code: Some(card.set.id),
                collector_number: card.number,
                mana_cost: None,
                types: card.types,
                rarity: card.rarity,
                extra: card.extra,
            }),
            vec![],
            Default::default(),
            Strictness::Lenient,
        )
        .map_err(ExtractError::InvalidCollection)
    }

    fn output_key(&self, collection: &Collection) -> String {
        format!("games/pokemon/pokemontcg/cards/{}.json", collection.id)
    }
}
