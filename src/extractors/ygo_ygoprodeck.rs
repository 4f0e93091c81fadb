//! The YGOPRODeck card database API (spec §4.D, source slug
//! `ygoprodeck`). Like `pokemontcg`, listing is the API's own pagination and
//! each "detail URL" is the card's own single-card endpoint — unlike
//! `pokemontcg` that endpoint wraps its single result in a one-element
//! array rather than a bare object.

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

const BASE: &str = "https://db.ygoprodeck.com/api/v7/cardinfo.php";
const PAGE_SIZE: u32 = 100;

pub struct YgoProDeckExtractor;

impl YgoProDeckExtractor {
    pub fn new() -> Self {
        YgoProDeckExtractor
    }
}

impl Default for YgoProDeckExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for YgoProDeckExtractor {
    fn describe(&self) -> SourceId {
        SourceId {
            game: Game::YuGiOh,
            source: "ygoprodeck",
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
        pipeline::iterate(store, Game::YuGiOh, "ygoprodeck")
    }
}

#[derive(Debug, Deserialize)]
struct CardListResponse {
    data: Vec<CardJson>,
}

#[derive(Debug, Deserialize)]
struct CardJson {
    id: i64,
    #[serde(default)]
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    race: Option<String>,
    #[serde(default)]
    atk: Option<i64>,
    #[serde(default)]
    def: Option<i64>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl SiteAdapter for YgoProDeckExtractor {
    fn game(&self) -> Game {
        Game::YuGiOh
    }

    fn source(&self) -> &'static str {
        "ygoprodeck"
    }

    fn listing_url(&self, _opts: &ExtractOpts, page: u32) -> Option<Url> {
        let offset = (page.saturating_sub(1)) * PAGE_SIZE;
        Url::parse(&format!("{BASE}?num={PAGE_SIZE}&offset={offset}")).ok()
    }

    fn parse_listing(&self, listing_url: &Url, body: &[u8]) -> Result<Vec<Url>, ExtractError> {
        let page: CardListResponse = serde_json::from_slice(body)
            .map_err(|e| ExtractError::ParseFailure(format!("{listing_url}: {e}")))?;
        Ok(page
            .data
            .into_iter()
            .filter_map(|card| Url::parse(&format!("{BASE}?id={}", card.id)).ok())
            .collect())
    }

    fn parse_detail(&self, detail_url: &Url, response: &Response) -> Result<Collection, ExtractError> {
        let page: CardListResponse = serde_json::from_slice(&response.body)
            .map_err(|e| ExtractError::ParseFailure(format!("{detail_url}: {e}")))?;
        let card = page
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ExtractError::NotFound(detail_url.to_string()))?;

        let mut types = Vec::new();
        if let Some(kind) = &card.kind {
            types.push(kind.clone());
        }
        if let Some(race) = &card.race {
            types.push(race.clone());
        }

        Collection::build(
            card.id.to_string(),
            Game::YuGiOh,
            "ygoprodeck".into(),
            detail_url.clone(),
            None,
            response.fetched_at,
            CollectionType::Card(CardFields {
                set_code: None,
                collector_number: None,
                mana_cost: None,
                types,
                rarity: None,
                extra: card.extra,
            }),
            vec![],
            Default::default(),
            Strictness::Lenient,
        )
        .map_err(ExtractError::InvalidCollection)
    }

    fn output_key(&self, collection: &Collection) -> String {
        format!("games/yugioh/ygoprodeck/cards/{}.json", collection.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn parses_listing_into_per_card_detail_urls() {
        let extractor = YgoProDeckExtractor::new();
        let listing_url = Url::parse("https://db.ygoprodeck.com/api/v7/cardinfo.php?num=100&offset=0").unwrap();
        let body = br#"{"data":[{"id":89631139,"type":"Normal Monster"},{"id":46986414,"type":"Spell Card"}]}"#;
        let urls = extractor.parse_listing(&listing_url, body).unwrap();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].as_str().ends_with("id=89631139"));
    }

    #[test]
    fn parses_single_card_detail_payload() {
        let extractor = YgoProDeckExtractor::new();
        let url = Url::parse("https://db.ygoprodeck.com/api/v7/cardinfo.php?id=89631139").unwrap();
        let body = br#"{"data":[{"id":89631139,"name":"Blue-Eyes White Dragon","type":"Normal Monster","race":"Dragon","atk":3000,"def":2500}]}"#;
        let response = Response {
            status_code: 200,
            headers: vec![],
            body: body.to_vec(),
            final_url: url.clone(),
            fetched_at: Utc::now(),
            from_cache: false,
            redirects: vec![],
        };
        let collection = extractor.parse_detail(&url, &response).unwrap();
        assert_eq!(collection.id, "89631139");
        match &collection.kind {
            CollectionType::Card(fields) => {
                assert_eq!(fields.types, vec!["Normal Monster".to_string(), "Dragon".to_string()]);
            }
            other => panic!("expected Card, got {other:?}"),
        }
    }

    #[test]
    fn empty_data_array_is_not_found() {
        let extractor = YgoProDeckExtractor::new();
        let url = Url::parse("https://db.ygoprodeck.com/api/v7/cardinfo.php?id=0").unwrap();
        let response = Response {
            status_code: 200,
            headers: vec![],
            body: br#"{"data":[]}"#.to_vec(),
            final_url: url.clone(),
            fetched_at: Utc::now(),
            from_cache: false,
            redirects: vec![],
        };
        assert!(matches!(
            extractor.parse_detail(&url, &response).unwrap_err(),
            ExtractError::NotFound(_)
        ));
    }
}
