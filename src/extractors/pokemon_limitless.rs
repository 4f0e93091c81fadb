//! Limitless TCG tournament decklists (spec §4.D, source slug
//! `limitless-web`). A deck page is one flat card table; Pokémon decks have
//! no sideboard, so every card lands in a single `Main` partition. Event
//! context (spec §3: "Pokémon adds event context") comes from the
//! tournament breadcrumb on the same page.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use scraper::{Html, Selector};
use url::Url;

use crate::blobstore::BlobStore;
use crate::config::ExtractOpts;
use crate::context::OpContext;
use crate::error::ExtractError;
use crate::model::{CardDesc, Collection, CollectionType, DeckFields, Game, Partition, Strictness};
use crate::net::{Response, Scraper};

use super::pipeline::{self, RunSummary, SiteAdapter};
use super::{Extractor, SourceId};

const BASE: &str = "https://limitlesstcg.com";

pub struct LimitlessExtractor;

impl LimitlessExtractor {
    pub fn new() -> Self {
        LimitlessExtractor
    }
}

impl Default for LimitlessExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for LimitlessExtractor {
    fn describe(&self) -> SourceId {
        SourceId {
            game: Game::Pokemon,
            source: "limitless-web",
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
        pipeline::iterate(store, Game::Pokemon, "limitless-web")
    }
}

impl SiteAdapter for LimitlessExtractor {
    fn game(&self) -> Game {
        Game::Pokemon
    }

    fn source(&self) -> &'static str {
        "limitless-web"
    }

    fn listing_url(&self, opts: &ExtractOpts, page: u32) -> Option<Url> {
        let section = opts.section.as_deref().unwrap_or("standard");
        Url::parse(&format!("{BASE}/tournaments/{section}/decks?page={page}")).ok()
    }

    fn parse_listing(&self, listing_url: &Url, body: &[u8]) -> Result<Vec<Url>, ExtractError> {
        let text = String::from_utf8_lossy(body);
        let doc = Html::parse_document(&text);
        let selector = Selector::parse(r#"a[href*="/decks/list"]"#).expect("static selector");

        let mut urls: Vec<Url> = doc
            .select(&selector)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| listing_url.join(href).ok())
            .collect();
        urls.sort_by_key(|u| u.to_string());
        urls.dedup();
        Ok(urls)
    }

    fn parse_detail(&self, detail_url: &Url, response: &Response) -> Result<Collection, ExtractError> {
        let text = String::from_utf8_lossy(&response.body);
        let doc = Html::parse_document(&text);

        let id = deck_id_from_url(detail_url)
            .ok_or_else(|| ExtractError::ParseFailure(format!("no deck id in {detail_url}")))?;

        let cards = parse_decklist(&doc);
        if cards.is_empty() {
            return Err(ExtractError::ParseFailure(format!("empty decklist at {detail_url}")));
        }

        let player = first_text(&doc, ".player-name");
        let event = first_text(&doc, ".tournament-name");

        Collection::build(
            id,
            Game::Pokemon,
            "limitless-web".into(),
            detail_url.clone(),
            (response.final_url != *detail_url).then(|| response.final_url.clone()),
            response.fetched_at,
            CollectionType::Deck(DeckFields {
                name: event.clone().unwrap_or_default(),
                format: "standard".into(),
                archetype: None,
                player,
                event,
                placement: None,
                event_date: None,
            }),
            vec![Partition {
                name: "Main".into(),
                cards,
            }],
            Default::default(),
            Strictness::Lenient,
        )
        .map_err(ExtractError::InvalidCollection)
    }

    fn output_key(&self, collection: &Collection) -> String {
        format!("games/pokemon/limitless-web/collections/{}.json", collection.id)
    }
}

fn deck_id_from_url(url: &Url) -> Option<String> {
    url.query_pairs().find(|(k, _)| k == "deck").map(|(_, v)| v.into_owned())
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector).next().map(|el| el.text().collect::<String>().trim().to_string())
}

fn parse_decklist(doc: &Html) -> Vec<CardDesc> {
    let row_selector = Selector::parse(".decklist-card").expect("static selector");
    let qty_selector = Selector::parse(".card-count").expect("static selector");
    let name_selector = Selector::parse(".card-name").expect("static selector");

    doc.select(&row_selector)
        .filter_map(|row| {
            let count = row
                .select(&qty_selector)
                .next()
                .and_then(|el| el.text().collect::<String>().trim().parse::<u32>().ok())?;
            let name = row.select(&name_selector).next()?.text().collect::<String>().trim().to_string();
            Some(CardDesc {
                name,
                count,
                set_code: None,
                collector_number: None,
                foil: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const DECK_HTML: &str = r#"
        <html><body>
        <div class="player-name">Ash Ketchum</div>
        <div class="tournament-name">Regional Championship 2024</div>
        <div class="decklist-card"><span class="card-count">4</span><span class="card-name">Charizard ex</span></div>
        <div class="decklist-card"><span class="card-count">3</span><span class="card-name">Arceus VSTAR</span></div>
        </body></html>
    "#;

    #[test]
    fn parses_single_main_partition_with_event_context() {
        let extractor = LimitlessExtractor::new();
        let url = Url::parse("https://limitlesstcg.com/decks/list?deck=abc123").unwrap();
        let response = Response {
            status_code: 200,
            headers: vec![],
            body: DECK_HTML.as_bytes().to_vec(),
            final_url: url.clone(),
            fetched_at: Utc::now(),
            from_cache: false,
            redirects: vec![],
        };
        let collection = extractor.parse_detail(&url, &response).unwrap();
        assert_eq!(collection.id, "abc123");
        assert_eq!(collection.partitions.len(), 1);
        assert_eq!(collection.partitions[0].cards.len(), 2);
        match &collection.kind {
            CollectionType::Deck(fields) => {
                assert_eq!(fields.player.as_deref(), Some("Ash Ketchum"));
                assert_eq!(fields.event.as_deref(), Some("Regional Championship 2024"));
            }
            other => panic!("expected Deck, got {other:?}"),
        }
    }
}
