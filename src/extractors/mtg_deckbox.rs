//! Deckbox.org deck pages (spec §4.D: "analogous [to MTGTop8/Goldfish], each
//! with its own HTML shape"). Card rows live in a `table.set_cards`; each row
//! carries its own quantity and name cells, and rows after a
//! `tr.sideboard_separator` belong to the Sideboard partition.

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

const BASE: &str = "https://deckbox.org";

pub struct DeckboxExtractor;

impl DeckboxExtractor {
    pub fn new() -> Self {
        DeckboxExtractor
    }
}

impl Default for DeckboxExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for DeckboxExtractor {
    fn describe(&self) -> SourceId {
        SourceId {
            game: Game::Magic,
            source: "deckbox",
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
        pipeline::iterate(store, Game::Magic, "deckbox")
    }
}

impl SiteAdapter for DeckboxExtractor {
    fn game(&self) -> Game {
        Game::Magic
    }

    fn source(&self) -> &'static str {
        "deckbox"
    }

    fn listing_url(&self, opts: &ExtractOpts, page: u32) -> Option<Url> {
        let section = opts.section.as_deref().unwrap_or("standard");
        Url::parse(&format!("{BASE}/games/magic-the-gathering/decks/{section}?p={page}")).ok()
    }

    fn parse_listing(&self, listing_url: &Url, body: &[u8]) -> Result<Vec<Url>, ExtractError> {
        let text = String::from_utf8_lossy(body);
        let doc = Html::parse_document(&text);
        let selector = Selector::parse(r#"a[href^="/sets/"]"#).expect("static selector");

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
            .ok_or_else(|| ExtractError::ParseFailure(format!("no set id in {detail_url}")))?;

        let (main, sideboard) = parse_decklist(&doc);
        if main.is_empty() {
            return Err(ExtractError::ParseFailure(format!("empty decklist at {detail_url}")));
        }

        let name_selector = Selector::parse("h1.deck_title, h1").expect("static selector");
        let name = doc
            .select(&name_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let mut partitions = vec![Partition {
            name: "Main".into(),
            cards: main,
        }];
        if !sideboard.is_empty() {
            partitions.push(Partition {
                name: "Sideboard".into(),
                cards: sideboard,
            });
        }

        Collection::build(
            id,
            Game::Magic,
            "deckbox".into(),
            detail_url.clone(),
            (response.final_url != *detail_url).then(|| response.final_url.clone()),
            response.fetched_at,
            CollectionType::Deck(DeckFields {
                name,
                format: "unknown".into(),
                archetype: None,
                player: None,
                event: None,
                placement: None,
                event_date: None,
            }),
            partitions,
            Default::default(),
            Strictness::Lenient,
        )
        .map_err(ExtractError::InvalidCollection)
    }

    fn output_key(&self, collection: &Collection) -> String {
        format!("games/magic/deckbox/collections/{}.json", collection.id)
    }
}

fn deck_id_from_url(url: &Url) -> Option<String> {
    url.path_segments()?.filter(|s| !s.is_empty()).last().map(str::to_owned)
}

fn parse_decklist(doc: &Html) -> (Vec<CardDesc>, Vec<CardDesc>) {
    let row_selector = Selector::parse("table.set_cards tr").expect("static selector");
    let qty_selector = Selector::parse(".card_qty").expect("static selector");
    let name_selector = Selector::parse(".card_name").expect("static selector");

    let mut main = Vec::new();
    let mut sideboard = Vec::new();
    let mut in_sideboard = false;

    for row in doc.select(&row_selector) {
        if row
            .value()
            .has_class("sideboard_separator", scraper::CaseSensitivity::CaseSensitive)
        {
            in_sideboard = true;
            continue;
        }

        let qty = row
            .select(&qty_selector)
            .next()
            .and_then(|el| el.text().collect::<String>().trim().parse::<u32>().ok());
        let name = row
            .select(&name_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string());

        let (Some(qty), Some(name)) = (qty, name) else {
            continue;
        };
        let card = CardDesc {
            name,
            count: qty,
            set_code: None,
            collector_number: None,
            foil: None,
        };
        if in_sideboard {
            sideboard.push(card);
        } else {
            main.push(card);
        }
    }

    (main, sideboard)
}
