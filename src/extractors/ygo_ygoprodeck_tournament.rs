//! YGOPRODeck tournament decklists (spec §4.D: "YGO decks have three
//! partitions"): Main, Extra, and Side, each in its own table on the deck
//! page.

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

const BASE: &str = "https://ygoprodeck.com";

pub struct YgoProDeckTournamentExtractor;

impl YgoProDeckTournamentExtractor {
    pub fn new() -> Self {
        YgoProDeckTournamentExtractor
    }
}

impl Default for YgoProDeckTournamentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for YgoProDeckTournamentExtractor {
    fn describe(&self) -> SourceId {
        SourceId {
            game: Game::YuGiOh,
            source: "ygoprodeck-tournament",
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
        pipeline::iterate(store, Game::YuGiOh, "ygoprodeck-tournament")
    }
}

impl SiteAdapter for YgoProDeckTournamentExtractor {
    fn game(&self) -> Game {
        Game::YuGiOh
    }

    fn source(&self) -> &'static str {
        "ygoprodeck-tournament"
    }

    fn listing_url(&self, opts: &ExtractOpts, page: u32) -> Option<Url> {
        let section = opts.section.as_deref().unwrap_or("tcg");
        Url::parse(&format!("{BASE}/deck-searcher/{section}?page={page}")).ok()
    }

    fn parse_listing(&self, listing_url: &Url, body: &[u8]) -> Result<Vec<Url>, ExtractError> {
        let text = String::from_utf8_lossy(body);
        let doc = Html::parse_document(&text);
        let selector = Selector::parse(r#"a[href^="/deck/"]"#).expect("static selector");

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

        let main = parse_section(&doc, "#main_deck");
        let extra = parse_section(&doc, "#extra_deck");
        let side = parse_section(&doc, "#side_deck");

        if main.is_empty() {
            return Err(ExtractError::ParseFailure(format!("empty main deck at {detail_url}")));
        }

        let name_selector = Selector::parse("h1.deck-title, h1").expect("static selector");
        let name = doc
            .select(&name_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let mut partitions = vec![Partition {
            name: "Main".into(),
            cards: main,
        }];
        if !extra.is_empty() {
            partitions.push(Partition {
                name: "Extra".into(),
                cards: extra,
            });
        }
        if !side.is_empty() {
            partitions.push(Partition {
                name: "Side".into(),
                cards: side,
            });
        }

        Collection::build(
            id,
            Game::YuGiOh,
            "ygoprodeck-tournament".into(),
            detail_url.clone(),
            (response.final_url != *detail_url).then(|| response.final_url.clone()),
            response.fetched_at,
            CollectionType::Deck(DeckFields {
                name,
                format: "tcg".into(),
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
        format!("games/yugioh/ygoprodeck-tournament/collections/{}.json", collection.id)
    }
}

fn deck_id_from_url(url: &Url) -> Option<String> {
    url.path_segments()?.filter(|s| !s.is_empty()).last().map(str::to_owned)
}

fn parse_section(doc: &Html, container_css: &str) -> Vec<CardDesc> {
    let Ok(container_selector) = Selector::parse(container_css) else {
        return Vec::new();
    };
    let Some(container) = doc.select(&container_selector).next() else {
        return Vec::new();
    };

    let row_selector = Selector::parse(".card_in_deck").expect("static selector");
    let qty_selector = Selector::parse(".card_qty").expect("static selector");
    let name_selector = Selector::parse(".card_name").expect("static selector");

    container
        .select(&row_selector)
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
