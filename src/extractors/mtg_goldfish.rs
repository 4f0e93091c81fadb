//! MTGGoldfish deck pages (spec §4.D, §8 S1): the decklist lives in a
//! hidden form field as plain-text `COUNT CARDNAME` lines, HTML entities
//! already decoded by the HTML parser. The sideboard separator is the
//! literal `--`, the bare token `sideboard`, or any line starting with
//! `sideboard` (case-insensitive).

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

const BASE: &str = "https://www.mtggoldfish.com";

pub struct GoldfishExtractor;

impl GoldfishExtractor {
    pub fn new() -> Self {
        GoldfishExtractor
    }
}

impl Default for GoldfishExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for GoldfishExtractor {
    fn describe(&self) -> SourceId {
        SourceId {
            game: Game::Magic,
            source: "goldfish",
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
        pipeline::iterate(store, Game::Magic, "goldfish")
    }
}

impl SiteAdapter for GoldfishExtractor {
    fn game(&self) -> Game {
        Game::Magic
    }

    fn source(&self) -> &'static str {
        "goldfish"
    }

    fn listing_url(&self, opts: &ExtractOpts, page: u32) -> Option<Url> {
        let section = opts.section.as_deref().unwrap_or("modern");
        Url::parse(&format!("{BASE}/archetype/{section}?p={page}")).ok()
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

        let input_selector = Selector::parse("#deck_input_deck").expect("static selector");
        let raw_list = doc
            .select(&input_selector)
            .next()
            .map(|el| {
                el.value()
                    .attr("value")
                    .map(str::to_owned)
                    .unwrap_or_else(|| el.text().collect::<String>())
            })
            .ok_or_else(|| ExtractError::ParseFailure(format!("no decklist field at {detail_url}")))?;

        let (main, sideboard) = parse_decklist(&raw_list);
        if main.is_empty() {
            return Err(ExtractError::ParseFailure(format!("empty decklist at {detail_url}")));
        }

        let title_selector = Selector::parse("h1.deck-view-title, h1").expect("static selector");
        let name = doc
            .select(&title_selector)
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
            "goldfish".into(),
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
        format!("games/magic/goldfish/collections/{}.json", collection.id)
    }
}

fn deck_id_from_url(url: &Url) -> Option<String> {
    url.path_segments()?.filter(|s| !s.is_empty()).last().map(str::to_owned)
}

/// Implements spec §4.D / §8 S1 literally: lines not matching `NUMBER
/// WORDS…` are skipped; everything before the separator is Main, everything
/// after is Sideboard.
fn parse_decklist(raw: &str) -> (Vec<CardDesc>, Vec<CardDesc>) {
    let mut main = Vec::new();
    let mut sideboard = Vec::new();
    let mut in_sideboard = false;

    for raw_line in raw.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if line == "--" || lower == "sideboard" || lower.starts_with("sideboard") {
            in_sideboard = true;
            continue;
        }

        let Some((count_str, name)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let Ok(count) = count_str.parse::<u32>() else {
            continue;
        };
        let card = CardDesc {
            name: name.trim().to_string(),
            count,
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
