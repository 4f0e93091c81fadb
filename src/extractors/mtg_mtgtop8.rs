//! MTGTop8 deck pages (spec §4.D): player comes from the first large-player
//! element, event from the first event-title element, placement from a `#N`
//! prefix on the second event-title element when present.

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

const BASE: &str = "https://mtgtop8.com";

pub struct MtgTop8Extractor;

impl MtgTop8Extractor {
    pub fn new() -> Self {
        MtgTop8Extractor
    }
}

impl Default for MtgTop8Extractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for MtgTop8Extractor {
    fn describe(&self) -> SourceId {
        SourceId {
            game: Game::Magic,
            source: "mtgtop8",
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
        pipeline::iterate(store, Game::Magic, "mtgtop8")
    }
}

impl SiteAdapter for MtgTop8Extractor {
    fn game(&self) -> Game {
        Game::Magic
    }

    fn source(&self) -> &'static str {
        "mtgtop8"
    }

    fn listing_url(&self, opts: &ExtractOpts, page: u32) -> Option<Url> {
        let section = opts.section.as_deref().unwrap_or("MO");
        Url::parse(&format!("{BASE}/format?f={section}&cp={page}")).ok()
    }

    fn parse_listing(&self, listing_url: &Url, body: &[u8]) -> Result<Vec<Url>, ExtractError> {
        let text = String::from_utf8_lossy(body);
        let doc = Html::parse_document(&text);
        let selector = deck_link_selector();

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

        let player = first_text(&doc, &player_selector());
        let mut event_titles = doc.select(&event_title_selector());
        let event = event_titles.next().map(|el| collect_text(&el));
        let placement = event_titles.next().and_then(|el| placement_from_title(&collect_text(&el)));

        let (main, sideboard) = parse_decklist(&doc);
        if main.is_empty() && sideboard.is_empty() {
            return Err(ExtractError::ParseFailure(format!("no decklist found at {detail_url}")));
        }

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
            "mtgtop8".into(),
            detail_url.clone(),
            (response.final_url != *detail_url).then(|| response.final_url.clone()),
            response.fetched_at,
            CollectionType::Deck(DeckFields {
                name: event.clone().unwrap_or_default(),
                format: "unknown".into(),
                archetype: None,
                player,
                event,
                placement,
                event_date: None,
            }),
            partitions,
            Default::default(),
            Strictness::Lenient,
        )
        .map_err(ExtractError::InvalidCollection)
    }

    fn output_key(&self, collection: &Collection) -> String {
        format!("games/magic/mtgtop8/collections/{}.json", collection.id)
    }
}

fn deck_link_selector() -> Selector {
    Selector::parse(r#"a[href*="?e="]"#).expect("static selector")
}

fn player_selector() -> Selector {
    Selector::parse(".player_big a").expect("static selector")
}

fn event_title_selector() -> Selector {
    Selector::parse(".event_title").expect("static selector")
}

fn row_selector() -> Selector {
    Selector::parse(".deck_line, .sideboard_marker").expect("static selector")
}

fn count_selector() -> Selector {
    Selector::parse(".card_count").expect("static selector")
}

fn name_selector() -> Selector {
    Selector::parse(".card_name").expect("static selector")
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector).next().map(|el| collect_text(&el))
}

fn collect_text(el: &scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn deck_id_from_url(url: &Url) -> Option<String> {
    url.query_pairs().find(|(k, _)| k == "d").map(|(_, v)| v.into_owned())
}

/// A `#N | ...` title yields `placement = N`; anything else yields `None`
/// rather than failing the whole parse (spec §9: optional when absent).
fn placement_from_title(title: &str) -> Option<u32> {
    let rest = title.strip_prefix('#')?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn parse_decklist(doc: &Html) -> (Vec<CardDesc>, Vec<CardDesc>) {
    let row_sel = row_selector();
    let count_sel = count_selector();
    let name_sel = name_selector();

    let mut main = Vec::new();
    let mut sideboard = Vec::new();
    let mut in_sideboard = false;

    for row in doc.select(&row_sel) {
        if row.value().has_class("sideboard_marker", scraper::CaseSensitivity::CaseSensitive) {
            in_sideboard = true;
            continue;
        }

        let count = row
            .select(&count_sel)
            .next()
            .and_then(|el| collect_text(&el).parse::<u32>().ok());
        let name = row.select(&name_sel).next().map(|el| collect_text(&el));

        let (Some(count), Some(name)) = (count, name) else {
            continue;
        };
        let card = CardDesc {
            name,
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fixture_response(body: &str, url: &Url) -> Response {
        Response {
            status_code: 200,
            headers: vec![],
            body: body.as_bytes().to_vec(),
            final_url: url.clone(),
            fetched_at: Utc::now(),
            from_cache: false,
            redirects: vec![],
        }
    }

    const DECK_HTML: &str = r#"
        <html><body>
        <div class="player_big"><a href="/player?p=1">Kotte89</a></div>
        <div class="event_title">MTGO Challenge 32</div>
        <div class="event_title">#2 | 2024-01-01</div>
        <div class="deck_line"><span class="card_count">4</span><span class="card_name">Lightning Bolt</span></div>
        <div class="deck_line"><span class="card_count">4</span><span class="card_name">Counterspell</span></div>
        <div class="sideboard_marker"></div>
        <div class="deck_line"><span class="card_count">2</span><span class="card_name">Blood Moon</span></div>
        </body></html>
    "#;

    #[test]
    fn parses_player_event_and_placement() {
        let extractor = MtgTop8Extractor::new();
        let url = Url::parse("https://mtgtop8.com/event?e=1&d=99").unwrap();
        let response = fixture_response(DECK_HTML, &url);
        let collection = extractor.parse_detail(&url, &response).unwrap();

        assert_eq!(collection.id, "99");
        match &collection.kind {
            CollectionType::Deck(fields) => {
                assert_eq!(fields.player.as_deref(), Some("Kotte89"));
                assert_eq!(fields.event.as_deref(), Some("MTGO Challenge 32"));
                assert_eq!(fields.placement, Some(2));
            }
            other => panic!("expected Deck, got {other:?}"),
        }
        assert_eq!(collection.partitions[0].name, "Main");
        assert_eq!(collection.partitions[0].cards.len(), 2);
        assert_eq!(collection.partitions[1].name, "Sideboard");
        assert_eq!(collection.partitions[1].cards[0].count, 2);
    }

    #[test]
    fn missing_decklist_is_a_parse_failure() {
        let extractor = MtgTop8Extractor::new();
        let url = Url::parse("https://mtgtop8.com/event?e=1&d=1").unwrap();
        let response = fixture_response("<html><body>empty</body></html>", &url);
        assert!(extractor.parse_detail(&url, &response).is_err());
    }

    #[test]
    fn parse_listing_resolves_relative_deck_links() {
        let extractor = MtgTop8Extractor::new();
        let listing_url = Url::parse("https://mtgtop8.com/format?f=MO&cp=1").unwrap();
        let body = br#"<html><body><a href="/event?e=1&d=10">deck</a></body></html>"#;
        let urls = extractor.parse_listing(&listing_url, body).unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "https://mtgtop8.com/event?e=1&d=10");
    }
}
