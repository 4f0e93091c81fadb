//! Canonical in-memory representation of Collections (spec §3, §4.C).
//!
//! Every Collection that ever reaches a [`crate::blobstore::BlobStore`] goes
//! through [`Collection::build`]; there is no other public constructor, so an
//! invalid Collection (per the invariants below) cannot exist on disk.

pub mod ids;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::error::ModelError;

/// The game a Collection belongs to. The wire value doubles as the
/// `{game}` path segment in the on-disk key convention (spec §4.D), which is
/// why it is spelled out ("magic", not "mtg") rather than derived from the
/// Rust identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Magic,
    Pokemon,
    #[serde(rename = "yugioh")]
    YuGiOh,
}

impl Game {
    pub fn as_str(self) -> &'static str {
        match self {
            Game::Magic => "magic",
            Game::Pokemon => "pokemon",
            Game::YuGiOh => "yugioh",
        }
    }
}

/// A reference to a card inside a deck-shaped Collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDesc {
    pub name: String,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub set_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub collector_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub foil: Option<bool>,
}

impl CardDesc {
    /// The aggregation key from spec §3 invariant 2.
    fn dedup_key(&self) -> (String, Option<String>, Option<String>, Option<bool>) {
        (
            self.name.clone(),
            self.set_code.clone(),
            self.collector_number.clone(),
            self.foil,
        )
    }
}

/// An ordered, named sub-list of card references (Main, Sideboard, Extra, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub cards: Vec<CardDesc>,
}

/// Per-game card metadata. Fields every extractor might plausibly populate
/// are named explicitly; anything narrower to one site/game lands in
/// `extra` as opaque JSON rather than growing this struct per source — spec
/// §1 treats cards as "opaque records" the core never interprets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardFields {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub set_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub collector_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mana_cost: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rarity: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// MTG-shaped deck metadata; Pokémon/Yu-Gi-Oh extractors populate the same
/// struct, leaving fields they have no source for at `None` (spec §3: "MTG;
/// analogous variants per game").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeckFields {
    pub name: String,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub archetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub player: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub placement: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CubeListFields {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceListFields {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub currency: Option<String>,
}

/// The tagged union from spec §3. `#[serde(tag = "kind", content = "inner")]`
/// produces exactly the `{"kind": "...", "inner": {...}}` wire shape spec §3
/// calls for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "inner")]
pub enum CollectionType {
    Card(CardFields),
    Deck(DeckFields),
    CubeList(CubeListFields),
    PriceList(PriceListFields),
}

impl CollectionType {
    fn requires_nonempty_partitions(&self) -> bool {
        matches!(self, CollectionType::Deck(_))
    }
}

/// The universal persisted record (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub game: Game,
    pub source: String,
    pub url: Url,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub redirect_url: Option<Url>,
    pub scraped_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: CollectionType,
    pub partitions: Vec<Partition>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: HashMap<String, String>,
}

/// Whether an out-of-range `count` should fail the whole Collection (spec
/// §4.C: "...unless strict mode is requested").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Lenient,
    Strict,
}

const MIN_COUNT: u32 = 1;
const MAX_COUNT: u32 = 100;

impl Collection {
    /// The only public constructor. Applies every normalisation rule in
    /// spec §4.C and enforces every invariant in spec §3 before returning.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        id: String,
        game: Game,
        source: String,
        url: Url,
        redirect_url: Option<Url>,
        scraped_at: DateTime<Utc>,
        kind: CollectionType,
        partitions: Vec<Partition>,
        metadata: HashMap<String, String>,
        strictness: Strictness,
    ) -> Result<Collection, ModelError> {
        if source.trim().is_empty() {
            return Err(ModelError::InvalidCollection("empty source".into()));
        }

        let mut normalized = Vec::with_capacity(partitions.len());
        let mut seen_names = std::collections::HashSet::new();
        for partition in partitions {
            if !seen_names.insert(partition.name.clone()) {
                return Err(ModelError::InvalidCollection(format!(
                    "duplicate partition name: {}",
                    partition.name
                )));
            }
            let cards = normalize_cards(partition.cards, strictness)?;
            if !cards.is_empty() {
                normalized.push(Partition {
                    name: partition.name,
                    cards,
                });
            }
        }

        if kind.requires_nonempty_partitions() && normalized.is_empty() {
            return Err(ModelError::InvalidCollection(
                "deck collection has no non-empty partitions after normalisation".into(),
            ));
        }

        Ok(Collection {
            id,
            game,
            source,
            url,
            redirect_url,
            scraped_at,
            kind,
            partitions: normalized,
            metadata,
        })
    }
}

fn normalize_cards(
    cards: Vec<CardDesc>,
    strictness: Strictness,
) -> Result<Vec<CardDesc>, ModelError> {
    let mut by_key: HashMap<_, CardDesc> = HashMap::new();
    let mut order: Vec<_> = Vec::new();

    for mut card in cards {
        card.name = sanitize_name(&card.name);

        if card.count == 0 || card.count > MAX_COUNT {
            if strictness == Strictness::Strict {
                return Err(ModelError::InvalidCollection(format!(
                    "count {} out of range [1,{}] for {:?}",
                    card.count, MAX_COUNT, card.name
                )));
            }
            tracing::warn!(card = %card.name, count = card.count, "dropping card with out-of-range count");
            continue;
        }
        debug_assert!(card.count >= MIN_COUNT);

        let key = card.dedup_key();
        match by_key.get_mut(&key) {
            Some(existing) => existing.count += card.count,
            None => {
                order.push(key.clone());
                by_key.insert(key, card);
            }
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect())
}

/// Trim + Unicode NFC normalisation only; HTML entity decoding is expected
/// to have already happened in the site parser (spec §4.C).
fn sanitize_name(name: &str) -> String {
    name.trim().nfc().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deck(partitions: Vec<Partition>) -> Result<Collection, ModelError> {
        Collection::build(
            "d1".into(),
            Game::Magic,
            "mtgtop8".into(),
            Url::parse("https://mtgtop8.com/deck?d=1").unwrap(),
            None,
            Utc::now(),
            CollectionType::Deck(DeckFields {
                name: "Burn".into(),
                format: "modern".into(),
                ..Default::default()
            }),
            partitions,
            HashMap::new(),
            Strictness::Lenient,
        )
    }

    fn cd(name: &str, count: u32) -> CardDesc {
        CardDesc {
            name: name.into(),
            count,
            set_code: None,
            collector_number: None,
            foil: None,
        }
    }

    #[test]
    fn aggregates_duplicate_card_refs() {
        let c = deck(vec![Partition {
            name: "Main".into(),
            cards: vec![cd("Island", 3), cd("Island", 2)],
        }])
        .unwrap();
        assert_eq!(c.partitions[0].cards, vec![cd("Island", 5)]);
    }

    #[test]
    fn drops_out_of_range_counts_leniently() {
        let c = deck(vec![Partition {
            name: "Main".into(),
            cards: vec![cd("Bolt", 4), cd("Too Many", 101), cd("Zero", 0)],
        }])
        .unwrap();
        assert_eq!(c.partitions[0].cards, vec![cd("Bolt", 4)]);
    }

    #[test]
    fn strict_mode_rejects_out_of_range_counts() {
        let err = Collection::build(
            "d1".into(),
            Game::Magic,
            "mtgtop8".into(),
            Url::parse("https://mtgtop8.com/deck?d=1").unwrap(),
            None,
            Utc::now(),
            CollectionType::Deck(DeckFields {
                name: "Burn".into(),
                format: "modern".into(),
                ..Default::default()
            }),
            vec![Partition {
                name: "Main".into(),
                cards: vec![cd("Too Many", 101)],
            }],
            HashMap::new(),
            Strictness::Strict,
        );
        assert!(err.is_err());
    }

    #[test]
    fn empty_partitions_are_pruned() {
        let c = deck(vec![
            Partition {
                name: "Main".into(),
                cards: vec![cd("Bolt", 4)],
            },
            Partition {
                name: "Sideboard".into(),
                cards: vec![cd("Zero", 0)],
            },
        ])
        .unwrap();
        assert_eq!(c.partitions.len(), 1);
        assert_eq!(c.partitions[0].name, "Main");
    }

    #[test]
    fn all_partitions_empty_fails_for_deck() {
        let err = deck(vec![Partition {
            name: "Main".into(),
            cards: vec![cd("Zero", 0)],
        }]);
        assert!(err.is_err());
    }

    #[test]
    fn empty_source_is_rejected() {
        let err = Collection::build(
            "d1".into(),
            Game::Magic,
            "".into(),
            Url::parse("https://example.com").unwrap(),
            None,
            Utc::now(),
            CollectionType::Card(CardFields::default()),
            vec![],
            HashMap::new(),
            Strictness::Lenient,
        );
        assert!(err.is_err());
    }

    #[test]
    fn duplicate_partition_names_are_rejected() {
        let err = deck(vec![
            Partition {
                name: "Main".into(),
                cards: vec![cd("Bolt", 4)],
            },
            Partition {
                name: "Main".into(),
                cards: vec![cd("Shock", 4)],
            },
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn round_trip_identity() {
        let c = deck(vec![Partition {
            name: "Main".into(),
            cards: vec![cd("Bolt", 4)],
        }])
        .unwrap();
        let json = serde_json::to_string(&c).unwrap();
        let back: Collection = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn tagged_union_wire_shape() {
        let c = deck(vec![Partition {
            name: "Main".into(),
            cards: vec![cd("Bolt", 4)],
        }])
        .unwrap();
        let v: serde_json::Value = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"]["kind"], "Deck");
        assert_eq!(v["type"]["inner"]["format"], "modern");
    }

    #[test]
    fn names_are_trimmed_and_nfc_normalized() {
        // "e" + combining acute accent (decomposed) must normalize to "é" (composed).
        let decomposed = "Lo\u{0301}rien Revealed";
        let c = deck(vec![Partition {
            name: "Main".into(),
            cards: vec![cd("  Bolt  ", 1), cd(decomposed, 1)],
        }])
        .unwrap();
        assert_eq!(c.partitions[0].cards[0].name, "Bolt");
        assert_eq!(c.partitions[0].cards[1].name, "Lórien Revealed");
    }
}
