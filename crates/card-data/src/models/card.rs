use serde::{Deserialize, Deserializer, Serialize};

/// Rank assigned to cards without EDHREC popularity data so they sort last.
pub const UNRANKED_EDHREC: u32 = 999_999;

fn unranked() -> u32 {
    UNRANKED_EDHREC
}

fn rank_or_unranked<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?
        .filter(|rank| *rank > 0)
        .unwrap_or(UNRANKED_EDHREC))
}

/// One printing of a card.
///
/// A card name can map to several printings; the card cache stores them
/// as a list under the name key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cmc: f64,
    #[serde(default = "unranked", deserialize_with = "rank_or_unranked")]
    pub edhrec_rank: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mana_cost: Option<String>,
    #[serde(default)]
    pub type_line: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uris: Option<ImageUris>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_faces: Option<Vec<CardFace>>,
    #[serde(default)]
    pub prices: CardPrices,
    #[serde(default)]
    pub finishes: Vec<String>,
    #[serde(default)]
    pub set: String,
    #[serde(default)]
    pub set_name: String,
    #[serde(default)]
    pub collector_number: String,
    #[serde(default)]
    pub rarity: String,
}

impl Card {
    /// Parsed USD price of this printing, if it has one.
    pub fn usd(&self) -> Option<f64> {
        self.prices
            .usd
            .as_deref()
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|price| price.is_finite())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageUris {
    #[serde(default)]
    pub small: String,
    #[serde(default)]
    pub normal: String,
    #[serde(default)]
    pub large: String,
    #[serde(default)]
    pub png: String,
    #[serde(default)]
    pub art_crop: String,
    #[serde(default)]
    pub border_crop: String,
}

/// A face of a multi-faced card.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CardFace {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mana_cost: String,
    #[serde(default)]
    pub type_line: String,
    #[serde(default)]
    pub oracle_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uris: Option<FaceImageUris>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceImageUris {
    #[serde(default)]
    pub normal: String,
}

/// USD prices as reported by Scryfall (decimal strings, null when unknown).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CardPrices {
    pub usd: Option<String>,
    pub usd_foil: Option<String>,
    pub usd_etched: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_defaults_missing_fields() {
        let json = r#"{"id":"abc","name":"Sol Ring","prices":{"usd":"1.25","usd_foil":null,"usd_etched":null}}"#;
        let card: Card = serde_json::from_str(json).unwrap();
        assert_eq!(card.cmc, 0.0);
        assert_eq!(card.edhrec_rank, UNRANKED_EDHREC);
        assert!(card.finishes.is_empty());
        assert_eq!(card.usd(), Some(1.25));
    }

    #[test]
    fn test_null_edhrec_rank_is_unranked() {
        let card: Card =
            serde_json::from_str(r#"{"id":"x","name":"Island","edhrec_rank":null}"#).unwrap();
        assert_eq!(card.edhrec_rank, UNRANKED_EDHREC);
    }

    #[test]
    fn test_usd_ignores_unparseable_prices() {
        let mut card: Card =
            serde_json::from_str(r#"{"id":"x","name":"Island"}"#).unwrap();
        assert_eq!(card.usd(), None);

        card.prices.usd = Some("n/a".into());
        assert_eq!(card.usd(), None);
    }
}
