use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

pub const TITLE_MAX_LEN: usize = 200;
pub const DESCRIPTION_MIN_LEN: usize = 10;
pub const DESCRIPTION_MAX_LEN: usize = 1000;

/// Largest price a `decimal(10,2)` column holds.
pub const PRICE_MAX: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Default and maximum page sizes shared by listing and search.
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Uniqueness key for a title: surrounding whitespace dropped, inner runs
/// collapsed, lowercased.
pub fn normalize_title(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameTitle(String);

impl GameTitle {
    pub fn create(value: &str) -> Result<Self, ValidationError> {
        let title = value.trim();
        if title.is_empty() {
            return Err(ValidationError::TitleRequired);
        }
        if title.chars().count() > TITLE_MAX_LEN {
            return Err(ValidationError::TitleTooLong { max: TITLE_MAX_LEN });
        }
        Ok(Self(title.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn key(&self) -> String {
        normalize_title(&self.0)
    }
}

impl fmt::Display for GameTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description(String);

impl Description {
    pub fn create(value: &str) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::DescriptionRequired);
        }
        let len = trimmed.chars().count();
        if !(DESCRIPTION_MIN_LEN..=DESCRIPTION_MAX_LEN).contains(&len) {
            return Err(ValidationError::DescriptionLength {
                min: DESCRIPTION_MIN_LEN,
                max: DESCRIPTION_MAX_LEN,
                len,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-negative amount with exactly two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(Decimal);

impl Price {
    pub fn parse(value: Decimal) -> Result<Self, ValidationError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ValidationError::PriceNegative);
        }
        if value.round_dp(2) != value {
            return Err(ValidationError::PricePrecision);
        }
        if value > PRICE_MAX {
            return Err(ValidationError::PriceTooLarge {
                max: PRICE_MAX.to_string(),
            });
        }
        let mut scaled = value.abs();
        scaled.rescale(2);
        Ok(Self(scaled))
    }

    pub(crate) fn from_cents(cents: i64) -> Result<Self, ValidationError> {
        Self::parse(Decimal::new(cents, 2))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Fixed-point representation used by the relational store.
    pub fn cents(&self) -> i64 {
        // bounded by PRICE_MAX, always fits
        (self.0 * Decimal::ONE_HUNDRED).to_i64().unwrap_or_default()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Price {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|_| ValidationError::PriceFormat(s.to_string()))?;
        Self::parse(value)
    }
}

/// A catalog entry. Only constructible from validated parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    id: Uuid,
    title: GameTitle,
    description: Description,
    price: Price,
}

impl Game {
    /// New game with a freshly assigned identifier.
    pub fn new(title: GameTitle, description: Description, price: Price) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description,
            price,
        }
    }

    /// Validates raw input and builds a new game.
    pub fn from_input(title: &str, description: &str, price: Decimal) -> Result<Self, ValidationError> {
        Ok(Self::new(
            GameTitle::create(title)?,
            Description::create(description)?,
            Price::parse(price)?,
        ))
    }

    /// Rebuilds a game read back from the store or the search index.
    pub(crate) fn restore(id: Uuid, title: GameTitle, description: Description, price: Price) -> Self {
        Self {
            id,
            title,
            description,
            price,
        }
    }

    /// Replaces every mutable attribute; the id never changes.
    pub fn update(&mut self, title: GameTitle, description: Description, price: Price) {
        self.title = title;
        self.description = description;
        self.price = price;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> &GameTitle {
        &self.title
    }

    pub fn description(&self) -> &Description {
        &self.description
    }

    pub fn price(&self) -> Price {
        self.price
    }
}

/// Normalized 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: u32,
    pub size: u32,
}

impl Paging {
    /// `page < 1` becomes 1, `size` outside `(0, max]` becomes the default.
    pub fn normalize(page: i64, size: i64, max: u32) -> Self {
        let page = if page < 1 { 1 } else { page.min(u32::MAX as i64) as u32 };
        let size = if size <= 0 || size > max as i64 {
            DEFAULT_PAGE_SIZE
        } else {
            size as u32
        };
        Self { page, size }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.size as i64
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Flattened projection of a game as stored in the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDocument {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
}

impl From<&Game> for GameDocument {
    fn from(game: &Game) -> Self {
        Self {
            id: game.id(),
            title: game.title().as_str().to_string(),
            description: game.description().as_str().to_string(),
            price: game.price().value().to_f64().unwrap_or_default(),
        }
    }
}

impl TryFrom<GameDocument> for Game {
    type Error = ValidationError;

    fn try_from(doc: GameDocument) -> Result<Self, Self::Error> {
        // the index keeps prices as doubles; go through the shortest decimal repr
        let price = Decimal::from_str(&doc.price.to_string())
            .map(|d| d.round_dp(2))
            .map_err(|_| ValidationError::PriceFormat(doc.price.to_string()))?;
        Ok(Game::restore(
            doc.id,
            GameTitle::create(&doc.title)?,
            Description::create(&doc.description)?,
            Price::parse(price)?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub items: Vec<Game>,
    pub total: u64,
}

/// One histogram interval; `to == None` is the open-ended top bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceBucket {
    pub from: Decimal,
    pub to: Option<Decimal>,
    pub doc_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameMetrics {
    pub count: u64,
    pub avg_price: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub buckets: Vec<PriceBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventKind {
    Created,
    Updated,
    Deleted,
}

impl GameEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameEventKind::Created => "created",
            GameEventKind::Updated => "updated",
            GameEventKind::Deleted => "deleted",
        }
    }
}

impl FromStr for GameEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(GameEventKind::Created),
            "updated" => Ok(GameEventKind::Updated),
            "deleted" => Ok(GameEventKind::Deleted),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

/// Audit record appended alongside every catalog write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: Uuid,
    pub game_id: Uuid,
    pub kind: GameEventKind,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn title_is_trimmed_and_bounded() {
        assert_eq!(GameTitle::create("  Zelda ").unwrap().as_str(), "Zelda");
        assert_eq!(GameTitle::create("   "), Err(ValidationError::TitleRequired));
        assert_eq!(GameTitle::create(""), Err(ValidationError::TitleRequired));
        assert!(GameTitle::create(&"a".repeat(200)).is_ok());
        assert_eq!(
            GameTitle::create(&"a".repeat(201)),
            Err(ValidationError::TitleTooLong { max: 200 })
        );
    }

    #[test]
    fn title_key_ignores_case_and_spacing() {
        let a = GameTitle::create("Elden  Ring").unwrap();
        let b = GameTitle::create("  elden ring ").unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(normalize_title(" THE   Witcher 3 "), "the witcher 3");
    }

    #[test]
    fn description_length_limits() {
        assert!(Description::create(&"a".repeat(9)).is_err());
        assert!(Description::create(&"a".repeat(10)).is_ok());
        assert!(Description::create(&"a".repeat(1000)).is_ok());
        assert!(Description::create(&"a".repeat(1001)).is_err());
        assert_eq!(Description::create(" \t "), Err(ValidationError::DescriptionRequired));
    }

    #[test]
    fn description_trims_before_checking_length() {
        let d = Description::create("   abcdefghij   ").unwrap();
        assert_eq!(d.as_str(), "abcdefghij");
        assert!(Description::create("   abcdefghi   ").is_err());
    }

    #[test]
    fn price_rejects_negative_and_extra_precision() {
        assert_eq!(Price::parse(dec("-0.01")), Err(ValidationError::PriceNegative));
        assert_eq!(Price::parse(dec("-100.55")), Err(ValidationError::PriceNegative));
        assert_eq!(Price::parse(dec("10.005")), Err(ValidationError::PricePrecision));
        assert!(matches!(
            Price::parse(dec("100000000.00")),
            Err(ValidationError::PriceTooLarge { .. })
        ));
    }

    #[test]
    fn price_keeps_two_decimals() {
        let p = Price::parse(dec("10.00")).unwrap();
        assert_eq!(p.to_string(), "10.00");
        assert_eq!(Price::parse(dec("10")).unwrap().to_string(), "10.00");
        assert_eq!(Price::parse(dec("299.9")).unwrap().cents(), 29990);
        assert_eq!(Price::from_cents(1999).unwrap().to_string(), "19.99");
        assert_eq!(Price::parse(Decimal::ZERO).unwrap().cents(), 0);
        assert_eq!("99999999.99".parse::<Price>().unwrap().value(), PRICE_MAX);
    }

    #[test]
    fn from_input_validates_every_field() {
        let game = Game::from_input("Elden Ring", "Action RPG in the Lands Between", dec("299.90")).unwrap();
        assert_eq!(game.title().as_str(), "Elden Ring");
        assert_eq!(game.price().to_string(), "299.90");

        assert_eq!(
            Game::from_input("  ", "long enough text", dec("1")).unwrap_err(),
            ValidationError::TitleRequired
        );
        assert_eq!(
            Game::from_input("Doom", "long enough text", dec("-1")).unwrap_err(),
            ValidationError::PriceNegative
        );
    }

    #[test]
    fn update_keeps_identifier() {
        let mut game = Game::from_input("Doom", "Rip and tear demons", dec("19.99")).unwrap();
        let id = game.id();
        game.update(
            GameTitle::create("Doom Eternal").unwrap(),
            Description::create("Rip and tear, until it is done").unwrap(),
            Price::parse(dec("39.99")).unwrap(),
        );
        assert_eq!(game.id(), id);
        assert_eq!(game.title().as_str(), "Doom Eternal");
    }

    #[test]
    fn document_roundtrip_keeps_identifier() {
        let game = Game::from_input("Hades", "Roguelike dungeon crawler", dec("24.99")).unwrap();
        let doc = GameDocument::from(&game);
        assert_eq!(doc.price, 24.99);
        let back = Game::try_from(doc).unwrap();
        assert_eq!(back, game);
    }

    #[test]
    fn paging_normalizes_out_of_range_values() {
        assert_eq!(Paging::normalize(0, 0, MAX_PAGE_SIZE), Paging { page: 1, size: 10 });
        assert_eq!(Paging::normalize(-3, 101, MAX_PAGE_SIZE), Paging { page: 1, size: 10 });
        assert_eq!(Paging::normalize(3, 100, MAX_PAGE_SIZE), Paging { page: 3, size: 100 });
        assert_eq!(Paging::normalize(3, 25, MAX_PAGE_SIZE).offset(), 50);
    }
}
