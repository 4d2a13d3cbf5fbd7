use derive_more::Display;
use lazy_regex::regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use std::time::Duration;

pub mod record;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Availability {
    #[default]
    #[display("Немає в наявності")]
    NotAvailable = 0,
    #[display("В наявності")]
    Available = 1,
    #[display("Під замовлення")]
    OnOrder = 2,
}

impl From<u8> for Availability {
    fn from(a: u8) -> Self {
        match a {
            0 => Self::NotAvailable,
            1 => Self::Available,
            _ => Self::OnOrder,
        }
    }
}

impl Availability {
    /// Guesses availability from a free-text stock cell and the quantity parsed from it.
    pub fn from_stock_text(text: &str, quantity: Option<u32>) -> Self {
        match quantity {
            Some(0) => return Self::NotAvailable,
            Some(_) => return Self::Available,
            None => (),
        }
        let text = text.trim().to_lowercase();
        match text.as_str() {
            "+" | "++" | "+++" | "є" | "есть" | "так" | "да" | "yes" | "true" | "в наявності"
            | "в наличии" => Self::Available,
            t if t.contains("замовлення") || t.contains("заказ") => Self::OnOrder,
            _ => Self::NotAvailable,
        }
    }

    /// WooCommerce `stock_status` value.
    pub fn stock_status(&self) -> &'static str {
        match self {
            Self::Available => "instock",
            Self::NotAvailable => "outofstock",
            Self::OnOrder => "onbackorder",
        }
    }
}

pub fn parse_duration(duration: &str) -> Result<Duration, anyhow::Error> {
    let duration = duration
        .to_lowercase()
        .replace('.', "")
        .replace("сек", "s")
        .replace("мин", "m")
        .replace("хв", "m")
        .replace("час", "h")
        .replace("год", "h")
        .replace('с', "s")
        .replace('м', "m")
        .replace('ч', "h");
    duration_str::parse(duration).map_err(|dur| anyhow::anyhow!("Unable to parse duration {dur}"))
}

pub fn deserialize_duration_from_string<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?.replace(' ', "");
    parse_duration(&s).map_err(serde::de::Error::custom)
}

pub fn serialize_duration_into_string<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

/// Parses prices written as `1 234,50`, `1.234,50`, `1234.5 грн` and alike.
pub fn parse_decimal(input: &str) -> Option<Decimal> {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(_)) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    Decimal::from_str(&normalized).ok()
}

/// Extracts the first integer from a stock cell: `">10"`, `"5 шт"`, `"10+"`.
pub fn parse_quantity(input: &str) -> Option<u32> {
    regex!(r"\d+")
        .find(input)
        .and_then(|m| m.as_str().parse().ok())
}

/// Rounds a price up to the nearest whole number ending in 9.
pub fn round_price_to_9(value: Decimal) -> Decimal {
    let value = value.ceil();
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let ten = Decimal::TEN;
    if value < ten {
        return Decimal::from(9);
    }
    let base = value - (value % ten);
    base + Decimal::from(9)
}
