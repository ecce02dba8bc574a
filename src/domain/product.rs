//! Product description decoded from a listing page's JSON-LD block.
//!
//! Field names follow the schema.org `Product` / `Offer` vocabulary as
//! marketplaces emit it. Decoding is tolerant: absent or `null` fields keep
//! their default value, `image` may be a single URL or a list, and `offers`
//! may be a single object or a list (the first offer is used).

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Stock state of an offer, normalized from the schema.org vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Availability {
    /// Item can be bought now.
    InStock,
    /// Item is temporarily not available.
    OutOfStock,
    /// Item is no longer sold.
    Discontinued,
    /// Missing or unrecognized availability value.
    #[default]
    Unknown,
}

impl Availability {
    /// Maps a source availability value onto the normalized enum.
    ///
    /// Accepts both bare names (`"InStock"`) and schema.org URLs
    /// (`"https://schema.org/InStock"`), case-insensitively, as well as the
    /// storage form produced by [`Availability::as_str`].
    #[must_use]
    pub fn from_source(value: &str) -> Self {
        let value = value.trim();
        let name = value.rsplit('/').next().unwrap_or(value);
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "instock" | "limitedavailability" | "onlineonly" | "instoreonly" => Self::InStock,
            "outofstock" | "soldout" => Self::OutOfStock,
            "discontinued" => Self::Discontinued,
            _ => Self::Unknown,
        }
    }

    /// Returns the storage representation (`"in_stock"`, `"out_of_stock"`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::OutOfStock => "out_of_stock",
            Self::Discontinued => "discontinued",
            Self::Unknown => "unknown",
        }
    }
}

impl From<String> for Availability {
    fn from(value: String) -> Self {
        Self::from_source(&value)
    }
}

impl From<Availability> for &'static str {
    fn from(value: Availability) -> Self {
        value.as_str()
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product record extracted from a listing page.
///
/// Produced fresh on every extraction. The raw JSON payload the record was
/// decoded from is kept alongside for audit and replay; it is not part of
/// the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// JSON-LD `@context`.
    #[serde(rename = "@context", default, deserialize_with = "nullable")]
    pub context: String,
    /// JSON-LD `@type` (normally `"Product"`).
    #[serde(rename = "@type", default, deserialize_with = "nullable")]
    pub kind: String,
    /// Listing title.
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    /// Image URLs.
    #[serde(default, deserialize_with = "one_or_many")]
    pub image: Vec<String>,
    /// Canonical listing URL as reported by the page.
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    /// Free-text description.
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    /// Marketplace category.
    #[serde(default, deserialize_with = "nullable")]
    pub category: String,
    /// Stock keeping unit.
    #[serde(default, deserialize_with = "nullable")]
    pub sku: String,
    /// Commercial offer (price, availability, shipping).
    #[serde(default, deserialize_with = "first_offer")]
    pub offers: Offer,
    #[serde(skip)]
    raw_payload: serde_json::Value,
}

impl ProductRecord {
    /// Decodes a record from a parsed JSON-LD document, keeping the document
    /// as the raw payload.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the document is not a JSON object
    /// or one of its fields has a type that cannot be mapped onto the
    /// product schema.
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, serde_json::Error> {
        if !payload.is_object() {
            return Err(serde::de::Error::custom(
                "structured data is not a JSON object",
            ));
        }
        let mut record: Self = serde_json::from_value(payload.clone())?;
        record.raw_payload = payload;
        Ok(record)
    }

    /// Returns the raw JSON-LD payload, or `Null` for records that were not
    /// decoded from a page.
    #[must_use]
    pub const fn raw_payload(&self) -> &serde_json::Value {
        &self.raw_payload
    }

    /// Returns the payload to persist with a snapshot: the raw document when
    /// available, otherwise the record's own serialized form.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the record cannot be serialized.
    pub fn payload_for_storage(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.raw_payload.is_null() {
            serde_json::to_value(self)
        } else {
            Ok(self.raw_payload.clone())
        }
    }
}

/// Offer nested in a [`ProductRecord`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    /// JSON-LD `@type` (normally `"Offer"`).
    #[serde(rename = "@type", default, deserialize_with = "nullable")]
    pub kind: String,
    /// Normalized stock state.
    #[serde(default, deserialize_with = "nullable")]
    pub availability: Availability,
    /// Region the offer is valid in.
    #[serde(default, deserialize_with = "nullable")]
    pub area_served: Area,
    /// ISO 4217 currency code of `price`.
    #[serde(default, deserialize_with = "nullable")]
    pub price_currency: String,
    /// Decimal price. Accepts JSON numbers and numeric strings.
    #[serde(default, deserialize_with = "nullable")]
    pub price: Decimal,
    /// Shipping metadata.
    #[serde(rename = "shippingDetails", default, deserialize_with = "nullable")]
    pub shipping: Shipping,
    /// Item condition (e.g. `"https://schema.org/UsedCondition"`).
    #[serde(default, deserialize_with = "nullable")]
    pub item_condition: String,
}

/// Area served by an offer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    /// JSON-LD `@type`.
    #[serde(rename = "@type", default, deserialize_with = "nullable")]
    pub kind: String,
    /// Area name.
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
}

/// Shipping details of an offer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipping {
    /// JSON-LD `@type`.
    #[serde(rename = "@type", default, deserialize_with = "nullable")]
    pub kind: String,
    /// Carrier rate.
    #[serde(default, deserialize_with = "nullable")]
    pub shipping_rate: MonetaryAmount,
    /// Destination region.
    #[serde(default, deserialize_with = "nullable")]
    pub shipping_destination: Region,
}

/// Monetary amount (only the currency is carried by marketplace pages).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryAmount {
    /// JSON-LD `@type`.
    #[serde(rename = "@type", default, deserialize_with = "nullable")]
    pub kind: String,
    /// ISO 4217 currency code.
    #[serde(default, deserialize_with = "nullable")]
    pub currency: String,
}

/// Shipping destination region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    /// JSON-LD `@type`.
    #[serde(rename = "@type", default, deserialize_with = "nullable")]
    pub kind: String,
    /// ISO 3166 country code.
    #[serde(default, deserialize_with = "nullable")]
    pub address_country: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// `null` decodes to the field's default.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany<String>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

fn first_offer<'de, D>(deserializer: D) -> Result<Offer, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany<Offer>>::deserialize(deserializer)? {
        None => Offer::default(),
        Some(OneOrMany::One(offer)) => offer,
        Some(OneOrMany::Many(offers)) => offers.into_iter().next().unwrap_or_default(),
    })
}
