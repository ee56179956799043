//! Wire types for the CEPiK `/pojazdy` and `/slowniki` resources.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use super::errors::FetchError;

/// Attribute holding the year of manufacture.
pub const ATTR_MANUFACTURE_YEAR: &str = "rok-produkcji";

static LEADING_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([+-]?\d+)").expect("valid regex"));

/// A single registered vehicle.
///
/// `attributes` is an open schema owned by the upstream API; only a handful
/// of keys are interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub id: String,
    #[serde(default)]
    pub attributes: IndexMap<String, Value>,
}

impl VehicleRecord {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|v| !v.is_null())
    }

    /// Year of manufacture, parsed leniently: JSON numbers are taken as-is and
    /// strings contribute their leading integer (`"2015"`, `" 2015 r."`).
    pub fn manufacture_year(&self) -> Option<i32> {
        match self.attribute(ATTR_MANUFACTURE_YEAR)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .and_then(|y| i32::try_from(y).ok()),
            Value::String(s) => LEADING_DIGITS
                .captures(s)
                .and_then(|c| c[1].parse().ok()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub count: Option<u64>,
}

/// One entry of the `errors` array the API embeds in failed responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorEntry {
    #[serde(rename = "error-result", default)]
    pub result: Option<String>,
    #[serde(rename = "error-reason", default)]
    pub reason: Option<String>,
    #[serde(rename = "error-code", default, deserialize_with = "string_or_number")]
    pub code: Option<String>,
}

impl ApiErrorEntry {
    /// `error-result`, falling back to `error-reason`. Blank strings count as absent.
    pub fn message(&self) -> Option<&str> {
        self.result
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.reason.as_deref().filter(|s| !s.is_empty()))
    }
}

impl From<&ApiErrorEntry> for FetchError {
    fn from(entry: &ApiErrorEntry) -> Self {
        FetchError::Domain {
            reason: entry.message().unwrap_or("Unknown error").to_owned(),
            code: entry.code.clone(),
        }
    }
}

/// A single page of `/pojazdy` results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehiclePage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<VehicleRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub links: PageLinks,
    #[serde(default)]
    pub meta: Option<PageMeta>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<ApiErrorEntry>,
}

impl VehiclePage {
    /// A non-empty `next` link means more pages remain.
    pub fn has_next(&self) -> bool {
        self.links.next.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Surface an embedded error payload as a domain failure.
    pub fn check_errors(&self) -> Result<(), FetchError> {
        match self.errors.first() {
            Some(entry) => Err(entry.into()),
            None => Ok(()),
        }
    }

    pub fn total_count(&self) -> Option<u64> {
        self.meta.as_ref().and_then(|m| m.count)
    }
}

/// `/slowniki` listing entry.
#[derive(Debug, Clone, Deserialize)]
pub struct DictionaryRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DictionaryList {
    #[serde(default)]
    pub data: Vec<DictionaryRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DictionaryEntry {
    #[serde(rename = "klucz-slownika", default)]
    pub key: Option<String>,
    #[serde(rename = "wartosc-slownika", default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DictionaryAttributes {
    #[serde(rename = "dostepne-rekordy-slownika", default)]
    pub entries: Vec<DictionaryEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DictionaryData {
    #[serde(default)]
    pub attributes: DictionaryAttributes,
}

/// `/slowniki/{name}` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dictionary {
    #[serde(default)]
    pub data: DictionaryData,
}

impl Dictionary {
    /// Usable filter keys. Purely numeric keys are internal codes, not values
    /// a user would filter by.
    pub fn filter_values(&self) -> Vec<String> {
        self.data
            .attributes
            .entries
            .iter()
            .filter_map(|e| e.key.as_deref())
            .filter(|k| !k.is_empty() && !k.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_owned)
            .collect()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
