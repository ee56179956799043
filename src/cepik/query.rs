//! Normalized query parameters and the cache keys derived from them.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::errors::FetchError;
use super::models::VehicleRecord;

/// Records requested per page. The API rejects larger pages.
pub const PAGE_SIZE: u32 = 500;

/// Bumped whenever the cache key layout changes.
const CACHE_KEY_VERSION: u32 = 1;

/// Inclusive registration date window, sent as compact `YYYYMMDD` dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, FetchError> {
        if from > to {
            return Err(FetchError::InvalidQuery(format!(
                "date range starts after it ends ({from} > {to})"
            )));
        }
        Ok(Self { from, to })
    }

    /// Accepts `YYYY-MM-DD` or already-compact `YYYYMMDD` input.
    pub fn parse(from: &str, to: &str) -> Result<Self, FetchError> {
        Self::new(parse_date(from)?, parse_date(to)?)
    }

    pub fn from_compact(&self) -> String {
        self.from.format("%Y%m%d").to_string()
    }

    pub fn to_compact(&self) -> String {
        self.to.format("%Y%m%d").to_string()
    }
}

fn parse_date(input: &str) -> Result<NaiveDate, FetchError> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .map_err(|_| FetchError::InvalidQuery(format!("unrecognized date: {input:?}")))
}

/// Fields the upstream API can filter on server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FilterField {
    #[serde(rename = "marka")]
    Brand,
    #[serde(rename = "model")]
    Model,
    #[serde(rename = "rodzaj-pojazdu")]
    VehicleType,
    #[serde(rename = "rodzaj-paliwa")]
    FuelType,
}

impl FilterField {
    pub const ALL: [FilterField; 4] = [
        FilterField::Brand,
        FilterField::Model,
        FilterField::VehicleType,
        FilterField::FuelType,
    ];

    pub fn api_name(self) -> &'static str {
        match self {
            FilterField::Brand => "marka",
            FilterField::Model => "model",
            FilterField::VehicleType => "rodzaj-pojazdu",
            FilterField::FuelType => "rodzaj-paliwa",
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Server-side field filters. Values are trimmed and uppercased on insert, so
/// `"bmw"` and `" BMW "` describe the same query. Ordering is by field, which
/// keeps serialization independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FilterSet(BTreeMap<FilterField, String>);

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a filter. Blank values clear it.
    pub fn set(&mut self, field: FilterField, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            self.0.remove(&field);
        } else {
            self.0.insert(field, value.to_uppercase());
        }
    }

    pub fn with(mut self, field: FilterField, value: &str) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: FilterField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `filter[<field>]=<VALUE>` query pairs.
    pub fn query_pairs(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.0
            .iter()
            .map(|(field, value)| (format!("filter[{}]", field.api_name()), value.clone()))
    }
}

/// Manufacture-year bounds, applied locally because the API cannot filter on
/// year. Both bounds are inclusive; a missing bound imposes no constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct YearRange {
    pub from: Option<i32>,
    pub to: Option<i32>,
}

impl YearRange {
    pub fn new(from: Option<i32>, to: Option<i32>) -> Self {
        Self { from, to }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn matches(&self, record: &VehicleRecord) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(year) = record.manufacture_year() else {
            return false;
        };
        self.from.is_none_or(|from| year >= from) && self.to.is_none_or(|to| year <= to)
    }
}

/// Which partitions a search covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionScope {
    Single(String),
    All,
}

impl fmt::Display for PartitionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionScope::Single(code) => f.write_str(code),
            PartitionScope::All => f.write_str("all"),
        }
    }
}

/// Everything about a query except the partitions it covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchCriteria {
    pub dates: DateRange,
    pub filters: FilterSet,
    pub years: YearRange,
}

#[derive(Serialize)]
struct CacheKeyParts<'a> {
    scope: String,
    from: String,
    to: String,
    filters: &'a FilterSet,
    years: &'a YearRange,
}

impl SearchCriteria {
    pub fn new(dates: DateRange) -> Self {
        Self {
            dates,
            filters: FilterSet::default(),
            years: YearRange::default(),
        }
    }

    /// Deterministic cache key for this query over `scope`. Serialized as
    /// JSON so that no two distinct parameter sets can collide.
    pub fn cache_key(&self, scope: &PartitionScope) -> String {
        let parts = CacheKeyParts {
            scope: scope.to_string(),
            from: self.dates.from_compact(),
            to: self.dates.to_compact(),
            filters: &self.filters,
            years: &self.years,
        };
        // Serializing plain strings, ints and ordered maps cannot fail.
        let json = serde_json::to_string(&parts).unwrap_or_default();
        format!("v{CACHE_KEY_VERSION}:{json}")
    }

    /// Query string pairs for one page of one partition.
    pub fn api_params(&self, partition_code: &str, page: u32) -> Vec<(String, String)> {
        let mut params = vec![
            ("wojewodztwo".to_owned(), partition_code.to_owned()),
            ("data-od".to_owned(), self.dates.from_compact()),
            ("data-do".to_owned(), self.dates.to_compact()),
            ("limit".to_owned(), PAGE_SIZE.to_string()),
            ("page".to_owned(), page.to_string()),
        ];
        params.extend(self.filters.query_pairs());
        params
    }
}
