//! The sixteen regional partitions (voivodeships) the registry is split into.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::errors::FetchError;
use super::models::VehicleRecord;

/// Attribute carrying a record's voivodeship.
pub const ATTR_VOIVODESHIP: &str = "wojewodztwo";
/// Attribute that preserves the original code once the name is substituted.
pub const ATTR_VOIVODESHIP_CODE: &str = "wojewodztwo-kod";

static PARTITION_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Partition {
    pub code: &'static str,
    pub name: &'static str,
}

pub static PARTITIONS: [Partition; 16] = [
    Partition { code: "02", name: "DOLNOŚLĄSKIE" },
    Partition { code: "04", name: "KUJAWSKO-POMORSKIE" },
    Partition { code: "06", name: "LUBELSKIE" },
    Partition { code: "08", name: "LUBUSKIE" },
    Partition { code: "10", name: "ŁÓDZKIE" },
    Partition { code: "12", name: "MAŁOPOLSKIE" },
    Partition { code: "14", name: "MAZOWIECKIE" },
    Partition { code: "16", name: "OPOLSKIE" },
    Partition { code: "18", name: "PODKARPACKIE" },
    Partition { code: "20", name: "PODLASKIE" },
    Partition { code: "22", name: "POMORSKIE" },
    Partition { code: "24", name: "ŚLĄSKIE" },
    Partition { code: "26", name: "ŚWIĘTOKRZYSKIE" },
    Partition { code: "28", name: "WARMIŃSKO-MAZURSKIE" },
    Partition { code: "30", name: "WIELKOPOLSKIE" },
    Partition { code: "32", name: "ZACHODNIOPOMORSKIE" },
];

pub fn find(code: &str) -> Option<&'static Partition> {
    PARTITIONS.iter().find(|p| p.code == code)
}

pub fn resolve(code: &str) -> Result<&'static Partition, FetchError> {
    find(code.trim()).ok_or_else(|| FetchError::UnknownPartition(code.to_owned()))
}

/// Look a partition up by its name, ignoring case.
pub fn find_by_name(name: &str) -> Option<&'static Partition> {
    let upper = name.trim().to_uppercase();
    PARTITIONS.iter().find(|p| p.name == upper)
}

/// Replace a two-digit voivodeship code with its name, keeping the code under
/// [`ATTR_VOIVODESHIP_CODE`]. Values that are not known codes are left alone.
pub fn annotate_record(record: &mut VehicleRecord) {
    let Some(Value::String(code)) = record.attributes.get(ATTR_VOIVODESHIP) else {
        return;
    };
    if !PARTITION_CODE.is_match(code) {
        return;
    }
    let Some(partition) = find(code) else {
        return;
    };
    let code = code.clone();
    record
        .attributes
        .insert(ATTR_VOIVODESHIP.to_owned(), Value::from(partition.name));
    record
        .attributes
        .insert(ATTR_VOIVODESHIP_CODE.to_owned(), Value::from(code));
}
