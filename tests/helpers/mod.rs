//! Shared fixtures: an in-process `VehicleSource` driven by a script.

#![allow(dead_code)]

use brona::cepik::models::{ApiErrorEntry, PageLinks, VehiclePage};
use brona::cepik::{FetchError, SearchCriteria, VehicleRecord, VehicleSource};
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A failure injected ahead of a partition's normal pages.
#[derive(Debug, Clone)]
pub enum Fault {
    Timeout,
    Status(u16),
    /// 2xx response carrying an `errors` payload with this code.
    Embedded(&'static str),
}

impl Fault {
    fn into_result(self, code: &str) -> Result<VehiclePage, FetchError> {
        let url = format!("https://api.cepik.gov.pl/pojazdy?wojewodztwo={code}");
        match self {
            Fault::Timeout => Err(FetchError::Timeout {
                url,
                after: Duration::from_secs(30),
            }),
            Fault::Status(status) => Err(FetchError::Status {
                status,
                url,
                retry_after: None,
                reason: None,
                code: None,
            }),
            Fault::Embedded(error_code) => Ok(VehiclePage {
                errors: vec![ApiErrorEntry {
                    result: Some("Przekroczono limit zapytań".to_owned()),
                    reason: None,
                    code: Some(error_code.to_owned()),
                }],
                ..Default::default()
            }),
        }
    }
}

/// Serves scripted pages per partition. Partitions without a script return an
/// empty first page.
#[derive(Default)]
pub struct ScriptedSource {
    pages: HashMap<String, Vec<VehiclePage>>,
    faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    latency: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, u32)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `pages` for `code`, linking each page to the next.
    pub fn with_pages(mut self, code: &str, pages: Vec<Vec<VehicleRecord>>) -> Self {
        let count = pages.len();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, data)| page(data, i + 1 < count))
            .collect();
        self.pages.insert(code.to_owned(), pages);
        self
    }

    pub fn with_fault(self, code: &str, fault: Fault) -> Self {
        self.faults
            .lock()
            .unwrap()
            .entry(code.to_owned())
            .or_default()
            .push_back(fault);
        self
    }

    /// Every call for `code` takes this long.
    pub fn with_latency(mut self, code: &str, latency: Duration) -> Self {
        self.latency.insert(code.to_owned(), latency);
        self
    }

    /// Apply `latency` to every partition that has no explicit latency.
    pub fn with_default_latency(mut self, latency: Duration) -> Self {
        for partition in &brona::cepik::partitions::PARTITIONS {
            self.latency
                .entry(partition.code.to_owned())
                .or_insert(latency);
        }
        self
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, code: &str) -> Vec<u32> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == code)
            .map(|(_, page)| *page)
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl VehicleSource for ScriptedSource {
    async fn fetch_page(
        &self,
        partition_code: &str,
        _criteria: &SearchCriteria,
        page: u32,
    ) -> Result<VehiclePage, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((partition_code.to_owned(), page));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency.get(partition_code) {
            tokio::time::sleep(*latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fault = self
            .faults
            .lock()
            .unwrap()
            .get_mut(partition_code)
            .and_then(VecDeque::pop_front);
        if let Some(fault) = fault {
            return fault.into_result(partition_code);
        }

        Ok(self
            .pages
            .get(partition_code)
            .and_then(|pages| pages.get(page as usize - 1))
            .cloned()
            .unwrap_or_default())
    }
}

pub fn record(id: &str, partition_code: &str, year: Value) -> VehicleRecord {
    let mut attributes = IndexMap::new();
    attributes.insert("marka".to_owned(), json!("SKODA"));
    attributes.insert("wojewodztwo".to_owned(), json!(partition_code));
    attributes.insert("rok-produkcji".to_owned(), year);
    VehicleRecord {
        id: id.to_owned(),
        attributes,
    }
}

/// `count` records for `partition_code` with ids `{prefix}-0..count`.
pub fn records(prefix: &str, partition_code: &str, count: usize) -> Vec<VehicleRecord> {
    (0..count)
        .map(|i| record(&format!("{prefix}-{i}"), partition_code, json!("2018")))
        .collect()
}

pub fn page(data: Vec<VehicleRecord>, has_next: bool) -> VehiclePage {
    VehiclePage {
        data,
        links: PageLinks {
            next: has_next.then(|| "https://api.cepik.gov.pl/pojazdy?page=next".to_owned()),
        },
        ..Default::default()
    }
}
