//! Per-partition fetch status, shared between running tasks and observers.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cepik::partitions::Partition;
use crate::utils::secs_f1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionState {
    Pending,
    Fetching,
    Done,
    Error,
}

#[derive(custom_debug_derive::Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStatus {
    pub code: String,
    pub name: String,
    pub status: PartitionState,
    pub record_count: usize,
    pub page_count: u32,
    /// Wall time spent fetching, rounded to a tenth of a second.
    pub elapsed_seconds: f64,
    #[debug(skip_if = Option::is_none, with = crate::fmt::opt)]
    pub error: Option<String>,
    #[debug(skip)]
    #[serde(skip)]
    started_at: Option<Instant>,
}

impl PartitionStatus {
    pub fn pending(partition: &Partition) -> Self {
        Self {
            code: partition.code.to_owned(),
            name: partition.name.to_owned(),
            status: PartitionState::Pending,
            record_count: 0,
            page_count: 0,
            elapsed_seconds: 0.0,
            error: None,
            started_at: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

/// Thread-safe board of partition statuses, keyed by partition code.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<DashMap<String, PartitionStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the board to `pending` for each of `partitions`.
    pub fn init<'a>(&self, partitions: impl IntoIterator<Item = &'a Partition>) {
        self.inner.clear();
        for partition in partitions {
            self.inner
                .insert(partition.code.to_owned(), PartitionStatus::pending(partition));
        }
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn mark_fetching(&self, code: &str) {
        if let Some(mut status) = self.inner.get_mut(code) {
            status.status = PartitionState::Fetching;
            status.record_count = 0;
            status.page_count = 0;
            status.error = None;
            status.started_at = Some(Instant::now());
        }
    }

    /// Progress after `page` pages holding `records_so_far` records in total.
    pub fn record_page(&self, code: &str, page: u32, records_so_far: usize) {
        if let Some(mut status) = self.inner.get_mut(code) {
            status.page_count = page;
            status.record_count = records_so_far;
            status.elapsed_seconds = secs_f1(status.elapsed());
        }
    }

    pub fn mark_done(&self, code: &str, record_count: usize) {
        if let Some(mut status) = self.inner.get_mut(code) {
            status.status = PartitionState::Done;
            status.record_count = record_count;
            status.elapsed_seconds = secs_f1(status.elapsed());
        }
    }

    pub fn mark_error(&self, code: &str, message: impl Into<String>) {
        if let Some(mut status) = self.inner.get_mut(code) {
            status.status = PartitionState::Error;
            status.error = Some(message.into());
            status.elapsed_seconds = secs_f1(status.elapsed());
        }
    }

    pub fn get(&self, code: &str) -> Option<PartitionStatus> {
        self.inner.get(code).map(|entry| entry.value().clone())
    }

    /// All statuses ordered by partition code.
    pub fn snapshot(&self) -> Vec<PartitionStatus> {
        let mut statuses: Vec<_> = self
            .inner
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        statuses.sort_by(|a, b| a.code.cmp(&b.code));
        statuses
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
