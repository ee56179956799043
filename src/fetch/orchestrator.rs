//! Coordinates partition fetches into one deduplicated result set.

use futures::FutureExt;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::paginator::{fetch_all_pages, filter_by_year};
use super::queue::{FetchTask, ProgressCallback, QueueSummary, RequestQueue};
use super::retry::DEFAULT_MAX_ATTEMPTS;
use super::status::{PartitionStatus, StatusBoard};
use crate::cache::ResultCache;
use crate::cepik::partitions::{self, PARTITIONS, Partition, annotate_record};
use crate::cepik::{FetchError, PartitionScope, SearchCriteria, VehicleRecord, VehicleSource};
use crate::config::Config;
use crate::utils::fmt_duration;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retries: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            max_retries: config.max_retries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub scope: PartitionScope,
    pub criteria: SearchCriteria,
}

/// Hooks through which a caller watches a search in flight.
#[derive(Clone, Default)]
pub struct SearchObserver {
    pub statuses: StatusBoard,
    pub on_progress: Option<ProgressCallback>,
}

impl SearchObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub records: Vec<VehicleRecord>,
    pub statuses: Vec<PartitionStatus>,
    /// Queue totals; absent for single-partition and cached searches.
    #[serde(skip)]
    pub summary: Option<QueueSummary>,
    pub from_cache: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl SearchOutcome {
    /// The search succeeded but nothing matched.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn failed_partitions(&self) -> usize {
        self.summary.as_ref().map_or(0, |s| s.failed)
    }
}

/// Accumulator for one multi-partition run. First occurrence of an id wins.
#[derive(Default)]
struct SearchRun {
    seen: HashSet<String>,
    records: Vec<VehicleRecord>,
}

impl SearchRun {
    fn merge(&mut self, batch: Vec<VehicleRecord>) -> usize {
        let before = self.records.len();
        for record in batch {
            if self.seen.insert(record.id.clone()) {
                self.records.push(record);
            }
        }
        self.records.len() - before
    }
}

pub struct Orchestrator {
    source: Arc<dyn VehicleSource>,
    cache: ResultCache,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn VehicleSource>,
        cache: ResultCache,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            source,
            cache,
            config,
        }
    }

    /// Run `request`. A single-partition failure is returned as an error;
    /// in an all-partition search failures are recorded per partition and
    /// the remaining partitions still contribute.
    #[instrument(skip_all, fields(scope = %request.scope))]
    pub async fn search(
        &self,
        request: &SearchRequest,
        observer: &SearchObserver,
    ) -> Result<SearchOutcome, FetchError> {
        let start = Instant::now();
        let mut outcome = match &request.scope {
            PartitionScope::Single(code) => {
                let partition = partitions::resolve(code)?;
                self.search_single(partition, &request.criteria, observer)
                    .await?
            }
            PartitionScope::All => self.search_all(&request.criteria, observer).await,
        };

        outcome.records.iter_mut().for_each(annotate_record);
        outcome.elapsed = start.elapsed();
        info!(
            records = outcome.records.len(),
            from_cache = outcome.from_cache,
            failed_partitions = outcome.failed_partitions(),
            duration = fmt_duration(outcome.elapsed),
            "Search finished"
        );
        Ok(outcome)
    }

    async fn search_single(
        &self,
        partition: &'static Partition,
        criteria: &SearchCriteria,
        observer: &SearchObserver,
    ) -> Result<SearchOutcome, FetchError> {
        let statuses = &observer.statuses;
        statuses.init([partition]);

        let key = criteria.cache_key(&PartitionScope::Single(partition.code.to_owned()));
        if let Some(records) = self.cache.get(&key).await {
            statuses.mark_done(partition.code, records.len());
            return Ok(SearchOutcome {
                records,
                statuses: statuses.snapshot(),
                summary: None,
                from_cache: true,
                elapsed: Duration::ZERO,
            });
        }

        statuses.mark_fetching(partition.code);
        let on_page = |page: u32, so_far: usize| statuses.record_page(partition.code, page, so_far);
        let records =
            match fetch_all_pages(self.source.as_ref(), partition.code, criteria, Some(&on_page))
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    statuses.mark_error(partition.code, e.to_string());
                    return Err(e);
                }
            };

        statuses.mark_done(partition.code, records.len());
        self.cache.put(&key, records.clone()).await;

        Ok(SearchOutcome {
            records,
            statuses: statuses.snapshot(),
            summary: None,
            from_cache: false,
            elapsed: Duration::ZERO,
        })
    }

    async fn search_all(&self, criteria: &SearchCriteria, observer: &SearchObserver) -> SearchOutcome {
        let statuses = &observer.statuses;
        let key = criteria.cache_key(&PartitionScope::All);
        if let Some(records) = self.cache.get(&key).await {
            statuses.clear();
            return SearchOutcome {
                records,
                statuses: Vec::new(),
                summary: None,
                from_cache: true,
                elapsed: Duration::ZERO,
            };
        }

        statuses.init(&PARTITIONS);
        let run = Arc::new(Mutex::new(SearchRun::default()));
        let queue = match &observer.on_progress {
            Some(callback) => {
                RequestQueue::with_progress_callback(self.config.max_concurrent, callback.clone())
            }
            None => RequestQueue::new(self.config.max_concurrent),
        };

        info!(
            partitions = PARTITIONS.len(),
            max_concurrent = self.config.max_concurrent,
            "Fetching all partitions"
        );

        let criteria_arc = Arc::new(criteria.clone());
        for partition in &PARTITIONS {
            queue.add(self.partition_task(partition, &criteria_arc, statuses, &run));
        }
        queue.start();
        let summary = queue.wait_for_all().await;

        let merged = match run.lock() {
            Ok(mut run) => std::mem::take(&mut run.records),
            Err(poisoned) => std::mem::take(&mut poisoned.into_inner().records),
        };
        let records = filter_by_year(merged, &criteria.years);

        if summary.failed > 0 {
            warn!(
                failed = summary.failed,
                partitions = ?summary.errors.keys().collect::<Vec<_>>(),
                "Some partitions failed"
            );
        }
        self.cache.put(&key, records.clone()).await;

        SearchOutcome {
            records,
            statuses: statuses.snapshot(),
            summary: Some(summary),
            from_cache: false,
            elapsed: Duration::ZERO,
        }
    }

    /// One partition's unit of work: per-partition cache, status tracking, and
    /// a merge into `run` once it settles.
    fn partition_task(
        &self,
        partition: &'static Partition,
        criteria: &Arc<SearchCriteria>,
        statuses: &StatusBoard,
        run: &Arc<Mutex<SearchRun>>,
    ) -> FetchTask<Vec<VehicleRecord>> {
        let code = partition.code;
        let work = {
            let source = Arc::clone(&self.source);
            let cache = self.cache.clone();
            let criteria = Arc::clone(criteria);
            let statuses = statuses.clone();
            move || {
                let source = Arc::clone(&source);
                let cache = cache.clone();
                let criteria = Arc::clone(&criteria);
                let statuses = statuses.clone();
                async move {
                    let key = criteria.cache_key(&PartitionScope::Single(code.to_owned()));
                    if let Some(records) = cache.get(&key).await {
                        debug!(partition = code, "Partition served from cache");
                        statuses.mark_done(code, records.len());
                        return Ok(records);
                    }

                    statuses.mark_fetching(code);
                    let on_page = |page: u32, so_far: usize| statuses.record_page(code, page, so_far);
                    let records =
                        fetch_all_pages(source.as_ref(), code, &criteria, Some(&on_page)).await?;
                    cache.put(&key, records.clone()).await;
                    statuses.mark_done(code, records.len());
                    Ok(records)
                }
                .boxed()
            }
        };

        let statuses = statuses.clone();
        let run = Arc::clone(run);
        FetchTask::new(code, work)
            .max_attempts(self.config.max_retries)
            .on_settled(move |outcome| match outcome {
                Ok(records) => {
                    let received = records.len();
                    let added = match run.lock() {
                        Ok(mut run) => run.merge(records),
                        Err(poisoned) => poisoned.into_inner().merge(records),
                    };
                    debug!(partition = code, received, added, "Merged partition results");
                }
                Err(e) => {
                    warn!(partition = code, error = %e, "Partition failed");
                    statuses.mark_error(code, e.to_string());
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn record(id: &str) -> VehicleRecord {
        VehicleRecord {
            id: id.to_owned(),
            attributes: IndexMap::new(),
        }
    }

    #[test]
    fn test_merge_keeps_first_occurrence() {
        let mut run = SearchRun::default();
        let mut first = record("x");
        first
            .attributes
            .insert("wojewodztwo".to_owned(), serde_json::json!("02"));

        assert_eq!(run.merge(vec![first.clone(), record("y")]), 2);
        assert_eq!(run.merge(vec![record("x"), record("z")]), 1);

        let ids: Vec<_> = run.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["x", "y", "z"]);
        assert_eq!(run.records[0], first);
    }

    #[test]
    fn test_outcome_empty_signal() {
        let outcome = SearchOutcome {
            records: Vec::new(),
            statuses: Vec::new(),
            summary: None,
            from_cache: false,
            elapsed: Duration::ZERO,
        };
        assert!(outcome.is_empty());
        assert_eq!(outcome.failed_partitions(), 0);
    }
}
