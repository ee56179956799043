use crate::cache::{FileStore, ResultCache};
use crate::cepik::query::FilterField;
use crate::cepik::partitions::PARTITIONS;
use crate::cepik::{
    CepikApi, DateRange, FetchError, PartitionScope, SearchCriteria, YearRange,
};
use crate::cli::{CacheAction, Command, SearchArgs};
use crate::config::Config;
use crate::fetch::{
    Orchestrator, OrchestratorConfig, PartitionState, PartitionStatus, QueueProgress,
    SearchObserver, SearchOutcome, SearchRequest,
};
use crate::utils::fmt_duration;
use anyhow::Context;
use num_format::{Locale, ToFormattedString};
use std::sync::Arc;
use tracing::{info, warn};

/// Main application struct containing all necessary components
pub struct App {
    api: Arc<CepikApi>,
    cache: ResultCache,
    orchestrator: Orchestrator,
}

impl App {
    /// Create a new App instance with all necessary components initialized
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let api = CepikApi::new(
            &config.cepik_base_url,
            config.request_timeout,
            &config.rate_limiting,
        )
        .context("Failed to create CEPiK client")?;
        let api = Arc::new(api);

        let cache = Self::open_cache(&config).await;
        // Sweep stale entries once at startup (non-fatal).
        cache.purge_expired().await;

        let orchestrator = Orchestrator::new(
            api.clone(),
            cache.clone(),
            OrchestratorConfig::from(&config),
        );

        info!(
            max_concurrent = config.max_concurrent,
            max_retries = config.max_retries,
            request_timeout = fmt_duration(config.request_timeout),
            cache_enabled = cache.is_enabled(),
            "application initialized"
        );

        Ok(Self {
            api,
            cache,
            orchestrator,
        })
    }

    async fn open_cache(config: &Config) -> ResultCache {
        if !config.cache_enabled {
            info!("Result cache disabled");
            return ResultCache::disabled();
        }
        let Some(dir) = &config.cache_dir else {
            return ResultCache::in_memory();
        };
        match FileStore::open(dir).await {
            Ok(store) => {
                info!(dir = %dir.display(), "Using on-disk result cache");
                ResultCache::new(Arc::new(store))
            }
            Err(e) => {
                warn!(error = ?e, "Failed to open cache directory, falling back to memory (non-fatal)");
                ResultCache::in_memory()
            }
        }
    }

    pub async fn run(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Search(args) => self.search(&args).await,
            Command::Partitions => {
                for partition in &PARTITIONS {
                    println!("{}  {}", partition.code, partition.name);
                }
                Ok(())
            }
            Command::Dictionary { name: None } => {
                let names = self
                    .api
                    .list_dictionaries()
                    .await
                    .context("Failed to list dictionaries")?;
                for name in names {
                    println!("{name}");
                }
                Ok(())
            }
            Command::Dictionary { name: Some(name) } => {
                let values = self
                    .api
                    .get_dictionary(&name)
                    .await
                    .with_context(|| format!("Failed to fetch dictionary {name}"))?;
                for value in values {
                    println!("{value}");
                }
                Ok(())
            }
            Command::Cache {
                action: CacheAction::Purge { all },
            } => {
                let purged = if all {
                    self.cache.clear().await
                } else {
                    self.cache.purge_expired().await
                };
                println!("Removed {} cache entries", purged.to_formatted_string(&Locale::en));
                Ok(())
            }
        }
    }

    async fn search(&self, args: &SearchArgs) -> anyhow::Result<()> {
        let request = build_request(args).context("Invalid search arguments")?;
        let observer = SearchObserver::new().with_progress(Arc::new(|progress: &QueueProgress| {
            info!(
                percent = progress.percent_complete,
                completed = progress.completed,
                failed = progress.failed,
                active = progress.active,
                queued = progress.queued,
                total = progress.total,
                "Search progress"
            );
        }));

        let outcome = self
            .orchestrator
            .search(&request, &observer)
            .await
            .with_context(|| format!("Search over partition {} failed", request.scope))?;

        if args.json {
            for record in &outcome.records {
                println!("{}", serde_json::to_string(record)?);
            }
        } else {
            print_statuses(&outcome.statuses);
        }
        eprintln!("{}", summary_line(&outcome));
        Ok(())
    }
}

/// Translate CLI arguments into a validated search request.
pub fn build_request(args: &SearchArgs) -> Result<SearchRequest, FetchError> {
    let dates = DateRange::parse(&args.from, &args.to)?;
    let mut criteria = SearchCriteria::new(dates);
    for (field, value) in [
        (FilterField::Brand, &args.brand),
        (FilterField::Model, &args.model),
        (FilterField::VehicleType, &args.vehicle_type),
        (FilterField::FuelType, &args.fuel_type),
    ] {
        if let Some(value) = value {
            criteria.filters.set(field, value);
        }
    }
    criteria.years = YearRange::new(args.year_from, args.year_to);
    if let (Some(from), Some(to)) = (args.year_from, args.year_to) {
        if from > to {
            return Err(FetchError::InvalidQuery(format!(
                "year range {from}..{to} is empty"
            )));
        }
    }

    let scope = match args.partition.trim() {
        p if p.eq_ignore_ascii_case("all") => PartitionScope::All,
        code => PartitionScope::Single(crate::cepik::partitions::resolve(code)?.code.to_owned()),
    };

    Ok(SearchRequest { scope, criteria })
}

fn print_statuses(statuses: &[PartitionStatus]) {
    if statuses.is_empty() {
        return;
    }
    println!(
        "{:<4} {:<22} {:<9} {:>9} {:>6} {:>8}",
        "CODE", "PARTITION", "STATE", "RECORDS", "PAGES", "SECONDS"
    );
    for status in statuses {
        let state = match status.status {
            PartitionState::Pending => "pending",
            PartitionState::Fetching => "fetching",
            PartitionState::Done => "done",
            PartitionState::Error => "error",
        };
        println!(
            "{:<4} {:<22} {:<9} {:>9} {:>6} {:>8.1}",
            status.code,
            status.name,
            state,
            status.record_count.to_formatted_string(&Locale::en),
            status.page_count,
            status.elapsed_seconds,
        );
        if let Some(error) = &status.error {
            println!("     ↳ {error}");
        }
    }
}

fn summary_line(outcome: &SearchOutcome) -> String {
    if outcome.is_empty() {
        return format!(
            "No vehicles match these criteria ({})",
            fmt_duration(outcome.elapsed)
        );
    }
    let mut line = format!(
        "{} vehicles in {}",
        outcome.records.len().to_formatted_string(&Locale::en),
        fmt_duration(outcome.elapsed)
    );
    if outcome.from_cache {
        line.push_str(" (cached)");
    }
    let failed = outcome.failed_partitions();
    if failed > 0 {
        line.push_str(&format!(", {failed} partition(s) failed"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SearchArgs {
        SearchArgs {
            from: "2024-01-01".to_owned(),
            to: "2024-01-31".to_owned(),
            partition: "all".to_owned(),
            brand: None,
            model: None,
            vehicle_type: None,
            fuel_type: None,
            year_from: None,
            year_to: None,
            json: false,
        }
    }

    #[test]
    fn test_build_request_normalizes_filters() {
        let mut args = args();
        args.brand = Some(" toyota ".to_owned());
        args.model = Some("  ".to_owned());
        args.partition = "14".to_owned();

        let request = build_request(&args).unwrap();
        assert_eq!(request.scope, PartitionScope::Single("14".to_owned()));
        assert_eq!(request.criteria.filters.get(FilterField::Brand), Some("TOYOTA"));
        assert_eq!(request.criteria.filters.get(FilterField::Model), None);
    }

    #[test]
    fn test_build_request_rejects_bad_input() {
        let mut bad_partition = args();
        bad_partition.partition = "03".to_owned();
        assert!(matches!(
            build_request(&bad_partition),
            Err(FetchError::UnknownPartition(_))
        ));

        let mut inverted_years = args();
        inverted_years.year_from = Some(2020);
        inverted_years.year_to = Some(2010);
        assert!(matches!(
            build_request(&inverted_years),
            Err(FetchError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_summary_distinguishes_empty_result() {
        let outcome = SearchOutcome {
            records: Vec::new(),
            statuses: Vec::new(),
            summary: None,
            from_cache: false,
            elapsed: std::time::Duration::from_millis(1200),
        };
        assert!(summary_line(&outcome).starts_with("No vehicles"));
    }
}
