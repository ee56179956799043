//! Drains every page of one partition's `/pojazdy` results.

use tracing::{debug, instrument};

use crate::cepik::{FetchError, SearchCriteria, VehicleRecord, VehicleSource, YearRange};

/// Called after each non-empty page with `(page_number, records_so_far)`.
pub type PageCallback<'a> = &'a (dyn Fn(u32, usize) + Send + Sync);

/// Fetch pages 1, 2, ... until the API reports no `next` link or returns an
/// empty page, then apply the manufacture-year filter.
///
/// Either every page is fetched or an error is returned; partial results are
/// never handed back.
#[instrument(skip_all, fields(partition = partition_code))]
pub async fn fetch_all_pages(
    source: &dyn VehicleSource,
    partition_code: &str,
    criteria: &SearchCriteria,
    on_page: Option<PageCallback<'_>>,
) -> Result<Vec<VehicleRecord>, FetchError> {
    let mut records = Vec::new();
    let mut page = 1;

    loop {
        let response = source.fetch_page(partition_code, criteria, page).await?;
        response.check_errors()?;

        if page == 1 {
            if let Some(total) = response.total_count() {
                debug!(total, "Partition reports total count");
            }
        }

        let has_next = response.has_next();
        let received = response.data.len();
        if received == 0 {
            break;
        }
        records.extend(response.data);
        if let Some(callback) = on_page {
            callback(page, records.len());
        }
        if !has_next {
            break;
        }
        page += 1;
    }

    let fetched = records.len();
    let records = filter_by_year(records, &criteria.years);
    debug!(
        pages = page,
        fetched,
        kept = records.len(),
        "Partition drained"
    );
    Ok(records)
}

/// Keep records whose manufacture year lies within `years`. Idempotent.
pub fn filter_by_year(records: Vec<VehicleRecord>, years: &YearRange) -> Vec<VehicleRecord> {
    if years.is_unbounded() {
        return records;
    }
    records.into_iter().filter(|r| years.matches(r)).collect()
}
