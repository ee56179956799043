//! CEPiK vehicle registry API: client, wire types, and query parameters.

pub mod api;
pub mod errors;
pub mod json;
pub mod middleware;
pub mod models;
pub mod partitions;
pub mod query;

pub use api::CepikApi;
pub use errors::FetchError;
pub use models::{VehiclePage, VehicleRecord};
pub use query::{DateRange, FilterField, FilterSet, PartitionScope, SearchCriteria, YearRange};

/// Source of `/pojazdy` pages. Implemented by [`CepikApi`]; tests substitute
/// scripted sources.
#[async_trait::async_trait]
pub trait VehicleSource: Send + Sync {
    /// Fetch one page (1-based) of one partition's results.
    async fn fetch_page(
        &self,
        partition_code: &str,
        criteria: &SearchCriteria,
        page: u32,
    ) -> Result<VehiclePage, FetchError>;
}
