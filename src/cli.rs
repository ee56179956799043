use clap::{Parser, Subcommand};

/// Search the CEPiK vehicle registry across regional partitions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output for terminals
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch registrations for a date range
    Search(SearchArgs),
    /// List the partition codes and names
    Partitions,
    /// Print the values of a filter dictionary (e.g. `marka`); omit to list dictionaries
    Dictionary { name: Option<String> },
    /// Manage the local result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum CacheAction {
    /// Remove expired entries
    Purge {
        /// Remove every entry, not only expired ones
        #[arg(long)]
        all: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct SearchArgs {
    /// First registration date, `YYYY-MM-DD` or `YYYYMMDD`
    #[arg(long)]
    pub from: String,
    /// Last registration date (inclusive)
    #[arg(long)]
    pub to: String,
    /// Two-digit partition code, or `all`
    #[arg(long, default_value = "all")]
    pub partition: String,
    #[arg(long)]
    pub brand: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub vehicle_type: Option<String>,
    #[arg(long)]
    pub fuel_type: Option<String>,
    /// Earliest manufacture year (inclusive)
    #[arg(long)]
    pub year_from: Option<i32>,
    /// Latest manufacture year (inclusive)
    #[arg(long)]
    pub year_to: Option<i32>,
    /// Print matching records as JSON lines on stdout
    #[arg(long)]
    pub json: bool,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
