pub mod app;
pub mod cache;
pub mod cepik;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod fmt;
pub mod logging;
pub mod utils;
