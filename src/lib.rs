//! Synthetic-monitoring probe sidecar
//!
//! Turns check definitions into prober modules, scrapes the prober's debug
//! output on a schedule, converts it into time series and log streams and
//! hands the result to a downstream publisher.

pub mod check;
pub mod config;
pub mod errors;
pub mod exposition;
pub mod extractor;
pub mod hysteresis;
pub mod logs;
pub mod manager;
pub mod metrics;
pub mod module;
pub mod publisher;
pub mod schedule;
pub mod scraper;
pub mod telemetry;

pub use check::{load_checks, Check, Settings};
pub use config::Config;
pub use errors::{Result, ScraperError};
pub use manager::ScraperManager;
pub use module::{build_module, ProbeModule};
pub use publisher::{run_publisher, HttpPublisher, PayloadSink};
pub use scraper::Scraper;
pub use telemetry::{LabelPair, LogStream, Payload, TimeSeries};
