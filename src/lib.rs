//! Daily heating oil price collection.
//!
//! [`scraper::Scraper`] fetches prices from the registered
//! [`sources::PriceProvider`]s and stores each logical key at most once in a
//! [`storage::PriceStore`]; [`scheduler::Scheduler`] drives it once a day and
//! [`status`] exposes what happened.

pub mod config;
pub mod error;
pub mod metrics;
pub mod output;
pub mod scheduler;
pub mod scraper;
pub mod sources;
pub mod status;
pub mod storage;
pub mod types;
