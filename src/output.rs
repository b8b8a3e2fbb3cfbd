use crate::types::{PriceObservation, StoreSummary};
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

pub fn print_observations(observations: &[PriceObservation], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            print_table(observations);
            Ok(())
        }
        OutputFormat::Json => print_json(observations),
    }
}

pub fn print_table(observations: &[PriceObservation]) {
    println!(
        "\n{:<12} {:<20} {:<12} {:<10} {:<8} {:>12} {}",
        "Provider", "Product", "Date", "Scope", "Zip", "EUR/100l", "Fetched"
    );
    println!("{}", "-".repeat(96));
    for o in observations {
        println!(
            "{:<12} {:<20} {:<12} {:<10} {:<8} {:>12.2} {}",
            o.provider,
            o.product_type,
            o.date,
            o.scope,
            o.zip_code.as_deref().unwrap_or("-"),
            o.price_per_100l,
            o.fetched_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!();
}

pub fn print_summary(label: &str, summary: &StoreSummary) {
    println!(
        "{}: fetched {}, inserted {}, skipped {}, failed {}",
        label, summary.fetched, summary.inserted, summary.skipped, summary.failed
    );
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{}", json);
    Ok(())
}
