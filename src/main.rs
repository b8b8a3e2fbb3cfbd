use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use oil_price_scraper::config::{Config, LogFormat};
use oil_price_scraper::output::{self, OutputFormat};
use oil_price_scraper::scheduler::Scheduler;
use oil_price_scraper::scraper::Scraper;
use oil_price_scraper::sources::{self, Pacing, ProviderSettings};
use oil_price_scraper::status::{self, AppState};
use oil_price_scraper::storage::{MemoryStore, PostgresStore, PriceStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "oilscraper",
    about = "Scrape daily heating oil prices and store them in Postgres"
)]
struct Args {
    /// Path to an optional config YAML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Postgres connection string
    #[arg(long, env = "POSTGRES_DSN", global = true, hide_env_values = true)]
    postgres_dsn: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Store raw API responses in the database
    #[arg(
        long,
        env = "STORE_RAW_RESPONSE",
        global = true,
        value_parser = BoolishValueParser::new()
    )]
    store_raw_response: Option<bool>,

    /// Address for the /status and /health endpoints
    #[arg(long, env = "HTTP_ADDR", global = true)]
    http_addr: Option<String>,

    /// Zip code for local price providers
    #[arg(long, env = "ZIP_CODE", global = true)]
    zip_code: Option<String>,

    /// Order amount in liters for local price providers
    #[arg(long, env = "ORDER_AMOUNT", global = true)]
    order_amount: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and status server until interrupted
    Run {
        /// Hour of day (0-23) to scrape
        #[arg(long, env = "SCRAPE_HOUR", value_parser = clap::value_parser!(u32).range(0..=23))]
        scrape_hour: Option<u32>,

        /// Comma-separated list of providers
        #[arg(long, env = "PROVIDERS")]
        providers: Option<String>,
    },

    /// Scrape all providers once
    Scrape {
        /// Comma-separated list of providers
        #[arg(long, env = "PROVIDERS")]
        providers: Option<String>,

        /// Keep results in memory and print them instead of writing to Postgres
        #[arg(long)]
        dry_run: bool,

        /// Output format for --dry-run
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Load historical prices from a provider that supports it
    Backfill {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// End date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Provider to backfill from
        #[arg(long)]
        provider: Option<String>,

        /// Minimum delay between upstream requests in seconds
        #[arg(long)]
        min_delay: Option<u64>,

        /// Maximum delay between upstream requests in seconds
        #[arg(long)]
        max_delay: Option<u64>,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Command::Version = args.command {
        print_version();
        return Ok(());
    }

    let cfg = build_config(&args)?;
    init_tracing(&cfg);

    match args.command {
        Command::Run { .. } => run(cfg).await,
        Command::Scrape {
            dry_run, output, ..
        } => scrape(cfg, dry_run, output).await,
        Command::Backfill { from, to, .. } => backfill(cfg, from, to).await,
        Command::Version => Ok(()),
    }
}

fn build_config(args: &Args) -> Result<Config> {
    let mut cfg = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(v) = &args.postgres_dsn {
        cfg.postgres_dsn = Some(v.clone());
    }
    if let Some(v) = &args.log_level {
        cfg.log_level = v.clone();
    }
    if let Some(v) = args.log_format {
        cfg.log_format = v;
    }
    if let Some(v) = args.store_raw_response {
        cfg.store_raw_response = v;
    }
    if let Some(v) = &args.http_addr {
        cfg.http_addr = v.clone();
    }
    if let Some(v) = &args.zip_code {
        cfg.zip_code = v.clone();
    }
    if let Some(v) = args.order_amount {
        cfg.order_amount = v;
    }

    match &args.command {
        Command::Run {
            scrape_hour,
            providers,
        } => {
            if let Some(h) = scrape_hour {
                cfg.scrape_hour = *h;
            }
            if let Some(list) = providers {
                cfg.set_providers(list);
            }
        }
        Command::Scrape { providers, .. } => {
            if let Some(list) = providers {
                cfg.set_providers(list);
            }
        }
        Command::Backfill {
            provider,
            min_delay,
            max_delay,
            ..
        } => {
            if let Some(p) = provider {
                cfg.backfill.provider = p.trim().to_string();
            }
            if let Some(d) = min_delay {
                cfg.backfill.min_delay_secs = *d;
            }
            if let Some(d) = max_delay {
                cfg.backfill.max_delay_secs = *d;
            }
        }
        Command::Version => {}
    }

    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing(cfg: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match cfg.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Console => builder.init(),
    }
}

fn print_version() {
    println!("Oil Price Scraper");
    println!("  Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("  Commit:     {}", option_env!("GIT_COMMIT").unwrap_or("none"));
    println!("  Build Date: {}", option_env!("BUILD_DATE").unwrap_or("unknown"));
}

fn provider_settings(cfg: &Config) -> Result<ProviderSettings> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("building HTTP client")?;
    Ok(ProviderSettings {
        client,
        zip_code: cfg.zip_code.clone(),
        order_amount: cfg.order_amount,
    })
}

/// Register every configured provider; unknown names are skipped.
fn register_providers(scraper: &Scraper, cfg: &Config, settings: &ProviderSettings) {
    for name in &cfg.providers {
        match sources::build_provider(name, settings) {
            Some(provider) => scraper.register_provider(provider),
            None => warn!(
                provider = %name,
                known = ?sources::KNOWN_PROVIDERS,
                "unknown provider, skipping"
            ),
        }
    }
    info!("Registered {} provider(s)", scraper.providers().len());
}

async fn run(cfg: Config) -> Result<()> {
    let dsn = cfg.require_dsn()?;
    if cfg.zip_code.trim().is_empty() {
        anyhow::bail!("--zip-code (or ZIP_CODE) is required");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_addr = %cfg.http_addr,
        scrape_hour = cfg.scrape_hour,
        providers = ?cfg.providers,
        "starting oil price scraper"
    );

    let store = Arc::new(
        PostgresStore::connect(dsn)
            .await
            .context("connecting to database")?,
    );

    let scraper = Arc::new(Scraper::new(store.clone(), cfg.store_raw_response));
    register_providers(&scraper, &cfg, &provider_settings(&cfg)?);

    let scheduler = Arc::new(Scheduler::new(scraper.clone(), cfg.scrape_hour));
    let cancel = CancellationToken::new();

    let state = Arc::new(AppState::new(scraper, Some(scheduler.clone())));
    let mut http = tokio::spawn({
        let addr = cfg.http_addr.clone();
        let cancel = cancel.clone();
        async move { status::serve(&addr, state, cancel).await }
    });

    let scheduler_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    let mut http_done = false;
    tokio::select! {
        signal = shutdown_signal() => {
            info!(signal, "received signal, shutting down");
        }
        res = &mut http => {
            http_done = true;
            match res {
                Ok(Ok(())) => warn!("HTTP server exited"),
                Ok(Err(e)) => error!(error = %e, "HTTP server error"),
                Err(e) => error!(error = %e, "HTTP server task failed"),
            }
        }
    }

    cancel.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        if let Err(e) = scheduler_task.await {
            error!(error = %e, "scheduler task failed");
        }
        if !http_done {
            match http.await {
                Ok(Err(e)) => error!(error = %e, "HTTP server shutdown error"),
                Err(e) => error!(error = %e, "HTTP server task failed"),
                Ok(Ok(())) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("shutdown timed out");
    }

    store.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn scrape(cfg: Config, dry_run: bool, format: OutputFormat) -> Result<()> {
    info!(providers = ?cfg.providers, dry_run, "running one-time scrape");

    let memory = Arc::new(MemoryStore::new());
    let postgres = if dry_run {
        None
    } else {
        Some(
            PostgresStore::connect(cfg.require_dsn()?)
                .await
                .context("connecting to database")?,
        )
    };
    let store: Arc<dyn PriceStore> = match &postgres {
        Some(pg) => Arc::new(pg.clone()),
        None => memory.clone(),
    };

    let scraper = Scraper::new(store, cfg.store_raw_response);
    register_providers(&scraper, &cfg, &provider_settings(&cfg)?);

    let cancel = cancel_on_signal();
    let summary = scraper.scrape_all(&cancel).await;
    output::print_summary("scrape", &summary);

    if dry_run {
        output::print_observations(&memory.observations(), format)?;
    }
    if let Some(pg) = postgres {
        pg.close().await;
    }

    info!("scrape completed");
    Ok(())
}

async fn backfill(cfg: Config, from: NaiveDate, to: Option<NaiveDate>) -> Result<()> {
    let name = cfg.backfill.provider.clone();
    let to = to.unwrap_or_else(|| Local::now().date_naive());
    if from > to {
        anyhow::bail!("--from ({}) is after --to ({})", from, to);
    }

    let settings = provider_settings(&cfg)?;
    let source = sources::build_provider(name.trim(), &settings)
        .with_context(|| format!("unknown provider: {}", name))?;

    let pacing = Pacing::from_secs(cfg.backfill.min_delay_secs, cfg.backfill.max_delay_secs);
    info!(
        provider = %name,
        %from,
        %to,
        min_delay = cfg.backfill.min_delay_secs,
        max_delay = cfg.backfill.max_delay_secs,
        "starting backfill"
    );

    let store = PostgresStore::connect(cfg.require_dsn()?)
        .await
        .context("connecting to database")?;
    let scraper = Scraper::new(Arc::new(store.clone()), cfg.store_raw_response);
    let provider_name = source.name().to_string();
    scraper.register_provider(source);

    let cancel = cancel_on_signal();
    let result = scraper
        .backfill(&cancel, &provider_name, from, to, pacing)
        .await;
    store.close().await;

    let summary = result.context("backfilling")?;
    output::print_summary("backfill", &summary);
    info!("backfill completed");
    Ok(())
}

/// Token cancelled on the first shutdown signal, for one-shot commands.
fn cancel_on_signal() -> CancellationToken {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let signal = shutdown_signal().await;
            warn!(signal, "received signal, cancelling");
            cancel.cancel();
        }
    });
    cancel
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
