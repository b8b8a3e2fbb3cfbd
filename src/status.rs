//! HTTP status surface: `/status` (JSON snapshot) and `/health`.

use crate::scheduler::Scheduler;
use crate::scraper::Scraper;
use crate::types::{DatabaseStatus, ProviderStatus, StatusResponse};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct AppState {
    pub scraper: Arc<Scraper>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(scraper: Arc<Scraper>, scheduler: Option<Arc<Scheduler>>) -> Self {
        Self {
            scraper,
            scheduler,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `cancel` fires, then drain open connections.
pub async fn serve(addr: &str, state: Arc<AppState>, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "starting HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("serving HTTP")?;

    info!("HTTP server stopped");
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(build_status(&state).await)
}

pub async fn build_status(state: &AppState) -> StatusResponse {
    let (scheduler_running, next_scrape_at, last_scheduled_scrape_at) = match &state.scheduler {
        Some(s) => (
            s.is_running(),
            s.next_scrape_at().map(|t| t.with_timezone(&Utc)),
            s.last_scrape_at().map(|t| t.with_timezone(&Utc)),
        ),
        None => (false, None, None),
    };

    let providers = state
        .scraper
        .all_metrics()
        .into_iter()
        .map(|(name, m)| {
            let status = ProviderStatus {
                enabled: true,
                last_scrape_at: m.last_scrape_at,
                last_scrape_success: m.last_scrape_success,
                last_response_time_ms: m.last_response_time.as_millis() as u64,
                last_price: m.last_price,
                last_error: m.last_error,
                total_requests: m.total_requests,
                total_errors: m.total_errors,
                last_raw_response: m.last_raw_response,
            };
            (name, status)
        })
        .collect();

    StatusResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        scheduler_running,
        next_scrape_at,
        last_scheduled_scrape_at,
        providers,
        database: database_status(&state.scraper).await,
    }
}

async fn database_status(scraper: &Scraper) -> DatabaseStatus {
    let store = scraper.store();
    if let Err(e) = store.ping().await {
        warn!(error = %e, "database ping failed");
        return DatabaseStatus {
            connected: false,
            total_prices_stored: 0,
        };
    }

    let total_prices_stored = match store.total_count().await {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, "failed to count stored prices");
            0
        }
    };

    DatabaseStatus {
        connected: true,
        total_prices_stored,
    }
}
