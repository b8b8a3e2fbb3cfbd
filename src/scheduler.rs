use crate::scraper::Scraper;
use chrono::{DateTime, Local, NaiveDate, TimeDelta, TimeZone};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Default)]
struct SchedulerState {
    next_scrape_at: Option<DateTime<Local>>,
    last_scrape_at: Option<DateTime<Local>>,
    running: bool,
}

/// Runs a full scrape once a day at a fixed local hour.
///
/// On start every provider without a price for today is scraped right
/// away, so a day is not lost when the process was down at the scheduled
/// hour.
pub struct Scheduler {
    scraper: Arc<Scraper>,
    scrape_hour: u32,
    state: RwLock<SchedulerState>,
}

impl Scheduler {
    pub fn new(scraper: Arc<Scraper>, scrape_hour: u32) -> Self {
        Self {
            scraper,
            scrape_hour,
            state: RwLock::new(SchedulerState::default()),
        }
    }

    /// Run until `cancel` fires. A scrape already in progress is not
    /// interrupted by the scheduler itself; cancellation is observed
    /// between cycles and while waiting.
    pub async fn run(&self, cancel: CancellationToken) {
        self.state.write().running = true;
        info!(scrape_hour = self.scrape_hour, "starting scheduler");

        self.catch_up(&cancel).await;

        while !cancel.is_cancelled() {
            let now = Local::now();
            let next = next_scrape_time(&now, self.scrape_hour);
            self.state.write().next_scrape_at = Some(next);

            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_scrape = %next, wait_secs = wait.as_secs(), "next scrape scheduled");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            self.run_scheduled(&cancel).await;
        }

        self.state.write().running = false;
        info!("scheduler stopped");
    }

    async fn catch_up(&self, cancel: &CancellationToken) {
        for name in self.scraper.providers() {
            if cancel.is_cancelled() {
                return;
            }
            match self.scraper.has_scraped_today(&name).await {
                Ok(true) => {
                    info!(provider = %name, "already scraped today, skipping initial scrape")
                }
                Ok(false) => {
                    info!(provider = %name, "no scrape for today, running initial scrape");
                    if let Err(e) = self.scraper.scrape_provider(cancel, &name).await {
                        error!(provider = %name, error = %e, "initial scrape failed");
                    }
                }
                Err(e) => {
                    error!(provider = %name, error = %e, "failed to check if scraped today")
                }
            }
        }
    }

    async fn run_scheduled(&self, cancel: &CancellationToken) {
        info!("running scheduled scrape");
        self.state.write().last_scrape_at = Some(Local::now());

        let summary = self.scraper.scrape_all(cancel).await;
        info!(
            fetched = summary.fetched,
            inserted = summary.inserted,
            skipped = summary.skipped,
            failed = summary.failed,
            "scheduled scrape completed"
        );
    }

    pub fn next_scrape_at(&self) -> Option<DateTime<Local>> {
        self.state.read().next_scrape_at
    }

    /// Time of the last scheduled (not catch-up) scrape.
    pub fn last_scrape_at(&self) -> Option<DateTime<Local>> {
        self.state.read().last_scrape_at
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }
}

/// First instant strictly after `now` that falls on `hour:00` local time:
/// today if that is still ahead, otherwise tomorrow.
pub fn next_scrape_time<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();

    if let Some(at) = at_hour(&tz, today, hour) {
        if at > *now {
            return at;
        }
    }

    today
        .succ_opt()
        .and_then(|tomorrow| at_hour(&tz, tomorrow, hour))
        .unwrap_or_else(|| now.clone() + TimeDelta::hours(24))
}

/// `date` at `hour:00` in `tz`. Inside a DST gap the hour after is used.
fn at_hour<Tz: TimeZone>(tz: &Tz, date: NaiveDate, hour: u32) -> Option<DateTime<Tz>> {
    let naive = date.and_hms_opt(hour, 0, 0)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
}
