//! Cron-driven runner: import, then dispatch, at every fire time.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::error::{ConfigError, Result};
use crate::importer::{ImportReport, ShipmentImporter};
use crate::survey::{DispatchReport, SurveyDispatcher};

/// Reports of one import + dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub import: ImportReport,
    pub dispatch: DispatchReport,
}

/// Parse a cron expression (seconds field first, as the `cron` crate expects).
pub fn parse_schedule(expr: &str) -> std::result::Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: "NPS_SCHEDULE".into(),
        message: format!("invalid cron: {e}"),
    })
}

/// Next fire time strictly after `after`.
pub fn next_fire(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Run the importer, then the dispatcher. A failed import skips the
/// dispatch of this pass.
pub async fn run_once(
    importer: &ShipmentImporter,
    dispatcher: &SurveyDispatcher,
    today: NaiveDate,
) -> Result<RunReport> {
    let import = importer.import_all_regions(today).await?;
    let dispatch = dispatcher.dispatch(today).await?;
    Ok(RunReport { import, dispatch })
}

pub struct Scheduler {
    schedule: cron::Schedule,
    importer: Arc<ShipmentImporter>,
    dispatcher: Arc<SurveyDispatcher>,
}

impl Scheduler {
    pub fn new(
        schedule: cron::Schedule,
        importer: Arc<ShipmentImporter>,
        dispatcher: Arc<SurveyDispatcher>,
    ) -> Self {
        Self {
            schedule,
            importer,
            dispatcher,
        }
    }

    /// Loop until Ctrl-C. Failed passes are logged and the loop carries on.
    pub async fn run(&self) {
        loop {
            let now = Utc::now();
            let Some(next) = next_fire(&self.schedule, now) else {
                info!("Schedule has no further fire times, stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next = %next, "Waiting for next run");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    return;
                }
            }

            let today = Utc::now().date_naive();
            match run_once(&self.importer, &self.dispatcher, today).await {
                Ok(report) => info!(
                    imported = report.import.imported(),
                    sent = report.dispatch.sent,
                    skipped = report.dispatch.skipped,
                    "Scheduled run complete"
                ),
                Err(e) => error!(error = %e, "Scheduled run failed"),
            }
        }
    }
}
