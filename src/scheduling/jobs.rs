//! Periodic job runner: calendar reconciliation and follow-up dispatch.
//!
//! Runs as a background Tokio task, ticking at a configurable interval. Each
//! tick evaluates the cron expressions from the jobs config and fires any
//! job whose schedule has come due since its last run.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::JobsConfig;
use crate::gateway::MessagingGateway;
use crate::store::Store;

use super::followup;
use super::reconciler::CalendarReconciler;

/// Shared dependencies for the job runner.
pub struct JobsDeps {
    /// Store handle for follow-up state.
    pub store: Arc<Store>,

    /// Outbound gateway for follow-up delivery.
    pub gateway: Arc<dyn MessagingGateway>,

    /// Reconciler to run on its cron schedule.
    pub reconciler: Arc<CalendarReconciler>,

    /// Tick interval and cron expressions.
    pub config: JobsConfig,
}

/// Tracks last-run timestamps for the periodic jobs.
#[derive(Debug, Default)]
pub struct SchedulerState {
    last_run: HashMap<String, DateTime<Utc>>,
}

impl SchedulerState {
    /// Create a state with no recorded runs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a job ran at the given time.
    pub fn record_run(&mut self, name: &str, at: DateTime<Utc>) {
        self.last_run.insert(name.to_owned(), at);
    }

    /// Last run time for a job, if it has ever run.
    pub fn last_run_for(&self, name: &str) -> Option<&DateTime<Utc>> {
        self.last_run.get(name)
    }
}

/// Whether a job's cron schedule has a trigger between its last run and now.
pub fn job_due(name: &str, cron_expr: &str, state: &SchedulerState, now: DateTime<Utc>) -> bool {
    let schedule = match cron::Schedule::from_str(cron_expr) {
        Ok(s) => s,
        Err(e) => {
            warn!(job = name, cron = cron_expr, error = %e, "invalid cron expression, skipping job");
            return false;
        }
    };

    // For never-run jobs, use epoch so the first cron match triggers.
    let after = state
        .last_run_for(name)
        .copied()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    schedule.after(&after).take(1).any(|next| next <= now)
}

/// Run the periodic job loop until shutdown is signalled.
pub async fn run_jobs(deps: JobsDeps, mut shutdown_rx: watch::Receiver<bool>) {
    let tick_secs = deps.config.tick_secs;
    info!(tick_secs, "job runner started");

    let mut interval = tokio::time::interval(Duration::from_secs(tick_secs));
    let mut state = SchedulerState::new();

    // Skip the first immediate tick.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_tick(&deps, &mut state).await;
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("job runner shutting down");
                    break;
                }
            }
        }
    }

    info!("job runner stopped");
}

/// Execute a single tick: fire whichever jobs are due.
async fn run_tick(deps: &JobsDeps, state: &mut SchedulerState) {
    let now = Utc::now();

    if job_due("reconcile", &deps.config.reconcile_cron, state, now) {
        state.record_run("reconcile", now);
        match deps.reconciler.run_once().await {
            Ok(summary) => {
                info!(
                    events = summary.events_seen,
                    created = summary.created,
                    cancelled_locally = summary.cancelled_locally,
                    cancelled_externally = summary.cancelled_externally,
                    rescheduled = summary.rescheduled,
                    "reconciliation job completed"
                );
            }
            Err(e) => error!(error = %e, "reconciliation job failed"),
        }
    }

    if job_due("follow_ups", &deps.config.followup_cron, state, now) {
        state.record_run("follow_ups", now);
        match followup::dispatch_due(&deps.store, deps.gateway.as_ref(), now).await {
            Ok(sent) => {
                if sent > 0 {
                    info!(sent, "follow-up job completed");
                }
            }
            Err(e) => error!(error = %e, "follow-up job failed"),
        }
    }
}
