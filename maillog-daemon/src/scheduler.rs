//! Daily summary scheduling.
//!
//! The loop is `Idle → Sleeping(until target) → Firing → Idle`. The target is
//! recomputed from the wall clock every cycle, and after a wake the clock is
//! checked again so an early wake just sleeps the remainder. The wall clock is
//! a [`Clock`] so tests can pin it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use maillog_core::{format, EventBuffer};

use crate::error::{ConfigError, DaemonError};
use crate::mailer::Mailer;

// ---------------------------------------------------------------------------
// TimeOfDay
// ---------------------------------------------------------------------------

/// A daily wall-clock time in UTC, `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }
}

impl Default for TimeOfDay {
    /// 23:59 UTC.
    fn default() -> Self {
        Self(NaiveTime::from_hms_opt(23, 59, 0).unwrap_or_default())
    }
}

impl FromStr for TimeOfDay {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidSchedule(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        let well_formed = !hour.is_empty() && hour.len() <= 2 && minute.len() == 2;
        if !well_formed || !digits(hour) || !digits(minute) {
            return Err(invalid());
        }
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

// ---------------------------------------------------------------------------
// Next target
// ---------------------------------------------------------------------------

/// When the next summary fires and how long until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTarget {
    pub target_time: DateTime<Utc>,
    pub remaining: Duration,
}

/// Today's `at` if it is strictly after `now`, otherwise tomorrow's.
pub fn compute_next_target(at: TimeOfDay, now: DateTime<Utc>) -> ScheduleTarget {
    let mut target_time = at_on(now.date_naive(), at);
    if target_time <= now {
        target_time = target_time + chrono::Duration::days(1);
    }
    let remaining = (target_time - now).to_std().unwrap_or(Duration::ZERO);
    ScheduleTarget {
        target_time,
        remaining,
    }
}

fn at_on(date: NaiveDate, at: TimeOfDay) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(at.0))
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Source of wall-clock time for the scheduler.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Result of one summary cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Nothing buffered; no mail sent.
    Skipped,
    /// Mail accepted by the transport; `count` events drained.
    Delivered { count: usize },
    /// Delivery failed; buffer left intact for the next cycle.
    Failed { reason: String },
}

pub struct SummaryScheduler {
    buffer: Arc<EventBuffer>,
    mailer: Arc<dyn Mailer>,
    schedule: TimeOfDay,
    hostname: String,
    clock: Clock,
}

impl SummaryScheduler {
    pub fn new(
        buffer: Arc<EventBuffer>,
        mailer: Arc<dyn Mailer>,
        schedule: TimeOfDay,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            buffer,
            mailer,
            schedule,
            hostname: hostname.into(),
            clock: system_clock(),
        }
    }

    /// Replace the wall clock used for targets and subjects.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Loop until shutdown: sleep to the next target, then run one cycle.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        tracing::info!(schedule = %self.schedule, "summary scheduler started");
        loop {
            let target = compute_next_target(self.schedule, (self.clock)());
            tracing::info!(
                target = %target.target_time.format("%Y-%m-%dT%H:%MZ"),
                remaining = %format_remaining(target.remaining),
                "sleeping until next summary",
            );

            if !sleep_until(&self.clock, target.target_time, &mut shutdown_rx).await {
                break;
            }

            tracing::info!(woke_at = %(self.clock)().format("%Y-%m-%dT%H:%M:%SZ"), "summary due");
            match self.run_cycle().await {
                SummaryOutcome::Skipped => tracing::info!("event buffer empty, summary skipped"),
                SummaryOutcome::Delivered { count } => {
                    tracing::info!(count, "summary delivered")
                }
                SummaryOutcome::Failed { reason } => {
                    tracing::error!(error = %reason, "summary delivery failed, events kept for next cycle")
                }
            }
        }
        tracing::info!("summary scheduler stopped");
        Ok(())
    }

    /// Snapshot, render, deliver, and drain what was delivered.
    ///
    /// An empty buffer skips delivery. Events inserted while the mail is in
    /// flight are kept for the next cycle.
    pub async fn run_cycle(&self) -> SummaryOutcome {
        let buffer = Arc::clone(&self.buffer);
        let events = match tokio::task::spawn_blocking(move || buffer.get_all()).await {
            Ok(events) => events,
            Err(err) => {
                return SummaryOutcome::Failed {
                    reason: format!("buffer read task failed: {err}"),
                }
            }
        };
        if events.is_empty() {
            return SummaryOutcome::Skipped;
        }

        let count = events.len();
        let subject = summary_subject(&self.hostname, (self.clock)().date_naive());
        let body = format::render(&events);

        let mailer = Arc::clone(&self.mailer);
        let delivery = tokio::task::spawn_blocking(move || mailer.send(&subject, &body)).await;
        match delivery {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return SummaryOutcome::Failed { reason: err.to_string() },
            Err(err) => {
                return SummaryOutcome::Failed {
                    reason: format!("mailer task failed: {err}"),
                }
            }
        }

        let buffer = Arc::clone(&self.buffer);
        match tokio::task::spawn_blocking(move || buffer.drain(count)).await {
            Ok(Ok(remaining)) => {
                tracing::debug!(drained = count, remaining, "drained delivered events");
            }
            // The mail went out; a resend next cycle is the accepted failure mode.
            Ok(Err(err)) => {
                tracing::error!(error = %err, "failed to drain delivered events");
            }
            Err(err) => {
                tracing::error!(error = %err, "drain task failed");
            }
        }
        SummaryOutcome::Delivered { count }
    }
}

pub fn summary_subject(hostname: &str, date: NaiveDate) -> String {
    format!("maillog summary for {hostname} on {date}")
}

/// Sleep until `target` on the wall clock. Returns `false` on shutdown.
async fn sleep_until(
    clock: &Clock,
    target: DateTime<Utc>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> bool {
    loop {
        let now = clock();
        if now >= target {
            return true;
        }
        let remaining = (target - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = shutdown_rx.recv() => return false,
            _ = tokio::time::sleep(remaining) => {}
        }
    }
}

fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs / 60) % 60, secs % 60)
}
