//! Scheduled message status transitions.
//!
//! # Responsibility
//! - Expire published messages whose validity has ended.
//! - Publish verified messages whose publish date has been reached.
//! - Run both checks periodically on a background thread.
//!
//! # Invariants
//! - Each message is transitioned independently; one failure never stops
//!   the rest of a pass.
//! - A verified message that cannot be published is moved back to draft.

use crate::config::ScheduleSettings;
use crate::model::message::MessageStatus;
use crate::repo::message_repo::{MessageRepository, SqliteMessageRepository};
use crate::repo::series_repo::{SeriesRepository, SqliteSeriesRepository};
use crate::repo::tag_repo::{MessageTagRepository, SqliteTagRepository};
use crate::service::message_service::{MessageService, ServiceError, ServiceResult};
use log::{error, info, warn};
use rusqlite::Connection;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

/// Counters for one scheduled pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Messages selected by the check.
    pub examined: usize,
    /// Messages moved to the target status.
    pub transitioned: usize,
    pub failed: usize,
}

/// Periodic expiry and publication checks over a [`MessageService`].
pub struct ScheduledMessageService<R: MessageRepository, S: SeriesRepository> {
    service: MessageService<R, S>,
}

impl<R: MessageRepository, S: SeriesRepository> ScheduledMessageService<R, S> {
    pub fn new(service: MessageService<R, S>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &MessageService<R, S> {
        &self.service
    }

    /// Moves published messages whose date intervals or publish window
    /// ended before `now` to expired.
    pub fn check_for_expirable_messages(&self, now: i64) -> ServiceResult<ScheduleReport> {
        let ids = self.service.messages().find_expirable_messages(now)?;
        let mut report = ScheduleReport {
            examined: ids.len(),
            ..ScheduleReport::default()
        };

        for id in ids {
            match self.service.expire(id, now) {
                Ok(_) => {
                    report.transitioned += 1;
                    info!("event=message_expire module=schedule status=ok message_id={id}");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        "event=message_expire module=schedule status=error message_id={id} error={err}"
                    );
                }
            }
        }
        Ok(report)
    }

    /// Publishes verified messages whose publish date is at or before `now`.
    /// Messages that fail to publish are set to draft.
    pub fn check_for_publishable_messages(&self, now: i64) -> ServiceResult<ScheduleReport> {
        let ids = self.service.messages().find_publishable_messages(now)?;
        let mut report = ScheduleReport {
            examined: ids.len(),
            ..ScheduleReport::default()
        };

        for id in ids {
            match self.service.publish(id, now) {
                Ok(_) => {
                    report.transitioned += 1;
                    info!("event=message_publish module=schedule status=ok message_id={id}");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        "event=message_publish module=schedule status=error message_id={id} error={err}"
                    );
                    match self.service.update_status(id, MessageStatus::Draft, now) {
                        Ok(_) => info!(
                            "event=message_publish module=schedule status=skip message_id={id} fallback=draft"
                        ),
                        Err(err) => error!(
                            "event=message_publish module=schedule status=error message_id={id} fallback=draft error={err}"
                        ),
                    }
                }
            }
        }
        Ok(report)
    }
}

/// Scheduled service over SQLite repositories sharing one connection.
pub type SqliteScheduledService<'conn> =
    ScheduledMessageService<SqliteMessageRepository<'conn>, SqliteSeriesRepository<'conn>>;

pub fn sqlite_scheduled_service(conn: &Connection) -> ServiceResult<SqliteScheduledService<'_>> {
    let messages = SqliteMessageRepository::try_new(conn)?;
    let series = SqliteSeriesRepository::try_new(conn)?;
    Ok(ScheduledMessageService::new(MessageService::new(messages, series)))
}

/// Runs one expiry pass, one publication pass and expired-tag cleanup.
pub fn run_scheduled_checks(
    conn: &Connection,
    now: i64,
) -> ServiceResult<(ScheduleReport, ScheduleReport)> {
    let scheduled = sqlite_scheduled_service(conn)?;
    let expired = scheduled.check_for_expirable_messages(now)?;
    let published = scheduled.check_for_publishable_messages(now)?;

    let removed_tags = SqliteTagRepository::try_new(conn)?.delete_expired_tags(now)?;
    if removed_tags > 0 {
        info!("event=tag_cleanup module=schedule status=ok removed={removed_tags}");
    }
    Ok((expired, published))
}

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Background thread running [`run_scheduled_checks`] every interval.
pub struct SchedulerRunner {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerRunner {
    /// Starts the runner. The first pass runs immediately.
    pub fn spawn(conn: Connection, settings: ScheduleSettings) -> ServiceResult<Self> {
        SqliteMessageRepository::try_new(&conn)?;

        let (stop, receiver) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("niord-scheduler".to_string())
            .spawn(move || run_scheduler(conn, settings, receiver))
            .map_err(ServiceError::Spawn)?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stops the runner and waits for the current pass to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        // Closing the channel wakes the runner.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("event=scheduler_stop module=schedule status=error error=worker_panicked");
            }
        }
    }
}

impl Drop for SchedulerRunner {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run_scheduler(conn: Connection, settings: ScheduleSettings, receiver: Receiver<()>) {
    let interval = settings.interval();
    info!(
        "event=scheduler_start module=schedule status=ok interval_secs={}",
        settings.interval_secs
    );

    loop {
        let started_at = Instant::now();
        let now = now_ms();
        match run_scheduled_checks(&conn, now) {
            Ok((expired, published)) => {
                if expired.examined + published.examined > 0 {
                    info!(
                        "event=scheduler_pass module=schedule status=ok expired={} publish={} failed={} duration_ms={}",
                        expired.transitioned,
                        published.transitioned,
                        expired.failed + published.failed,
                        started_at.elapsed().as_millis()
                    );
                }
            }
            Err(err) => error!(
                "event=scheduler_pass module=schedule status=error duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            ),
        }

        let wait = interval.saturating_sub(started_at.elapsed());
        match receiver.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("event=scheduler_stop module=schedule status=ok");
}
