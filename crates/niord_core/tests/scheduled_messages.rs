use niord_core::db::{open_db, open_db_in_memory};
use niord_core::repo::series_repo::{SeriesRepository, SqliteSeriesRepository};
use niord_core::repo::tag_repo::{MessageTag, MessageTagRepository, SqliteTagRepository};
use niord_core::service::schedule_service::{run_scheduled_checks, sqlite_scheduled_service};
use niord_core::{
    DateInterval, MainType, Message, MessageDesc, MessageRepository, MessageSeries, MessageStatus,
    MessageType, NumberSequenceType, ScheduleReport, ScheduleSettings, SchedulerRunner,
    SqliteMessageRepository,
};
use rusqlite::Connection;
use std::time::{Duration, Instant};

const NOW: i64 = 10_000;

fn create_series(conn: &Connection, series_id: &str, mrn_format: &str, numbering: NumberSequenceType) {
    SqliteSeriesRepository::try_new(conn)
        .unwrap()
        .create_series(&MessageSeries::new(series_id, MainType::Nw, mrn_format, numbering))
        .unwrap();
}

fn warning(series_id: &str, status: MessageStatus) -> Message {
    let mut message = Message::new(series_id, MessageType::CoastalWarning);
    message.status = status;
    message.descs.push(MessageDesc::new("en", "Gunnery exercise"));
    message
}

#[test]
fn published_message_with_elapsed_intervals_is_expired() {
    let conn = open_db_in_memory().unwrap();
    create_series(&conn, "dma-nw", "urn:mrn:iho:nw:dk:${number}", NumberSequenceType::Yearly);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut elapsed = warning("dma-nw", MessageStatus::Published);
    elapsed.publish_date_from = Some(500);
    elapsed.date_intervals.push(DateInterval::new(Some(1_000), Some(2_000)));
    let mut running = warning("dma-nw", MessageStatus::Published);
    running.date_intervals.push(DateInterval::new(Some(1_000), Some(20_000)));
    let mut open_ended = warning("dma-nw", MessageStatus::Published);
    open_ended.date_intervals.push(DateInterval::new(Some(1_000), None));
    for message in [&elapsed, &running, &open_ended] {
        repo.create_message(message).unwrap();
    }

    let scheduled = sqlite_scheduled_service(&conn).unwrap();
    let report = scheduled.check_for_expirable_messages(NOW).unwrap();
    assert_eq!(
        report,
        ScheduleReport {
            examined: 1,
            transitioned: 1,
            failed: 0
        }
    );

    let expired = repo.get_message(elapsed.id).unwrap().unwrap();
    assert_eq!(expired.status, MessageStatus::Expired);
    assert_eq!(expired.publish_date_to, Some(NOW));
    let still_running = repo.get_message(running.id).unwrap().unwrap();
    assert_eq!(still_running.status, MessageStatus::Published);
    assert_eq!(
        repo.get_message(open_ended.id).unwrap().unwrap().status,
        MessageStatus::Published
    );

    let history = scheduled.service().history(elapsed.id).unwrap();
    assert_eq!(history.last().unwrap().status, MessageStatus::Expired);
}

#[test]
fn ended_publish_window_also_expires() {
    let conn = open_db_in_memory().unwrap();
    create_series(&conn, "dma-nw", "urn:mrn:iho:nw:dk:${number}", NumberSequenceType::Yearly);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut message = warning("dma-nw", MessageStatus::Published);
    message.publish_date_from = Some(1_000);
    message.publish_date_to = Some(NOW);
    repo.create_message(&message).unwrap();

    let scheduled = sqlite_scheduled_service(&conn).unwrap();
    assert_eq!(scheduled.check_for_expirable_messages(NOW).unwrap().transitioned, 1);

    let expired = repo.get_message(message.id).unwrap().unwrap();
    assert_eq!(expired.status, MessageStatus::Expired);
    assert_eq!(expired.publish_date_to, Some(NOW));
}

#[test]
fn verified_message_is_published_when_its_date_is_reached() {
    let conn = open_db_in_memory().unwrap();
    create_series(
        &conn,
        "dma-nw",
        "urn:mrn:iho:nw:dk:dma:${year}:${number}",
        NumberSequenceType::Yearly,
    );
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut due = warning("dma-nw", MessageStatus::Verified);
    due.publish_date_from = Some(5_000);
    let mut later = warning("dma-nw", MessageStatus::Verified);
    later.publish_date_from = Some(NOW + 1);
    let mut undated = warning("dma-nw", MessageStatus::Verified);
    undated.publish_date_from = None;
    for message in [&due, &later, &undated] {
        repo.create_message(message).unwrap();
    }

    let scheduled = sqlite_scheduled_service(&conn).unwrap();
    let report = scheduled.check_for_publishable_messages(NOW).unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.transitioned, 1);

    let published = repo.get_message(due.id).unwrap().unwrap();
    assert_eq!(published.status, MessageStatus::Published);
    assert_eq!(published.publish_date_from, Some(5_000));
    assert_eq!(published.number, Some(1));
    assert_eq!(published.mrn.as_deref(), Some("urn:mrn:iho:nw:dk:dma:1970:1"));

    assert_eq!(
        repo.get_message(later.id).unwrap().unwrap().status,
        MessageStatus::Verified
    );
    assert_eq!(
        repo.get_message(undated.id).unwrap().unwrap().status,
        MessageStatus::Verified
    );
}

#[test]
fn unnumbered_manual_message_moves_back_to_draft() {
    let conn = open_db_in_memory().unwrap();
    create_series(&conn, "test-nw", "urn:mrn:test:${number}", NumberSequenceType::Manual);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut numbered = warning("test-nw", MessageStatus::Verified);
    numbered.publish_date_from = Some(5_000);
    numbered.number = Some(4);
    let mut unnumbered = warning("test-nw", MessageStatus::Verified);
    unnumbered.publish_date_from = Some(5_000);
    repo.create_message(&numbered).unwrap();
    repo.create_message(&unnumbered).unwrap();

    let scheduled = sqlite_scheduled_service(&conn).unwrap();
    let report = scheduled.check_for_publishable_messages(NOW).unwrap();
    assert_eq!(
        report,
        ScheduleReport {
            examined: 2,
            transitioned: 1,
            failed: 1
        }
    );

    let published = repo.get_message(numbered.id).unwrap().unwrap();
    assert_eq!(published.status, MessageStatus::Published);
    assert_eq!(published.mrn.as_deref(), Some("urn:mrn:test:4"));

    let reverted = repo.get_message(unnumbered.id).unwrap().unwrap();
    assert_eq!(reverted.status, MessageStatus::Draft);
    assert!(reverted.mrn.is_none());
}

#[test]
fn mrn_collision_moves_back_to_draft_without_using_a_number() {
    let conn = open_db_in_memory().unwrap();
    create_series(&conn, "dma-nw", "urn:y:${number}", NumberSequenceType::Continuous);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut imported = warning("dma-nw", MessageStatus::Published);
    imported.mrn = Some("urn:y:1".to_string());
    repo.create_message(&imported).unwrap();
    let mut colliding = warning("dma-nw", MessageStatus::Verified);
    colliding.publish_date_from = Some(5_000);
    repo.create_message(&colliding).unwrap();

    let scheduled = sqlite_scheduled_service(&conn).unwrap();
    let report = scheduled.check_for_publishable_messages(NOW).unwrap();
    assert_eq!(report.failed, 1);

    let reverted = repo.get_message(colliding.id).unwrap().unwrap();
    assert_eq!(reverted.status, MessageStatus::Draft);
    assert_eq!(reverted.number, None);
    assert_eq!(
        scheduled.service().series().next_number("dma-nw", 1970).unwrap(),
        1
    );
}

#[test]
fn scheduled_pass_runs_both_checks_and_purges_expired_tags() {
    let conn = open_db_in_memory().unwrap();
    create_series(&conn, "dma-nw", "urn:mrn:iho:nw:dk:${number}", NumberSequenceType::Continuous);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut to_expire = warning("dma-nw", MessageStatus::Published);
    to_expire.publish_date_from = Some(100);
    to_expire.publish_date_to = Some(200);
    let mut to_publish = warning("dma-nw", MessageStatus::Verified);
    to_publish.publish_date_from = Some(300);
    repo.create_message(&to_expire).unwrap();
    repo.create_message(&to_publish).unwrap();

    let tags = SqliteTagRepository::try_new(&conn).unwrap();
    let mut stale = MessageTag::new("stale", "Stale");
    stale.expiry_date = Some(NOW - 1);
    tags.create_tag(&stale).unwrap();

    let (expired, published) = run_scheduled_checks(&conn, NOW).unwrap();
    assert_eq!(expired.transitioned, 1);
    assert_eq!(published.transitioned, 1);
    assert!(tags.get_tag("stale").unwrap().is_none());

    // Freshly published message is not expired by a second pass.
    let (expired, published) = run_scheduled_checks(&conn, NOW).unwrap();
    assert_eq!(expired.examined, 0);
    assert_eq!(published.examined, 0);
}

#[test]
fn scheduler_runner_processes_due_messages_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("niord.db");
    let conn = open_db(&path).unwrap();
    create_series(&conn, "dma-nw", "urn:mrn:iho:nw:dk:${number}", NumberSequenceType::Continuous);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut due = warning("dma-nw", MessageStatus::Verified);
    due.publish_date_from = Some(1_000);
    repo.create_message(&due).unwrap();

    let runner = SchedulerRunner::spawn(
        open_db(&path).unwrap(),
        ScheduleSettings { interval_secs: 3600 },
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut status = MessageStatus::Verified;
    while Instant::now() < deadline {
        status = repo.get_message(due.id).unwrap().unwrap().status;
        if status == MessageStatus::Published {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    runner.shutdown();

    assert_eq!(status, MessageStatus::Published);
}
