use niord_core::db::open_db_in_memory;
use niord_core::repo::message_repo::MessageListQuery;
use niord_core::repo::series_repo::{SeriesRepository, SqliteSeriesRepository};
use niord_core::{
    DateInterval, MainType, Message, MessageDesc, MessageRepository, MessageSeries,
    MessageService, MessageStatus, MessageType, NumberSequenceType, RepoError, ServiceError,
    SqliteMessageRepository, UpdateCursor,
};
use rusqlite::Connection;
use uuid::Uuid;

fn create_nm_series(conn: &Connection) {
    let series = SqliteSeriesRepository::try_new(conn).unwrap();
    series
        .create_series(&MessageSeries::new(
            "dma-nm",
            MainType::Nm,
            "urn:mrn:iho:nm:dk:dma:${year}:${number}",
            NumberSequenceType::Yearly,
        ))
        .unwrap();
}

fn notice(title: &str) -> Message {
    let mut message = Message::new("dma-nm", MessageType::TemporaryNotice);
    message.descs.push(MessageDesc::new("en", title));
    message
}

#[test]
fn create_and_get_message_round_trips_descs_and_body() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut message = notice("Buoy off station");
    message.desc_mut("da").title = Some("Bøje ude af position".to_string());
    message.areas.push("Kattegat".to_string());
    message
        .date_intervals
        .push(DateInterval::new(Some(1_000), Some(5_000)));
    message
        .date_intervals
        .push(DateInterval::new(Some(2_000), Some(9_000)));
    repo.create_message(&message).unwrap();

    let loaded = repo.get_message(message.id).unwrap().unwrap();
    assert_eq!(loaded.title("en"), Some("Buoy off station"));
    assert_eq!(loaded.title("da"), Some("Bøje ude af position"));
    assert_eq!(loaded.areas, vec!["Kattegat".to_string()]);
    assert_eq!(loaded.start_date, Some(1_000));
    assert_eq!(loaded.end_date, Some(9_000));
    assert!(loaded.updated_at > 0);
}

#[test]
fn open_interval_clears_end_date() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut message = notice("Works in harbour");
    message
        .date_intervals
        .push(DateInterval::new(Some(1_000), Some(5_000)));
    message.date_intervals.push(DateInterval::new(Some(3_000), None));
    repo.create_message(&message).unwrap();

    let loaded = repo.get_message(message.id).unwrap().unwrap();
    assert_eq!(loaded.start_date, Some(1_000));
    assert_eq!(loaded.end_date, None);
}

#[test]
fn reversed_date_interval_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut message = notice("Reversed");
    message
        .date_intervals
        .push(DateInterval::new(Some(5_000), Some(1_000)));

    let err = repo.create_message(&message).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}

#[test]
fn update_bumps_updated_at_and_replaces_descs() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let message = notice("Old title");
    repo.create_message(&message).unwrap();
    let before = repo.get_message(message.id).unwrap().unwrap();

    let mut changed = before.clone();
    changed.descs = vec![MessageDesc::new("en", "New title")];
    repo.update_message(&changed).unwrap();

    let after = repo.get_message(message.id).unwrap().unwrap();
    assert_eq!(after.title("en"), Some("New title"));
    assert_eq!(after.descs.len(), 1);
    assert!(after.updated_at > before.updated_at);
}

#[test]
fn update_missing_message_returns_not_found() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let message = notice("Never stored");
    let err = repo.update_message(&message).unwrap_err();
    assert!(matches!(err, RepoError::MessageNotFound(id) if id == message.id));
}

#[test]
fn find_updated_messages_follows_commit_order() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    // Same timestamp, uuids sorting against commit order.
    let late_uuid = Message::with_id(
        Uuid::from_u128(u128::MAX),
        "dma-nm",
        MessageType::TemporaryNotice,
    );
    let early_uuid = Message::with_id(
        Uuid::from_u128(1),
        "dma-nm",
        MessageType::TemporaryNotice,
    );
    repo.create_message(&late_uuid).unwrap();
    repo.create_message(&early_uuid).unwrap();
    conn.execute("UPDATE messages SET updated_at = 42;", [])
        .unwrap();

    let first = repo.find_updated_messages(None, 1).unwrap();
    assert_eq!(first[0].message_id, late_uuid.id);
    let cursor = UpdateCursor::of(&first[0]);
    let second = repo.find_updated_messages(Some(&cursor), 10).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, early_uuid.id);
    assert!(second[0].change_seq > cursor.change_seq);
}

#[test]
fn find_updated_messages_lists_each_message_once_with_tombstones() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let mut ids = Vec::new();
    for index in 0..4 {
        ids.push(repo.create_message(&notice(&format!("Notice {index}"))).unwrap());
    }
    let mut edited = repo.get_message(ids[0]).unwrap().unwrap();
    edited.descs = vec![MessageDesc::new("en", "Notice 0 edited")];
    repo.update_message(&edited).unwrap();
    repo.delete_message(ids[1]).unwrap();

    let mut cursor: Option<UpdateCursor> = None;
    let mut seen = Vec::new();
    loop {
        let batch = repo.find_updated_messages(cursor.as_ref(), 2).unwrap();
        let Some(last) = batch.last() else {
            break;
        };
        cursor = Some(UpdateCursor::of(last));
        seen.extend(batch);
    }

    let order: Vec<_> = seen.iter().map(|change| change.message_id).collect();
    assert_eq!(order, vec![ids[2], ids[3], ids[0], ids[1]]);
    assert_eq!(
        seen[2].message.as_ref().unwrap().title("en"),
        Some("Notice 0 edited")
    );
    assert!(seen[3].message.is_none());
}

#[test]
fn list_messages_filters_by_status() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();

    let draft = notice("Draft");
    let mut verified = notice("Verified");
    verified.status = MessageStatus::Verified;
    repo.create_message(&draft).unwrap();
    repo.create_message(&verified).unwrap();

    let listed = repo
        .list_messages(&MessageListQuery {
            statuses: vec![MessageStatus::Verified],
            ..MessageListQuery::default()
        })
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, verified.id);
}

#[test]
fn delete_message_cascades_history() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let service = MessageService::new(
        SqliteMessageRepository::try_new(&conn).unwrap(),
        SqliteSeriesRepository::try_new(&conn).unwrap(),
    );

    let created = service.create_message(&notice("Short lived")).unwrap();
    assert_eq!(service.history(created.id).unwrap().len(), 1);

    service.messages().delete_message(created.id).unwrap();
    assert!(service.messages().get_message(created.id).unwrap().is_none());
    assert!(service.history(created.id).unwrap().is_empty());

    let history_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM message_history;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(history_rows, 0);
}

#[test]
fn service_rejects_unknown_series_and_main_type_mismatch() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let service = MessageService::new(
        SqliteMessageRepository::try_new(&conn).unwrap(),
        SqliteSeriesRepository::try_new(&conn).unwrap(),
    );

    let orphan = Message::new("no-such-series", MessageType::TemporaryNotice);
    assert!(matches!(
        service.create_message(&orphan),
        Err(ServiceError::SeriesNotFound(id)) if id == "no-such-series"
    ));

    let warning = Message::new("dma-nm", MessageType::CoastalWarning);
    assert!(matches!(
        service.create_message(&warning),
        Err(ServiceError::MainTypeMismatch { .. })
    ));
}

#[test]
fn update_message_keeps_stored_status_and_records_history() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let service = MessageService::new(
        SqliteMessageRepository::try_new(&conn).unwrap(),
        SqliteSeriesRepository::try_new(&conn).unwrap(),
    );

    let created = service.create_message(&notice("Original")).unwrap();
    let mut edited = created.clone();
    edited.status = MessageStatus::Published;
    edited.descs = vec![MessageDesc::new("en", "Edited")];

    let saved = service.update_message(&edited).unwrap();
    assert_eq!(saved.status, MessageStatus::Draft);
    assert_eq!(saved.title("en"), Some("Edited"));

    let history = service.history(created.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[1].version, 2);
    assert_eq!(history[1].snapshot.title("en"), Some("Edited"));
}

#[test]
fn publish_assigns_number_mrn_and_publish_date() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let service = MessageService::new(
        SqliteMessageRepository::try_new(&conn).unwrap(),
        SqliteSeriesRepository::try_new(&conn).unwrap(),
    );

    // 2026-03-01T00:00:00Z
    let now = 1_772_323_200_000;
    let first = service.create_message(&notice("First")).unwrap();
    let second = service.create_message(&notice("Second")).unwrap();

    let first = service.publish(first.id, now).unwrap();
    let second = service.publish(second.id, now).unwrap();

    assert_eq!(first.status, MessageStatus::Published);
    assert_eq!(first.publish_date_from, Some(now));
    assert_eq!(first.number, Some(1));
    assert_eq!(first.mrn.as_deref(), Some("urn:mrn:iho:nm:dk:dma:2026:1"));
    assert_eq!(second.number, Some(2));
    assert_eq!(second.mrn.as_deref(), Some("urn:mrn:iho:nm:dk:dma:2026:2"));
}

#[test]
fn invalid_transition_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let service = MessageService::new(
        SqliteMessageRepository::try_new(&conn).unwrap(),
        SqliteSeriesRepository::try_new(&conn).unwrap(),
    );

    let created = service.create_message(&notice("Draft only")).unwrap();
    let err = service.expire(created.id, 1_000).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::InvalidTransition {
            from: MessageStatus::Draft,
            to: MessageStatus::Expired,
            ..
        }
    ));

    let missing = Uuid::new_v4();
    assert!(matches!(
        service.publish(missing, 1_000),
        Err(ServiceError::MessageNotFound(id)) if id == missing
    ));
}

#[test]
fn publish_without_number_in_manual_series_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    SqliteSeriesRepository::try_new(&conn)
        .unwrap()
        .create_series(&MessageSeries::new(
            "dma-manual",
            MainType::Nm,
            "urn:mrn:iho:nm:dk:manual:${number}",
            NumberSequenceType::Manual,
        ))
        .unwrap();
    let service = MessageService::new(
        SqliteMessageRepository::try_new(&conn).unwrap(),
        SqliteSeriesRepository::try_new(&conn).unwrap(),
    );

    let mut unnumbered = notice("Unnumbered");
    unnumbered.series_id = "dma-manual".to_string();
    let unnumbered = service.create_message(&unnumbered).unwrap();
    assert!(matches!(
        service.publish(unnumbered.id, 1_000),
        Err(ServiceError::MissingNumber { id, .. }) if id == unnumbered.id
    ));
    let stored = service.get_message(unnumbered.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Draft);
    assert!(stored.mrn.is_none());

    let mut numbered = notice("Numbered");
    numbered.series_id = "dma-manual".to_string();
    numbered.number = Some(17);
    let numbered = service.create_message(&numbered).unwrap();
    let published = service.publish(numbered.id, 1_000).unwrap();
    assert_eq!(
        published.mrn.as_deref(),
        Some("urn:mrn:iho:nm:dk:manual:17")
    );
}

#[test]
fn failed_publish_releases_allocated_number() {
    let conn = open_db_in_memory().unwrap();
    create_nm_series(&conn);
    let service = MessageService::new(
        SqliteMessageRepository::try_new(&conn).unwrap(),
        SqliteSeriesRepository::try_new(&conn).unwrap(),
    );

    // 2026-03-01T00:00:00Z
    let now = 1_772_323_200_000;
    let mut imported = notice("Imported");
    imported.status = MessageStatus::Published;
    imported.mrn = Some("urn:mrn:iho:nm:dk:dma:2026:1".to_string());
    service.messages().create_message(&imported).unwrap();

    let pending = service.create_message(&notice("Pending")).unwrap();
    let err = service.publish(pending.id, now).unwrap_err();
    assert!(matches!(err, ServiceError::Repo(RepoError::Conflict(_))));

    let stored = service.get_message(pending.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Draft);
    assert_eq!(stored.number, None);
    assert_eq!(service.history(pending.id).unwrap().len(), 1);
    assert_eq!(service.series().next_number("dma-nm", 2026).unwrap(), 1);
}
