use niord_core::db::open_db_in_memory;
use niord_core::repo::series_repo::{SeriesRepository, SqliteSeriesRepository};
use niord_core::{
    IndexQuery, IndexSettings, MainType, Message, MessageDesc, MessageIndex, MessageRepository,
    MessageSeries, MessageStatus, MessageType, NumberSequenceType, SearchError,
    SqliteMessageRepository, UpdateOutcome,
};
use rusqlite::Connection;
use uuid::Uuid;

fn store() -> Connection {
    let conn = open_db_in_memory().unwrap();
    SqliteSeriesRepository::try_new(&conn)
        .unwrap()
        .create_series(&MessageSeries::new(
            "dma-nw",
            MainType::Nw,
            "urn:mrn:iho:nw:dk:dma:${year}:${number}",
            NumberSequenceType::Yearly,
        ))
        .unwrap();
    conn
}

fn warning(title: &str) -> Message {
    let mut message = Message::new("dma-nw", MessageType::CoastalWarning);
    message.descs.push(MessageDesc::new("en", title));
    message
}

fn settings(languages: &[&str]) -> IndexSettings {
    IndexSettings {
        languages: languages.iter().map(|lang| lang.to_string()).collect(),
        ..IndexSettings::default()
    }
}

#[test]
fn update_index_makes_messages_searchable() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let lighthouse = warning("Lighthouse unlit at Skagen");
    let buoy = warning("Buoy missing north of Anholt");
    repo.create_message(&lighthouse).unwrap();
    repo.create_message(&buoy).unwrap();

    let mut index = MessageIndex::open_in_memory(&settings(&["en"])).unwrap();
    assert_eq!(index.update_index(&repo, 100), 2);
    assert_eq!(index.update_index(&repo, 100), 0);
    assert_eq!(index.document_count().unwrap(), 2);

    let hits = index.search(&IndexQuery::new("skagen")).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].message_id, lighthouse.id);
    assert!(hits[0].score > 0.0);

    let cursor = index.last_cursor().unwrap().unwrap();
    assert_eq!(cursor.change_seq, 2);
}

#[test]
fn reindexing_from_scratch_does_not_duplicate_documents() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let message = warning("Wreck reported in the Great Belt");
    repo.create_message(&message).unwrap();

    let mut index = MessageIndex::open_in_memory(&settings(&["en", "da"])).unwrap();
    assert_eq!(index.update_index(&repo, 100), 1);

    index.rewind(None).unwrap();
    assert!(index.last_cursor().unwrap().is_none());
    assert_eq!(index.update_index(&repo, 100), 1);

    assert_eq!(index.document_count().unwrap(), 1);
    let hits = index.search(&IndexQuery::new("wreck")).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].message_id, message.id);
}

#[test]
fn updates_are_picked_up_in_batches() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    for index in 0..5 {
        repo.create_message(&warning(&format!("Firing exercise area {index}")))
            .unwrap();
    }

    let mut index = MessageIndex::open_in_memory(&settings(&["en"])).unwrap();
    assert_eq!(index.update_index(&repo, 2), 2);
    assert_eq!(index.update_index(&repo, 2), 2);
    assert_eq!(index.update_index(&repo, 2), 1);
    assert_eq!(index.update_index(&repo, 2), 0);
    assert_eq!(index.document_count().unwrap(), 5);
}

#[test]
fn edited_and_deleted_messages_replace_their_documents() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let message = warning("Dredging in progress");
    repo.create_message(&message).unwrap();

    let mut index = MessageIndex::open_in_memory(&settings(&["en"])).unwrap();
    index.update_index(&repo, 100);

    let mut edited = repo.get_message(message.id).unwrap().unwrap();
    edited.descs = vec![MessageDesc::new("en", "Survey vessel operating")];
    repo.update_message(&edited).unwrap();
    assert_eq!(index.update_index(&repo, 100), 1);

    assert!(index.search(&IndexQuery::new("dredging")).unwrap().is_empty());
    assert_eq!(index.search(&IndexQuery::new("survey")).unwrap().len(), 1);

    let mut deleted = repo.get_message(message.id).unwrap().unwrap();
    deleted.status = MessageStatus::Deleted;
    repo.update_message(&deleted).unwrap();
    assert_eq!(index.update_index(&repo, 100), 1);

    assert_eq!(index.document_count().unwrap(), 0);
    assert!(index.search(&IndexQuery::new("survey")).unwrap().is_empty());
}

#[test]
fn wildcards_prefixes_and_exclusions() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let lighthouse = warning("Lighthouse unlit");
    let buoy = warning("Buoy unlit");
    repo.create_message(&lighthouse).unwrap();
    repo.create_message(&buoy).unwrap();

    let mut index = MessageIndex::open_in_memory(&settings(&["en"])).unwrap();
    index.update_index(&repo, 100);

    let leading = index.search(&IndexQuery::new("*house")).unwrap();
    assert_eq!(leading.len(), 1);
    assert_eq!(leading[0].message_id, lighthouse.id);

    let single = index.search(&IndexQuery::new("b?oy")).unwrap();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].message_id, buoy.id);

    assert_eq!(index.search(&IndexQuery::new("light*")).unwrap().len(), 1);
    assert_eq!(index.search(&IndexQuery::new("unlit")).unwrap().len(), 2);

    let excluded = index.search(&IndexQuery::new("+unlit -buoy")).unwrap();
    assert_eq!(excluded.len(), 1);
    assert_eq!(excluded[0].message_id, lighthouse.id);

    assert!(index.search(&IndexQuery::new("*zzz")).unwrap().is_empty());
    assert!(index.search(&IndexQuery::new("   ")).unwrap().is_empty());
}

#[test]
fn language_filter_and_hit_limit() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let mut message = warning("Buoy missing");
    message.desc_mut("da").title = Some("Bøje mangler".to_string());
    repo.create_message(&message).unwrap();
    repo.create_message(&warning("Buoy damaged")).unwrap();

    let mut index = MessageIndex::open_in_memory(&settings(&["en", "da"])).unwrap();
    index.update_index(&repo, 100);

    let danish = index
        .search(&IndexQuery::new("mangler").with_lang("da"))
        .unwrap();
    assert_eq!(danish.len(), 1);
    assert_eq!(danish[0].message_id, message.id);
    assert!(index
        .search(&IndexQuery::new("mangler").with_lang("en"))
        .unwrap()
        .is_empty());

    assert_eq!(index.search(&IndexQuery::new("buoy")).unwrap().len(), 2);
    assert_eq!(
        index
            .search(&IndexQuery::new("buoy").with_max_hits(1))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn title_field_restricts_matching_column() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let mut in_title = warning("Anholt light");
    in_title.areas.push("Kattegat".to_string());
    let mut in_area = warning("Buoy adrift");
    in_area.areas.push("Anholt".to_string());
    repo.create_message(&in_title).unwrap();
    repo.create_message(&in_area).unwrap();

    let mut index = MessageIndex::open_in_memory(&settings(&["en"])).unwrap();
    index.update_index(&repo, 100);

    assert_eq!(index.search(&IndexQuery::new("anholt")).unwrap().len(), 2);
    let titled = index.search(&IndexQuery::new("title:anholt")).unwrap();
    assert_eq!(titled.len(), 1);
    assert_eq!(titled[0].message_id, in_title.id);
}

#[test]
fn recreate_index_rebuilds_everything() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    for index in 0..3 {
        repo.create_message(&warning(&format!("Cable work {index}")))
            .unwrap();
    }

    let mut index = MessageIndex::open_in_memory(&settings(&["en"])).unwrap();
    index.update_index(&repo, 1);
    assert_eq!(index.document_count().unwrap(), 1);

    assert_eq!(index.recreate_index(&repo, 2).unwrap(), 3);
    assert_eq!(index.document_count().unwrap(), 3);
    assert_eq!(index.update_index(&repo, 100), 0);
}

#[test]
fn malformed_query_is_rejected() {
    let index = MessageIndex::open_in_memory(&settings(&["en"])).unwrap();

    let err = index.search(&IndexQuery::new("\"open phrase")).unwrap_err();
    assert!(matches!(err, SearchError::InvalidQuery { .. }));
}

#[test]
fn file_backed_index_keeps_cursor_across_reopen() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    repo.create_message(&warning("Ice conditions")).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    {
        let mut index = MessageIndex::open(&path, &settings(&["en"])).unwrap();
        assert_eq!(index.update_index(&repo, 100), 1);
    }

    let mut reopened = MessageIndex::open(&path, &settings(&["en"])).unwrap();
    assert!(reopened.last_cursor().unwrap().is_some());
    assert_eq!(reopened.update_index(&repo, 100), 0);
    assert_eq!(reopened.search(&IndexQuery::new("ice")).unwrap().len(), 1);
}

#[test]
fn hard_deleted_message_loses_its_documents() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let message = warning("Wreck adrift");
    repo.create_message(&message).unwrap();

    let mut index = MessageIndex::open_in_memory(&settings(&["en"])).unwrap();
    assert_eq!(index.update_index(&repo, 100), 1);
    assert_eq!(index.document_count().unwrap(), 1);

    repo.delete_message(message.id).unwrap();
    assert_eq!(index.update_index(&repo, 100), 1);
    assert_eq!(index.document_count().unwrap(), 0);
    assert!(index.search(&IndexQuery::new("wreck")).unwrap().is_empty());
}

#[test]
fn change_committed_in_same_millisecond_is_not_skipped() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let alpha = {
        let mut message = Message::with_id(
            Uuid::from_u128(u128::MAX),
            "dma-nw",
            MessageType::CoastalWarning,
        );
        message.descs.push(MessageDesc::new("en", "Alpha exercise"));
        message
    };
    repo.create_message(&alpha).unwrap();
    conn.execute("UPDATE messages SET updated_at = 5000;", [])
        .unwrap();

    let mut index = MessageIndex::open_in_memory(&settings(&["en"])).unwrap();
    assert_eq!(index.update_index(&repo, 100), 1);

    let bravo = {
        let mut message = Message::with_id(
            Uuid::from_u128(1),
            "dma-nw",
            MessageType::CoastalWarning,
        );
        message.descs.push(MessageDesc::new("en", "Bravo exercise"));
        message
    };
    repo.create_message(&bravo).unwrap();
    conn.execute("UPDATE messages SET updated_at = 5000;", [])
        .unwrap();

    assert_eq!(index.update_index(&repo, 100), 1);
    let hits = index.search(&IndexQuery::new("bravo")).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].message_id, bravo.id);
}

#[test]
fn failing_document_is_skipped_and_cursor_still_advances() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let first = warning("Racing buoys laid");
    let rejected = warning("Racing buoys removed");
    let last = warning("Racing area closed");
    for message in [&first, &rejected, &last] {
        repo.create_message(message).unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    let mut index = MessageIndex::open(&path, &settings(&["en"])).unwrap();
    let side = Connection::open(&path).unwrap();
    side.execute_batch(&format!(
        "CREATE TRIGGER reject_document BEFORE INSERT ON index_documents
         WHEN NEW.message_id = '{}'
         BEGIN SELECT RAISE(ABORT, 'document rejected'); END;",
        rejected.id
    ))
    .unwrap();

    let outcome = index.update_index_outcome(&repo, 3);
    assert_eq!(
        outcome,
        UpdateOutcome {
            fetched: 3,
            indexed: 2,
            removed: 0,
            skipped: 1
        }
    );
    assert_eq!(index.last_cursor().unwrap().unwrap().change_seq, 3);
    assert_eq!(index.document_count().unwrap(), 2);

    let hits = index.search(&IndexQuery::new("racing")).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|hit| hit.message_id != rejected.id));

    side.execute_batch("DROP TRIGGER reject_document;").unwrap();
    assert_eq!(index.update_index(&repo, 100), 0);
}

#[test]
fn failing_batch_yields_zero_without_moving_cursor() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    repo.create_message(&warning("Ferry route changed")).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    let mut index = MessageIndex::open(&path, &settings(&["en"])).unwrap();
    let side = Connection::open(&path).unwrap();
    side.execute(
        "INSERT INTO index_commit (key, value) VALUES ('last_update', 'not a cursor');",
        [],
    )
    .unwrap();

    assert_eq!(index.update_index(&repo, 100), 0);
    assert_eq!(
        index.update_index_outcome(&repo, 100),
        UpdateOutcome::default()
    );
    assert!(matches!(
        index.last_cursor(),
        Err(SearchError::InvalidData(_))
    ));
    assert_eq!(index.document_count().unwrap(), 0);
}

#[test]
fn message_matching_in_several_languages_is_one_hit() {
    let conn = store();
    let repo = SqliteMessageRepository::try_new(&conn).unwrap();
    let mut both = warning("Wreck buoy adrift");
    both.desc_mut("da").title = Some("Vrag buoy drivende".to_string());
    repo.create_message(&both).unwrap();
    let single = warning("Buoy moved");
    repo.create_message(&single).unwrap();

    let mut index = MessageIndex::open_in_memory(&settings(&["en", "da"])).unwrap();
    index.update_index(&repo, 100);
    assert_eq!(index.document_count().unwrap(), 2);

    let hits = index.search(&IndexQuery::new("buoy")).unwrap();
    let mut ids: Vec<_> = hits.iter().map(|hit| hit.message_id).collect();
    ids.sort();
    let mut expected = vec![both.id, single.id];
    expected.sort();
    assert_eq!(ids, expected);
    assert!(hits.iter().all(|hit| hit.score.is_finite()));

    let limited = index
        .search(&IndexQuery::new("buoy").with_max_hits(2))
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_ne!(limited[0].message_id, limited[1].message_id);
}
