//! End-to-end bootstrap runs against an in-memory remote.

mod common;

use common::{
    archive_ref, phases, run_to_end, sha256_hex, terminal_count, Catalog, Harness, MemorySource,
};
use setlist_bootstrap::{
    progress, BootstrapError, BootstrapPhase, CatalogArchiveRef, ErrorKind, PhaseKind,
};
use setlist_core::schema::{RunLock, CATALOG_SCHEMA_VERSION};

const FULL_RUN: [PhaseKind; 8] = [
    PhaseKind::Idle,
    PhaseKind::Checking,
    PhaseKind::Downloading,
    PhaseKind::Extracting,
    PhaseKind::ImportingShows,
    PhaseKind::ComputingVenues,
    PhaseKind::ImportingRecordings,
    PhaseKind::Completed,
];

#[tokio::test]
async fn test_first_run_emits_phases_in_order() {
    let harness = Harness::new();
    let data = Catalog::generate(30, 2).archive();
    let source = MemorySource::new(data.clone());
    let bootstrapper = harness.bootstrapper(source.clone());

    let (events, outcome) = run_to_end(&bootstrapper, archive_ref(&data)).await;

    assert_eq!(phases(&events), FULL_RUN);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.last().unwrap().is_terminal());

    let summary = outcome.unwrap();
    assert!(!summary.used_local);
    assert_eq!(summary.shows_imported, 30);
    assert_eq!(summary.recordings_imported, 60);
    assert_eq!(summary.venues_computed, 3);
    assert_eq!(summary.records_skipped, 0);
    match &events.last().unwrap().phase {
        BootstrapPhase::Completed(reported) => assert_eq!(reported, &summary),
        other => panic!("unexpected terminal phase {other:?}"),
    }

    let db = harness.db();
    assert_eq!(db.count_shows().unwrap(), 30);
    assert_eq!(db.count_recordings().unwrap(), 60);
    assert!(db
        .is_catalog_valid(CATALOG_SCHEMA_VERSION, Some(&summary.content_hash))
        .unwrap());
    assert!(!harness.staging().downloads_dir().exists());
    assert!(!harness.staging().extracted_dir().exists());
}

#[tokio::test]
async fn test_valid_local_catalog_is_reused() {
    let harness = Harness::new();
    let data = Catalog::generate(5, 1).archive();
    let source = MemorySource::new(data.clone());
    let bootstrapper = harness.bootstrapper(source.clone());

    run_to_end(&bootstrapper, archive_ref(&data)).await.1.unwrap();
    let (events, outcome) = run_to_end(&bootstrapper, archive_ref(&data)).await;

    assert_eq!(
        phases(&events),
        [
            PhaseKind::Idle,
            PhaseKind::Checking,
            PhaseKind::UsingLocal,
            PhaseKind::Completed
        ]
    );
    assert!(outcome.unwrap().used_local);
    assert_eq!(source.opens(), 1);
}

#[tokio::test]
async fn test_forced_refresh_is_idempotent() {
    let harness = Harness::new();
    let data = Catalog::generate(40, 3).archive();
    let source = MemorySource::new(data.clone());
    let options = harness.options().with_force(true);
    let bootstrapper = setlist_bootstrap::Bootstrapper::new(options, source.clone());

    run_to_end(&bootstrapper, archive_ref(&data)).await.1.unwrap();
    let db = harness.db();
    let shows = db.list_shows().unwrap();
    let recordings = db.list_recordings().unwrap();
    let venues = db.list_venues().unwrap();

    let (events, outcome) = run_to_end(&bootstrapper, archive_ref(&data)).await;
    assert_eq!(phases(&events), FULL_RUN);
    outcome.unwrap();

    assert_eq!(db.list_shows().unwrap(), shows);
    assert_eq!(db.list_recordings().unwrap(), recordings);
    assert_eq!(db.list_venues().unwrap(), venues);
    assert_eq!(source.opens(), 2);
}

#[tokio::test]
async fn test_hash_mismatch_leaves_storage_unchanged() {
    let harness = Harness::new();
    let data = Catalog::generate(10, 1).archive();
    let bootstrapper = harness.bootstrapper(MemorySource::new(data.clone()));
    run_to_end(&bootstrapper, archive_ref(&data)).await.1.unwrap();
    let before = harness.db().catalog_status().unwrap();

    // The remote serves 1000 bytes hashing to something other than "def".
    let bogus = vec![0xab_u8; 1000];
    let bootstrapper = harness.bootstrapper(MemorySource::new(bogus));
    let archive = CatalogArchiveRef::new("mem://other.zip", "def").with_expected_size(1000);
    let (events, outcome) = run_to_end(&bootstrapper, archive).await;

    let err = outcome.unwrap_err();
    assert_eq!(err.phase, PhaseKind::Downloading);
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(terminal_count(&events), 1);
    match &events.last().unwrap().phase {
        BootstrapPhase::Error(failure) => {
            assert_eq!(failure.phase, PhaseKind::Downloading);
            assert_eq!(failure.kind, ErrorKind::Integrity);
            assert!(failure.detail.contains("def"));
        }
        other => panic!("unexpected terminal phase {other:?}"),
    }
    assert!(!events.iter().any(|e| e.kind() == PhaseKind::Extracting));
    assert_eq!(harness.db().catalog_status().unwrap(), before);
}

#[tokio::test]
async fn test_malformed_records_within_tolerance_are_skipped() {
    let harness = Harness::new();
    let data = Catalog::generate(10_000, 0).with_malformed_shows(3).archive();
    let bootstrapper = harness.bootstrapper(MemorySource::new(data.clone()));

    let (_, outcome) = run_to_end(&bootstrapper, archive_ref(&data)).await;

    let summary = outcome.unwrap();
    assert_eq!(summary.shows_imported, 9_997);
    assert_eq!(summary.records_skipped, 3);
    assert_eq!(harness.db().count_shows().unwrap(), 9_997);
}

#[tokio::test]
async fn test_malformed_records_beyond_tolerance_fail_the_run() {
    let harness = Harness::new();
    let data = Catalog::generate(100, 1).with_malformed_shows(3).archive();
    let options = harness.options().with_parse_tolerance(2);
    let bootstrapper =
        setlist_bootstrap::Bootstrapper::new(options, MemorySource::new(data.clone()));

    let (events, outcome) = run_to_end(&bootstrapper, archive_ref(&data)).await;

    let err = outcome.unwrap_err();
    assert_eq!(err.phase, PhaseKind::ImportingShows);
    assert_eq!(err.kind(), ErrorKind::CatalogFormat);
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(harness.db().count_shows().unwrap(), 0);
    assert!(harness.db().catalog_marker().unwrap().is_none());
    assert!(!harness.staging().extracted_dir().exists());
}

#[tokio::test]
async fn test_orphan_recordings_are_counted() {
    let harness = Harness::new();
    let data = Catalog::generate(3, 1)
        .with_recording("lost-1", "gd99999")
        .with_recording("lost-2", "gd99998")
        .archive();
    let bootstrapper = harness.bootstrapper(MemorySource::new(data.clone()));

    let summary = run_to_end(&bootstrapper, archive_ref(&data)).await.1.unwrap();
    assert_eq!(summary.recordings_imported, 3);
    assert_eq!(summary.orphan_recordings, 2);
}

#[tokio::test]
async fn test_cancel_during_recordings_import() {
    let harness = Harness::new();
    let previous = Catalog::generate(5, 1).archive();
    let bootstrapper = harness.bootstrapper(MemorySource::new(previous.clone()));
    let old_hash = run_to_end(&bootstrapper, archive_ref(&previous))
        .await
        .1
        .unwrap()
        .content_hash;

    let data = Catalog::generate(200, 100).archive();
    let bootstrapper = harness.bootstrapper(MemorySource::new(data.clone()));
    let run = bootstrapper.start(archive_ref(&data)).unwrap();
    let (mut progress, cancel, done) = run.into_parts();
    let mut events = Vec::new();
    while let Some(event) = progress.recv().await {
        if event.kind() == PhaseKind::ImportingRecordings && !cancel.is_cancelled() {
            cancel.cancel();
        }
        events.push(event);
    }

    let err = done.await.unwrap_err();
    assert_eq!(err.phase, PhaseKind::ImportingRecordings);
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!events.iter().any(|e| e.kind() == PhaseKind::Completed));
    assert_eq!(terminal_count(&events), 1);

    // New shows are committed; the previous recordings were never replaced.
    let db = harness.db();
    assert_eq!(db.count_shows().unwrap(), 200);
    assert_eq!(db.count_recordings().unwrap(), 5);
    assert!(db.catalog_marker().unwrap().is_none());
    assert!(!db
        .is_catalog_valid(CATALOG_SCHEMA_VERSION, Some(&old_hash))
        .unwrap());
    assert!(!db
        .is_catalog_valid(CATALOG_SCHEMA_VERSION, Some(&sha256_hex(&data)))
        .unwrap());
}

#[tokio::test]
async fn test_refresh_to_smaller_archive_drops_stale_rows() {
    let harness = Harness::new();
    let options = harness.options().with_force(true);

    let large = Catalog::generate(30, 2).archive();
    let bootstrapper =
        setlist_bootstrap::Bootstrapper::new(options.clone(), MemorySource::new(large.clone()));
    run_to_end(&bootstrapper, archive_ref(&large)).await.1.unwrap();
    assert_eq!(harness.db().count_shows().unwrap(), 30);

    let small = Catalog::generate(10, 2).archive();
    let bootstrapper =
        setlist_bootstrap::Bootstrapper::new(options, MemorySource::new(small.clone()));
    let summary = run_to_end(&bootstrapper, archive_ref(&small)).await.1.unwrap();
    assert_eq!(summary.shows_imported, 10);

    let db = harness.db();
    assert_eq!(db.count_shows().unwrap(), 10);
    assert_eq!(db.count_recordings().unwrap(), 20);
    let shows = db.list_shows().unwrap();
    assert!(db
        .list_recordings()
        .unwrap()
        .iter()
        .all(|r| shows.iter().any(|s| s.key == r.show_key)));
    let venue_shows: u32 = db.list_venues().unwrap().iter().map(|v| v.show_count).sum();
    assert_eq!(venue_shows, 10);

    let marker = db.catalog_marker().unwrap().unwrap();
    assert_eq!(marker.show_count, 10);
    assert_eq!(marker.recording_count, 20);
    assert_eq!(marker.content_hash, sha256_hex(&small));
}

#[tokio::test]
async fn test_run_held_by_another_process_is_rejected() {
    let harness = Harness::new();
    let data = Catalog::generate(5, 1).archive();
    let bootstrapper = harness.bootstrapper(MemorySource::new(data.clone()));

    // Another process holding the lock looks the same as this one holding it.
    std::fs::create_dir_all(harness.db_path().parent().unwrap()).unwrap();
    let held = RunLock::try_acquire(&harness.db_path()).unwrap();
    let err = bootstrapper.start(archive_ref(&data)).unwrap_err();
    assert!(matches!(err, BootstrapError::AlreadyRunning(_)));

    drop(held);
    run_to_end(&bootstrapper, archive_ref(&data)).await.1.unwrap();
}

#[tokio::test]
async fn test_schema_mismatch_forces_download() {
    let harness = Harness::new();
    let data = Catalog::generate(5, 1).archive();
    let source = MemorySource::new(data.clone());
    let bootstrapper = harness.bootstrapper(source.clone());
    run_to_end(&bootstrapper, archive_ref(&data)).await.1.unwrap();

    harness
        .db()
        .conn()
        .execute(
            "UPDATE catalog_marker SET schema_version = ?1",
            [CATALOG_SCHEMA_VERSION + 1],
        )
        .unwrap();

    let (events, outcome) = run_to_end(&bootstrapper, archive_ref(&data)).await;
    let kinds = phases(&events);
    assert_eq!(kinds[..3], [PhaseKind::Idle, PhaseKind::Checking, PhaseKind::Downloading]);
    outcome.unwrap();
    assert_eq!(source.opens(), 2);
    assert!(harness
        .db()
        .is_catalog_valid(CATALOG_SCHEMA_VERSION, None)
        .unwrap());
}

#[tokio::test]
async fn test_overlapping_run_is_rejected() {
    let harness = Harness::new();
    let data = Catalog::generate(50, 2).archive();
    let bootstrapper = harness.bootstrapper(MemorySource::new(data.clone()));

    let first = bootstrapper.start(archive_ref(&data)).unwrap();
    let second = bootstrapper.start(archive_ref(&data));
    assert!(matches!(second, Err(BootstrapError::AlreadyRunning(_))));

    // The blocking entry point reports the rejection as a terminal event.
    let (sender, stream) = progress::channel(8);
    let outcome = bootstrapper
        .run(&archive_ref(&data), sender, tokio_util::sync::CancellationToken::new())
        .await;
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::AlreadyRunning);
    let events = stream.collect_all().await;
    assert_eq!(phases(&events), [PhaseKind::Idle, PhaseKind::Error]);

    first.wait().await.unwrap();
    let again = bootstrapper.start(archive_ref(&data)).unwrap();
    assert!(again.wait().await.unwrap().used_local);
}

#[tokio::test]
async fn test_corrupt_archive_fails_extraction() {
    let harness = Harness::new();
    let data = b"PK\x03\x04 this is not really a zip archive".to_vec();
    let bootstrapper = harness.bootstrapper(MemorySource::new(data.clone()));

    let (events, outcome) = run_to_end(&bootstrapper, archive_ref(&data)).await;

    let err = outcome.unwrap_err();
    assert_eq!(err.phase, PhaseKind::Extracting);
    assert_eq!(err.kind(), ErrorKind::CorruptArchive);
    assert_eq!(terminal_count(&events), 1);
    assert!(!harness.staging().downloads_dir().exists());
    assert!(!harness.staging().extracted_dir().exists());
}

#[tokio::test]
async fn test_archive_without_recordings_is_corrupt() {
    let harness = Harness::new();
    let data = common::build_archive(&[("shows.jsonl", common::show_line(0), true)]);
    let bootstrapper = harness.bootstrapper(MemorySource::new(data.clone()));

    let (_, outcome) = run_to_end(&bootstrapper, archive_ref(&data)).await;
    let err = outcome.unwrap_err();
    assert_eq!(err.phase, PhaseKind::Extracting);
    assert_eq!(err.kind(), ErrorKind::CorruptArchive);
}

#[tokio::test]
async fn test_interrupted_download_resumes() {
    let harness = Harness::new();
    let data = Catalog::generate(200, 5).archive();
    let half = data.len() / 2;

    let flaky = MemorySource::failing_at(data.clone(), half);
    let (_, outcome) = run_to_end(&harness.bootstrapper(flaky), archive_ref(&data)).await;
    let err = outcome.unwrap_err();
    assert_eq!(err.phase, PhaseKind::Downloading);
    assert_eq!(err.kind(), ErrorKind::Transfer);
    let partial = harness.staging().partial_path(&archive_ref(&data));
    assert_eq!(std::fs::metadata(&partial).unwrap().len(), half as u64);

    let source = MemorySource::new(data.clone());
    let (_, outcome) = run_to_end(&harness.bootstrapper(source.clone()), archive_ref(&data)).await;
    outcome.unwrap();
    assert_eq!(source.requested_offsets(), [half as u64]);
    assert_eq!(harness.db().count_shows().unwrap(), 200);
}
