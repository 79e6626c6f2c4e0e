mod common;

use common::{build_pipeline, event_batch, event_doc, init_test_tracing};
use strata::destination::MemoryDestination;
use strata::error::ErrorKind;
use strata::package::PackageStorage;
use strata::state::{FsStateStore, StateStore, TableLoadState};
use strata::test_utils::FlakyDestination;

#[tokio::test]
async fn transient_failures_are_retried_within_the_run() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let destination = FlakyDestination::wrap(MemoryDestination::new());
    destination
        .fail_loads("events", ErrorKind::DestinationTransient, 2)
        .await;
    let pipeline = build_pipeline(dir.path(), "analytics", destination.clone());

    let report = pipeline
        .run_batch(event_batch(vec![event_doc(1, &["a"])]))
        .await
        .unwrap();

    assert!(report.archived);
    assert_eq!(destination.load_calls_for("events").await, 3);
    assert_eq!(destination.inner().row_count("events").await, 1);
}

#[tokio::test]
async fn resume_finishes_a_partially_loaded_package_without_duplicates() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let destination = FlakyDestination::wrap(MemoryDestination::new());
    destination
        .fail_loads("events__tags", ErrorKind::DestinationFatal, 1)
        .await;
    let pipeline = build_pipeline(dir.path(), "analytics", destination.clone());

    // The root commits, its child table fails permanently.
    let error = pipeline
        .run_batch(event_batch(vec![event_doc(1, &["a", "b"])]))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::PartialLoad);
    assert_eq!(destination.inner().row_count("events").await, 1);
    assert_eq!(destination.inner().row_count("events__tags").await, 0);

    // The persisted state record reflects the split outcome.
    let storage = PackageStorage::new(dir.path()).unwrap();
    let states = FsStateStore::new(storage.clone());
    let pending = storage.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    let recorded = states.package_states(&pending[0]).await.unwrap();
    assert_eq!(recorded["events"], TableLoadState::Committed);
    assert_eq!(recorded["events__tags"], TableLoadState::Failed);

    // The failure budget is spent, so resuming completes the package. The
    // committed root is skipped rather than reloaded.
    let reports = pipeline.resume_pending().await.unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.archived);
    assert!(report.skipped.contains(&"events".to_string()));
    assert!(report.committed.contains(&"events__tags".to_string()));

    assert_eq!(destination.load_calls_for("events").await, 1);
    assert_eq!(destination.inner().row_count("events").await, 1);
    assert_eq!(destination.inner().row_count("events__tags").await, 2);

    // Nothing left to resume, and the archived state record survives.
    assert!(pipeline.resume_pending().await.unwrap().is_empty());
    let recorded = states.package_states(&pending[0]).await.unwrap();
    assert_eq!(recorded["events__tags"], TableLoadState::Committed);
}

#[tokio::test]
async fn exhausted_retries_leave_the_package_pending_for_a_later_run() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let destination = FlakyDestination::wrap(MemoryDestination::new());
    // More transient failures than the retry budget allows.
    destination
        .fail_loads("events", ErrorKind::DestinationTransient, 5)
        .await;
    let pipeline = build_pipeline(dir.path(), "analytics", destination.clone());

    let error = pipeline
        .run_batch(event_batch(vec![event_doc(1, &["a"])]))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::PartialLoad);
    assert_eq!(destination.load_calls_for("events").await, 3);
    assert_eq!(destination.inner().row_count("events").await, 0);

    // Two injected failures remain; the resume retries through them.
    let reports = pipeline.resume_pending().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].archived);
    assert_eq!(destination.inner().row_count("events").await, 1);
    assert_eq!(destination.inner().row_count("events__tags").await, 1);
}

#[tokio::test]
async fn an_unsealed_package_directory_does_not_wedge_resume() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let destination = FlakyDestination::wrap(MemoryDestination::new());
    destination
        .fail_loads("events", ErrorKind::DestinationFatal, 1)
        .await;
    let pipeline = build_pipeline(dir.path(), "analytics", destination.clone());

    let error = pipeline
        .run_batch(event_batch(vec![event_doc(1, &["a"])]))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::PartialLoad);

    // A crash between package creation and sealing leaves a directory with
    // no manifest. It must not stop the real pending package from resuming.
    let storage = PackageStorage::new(dir.path()).unwrap();
    storage.create_package("9999999999.0").unwrap();

    let reports = pipeline.resume_pending().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].archived);
    assert_eq!(destination.inner().row_count("events").await, 1);
}
