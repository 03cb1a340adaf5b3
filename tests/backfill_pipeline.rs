mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use castid_backend::pipeline::backfill::{self, BackfillOptions, BackfillReport};
use castid_backend::pipeline::PipelineError;
use common::{fake_models, vector, FakeCatalog, FakeDetector, FakeEmbedder, FakeImageSource, FakeRow};

const GROUP_WIDTH: u32 = 40;
const SOLO_WIDTH: u32 = 20;

fn options(batch_size: usize) -> BackfillOptions {
    BackfillOptions { batch_size, page_delay: Duration::ZERO }
}

fn images() -> FakeImageSource {
    FakeImageSource::default()
        .with_image("group.jpg", GROUP_WIDTH)
        .with_image("solo.jpg", SOLO_WIDTH)
}

fn detector() -> FakeDetector {
    FakeDetector::default().with_faces(GROUP_WIDTH, 2).with_faces(SOLO_WIDTH, 1)
}

#[test]
fn test_rows_sharing_an_image_take_successive_faces() {
    let catalog = FakeCatalog::with_rows(vec![
        FakeRow::new(1, "A", Some("group.jpg"), None),
        FakeRow::new(2, "B", Some("group.jpg"), None),
        FakeRow::new(3, "C", Some("group.jpg"), None),
    ]);
    let embedder = FakeEmbedder::default();
    let face0 = embedder.vector_for(GROUP_WIDTH as u8, 0);
    let face1 = embedder.vector_for(GROUP_WIDTH as u8, 1);
    let models = fake_models(detector(), embedder);

    let report = backfill::run(&models, &catalog, &images(), &options(10)).unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(catalog.embedding_of(1), Some(face0));
    assert_eq!(catalog.embedding_of(2), Some(face1));
    // The image has only two faces; the third row is left for follow-up.
    assert_eq!(catalog.embedding_of(3), None);
}

#[test]
fn test_single_face_image_shared_by_two_rows() {
    let catalog = FakeCatalog::with_rows(vec![
        FakeRow::new(1, "A", Some("solo.jpg"), None),
        FakeRow::new(2, "B", Some("solo.jpg"), None),
    ]);
    let models = fake_models(detector(), FakeEmbedder::default());

    let report = backfill::run(&models, &catalog, &images(), &options(10)).unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped, 1);
    assert!(catalog.embedding_of(1).is_some());
    assert!(catalog.embedding_of(2).is_none());
}

#[test]
fn test_second_run_changes_nothing() {
    let catalog = FakeCatalog::with_rows(vec![
        FakeRow::new(1, "A", Some("group.jpg"), None),
        FakeRow::new(2, "B", Some("group.jpg"), None),
        FakeRow::new(3, "C", Some("solo.jpg"), None),
    ]);
    let models = fake_models(detector(), FakeEmbedder::default());
    let images = images();

    let first = backfill::run(&models, &catalog, &images, &options(2)).unwrap();
    assert_eq!(first.processed, 3);
    let after_first: Vec<_> = (1..=3).map(|id| catalog.embedding_of(id)).collect();
    let fetches = images.fetches.load(Ordering::SeqCst);

    let second = backfill::run(&models, &catalog, &images, &options(2)).unwrap();
    assert_eq!(second, BackfillReport { processed: 0, skipped: 0, already_embedded: 3, pages: 2 });
    assert_eq!(images.fetches.load(Ordering::SeqCst), fetches);
    let after_second: Vec<_> = (1..=3).map(|id| catalog.embedding_of(id)).collect();
    assert_eq!(after_first, after_second);
}

#[test]
fn test_existing_embeddings_are_kept() {
    let stored = vector(&[(9, 1.0)]);
    let catalog = FakeCatalog::with_rows(vec![FakeRow::new(1, "A", Some("solo.jpg"), Some(stored.clone()))]);
    let models = fake_models(detector(), FakeEmbedder::default());

    let report = backfill::run(&models, &catalog, &images(), &options(10)).unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(report.already_embedded, 1);
    assert_eq!(catalog.embedding_of(1), Some(stored));
}

#[test]
fn test_row_failures_do_not_stop_the_run() {
    let catalog = FakeCatalog::with_rows(vec![
        FakeRow::new(1, "Missing", Some("missing.jpg"), None),
        FakeRow::new(2, "NoPath", None, None),
        FakeRow::new(3, "Blank", Some("   "), None),
        FakeRow::new(4, "Ok", Some("solo.jpg"), None),
    ]);
    let models = fake_models(detector(), FakeEmbedder::default());

    let report = backfill::run(&models, &catalog, &images(), &options(10)).unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped, 3);
    assert!(catalog.embedding_of(4).is_some());
}

#[test]
fn test_pages_until_empty() {
    let rows = (1..=5).map(|id| FakeRow::new(id, "X", Some("missing.jpg"), None)).collect();
    let catalog = FakeCatalog::with_rows(rows);
    let models = fake_models(detector(), FakeEmbedder::default());

    let report = backfill::run(&models, &catalog, &images(), &options(2)).unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.skipped, 5);
    // Three full or partial pages plus the empty one that ends the run.
    assert_eq!(catalog.page_requests.load(Ordering::SeqCst), 4);
}

#[test]
fn test_page_fetch_failure_aborts() {
    let catalog = FakeCatalog::with_rows(vec![FakeRow::new(1, "A", Some("solo.jpg"), None)]);
    catalog.fail.store(true, Ordering::SeqCst);
    let models = fake_models(detector(), FakeEmbedder::default());

    let err = backfill::run(&models, &catalog, &images(), &options(10)).unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamUnavailable(_)));
    assert!(catalog.embedding_of(1).is_none());
}

#[test]
fn test_zero_batch_size_is_rejected() {
    let catalog = FakeCatalog::default();
    let models = fake_models(detector(), FakeEmbedder::default());

    let err = backfill::run(&models, &catalog, &images(), &options(0)).unwrap_err();
    assert!(matches!(err, PipelineError::BadInput(_)));
    assert_eq!(catalog.page_requests.load(Ordering::SeqCst), 0);
}
