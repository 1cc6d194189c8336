#![cfg(feature = "test-utils")]

mod support;
use crate::support::{alice, gdrive_draft, s3_draft, TestEnv};
use image_collections::db::{CollectionState, ImportStatus};
use image_collections::import::{ConversionOutcome, ImportProgress};
use image_collections::library::{CollectionDraft, CollectionError};
use image_collections::test_support::{MockConnector, RecordingConversionPipeline};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

async fn next_event(rx: &mut UnboundedReceiver<ImportProgress>) -> ImportProgress {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for progress")
        .expect("Progress channel closed")
}

async fn assert_rolled_back(env: &TestEnv, draft: CollectionDraft, expected_reason: &str) {
    let mut progress = env.manager.imports().subscribe_all();

    let created = env.manager.create_collection(&alice(), draft).await.unwrap();
    let err = env
        .manager
        .imports()
        .wait(&created.id)
        .await
        .expect("Import was not launched")
        .unwrap_err();

    assert!(matches!(err, CollectionError::Import(_)));
    assert_eq!(err.to_string(), expected_reason);
    assert!(env.collection(&created.id).await.is_none());
    assert!(!env.manager.storage().staging_folder(&created.id).exists());

    assert_eq!(
        next_event(&mut progress).await,
        ImportProgress::RolledBack {
            collection_id: created.id.clone(),
            reason: expected_reason.to_string(),
        }
    );
}

#[tokio::test]
async fn test_listing_failure_rolls_back_collection() {
    let env = TestEnv::new(
        MockConnector::failing_list("Prefix/Folder not found."),
        RecordingConversionPipeline::completing(),
    )
    .await;

    assert_rolled_back(&env, s3_draft("plate"), "Prefix/Folder not found.").await;
    assert!(env.pipeline.requests().is_empty());
}

#[tokio::test]
async fn test_empty_source_rolls_back_collection() {
    let env = TestEnv::new(MockConnector::new(), RecordingConversionPipeline::completing()).await;

    assert_rolled_back(
        &env,
        gdrive_draft("drive", "/experiments/run1"),
        "'/experiments/run1' is empty.",
    )
    .await;

    // The name is free again after a rollback
    env.manager
        .create_collection(&alice(), CollectionDraft::named("drive"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_no_matching_extension_rolls_back_collection() {
    let connector = MockConnector::new().with_file("notes.txt", b"n");
    let env = TestEnv::new(connector, RecordingConversionPipeline::completing()).await;

    let draft = CollectionDraft {
        s3_file_extensions: Some(".tif".to_string()),
        ..s3_draft("plate")
    };
    assert_rolled_back(
        &env,
        draft,
        "No files found with the requested file extensions",
    )
    .await;
    assert_eq!(env.connectors.connector().fetch_count(), 0);
}

#[tokio::test]
async fn test_progress_events_follow_import() {
    let connector = MockConnector::new()
        .with_file("a.tif", b"a")
        .with_failing_file("broken.tif");
    let env = TestEnv::new(connector, RecordingConversionPipeline::completing()).await;
    let mut progress = env.manager.imports().subscribe_all();

    let created = env
        .manager
        .create_collection(&alice(), s3_draft("plate"))
        .await
        .unwrap();
    env.manager.imports().wait(&created.id).await.unwrap().unwrap();

    assert_eq!(
        next_event(&mut progress).await,
        ImportProgress::Started {
            collection_id: created.id.clone(),
            total: 2,
        }
    );
    match next_event(&mut progress).await {
        ImportProgress::FileRegistered { file_name, .. } => assert_eq!(file_name, "a.tif"),
        other => panic!("Unexpected progress {:?}", other),
    }
    match next_event(&mut progress).await {
        ImportProgress::FileFailed {
            file_name, error, ..
        } => {
            assert_eq!(file_name, "broken.tif");
            assert!(error.contains("Simulated fetch failure"));
        }
        other => panic!("Unexpected progress {:?}", other),
    }
    assert_eq!(
        next_event(&mut progress).await,
        ImportProgress::Complete {
            collection_id: created.id.clone(),
            imported: 1,
            failed: 1,
        }
    );
}

#[tokio::test]
async fn test_fetch_failure_marks_only_that_image() {
    let connector = MockConnector::new()
        .with_file("a.tif", b"aa")
        .with_failing_file("broken.tif")
        .with_file("c.tif", b"cc");
    let env = TestEnv::new(connector, RecordingConversionPipeline::completing()).await;

    let created = env
        .manager
        .create_collection(&alice(), s3_draft("plate"))
        .await
        .unwrap();
    let summary = env
        .manager
        .imports()
        .wait(&created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((summary.imported, summary.failed), (2, 1));

    let images = env.database.get_images_for_collection(&created.id).await.unwrap();
    assert_eq!(images.len(), 3);
    let broken = images.iter().find(|i| i.file_name == "broken.tif").unwrap();
    assert!(broken.import_error && !broken.importing);
    assert_eq!(images.iter().filter(|i| i.import_error).count(), 1);

    let stored = env.collection(&created.id).await.unwrap();
    assert_eq!(stored.import_status, ImportStatus::Ready);
    assert_eq!(stored.counters.number_of_images, 3);
    assert_eq!(stored.counters.number_importing_images, 0);
    assert_eq!(stored.counters.number_of_import_errors, 1);
    assert_eq!(env.connectors.connector().fetch_count(), 3);
}

#[tokio::test]
async fn test_unknown_sizes_are_resolved_after_fetch() {
    let connector = MockConnector::new()
        .with_unsized_file("a.tif", b"12345")
        .with_file("b.tif", b"123");
    let env = TestEnv::new(connector, RecordingConversionPipeline::completing()).await;

    let created = env
        .manager
        .create_collection(&alice(), gdrive_draft("drive", "/run1"))
        .await
        .unwrap();
    env.manager.imports().wait(&created.id).await.unwrap().unwrap();

    let images = env.database.get_images_for_collection(&created.id).await.unwrap();
    let a = images.iter().find(|i| i.file_name == "a.tif").unwrap();
    assert_eq!(a.size_bytes, 5);

    let stored = env.collection(&created.id).await.unwrap();
    assert_eq!(stored.counters.images_total_size, 8);
}

#[tokio::test]
async fn test_staged_files_are_handed_to_pipeline() {
    let connector = MockConnector::new().with_file("a.tif", b"pixels");
    let env = TestEnv::new(connector, RecordingConversionPipeline::holding()).await;

    let created = env
        .manager
        .create_collection(&alice(), s3_draft("plate"))
        .await
        .unwrap();
    env.manager.imports().wait(&created.id).await.unwrap().unwrap();

    let requests = env.pipeline.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.collection_id, created.id);
    assert_eq!(request.image.file_name, "a.tif");
    assert_eq!(request.completion.image_id(), request.image.id);
    assert_eq!(
        request.source_path,
        env.manager.storage().staging_folder(&created.id).join("a.tif")
    );
    assert_eq!(tokio::fs::read(&request.source_path).await.unwrap(), b"pixels");
}

#[tokio::test]
async fn test_conversion_failures_are_counted() {
    let connector = MockConnector::new()
        .with_file("a.tif", b"a")
        .with_file("b.tif", b"b");
    let env = TestEnv::new(connector, RecordingConversionPipeline::failing_conversion()).await;

    let created = env
        .manager
        .create_collection(&alice(), s3_draft("plate"))
        .await
        .unwrap();
    let summary = env
        .manager
        .imports()
        .wait(&created.id)
        .await
        .unwrap()
        .unwrap();

    // Handed off successfully, failed later in extraction
    assert_eq!(summary.imported, 2);
    let stored = env.collection(&created.id).await.unwrap();
    assert_eq!(stored.counters.number_of_import_errors, 2);
    assert_eq!(stored.counters.number_importing_images, 0);
    assert_eq!(stored.state(), CollectionState::ImportFailed);
}

#[tokio::test]
async fn test_rejected_submission_fails_the_file() {
    let connector = MockConnector::new().with_file("a.tif", b"a");
    let env = TestEnv::new(connector, RecordingConversionPipeline::rejecting()).await;

    let created = env
        .manager
        .create_collection(&alice(), s3_draft("plate"))
        .await
        .unwrap();
    let summary = env
        .manager
        .imports()
        .wait(&created.id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!((summary.imported, summary.failed), (0, 1));
    let stored = env.collection(&created.id).await.unwrap();
    assert_eq!(stored.counters.number_of_import_errors, 1);
    assert_eq!(stored.counters.number_importing_images, 0);
}

#[tokio::test]
async fn test_conversion_completion_applies_once() {
    let connector = MockConnector::new()
        .with_file("a.tif", b"a")
        .with_file("b.tif", b"b");
    let env = TestEnv::new(connector, RecordingConversionPipeline::holding()).await;

    let created = env
        .manager
        .create_collection(&alice(), s3_draft("plate"))
        .await
        .unwrap();
    env.manager.imports().wait(&created.id).await.unwrap().unwrap();
    assert!(!env.manager.imports().is_running(&created.id));

    let requests = env.pipeline.requests();
    let first = requests[0].image.id.clone();

    let imports = env.manager.imports();
    assert!(imports
        .complete_conversion(&first, ConversionOutcome::Failed("bad tiff".to_string()))
        .await
        .unwrap());
    assert!(!imports
        .complete_conversion(&first, ConversionOutcome::Converted)
        .await
        .unwrap());
    assert!(!requests[0]
        .completion
        .complete(ConversionOutcome::Converted)
        .await
        .unwrap());

    let stored = env.collection(&created.id).await.unwrap();
    assert_eq!(stored.counters.number_importing_images, 1);
    assert_eq!(stored.counters.number_of_import_errors, 1);

    let err = imports
        .complete_conversion("no-such-image", ConversionOutcome::Converted)
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::NotFound(_)));
}

#[tokio::test]
async fn test_collection_subscription_only_sees_its_collection() {
    let connector = MockConnector::new().with_file("a.tif", b"a");
    let env = TestEnv::new(connector, RecordingConversionPipeline::completing()).await;

    let first = env
        .manager
        .create_collection(&alice(), s3_draft("first"))
        .await
        .unwrap();
    env.manager.imports().wait(&first.id).await.unwrap().unwrap();

    let mut first_progress = env.manager.imports().subscribe_collection(first.id.clone());
    let mut all_progress = env.manager.imports().subscribe_all();

    let second = env
        .manager
        .create_collection(&alice(), s3_draft("second"))
        .await
        .unwrap();
    env.manager.imports().wait(&second.id).await.unwrap().unwrap();

    loop {
        let event = next_event(&mut all_progress).await;
        assert_eq!(event.collection_id(), second.id);
        if matches!(event, ImportProgress::Complete { .. }) {
            break;
        }
    }

    // Dispatch is in order, so anything for the first collection would be here by now
    assert!(first_progress.try_recv().is_err());
}

#[tokio::test]
async fn test_finished_imports_are_not_held_forever() {
    let connector = MockConnector::new().with_file("a.tif", b"a");
    let env = TestEnv::new(connector, RecordingConversionPipeline::completing()).await;
    let imports = env.manager.imports();

    let mut launched = Vec::new();
    for name in ["first", "second", "third"] {
        let created = env
            .manager
            .create_collection(&alice(), s3_draft(name))
            .await
            .unwrap();

        // Nobody waits: let the import finish on its own
        tokio::time::timeout(Duration::from_secs(5), async {
            while imports.is_running(&created.id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Import did not finish");
        launched.push(created.id);
    }

    // Each launch drops the tasks that finished before it
    assert_eq!(imports.tracked_imports(), 1);
    assert!(imports.wait(&launched[0]).await.is_none());
    assert!(imports.wait(&launched[2]).await.unwrap().is_ok());
    assert_eq!(imports.tracked_imports(), 0);

    for id in &launched {
        let stored = env.collection(id).await.unwrap();
        assert_eq!(stored.counters.number_of_images, 1);
    }
}
