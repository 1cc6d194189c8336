#![cfg(feature = "test-utils")]

mod support;
use crate::support::{alice, bob, s3_draft, TestEnv};
use image_collections::access::Caller;
use image_collections::db::DbMetadataFile;
use image_collections::import::ConversionOutcome;
use image_collections::library::{CollectionDraft, CollectionError, CollectionPatch};
use image_collections::test_support::{MockConnector, RecordingConversionPipeline};

fn five_images() -> MockConnector {
    (1..=5).fold(MockConnector::new(), |connector, i| {
        connector.with_file(&format!("img_{:02}.tif", i), b"pixels")
    })
}

#[tokio::test]
async fn test_delete_removes_records_and_folders() {
    let env = TestEnv::new(five_images(), RecordingConversionPipeline::holding()).await;

    let created = env
        .manager
        .create_collection(&alice(), s3_draft("plate"))
        .await
        .unwrap();
    env.manager.imports().wait(&created.id).await.unwrap().unwrap();
    env.manager
        .counters()
        .register_metadata_file(&DbMetadataFile::new(&created.id, "positions.csv", 42))
        .await
        .unwrap();

    let storage = env.manager.storage();
    let staging = storage.staging_folder(&created.id);
    assert!(staging.join("img_01.tif").exists());
    let finalized = storage.collection_folder(&created.id);
    tokio::fs::create_dir_all(&finalized).await.unwrap();
    tokio::fs::write(finalized.join("img_01.ome.tif"), b"converted")
        .await
        .unwrap();

    assert_eq!(
        env.database
            .get_images_for_collection(&created.id)
            .await
            .unwrap()
            .len(),
        5
    );

    let report = env
        .manager
        .delete_collection(&alice(), &created.id)
        .await
        .expect("Failed to delete collection");

    assert!(report.failed.is_empty());
    assert!(report.removed.contains(&staging));
    assert!(report.removed.contains(&finalized));
    assert!(!staging.exists());
    assert!(!finalized.exists());

    assert!(env.collection(&created.id).await.is_none());
    assert!(env
        .database
        .get_images_for_collection(&created.id)
        .await
        .unwrap()
        .is_empty());
    assert!(env
        .database
        .get_metadata_files_for_collection(&created.id)
        .await
        .unwrap()
        .is_empty());

    // Conversions finishing after the delete are ignored
    env.pipeline.complete_all(ConversionOutcome::Converted).await;
    assert!(env.collection(&created.id).await.is_none());
}

#[tokio::test]
async fn test_delete_without_folders_succeeds() {
    let env = TestEnv::empty().await;

    let created = env
        .manager
        .create_collection(&alice(), CollectionDraft::named("empty"))
        .await
        .unwrap();

    let report = env
        .manager
        .delete_collection(&alice(), &created.id)
        .await
        .unwrap();
    assert!(report.removed.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_delete_missing_collection() {
    let env = TestEnv::empty().await;

    let err = env
        .manager
        .delete_collection(&alice(), "does-not-exist")
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::NotFound(_)));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_delete_authorization() {
    let env = TestEnv::empty().await;

    let created = env
        .manager
        .create_collection(&alice(), CollectionDraft::named("plate"))
        .await
        .unwrap();

    let err = env
        .manager
        .delete_collection(&bob(), &created.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::Forbidden(_)));

    env.manager
        .update_collection(&alice(), &created.id, CollectionPatch::lock())
        .await
        .unwrap();
    env.manager
        .update_collection(
            &alice(),
            &created.id,
            CollectionPatch {
                publicly_shared: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Owners can no longer delete once the collection is public
    let err = env
        .manager
        .delete_collection(&alice(), &created.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::Forbidden(_)));

    env.manager
        .delete_collection(&Caller::admin("root"), &created.id)
        .await
        .unwrap();
    assert!(env.collection(&created.id).await.is_none());
}

#[tokio::test]
async fn test_deleted_name_can_be_reused() {
    let env = TestEnv::empty().await;

    let first = env
        .manager
        .create_collection(&alice(), CollectionDraft::named("plate"))
        .await
        .unwrap();
    env.manager
        .delete_collection(&alice(), &first.id)
        .await
        .unwrap();

    let second = env
        .manager
        .create_collection(&alice(), CollectionDraft::named("plate"))
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_failed_folder_removal_does_not_fail_delete() {
    let env = TestEnv::with_config(
        MockConnector::new(),
        RecordingConversionPipeline::completing(),
        |config| {
            config.collections_folder = config.temp_folder.with_file_name("not-a-folder");
        },
    )
    .await;

    // A regular file where the collections folder should be: removing
    // `<file>/<id>` fails with something other than NotFound
    let blocker = env.config.collections_folder.clone();
    tokio::fs::write(&blocker, b"in the way").await.unwrap();

    let created = env
        .manager
        .create_collection(&alice(), CollectionDraft::named("plate"))
        .await
        .unwrap();
    env.manager
        .register_uploaded_image(&alice(), &created.id, "img.tif", 10)
        .await
        .unwrap();

    let report = env
        .manager
        .delete_collection(&alice(), &created.id)
        .await
        .expect("Delete should succeed despite cleanup failures");

    assert_eq!(
        report.failed,
        vec![env.manager.storage().collection_folder(&created.id)]
    );
    assert!(env.collection(&created.id).await.is_none());
    assert!(env
        .database
        .get_images_for_collection(&created.id)
        .await
        .unwrap()
        .is_empty());
    assert!(blocker.is_file());
}
