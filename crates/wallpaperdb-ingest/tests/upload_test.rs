mod helpers;

use helpers::fixtures::{jpeg_bytes, mp4_bytes, png_bytes};
use helpers::{harness, harness_with, upload_request, HarnessConfig};

use wallpaperdb_core::events::{WallpaperUploadedEvent, SUBJECT_WALLPAPER_UPLOADED};
use wallpaperdb_core::{AppError, FileType, UploadState};
use wallpaperdb_ingest::UploadStatus;
use wallpaperdb_db::WallpaperStore;
use wallpaperdb_storage::ObjectStorage;

#[tokio::test]
async fn test_happy_path_upload() {
    let h = harness();
    let bytes = jpeg_bytes(1920, 1080);

    let response = h
        .orchestrator
        .handle_upload(upload_request("u1", bytes.clone(), "sunset beach.jpg"))
        .await
        .unwrap();

    assert_eq!(response.status, UploadStatus::Processing);

    let record = h.store.get(&response.id).await.unwrap().unwrap();
    assert_eq!(record.upload_state, UploadState::Processing);
    assert_eq!(record.file_type, Some(FileType::Image));
    assert_eq!(record.mime_type.as_deref(), Some("image/jpeg"));
    assert_eq!(record.width, Some(1920));
    assert_eq!(record.height, Some(1080));
    assert_eq!(record.aspect_ratio, Some(1.7778));
    assert_eq!(record.file_size_bytes, Some(bytes.len() as i64));
    assert_eq!(record.original_filename.as_deref(), Some("sunsetbeach.jpg"));
    assert_eq!(record.storage_bucket.as_deref(), Some("wallpapers"));

    // object lives at <id>/original.jpg
    let key = format!("{}/original.jpg", response.id);
    assert_eq!(record.storage_key.as_deref(), Some(key.as_str()));
    assert!(h.storage.exists(&key).await.unwrap());

    // exactly one announcement, carrying matching metadata
    let published = h.bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].subject, SUBJECT_WALLPAPER_UPLOADED);
    let event = WallpaperUploadedEvent::parse(&published[0].payload).unwrap();
    assert_eq!(event.wallpaper.id, response.id.to_string());
    assert_eq!(event.wallpaper.user_id, "u1");
    assert_eq!(event.wallpaper.width, 1920);
    assert_eq!(event.wallpaper.storage_key, key);
}

#[tokio::test]
async fn test_duplicate_upload_collapses_to_original() {
    let h = harness();
    let bytes = jpeg_bytes(1280, 720);

    let first = h
        .orchestrator
        .handle_upload(upload_request("u1", bytes.clone(), "a.jpg"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .handle_upload(upload_request("u1", bytes.clone(), "b.jpg"))
        .await
        .unwrap();

    assert_eq!(second.status, UploadStatus::AlreadyUploaded);
    assert_eq!(second.id, first.id);

    // no new object, no new event
    assert_eq!(h.storage.list(None).await.unwrap().len(), 1);
    assert_eq!(h.bus.published_on(SUBJECT_WALLPAPER_UPLOADED), 1);
}

#[tokio::test]
async fn test_dedup_is_per_user() {
    let h = harness();
    let bytes = png_bytes(800, 600);

    let first = h
        .orchestrator
        .handle_upload(upload_request("u1", bytes.clone(), "a.png"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .handle_upload(upload_request("u2", bytes, "a.png"))
        .await
        .unwrap();

    assert_eq!(second.status, UploadStatus::Processing);
    assert_ne!(second.id, first.id);
    assert_eq!(h.storage.list(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_oversize_valid_image_is_too_large() {
    let h = harness_with(HarnessConfig {
        max_file_size_bytes: 1_024,
        ..HarnessConfig::default()
    });
    let err = h
        .orchestrator
        .handle_upload(upload_request("u1", jpeg_bytes(640, 480), "big.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::FileTooLarge { .. }));
}

#[tokio::test]
async fn test_oversize_unknown_format_reports_size_not_format() {
    let h = harness_with(HarnessConfig {
        max_file_size_bytes: 1_024,
        ..HarnessConfig::default()
    });
    // garbage payload over the cap: the size error wins
    let err = h
        .orchestrator
        .handle_upload(upload_request("u1", vec![0xAB; 4_096], "blob.bin"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::FileTooLarge { .. }));
}

#[tokio::test]
async fn test_unrecognized_bytes_are_invalid_format() {
    let h = harness();
    let err = h
        .orchestrator
        .handle_upload(upload_request("u1", b"not an image at all".to_vec(), "x.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidFormat(_)));
    // validation failures never write a record
    assert!(h.store.snapshot().is_empty());
}

#[tokio::test]
async fn test_video_bytes_are_rejected() {
    let h = harness();
    let err = h
        .orchestrator
        .handle_upload(upload_request("u1", mp4_bytes(), "clip.mp4"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidFormat(_)));
}

#[tokio::test]
async fn test_undersized_image_dimensions() {
    let h = harness();
    let err = h
        .orchestrator
        .handle_upload(upload_request("u1", png_bytes(8, 8), "tiny.png"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::DimensionsOutOfBounds {
            width: 8,
            height: 8
        }
    ));
}

#[tokio::test]
async fn test_missing_file_and_user() {
    let h = harness();
    let err = h
        .orchestrator
        .handle_upload(upload_request("u1", Vec::new(), "empty.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MissingFile));

    let err = h
        .orchestrator
        .handle_upload(upload_request("  ", png_bytes(100, 100), "a.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MissingUserId));
}

#[tokio::test]
async fn test_publish_failure_leaves_record_stored_and_succeeds() {
    let h = harness();
    h.bus.set_fail_publish(true);

    let response = h
        .orchestrator
        .handle_upload(upload_request("u1", jpeg_bytes(1024, 768), "a.jpg"))
        .await
        .unwrap();

    // upload succeeded from the caller's point of view
    assert_eq!(response.status, UploadStatus::Processing);

    let record = h.store.get(&response.id).await.unwrap().unwrap();
    assert_eq!(record.upload_state, UploadState::Stored);
    assert!(record.has_complete_metadata());
    assert_eq!(h.bus.published().len(), 0);
}

#[tokio::test]
async fn test_storage_failure_marks_record_failed() {
    let h = harness();
    h.storage.set_fail_puts(true);

    let err = h
        .orchestrator
        .handle_upload(upload_request("u1", jpeg_bytes(1024, 768), "a.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Storage(_)));

    let records = h.store.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].upload_state, UploadState::Failed);
    assert!(records[0]
        .processing_error
        .as_deref()
        .unwrap()
        .contains("simulated outage"));

    // a failed attempt does not block the retry once storage recovers
    h.storage.set_fail_puts(false);
    let response = h
        .orchestrator
        .handle_upload(upload_request("u1", jpeg_bytes(1024, 768), "a.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status, UploadStatus::Processing);
}

#[tokio::test]
async fn test_traceparent_propagates_to_event() {
    let h = harness();
    let mut request = upload_request("u1", png_bytes(640, 480), "t.png");
    request.traceparent =
        Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string());

    h.orchestrator.handle_upload(request).await.unwrap();

    let published = h.bus.published();
    assert_eq!(
        published[0].headers.get("traceparent").map(String::as_str),
        Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
    );
}

#[tokio::test]
async fn test_rate_limit_headers_count_down() {
    let h = harness_with(HarnessConfig {
        rate_max: 2,
        ..HarnessConfig::default()
    });

    let first = h
        .orchestrator
        .handle_upload(upload_request("u1", png_bytes(100, 100), "a.png"))
        .await
        .unwrap();
    assert_eq!(first.rate_limit.limit, 2);
    assert_eq!(first.rate_limit.remaining, 1);

    let second = h
        .orchestrator
        .handle_upload(upload_request("u1", png_bytes(101, 101), "b.png"))
        .await
        .unwrap();
    assert_eq!(second.rate_limit.remaining, 0);

    let err = h
        .orchestrator
        .handle_upload(upload_request("u1", png_bytes(102, 102), "c.png"))
        .await
        .unwrap_err();
    match err {
        AppError::RateLimited {
            retry_after_secs,
            max,
            ..
        } => {
            assert!(retry_after_secs > 0);
            assert_eq!(max, 2);
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
}
