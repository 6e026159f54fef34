//! End-to-end compression through the real subprocess executor.

use crate::helpers::*;
use pixpress::errors::ToolError;
use pixpress::{Format, ImageService, PixpressError};

const INPUT_LEN: usize = 2_048_576;

#[tokio::test]
async fn test_compress_jpeg_end_to_end() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let input = sandbox.write_input("holiday.jpg", INPUT_LEN);
    let service = ImageService::from_config(&sandbox.config(&tool)).unwrap();

    let bytes = std::fs::read(&input).unwrap();
    let result = service
        .compress(&bytes, "holiday.jpg", Some(80), None)
        .await
        .unwrap();

    assert_eq!(result.format, Format::Jpeg);
    assert_eq!(result.quality, 80);
    assert_eq!(result.original_size, INPUT_LEN as u64);
    assert_eq!(result.compressed_size, 1000);
    assert!(result.compression_ratio > 99.0 && result.compression_ratio < 100.0);
    assert_eq!(result.id.as_str().len(), 32);
    assert!(result.download_url.ends_with(result.id.as_str()));

    // Only the compressed artifact remains.
    let names: Vec<String> = std::fs::read_dir(sandbox.storage())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![format!("{}_compressed.jpg", result.id)]);

    let artifact = service.retrieve(result.id.as_str()).await.unwrap();
    assert_eq!(artifact.mime_type, "image/jpeg");
    assert_eq!(artifact.size, 1000);
}

#[tokio::test]
async fn test_storage_root_with_shell_metacharacters() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let mut config = sandbox.config(&tool);
    config.storage.root_dir = sandbox.path().join("it's a $(dir); `x` & \"y\"");
    let service = ImageService::from_config(&config).unwrap();

    let result = service
        .compress(&[9u8; 5000], "scan.png", None, Some("webp"))
        .await
        .unwrap();

    assert_eq!(result.format, Format::Webp);
    assert_eq!(result.compressed_size, 1000);
    assert!(config
        .storage
        .root_dir
        .join(format!("{}_compressed.webp", result.id))
        .exists());
}

#[tokio::test]
async fn test_tool_failure_keeps_original_and_reports_stderr() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAILING_FFMPEG);
    let service = ImageService::from_config(&sandbox.config(&tool)).unwrap();

    let err = service
        .compress(b"not really a jpeg", "broken.jpg", None, None)
        .await
        .unwrap_err();

    match &err {
        PixpressError::Tool(ToolError::Failed { exit_code, stderr }) => {
            assert_eq!(*exit_code, Some(1));
            assert!(stderr.contains("Invalid data found when processing input"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let names: Vec<String> = std::fs::read_dir(sandbox.storage())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with("_original.jpg"));
}

#[tokio::test]
async fn test_hanging_tool_times_out() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", HANGING_FFMPEG);
    let service = ImageService::from_config(&sandbox.config(&tool)).unwrap();

    let started = std::time::Instant::now();
    let err = service
        .compress(b"data", "slow.jpg", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PixpressError::Tool(ToolError::Timeout { seconds: 1 })));
    assert_eq!(err.code(), "PROCESSING_TIMEOUT");
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(service.stats().in_flight, 0);
}

#[tokio::test]
async fn test_health_reports_fake_version() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let service = ImageService::from_config(&sandbox.config(&tool)).unwrap();
    let report = service.health().await;
    assert!(report.tool_available);
    assert_eq!(report.tool_version, "6.1-fake");
}

#[tokio::test]
async fn test_sweep_after_compress() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let mut config = sandbox.config(&tool);
    config.retention.retention_minutes = 0;
    let service = ImageService::from_config(&config).unwrap();

    let result = service.compress(b"abc", "a.bmp", None, None).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(service.sweep_now().await, 1);
    assert!(matches!(
        service.retrieve(result.id.as_str()).await,
        Err(PixpressError::NotFound { .. })
    ));
    assert_eq!(service.sweep_now().await, 0);
}
