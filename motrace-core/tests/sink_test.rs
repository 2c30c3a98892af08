//! Trajectory export

use chrono::{Local, TimeZone};
use motrace_core::{
    trajectory_file_name, BoundingBox, FanoutSink, JsonFileSink, LogSink, MemorySink, ObjectId,
    PipelineSession, RecordedFrame, ReplaySegmenter, ReplaySource, Sink, Snapshot, SnapshotRecord,
    TrackingConfig, TrackingError, TrajectoryLog,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn snapshot(frame: u64, id: u64, velocity: f64) -> Snapshot {
    let mut records = BTreeMap::new();
    records.insert(
        ObjectId::new(id),
        SnapshotRecord {
            frame,
            x_mm: 10.0,
            y_mm: 12.34567,
            displacement_mm: 0.25,
            average_velocity_mm_s: velocity,
            size_mm: 160.0,
        },
    );
    Snapshot {
        frame_index: frame,
        processing_latency: Duration::from_micros(250),
        records,
    }
}

#[tokio::test]
async fn test_json_sink_writes_on_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip_20240101_120000.json");
    let mut sink = JsonFileSink::new(&path);

    sink.accept(snapshot(0, 1, 1.5)).await.unwrap();
    sink.accept(snapshot(5, 1, 2.5)).await.unwrap();
    sink.accept(snapshot(5, 2, 4.0)).await.unwrap();
    assert!(!path.exists());

    sink.flush().await.unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    let log = TrajectoryLog::from_json(&content).unwrap();

    assert_eq!(log.ids().collect::<Vec<_>>(), vec![ObjectId::new(1), ObjectId::new(2)]);
    let points = log.points(ObjectId::new(1)).unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[1].frame, 5);
    assert_eq!(points[0].y_mm, 12.346);

    let raw: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert!(raw["ID_2"].is_array());
}

#[tokio::test]
async fn test_json_sink_skips_empty_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nothing.json");
    let mut sink = JsonFileSink::new(&path);

    sink.accept(Snapshot {
        frame_index: 0,
        processing_latency: Duration::ZERO,
        records: BTreeMap::new(),
    })
    .await
    .unwrap();
    sink.flush().await.unwrap();

    assert!(!path.exists());
    assert!(sink.log().is_empty());
}

#[tokio::test]
async fn test_json_sink_unwritable_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("out.json");
    let mut sink = JsonFileSink::new(&path);
    sink.accept(snapshot(0, 1, 1.0)).await.unwrap();

    let err = sink.flush().await.unwrap_err();
    assert!(matches!(err, TrackingError::Sink(_)));
    assert!(!err.is_terminal());
}

#[tokio::test]
async fn test_pipeline_export_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let now = Local.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap();
    let path = dir
        .path()
        .join(trajectory_file_name(Path::new("/data/parking_lot.mp4"), &now));

    let frames = (0..10)
        .map(|i| RecordedFrame::new(vec![BoundingBox::centered(100 + i * 6, 100, 40, 40)]))
        .collect();
    let mut config = TrackingConfig::default();
    config.tracker.appearance_debounce_secs = 0.0;

    let memory = MemorySink::new();
    let sink = FanoutSink::new(vec![
        Box::new(JsonFileSink::new(&path)),
        Box::new(LogSink),
        Box::new(memory.clone()),
    ]);

    let session = PipelineSession::start(
        config,
        ReplaySource::from_frames(frames, 30.0),
        ReplaySegmenter,
        Box::new(sink),
    )
    .unwrap();
    let summary = session.wait().await.unwrap();
    assert_eq!(summary.snapshots_delivered, 2);

    assert!(path.ends_with("parking_lot_20250601_083000.json"));
    let log = TrajectoryLog::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    // frame 0 has no velocity yet; frame 5 is the only exported row
    let points = log.points(ObjectId::new(1)).unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].frame, 5);
    assert_eq!(points[0].displacement_mm, 3.0);
    assert_eq!(memory.flush_count(), 1);
}
