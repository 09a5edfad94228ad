//! Session worker thread

use crate::export::{EventLog, EventRecord, FrameExporter, VideoExporter};
use crate::{SessionConfig, SessionError};
use camera_capture::{CameraError, FrameSource};
use dms::{DmsConfig, DmsError, FaceAnalysis, FaceDetector, FrameEvents, FrameProcessor, LandmarkPredictor, SessionState};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What happened to one frame read from the source
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FrameOutcome {
    Processed {
        events: FrameEvents,
        faces: Vec<FaceAnalysis>,
    },
    Skipped {
        reason: String,
    },
}

/// Per-frame report streamed to the session owner
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    /// Position in the source, starting at 0
    pub index: u64,
    pub outcome: FrameOutcome,
}

/// Totals for a finished session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub eyes_closed_frames: u64,
    pub yawning_frames: u64,
    /// PNG files written
    pub frames_exported: u64,
    /// Processed frames whose PNG, video or log write failed
    pub frames_export_failed: u64,
    /// Ended by a stop request rather than the end of the source
    pub stopped: bool,
}

/// Requests a running session to stop between frames
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owner side of a running session
pub struct SessionHandle {
    stop: StopHandle,
    reports: mpsc::UnboundedReceiver<FrameReport>,
    worker: JoinHandle<Result<SessionSummary, SessionError>>,
}

impl SessionHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Next frame report, `None` once the worker has finished
    pub async fn next_report(&mut self) -> Option<FrameReport> {
        self.reports.recv().await
    }

    /// Blocking variant of [`next_report`](Self::next_report) for non-async callers
    pub fn blocking_next_report(&mut self) -> Option<FrameReport> {
        self.reports.blocking_recv()
    }

    /// Wait for the worker; a model-load failure surfaces here
    pub fn join(self) -> Result<SessionSummary, SessionError> {
        self.worker.join().map_err(|_| SessionError::WorkerPanicked)?
    }
}

/// Headless monitoring session
pub struct Session;

impl Session {
    /// Spawn the worker thread.
    ///
    /// `open_source` and `factory` run on the worker thread, so cameras and
    /// face models are created and used on the same thread and need not be
    /// `Send`.
    pub fn spawn<O, S, F, D, L>(config: SessionConfig, open_source: O, factory: F) -> SessionHandle
    where
        O: FnOnce() -> Result<S, CameraError> + Send + 'static,
        S: FrameSource,
        F: FnOnce(&DmsConfig) -> Result<FrameProcessor<D, L>, DmsError> + Send + 'static,
        D: FaceDetector + 'static,
        L: LandmarkPredictor + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<FrameReport>();
        let stop = StopHandle(Arc::new(AtomicBool::new(false)));
        let worker_stop = stop.clone();

        let worker = std::thread::spawn(move || {
            let result = run(config, open_source, factory, worker_stop, tx);
            if let Err(e) = &result {
                error!("Session failed: {}", e);
            }
            result
        });

        SessionHandle {
            stop,
            reports: rx,
            worker,
        }
    }
}

fn run<O, S, F, D, L>(
    config: SessionConfig,
    open_source: O,
    factory: F,
    stop: StopHandle,
    tx: mpsc::UnboundedSender<FrameReport>,
) -> Result<SessionSummary, SessionError>
where
    O: FnOnce() -> Result<S, CameraError>,
    S: FrameSource,
    F: FnOnce(&DmsConfig) -> Result<FrameProcessor<D, L>, DmsError>,
    D: FaceDetector,
    L: LandmarkPredictor,
{
    let mut processor = factory(&config.dms)?;
    let mut source = open_source()?;
    let mut exporter = config.output_dir.as_deref().map(FrameExporter::create).transpose()?;
    let mut event_log = config.event_log.as_deref().map(EventLog::create).transpose()?;
    let frame_size = (config.dms.frame_width, config.dms.frame_height);
    let mut video = config
        .output_video
        .as_deref()
        .map(|path| VideoExporter::create(path, f64::from(config.source.fps.max(1)), frame_size))
        .transpose()?;

    let total = source.len_hint();
    info!("Session started ({} frames)", total.map_or_else(|| "unknown".to_string(), |n| n.to_string()));

    let mut state = SessionState::new();
    let mut summary = SessionSummary::default();

    while !stop.is_stopped() {
        let Some(next) = source.next_frame() else {
            break;
        };
        let index = summary.frames_read;
        summary.frames_read += 1;

        let result = next.map_err(DmsError::from).and_then(|frame| processor.process(&frame, &mut state));
        let outcome = match result {
            Ok(processed) => {
                summary.frames_processed += 1;
                if processed.events.eyes_closed {
                    summary.eyes_closed_frames += 1;
                }
                if processed.events.yawning {
                    summary.yawning_frames += 1;
                }

                let mut write_failed = false;
                if let Some(exporter) = exporter.as_mut() {
                    if let Err(e) = exporter.write(index, &processed.frame) {
                        warn!("Frame {} not exported: {}", index, e);
                        write_failed = true;
                    }
                }
                if let Some(video) = video.as_mut() {
                    if let Err(e) = video.write(&processed.frame) {
                        warn!("Frame {} not added to video: {}", index, e);
                        write_failed = true;
                    }
                }
                if let Some(log) = event_log.as_mut() {
                    if let Err(e) = log.append(&EventRecord::from_processed(index, &processed)) {
                        warn!("Frame {} not logged: {}", index, e);
                        write_failed = true;
                    }
                }
                if write_failed {
                    summary.frames_export_failed += 1;
                }

                FrameOutcome::Processed {
                    events: processed.events,
                    faces: processed.faces,
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping frame {}: {}", index, e);
                summary.frames_skipped += 1;
                FrameOutcome::Skipped { reason: e.to_string() }
            }
            Err(e) => return Err(e.into()),
        };

        if tx.send(FrameReport { index, outcome }).is_err() {
            debug!("Report receiver dropped");
        }

        if config.progress_interval > 0 && summary.frames_read % config.progress_interval == 0 {
            match total {
                Some(total) if total > 0 => info!(
                    "Progress: {}/{} frames ({:.0}%)",
                    summary.frames_read,
                    total,
                    summary.frames_read as f64 * 100.0 / total as f64
                ),
                _ => info!("Progress: {} frames", summary.frames_read),
            }
        }
    }

    if stop.is_stopped() {
        summary.stopped = true;
        info!("Session stopped after {} frames", summary.frames_read);
    }
    if let Some(log) = event_log.as_mut() {
        log.flush()?;
    }
    if let Some(video) = video {
        video.finish()?;
    }
    summary.frames_exported = exporter.as_ref().map_or(0, FrameExporter::written);

    info!(
        "Session finished: {} processed, {} skipped, {} eyes-closed, {} yawning",
        summary.frames_processed, summary.frames_skipped, summary.eyes_closed_frames, summary.yawning_frames
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{PixelData, VideoFrame};
    use dms::{FaceBbox, LandmarkSet, Point};
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::fs;
    use std::path::PathBuf;

    /// Frames handed out from memory
    struct MemorySource(VecDeque<Result<VideoFrame, CameraError>>);

    impl FrameSource for MemorySource {
        fn next_frame(&mut self) -> Option<Result<VideoFrame, CameraError>> {
            self.0.pop_front()
        }

        fn len_hint(&self) -> Option<usize> {
            Some(self.0.len())
        }
    }

    /// Endless gray frames
    struct EndlessSource(u32);

    impl FrameSource for EndlessSource {
        fn next_frame(&mut self) -> Option<Result<VideoFrame, CameraError>> {
            self.0 += 1;
            Some(Ok(gray_frame(self.0)))
        }
    }

    /// One face in the middle of every frame
    struct CentreFace;

    impl FaceDetector for CentreFace {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<FaceBbox>, DmsError> {
            Ok(vec![FaceBbox {
                x: 300.0,
                y: 200.0,
                width: 200.0,
                height: 200.0,
                confidence: 0.9,
            }])
        }
    }

    /// Landmarks with flat eyes: EAR 0 on every frame
    struct FlatEyes;

    impl LandmarkPredictor for FlatEyes {
        fn predict(&mut self, _frame: &RgbImage, face: &FaceBbox) -> Result<LandmarkSet, DmsError> {
            let (x, y) = (f64::from(face.x), f64::from(face.y));
            let mut points = vec![Point::new(x + 100.0, y + 140.0); 68];
            for (start, left) in [(36, x + 40.0), (42, x + 130.0)] {
                for (offset, dx) in [0.0, 10.0, 20.0, 30.0, 20.0, 10.0].into_iter().enumerate() {
                    points[start + offset] = Point::new(left + dx, y + 60.0);
                }
            }
            LandmarkSet::new(points)
        }
    }

    fn gray_frame(sequence: u32) -> VideoFrame {
        VideoFrame::with_pixels(PixelData::U8(vec![128; 16 * 12]), 16, 12, 1, 0, sequence)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("session-worker-{}-{}", std::process::id(), name));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn factory(config: &DmsConfig) -> Result<FrameProcessor<CentreFace, FlatEyes>, DmsError> {
        FrameProcessor::new(config.clone(), CentreFace, FlatEyes)
    }

    #[test]
    fn test_session_processes_exports_and_logs() {
        let dir = scratch_dir("full");
        let config = SessionConfig {
            output_dir: Some(dir.join("frames")),
            event_log: Some(dir.join("events.jsonl")),
            ..Default::default()
        };
        let source = MemorySource(
            vec![
                Ok(gray_frame(0)),
                Err(CameraError::Format("truncated file".into())),
                Ok(gray_frame(2)),
                Ok(VideoFrame::with_pixels(PixelData::U8(vec![0; 3]), 16, 12, 3, 0, 3)),
                Ok(gray_frame(4)),
            ]
            .into(),
        );

        let mut handle = Session::spawn(config, move || Ok(source), factory);
        let mut reports = Vec::new();
        while let Some(report) = handle.blocking_next_report() {
            reports.push(report);
        }
        let summary = handle.join().unwrap();

        assert_eq!(summary.frames_read, 5);
        assert_eq!(summary.frames_processed, 3);
        assert_eq!(summary.frames_skipped, 2);
        // flat eyes close on every frame, flagged from the third processed one
        assert_eq!(summary.eyes_closed_frames, 1);
        assert!(!summary.stopped);
        assert_eq!(summary.frames_exported, 3);
        assert_eq!(summary.frames_export_failed, 0);

        assert_eq!(reports.len(), 5);
        assert!(matches!(reports[1].outcome, FrameOutcome::Skipped { .. }));
        assert!(matches!(reports[3].outcome, FrameOutcome::Skipped { .. }));

        for index in [0, 2, 4] {
            assert!(dir.join("frames").join(format!("frame_{index:06}.png")).exists());
        }
        assert!(!dir.join("frames").join("frame_000001.png").exists());

        let log = fs::read_to_string(dir.join("events.jsonl")).unwrap();
        let records: Vec<EventRecord> = log.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        let frames: Vec<u64> = records.iter().map(|r| r.frame).collect();
        assert_eq!(frames, vec![0, 2, 4]);
        assert!(records.iter().all(|r| r.faces == 1));
        assert!(records[2].eyes_closed);
    }

    #[test]
    fn test_stop_ends_session_between_frames() {
        let mut handle = Session::spawn(SessionConfig::default(), || Ok(EndlessSource(0)), factory);
        for _ in 0..3 {
            assert!(handle.blocking_next_report().is_some());
        }
        handle.stop();
        while handle.blocking_next_report().is_some() {}

        let summary = handle.join().unwrap();
        assert!(summary.stopped);
        assert!(summary.frames_read >= 3);
    }

    #[test]
    fn test_model_load_failure_is_fatal() {
        let source = MemorySource(vec![Ok(gray_frame(0))].into());
        let mut handle = Session::spawn(SessionConfig::default(), move || Ok(source), |config: &DmsConfig| {
            FrameProcessor::from_config(config.clone())
        });

        assert!(handle.blocking_next_report().is_none());
        assert!(matches!(
            handle.join(),
            Err(SessionError::Dms(DmsError::ModelLoad(_)))
        ));
    }

    #[test]
    fn test_failed_export_does_not_end_session() {
        let dir = scratch_dir("export-failure");
        let frames = dir.join("frames");
        // a directory squatting on the second file name makes that write fail
        fs::create_dir_all(frames.join("frame_000001.png")).unwrap();
        let config = SessionConfig {
            output_dir: Some(frames.clone()),
            ..Default::default()
        };
        let source = MemorySource(vec![Ok(gray_frame(0)), Ok(gray_frame(1)), Ok(gray_frame(2))].into());

        let mut handle = Session::spawn(config, move || Ok(source), factory);
        let mut reports = Vec::new();
        while let Some(report) = handle.blocking_next_report() {
            reports.push(report);
        }
        let summary = handle.join().unwrap();

        assert_eq!(summary.frames_processed, 3);
        assert_eq!(summary.frames_exported, 2);
        assert_eq!(summary.frames_export_failed, 1);
        assert!(reports.iter().all(|r| matches!(r.outcome, FrameOutcome::Processed { .. })));
        assert!(frames.join("frame_000002.png").is_file());
    }

    #[test]
    fn test_source_open_failure_is_fatal() {
        let mut handle = Session::spawn(
            SessionConfig::default(),
            || -> Result<MemorySource, CameraError> { Err(CameraError::Open("no such device".into())) },
            factory,
        );

        assert!(handle.blocking_next_report().is_none());
        assert!(matches!(handle.join(), Err(SessionError::Source(CameraError::Open(_)))));
    }
}
