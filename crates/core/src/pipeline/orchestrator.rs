use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::capture::domain::frame_source::{SourceError, SourceOpener};
use crate::capture::domain::source_descriptor::SourceDescriptor;
use crate::capture::infrastructure::source_factory::FfmpegSourceOpener;
use crate::classification::domain::emotion_classifier::{ClassifierFactory, EmotionClassifier};
use crate::classification::infrastructure::onnx_ferplus_classifier::FerPlusClassifierFactory;
use crate::detection::domain::backend_kind::BackendKind;
use crate::detection::domain::detector_backend::DetectorFactory;
use crate::detection::infrastructure::backend_factory::ModelBackendFactory;
use crate::pipeline::domain::annotated_frame::AnnotatedFrame;
use crate::pipeline::domain::playback_controller::{
    InvalidTransition, PlaybackController, PlaybackError, PlaybackState, PlaybackStatus,
};
use crate::pipeline::domain::result_renderer::ResultRenderer;
use crate::pipeline::domain::session::{SessionCounters, SessionEvent, SessionSnapshot};
use crate::pipeline::infrastructure::backend_switch::BackendSwitch;
use crate::pipeline::infrastructure::capture_loop::{CaptureLoop, SeekRequest};
use crate::pipeline::infrastructure::face_worker_pool::FaceWorkerPool;
use crate::pipeline::infrastructure::frame_queue::{frame_queue, OverflowPolicy};
use crate::pipeline::infrastructure::presentation::{LatestFrameSlot, Presenter};
use crate::pipeline::infrastructure::processing_loop::{ProcessingContext, ProcessingLoop};
use crate::pipeline::infrastructure::run_state::RunState;
use crate::pipeline::pipeline_logger::{PipelineLogger, StdoutPipelineLogger};
use crate::recording::domain::image_writer::ImageWriter;
use crate::recording::domain::overlay_painter::OverlayPainter;
use crate::recording::domain::storage_error::StorageError;
use crate::recording::domain::video_writer::VideoWriter;
use crate::recording::infrastructure::ffmpeg_writer::FfmpegWriter;
use crate::recording::infrastructure::image_file_writer::ImageFileWriter;
use crate::recording::recorder::{
    save_photo, DeliveryPolicy, Recorder, RecordingSummary, RecordingTap,
};
use crate::shared::frame::SourceId;
use crate::shared::model_slot::{ModelSlot, Readiness};
use crate::shared::settings::PipelineSettings;
use crate::shared::source_metadata::SourceMetadata;

pub type VideoWriterFactory = Box<dyn Fn() -> Box<dyn VideoWriter> + Send + Sync>;
pub type LoggerFactory = Box<dyn Fn() -> Box<dyn PipelineLogger> + Send + Sync>;

/// Extra time the classifier watcher waits past the load timeout.
const READINESS_GRACE: Duration = Duration::from_secs(1);

/// The adapters an orchestrator runs on. Tests swap in stubs.
pub struct PipelineComponents {
    pub opener: Arc<dyn SourceOpener>,
    pub detectors: Arc<dyn DetectorFactory>,
    pub classifiers: Arc<dyn ClassifierFactory>,
    pub video_writers: VideoWriterFactory,
    pub image_writer: Box<dyn ImageWriter>,
    /// One logger per opened source.
    pub logger: LoggerFactory,
}

impl PipelineComponents {
    /// ffmpeg capture and recording, ONNX Runtime and rustface models.
    pub fn production(settings: &PipelineSettings) -> Self {
        Self {
            opener: Arc::new(FfmpegSourceOpener),
            detectors: Arc::new(ModelBackendFactory::from_settings(settings)),
            classifiers: Arc::new(FerPlusClassifierFactory::from_settings(settings)),
            video_writers: Box::new(|| -> Box<dyn VideoWriter> { Box::new(FfmpegWriter::new()) }),
            image_writer: Box::new(ImageFileWriter::new()),
            logger: Box::new(|| -> Box<dyn PipelineLogger> {
                Box::new(StdoutPipelineLogger::default())
            }),
        }
    }
}

struct ActiveSource {
    descriptor: SourceDescriptor,
    metadata: SourceMetadata,
    run: Arc<RunState>,
    seeks: Sender<SeekRequest>,
    capture: JoinHandle<()>,
    processing: JoinHandle<()>,
}

impl ActiveSource {
    /// Capture has stopped producing and every captured frame was either
    /// processed or dropped by backpressure.
    fn is_drained(&self) -> bool {
        let capture_done = self.capture.is_finished()
            || self.run.playback_state().map(|s| s.status) == Some(PlaybackStatus::Ended);
        let c = self.run.counters();
        let caught_up = c.processed + c.dropped_backpressure >= c.captured;
        capture_done && (caught_up || self.processing.is_finished())
    }
}

/// Owns the session: the open source, its capture and processing threads,
/// backend selection, the classifier, recording and presentation.
///
/// Every command goes through `&mut self` or reads shared state, so the
/// orchestrator is the session's single owner; callers observe it through
/// [`SessionSnapshot`]s and the [`SessionEvent`] stream.
pub struct PipelineOrchestrator {
    settings: PipelineSettings,
    opener: Arc<dyn SourceOpener>,
    video_writers: VideoWriterFactory,
    image_writer: Box<dyn ImageWriter>,
    logger: LoggerFactory,
    switch: Arc<BackendSwitch>,
    classifier: Arc<ModelSlot<dyn EmotionClassifier>>,
    pool: Arc<FaceWorkerPool>,
    tap: Arc<RecordingTap>,
    recorder: Recorder,
    painter: OverlayPainter,
    presentation: Arc<LatestFrameSlot>,
    presenter: Option<Presenter>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    active: Option<ActiveSource>,
    next_source_id: u64,
}

impl PipelineOrchestrator {
    /// Starts loading the configured backend and the classifier in the
    /// background. No source is open yet.
    pub fn new(settings: PipelineSettings, components: PipelineComponents) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let timeout = settings.model_load_timeout();

        let switch = Arc::new(BackendSwitch::new(
            components.detectors,
            timeout,
            events_tx.clone(),
        ));
        switch.request(settings.backend);

        let vocabulary = settings.vocabulary;
        let classifiers = components.classifiers;
        let classifier: Arc<ModelSlot<dyn EmotionClassifier>> =
            ModelSlot::spawn("emotion classifier", timeout, move || {
                classifiers.load(vocabulary)
            });
        watch_classifier(Arc::clone(&classifier), timeout, events_tx.clone());

        let tap = Arc::new(RecordingTap::new());
        Self {
            pool: Arc::new(FaceWorkerPool::new(settings.classifier_workers)),
            recorder: Recorder::new(Arc::clone(&tap)),
            settings,
            opener: components.opener,
            video_writers: components.video_writers,
            image_writer: components.image_writer,
            logger: components.logger,
            switch,
            classifier,
            tap,
            painter: OverlayPainter::new(),
            presentation: Arc::new(LatestFrameSlot::new()),
            presenter: None,
            events_tx,
            events_rx,
            active: None,
            next_source_id: 0,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Session notifications, in the order they happened.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    /// Presents the most recent annotated frame on `renderer`'s own
    /// thread, replacing any renderer attached before.
    pub fn attach_renderer(&mut self, renderer: Box<dyn ResultRenderer>) {
        if let Some(mut previous) = self.presenter.take() {
            previous.stop();
        }
        self.presenter = Some(Presenter::spawn(Arc::clone(&self.presentation), renderer));
        self.presentation
            .reset(self.current().map(|a| a.run.source()));
    }

    /// Opens `descriptor` and starts capturing from it, replacing the
    /// current source.
    ///
    /// The new source is opened before anything else changes: on failure
    /// the session keeps its previous source untouched.
    pub fn open_source(
        &mut self,
        descriptor: SourceDescriptor,
    ) -> Result<SourceMetadata, SourceError> {
        let source = self.opener.open(&descriptor)?;
        self.close_active();

        self.next_source_id += 1;
        let id = SourceId(self.next_source_id);
        let metadata = source.metadata().clone();
        let kind = metadata.kind;

        let playback = kind
            .supports_playback()
            .then(|| PlaybackController::new(metadata.duration));
        let run = Arc::new(RunState::new(id, playback));

        let (capacity, policy) = if kind.is_live() {
            (self.settings.live_queue_capacity, OverflowPolicy::DropOldest)
        } else {
            (self.settings.file_queue_capacity, OverflowPolicy::Block)
        };
        let (producer, frames) = frame_queue(capacity, policy, run.cancel_flag());
        let (seeks, seek_rx) = crossbeam_channel::unbounded();
        self.presentation.reset(Some(id));

        let capture = {
            let paced = self.settings.realtime_playback && kind.supports_playback();
            let capture = CaptureLoop::new(
                source,
                producer,
                seek_rx,
                Arc::clone(&run),
                self.events_tx.clone(),
                paced,
            );
            thread::spawn(move || capture.run())
        };
        let processing = {
            let ctx = ProcessingContext {
                switch: Arc::clone(&self.switch),
                classifier: Arc::clone(&self.classifier),
                pool: Arc::clone(&self.pool),
                tap: Arc::clone(&self.tap),
                presentation: Arc::clone(&self.presentation),
            };
            let processing = ProcessingLoop::new(
                frames,
                ctx,
                Arc::clone(&run),
                (self.logger)(),
                metadata.total_frames,
            );
            thread::spawn(move || processing.run())
        };

        log::info!(
            "Opened {descriptor}: {}x{} @ {:.2} fps ({kind})",
            metadata.width,
            metadata.height,
            metadata.fps
        );
        if let Some(state) = run.playback_state() {
            let _ = self.events_tx.send(SessionEvent::PlaybackChanged(state));
        }

        self.active = Some(ActiveSource {
            descriptor,
            metadata: metadata.clone(),
            run,
            seeks,
            capture,
            processing,
        });
        Ok(metadata)
    }

    /// Requests `kind` for subsequent frames. Takes effect at the next
    /// frame boundary once the backend has loaded.
    pub fn select_backend(&self, kind: BackendKind) {
        self.switch.request(kind);
    }

    pub fn pause(&self) -> Result<PlaybackState, PlaybackError> {
        self.transition(|p| p.pause())
    }

    pub fn resume(&self) -> Result<PlaybackState, PlaybackError> {
        self.transition(|p| p.resume())
    }

    /// Moves a file source to `position` (clamped to its duration) and
    /// leaves it paused there.
    pub fn seek(&self, position: Duration) -> Result<PlaybackState, PlaybackError> {
        let active = self.current().ok_or(PlaybackError::NoSource)?;
        let kind = active.metadata.kind;
        let target = active
            .run
            .with_playback(|p| p.begin_seek(position))
            .ok_or(PlaybackError::SeekUnsupported(kind))??;

        let (reply, answer) = crossbeam_channel::bounded(1);
        let abandoned = active.seeks.send(SeekRequest { target, reply }).is_err();
        let outcome = if abandoned {
            None
        } else {
            answer.recv().ok()
        };
        outcome.unwrap_or_else(|| {
            active.run.with_playback(|p| p.abort_seek());
            Err(PlaybackError::NoSource)
        })
    }

    /// Jumps `skip_frames` frames forward or back.
    pub fn skip(&self, forward: bool) -> Result<PlaybackState, PlaybackError> {
        let active = self.current().ok_or(PlaybackError::NoSource)?;
        let delta = active.metadata.frames_to_duration(self.settings.skip_frames);
        let target = active
            .run
            .with_playback(|p| p.offset_target(delta, forward))
            .ok_or(PlaybackError::SeekUnsupported(active.metadata.kind))?;
        self.seek(target)
    }

    /// Back to the start, paused.
    pub fn stop(&self) -> Result<PlaybackState, PlaybackError> {
        self.seek(Duration::ZERO)
    }

    /// Records annotated video of the current source to `destination`.
    ///
    /// File sources record every frame; live sources drop frames when
    /// storage falls behind.
    pub fn start_recording(&mut self, destination: &Path) -> Result<(), StorageError> {
        let Some(active) = self.current() else {
            return Err(StorageError::Open {
                path: destination.to_path_buf(),
                reason: "no source is open".to_string(),
            });
        };
        let policy = if active.metadata.kind.is_live() {
            DeliveryPolicy::Drop
        } else {
            DeliveryPolicy::Block
        };
        let metadata = active.metadata.clone();
        self.recorder.start(
            destination,
            &metadata,
            (self.video_writers)(),
            policy,
            self.settings.recorder_queue_capacity,
            self.events_tx.clone(),
        )
    }

    /// Finishes the recording in progress. `None` when nothing was recording.
    pub fn stop_recording(&mut self) -> Option<Result<RecordingSummary, StorageError>> {
        let outcome = self.recorder.stop()?;
        if let Ok(summary) = &outcome {
            let _ = self.events_tx.send(SessionEvent::RecordingStopped {
                destination: summary.destination.clone(),
                error: None,
            });
        }
        Some(outcome)
    }

    /// Saves the most recent annotated frame as a still image.
    pub fn capture_still(&self, path: &Path) -> Result<(), StorageError> {
        let latest = self.latest_frame().ok_or_else(|| StorageError::Write {
            sequence: 0,
            reason: "no frame has been processed yet".to_string(),
        })?;
        save_photo(self.image_writer.as_ref(), path, &latest, &self.painter)?;
        log::info!("Saved photo to {}", path.display());
        Ok(())
    }

    /// Most recently processed frame of the current source.
    pub fn latest_frame(&self) -> Option<AnnotatedFrame> {
        self.current().and_then(|a| a.run.latest())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let run = self.current().map(|a| &a.run);
        let counters = SessionCounters {
            dropped_presentation: self.presentation.skipped(),
            dropped_recorder: self.recorder.dropped(),
            ..run.map(|r| r.counters()).unwrap_or_default()
        };
        SessionSnapshot {
            source: self.current().map(|a| a.descriptor.clone()),
            source_id: run.map(|r| r.source()),
            active_backend: run
                .and_then(|r| r.active_backend())
                .or_else(|| self.switch.current_kind()),
            requested_backend: self.switch.requested_kind().unwrap_or(self.settings.backend),
            classifier: self.classifier.readiness(),
            playback: run.and_then(|r| r.playback_state()),
            recording: self.recorder.status(),
            counters,
        }
    }

    /// Waits until the requested backend and the classifier have either
    /// loaded or failed. `false` on timeout.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let settled = self.switch.readiness() != Readiness::Loading
                && self.classifier.readiness() != Readiness::Loading;
            if settled {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Waits until the current source has no more frames to process.
    /// Live sources never drain on their own.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let Some(active) = self.current() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !active.is_drained() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Stops capture, processing, recording and presentation.
    pub fn close(&mut self) {
        self.close_active();
        if let Some(mut presenter) = self.presenter.take() {
            presenter.stop();
        }
    }

    fn transition(
        &self,
        apply: impl FnOnce(&mut PlaybackController) -> Result<(), InvalidTransition>,
    ) -> Result<PlaybackState, PlaybackError> {
        let active = self.current().ok_or(PlaybackError::NoSource)?;
        let state = active
            .run
            .with_playback(|p| apply(p).map(|()| p.state()))
            .ok_or(PlaybackError::NotFileBacked(active.metadata.kind))??;
        let _ = self.events_tx.send(SessionEvent::PlaybackChanged(state));
        Ok(state)
    }

    /// The open source, unless its device failed mid-stream. A faulted
    /// source stays in `active` only until its threads are joined.
    fn current(&self) -> Option<&ActiveSource> {
        self.active.as_ref().filter(|a| !a.run.is_faulted())
    }

    /// Cancels the current source at the next frame boundary and waits for
    /// its threads, so nothing from it is delivered afterwards.
    fn close_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.run.cancel();
        drop(active.seeks);
        if active.capture.join().is_err() {
            log::warn!("Capture thread for {} panicked", active.descriptor);
        }
        if active.processing.join().is_err() {
            log::warn!("Processing thread for {} panicked", active.descriptor);
        }
        match self.stop_recording() {
            Some(Err(e)) => log::warn!("Recording ended with an error: {e}"),
            Some(Ok(_)) | None => {}
        }
        self.presentation.reset(None);
        log::info!("Closed {}", active.descriptor);
    }
}

impl Drop for PipelineOrchestrator {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reports a classifier that failed to load as a readiness fault.
fn watch_classifier(
    slot: Arc<ModelSlot<dyn EmotionClassifier>>,
    timeout: Duration,
    events: Sender<SessionEvent>,
) {
    thread::spawn(move || {
        if let Readiness::Failed(reason) = slot.wait(timeout + READINESS_GRACE) {
            let _ = events.send(SessionEvent::ReadinessFault {
                model: slot.label().to_string(),
                reason,
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::domain::frame_source::FrameSource;
    use crate::capture::domain::source_descriptor::SourceKind;
    use crate::classification::domain::emotion::{Emotion, EmotionVocabulary};
    use crate::classification::domain::emotion_classifier::ClassificationError;
    use crate::classification::domain::emotion_result::EmotionResult;
    use crate::detection::domain::detector_backend::{DetectError, DetectorBackend};
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use crate::shared::frame::Frame;
    use crate::shared::model_slot::ModelLoadError;
    use crate::shared::region::{BoundingBox, FaceRegion};
    use approx::assert_relative_eq;
    use std::path::PathBuf;
    use std::sync::Mutex;

    const WIDTH: u32 = 32;
    const HEIGHT: u32 = 24;

    #[derive(Clone, Debug, PartialEq)]
    enum SourceLog {
        Read(Duration),
        Seek(Duration),
    }

    /// Synthetic source: `frames` frames at `fps`, `None` for endless.
    struct StubSource {
        metadata: SourceMetadata,
        frames: Option<usize>,
        position: usize,
        interval: Duration,
        gate: Option<crossbeam_channel::Receiver<()>>,
        /// The device goes away once this many frames were read.
        fail_after: Option<usize>,
        log: Arc<Mutex<Vec<SourceLog>>>,
    }

    impl FrameSource for StubSource {
        fn metadata(&self) -> &SourceMetadata {
            &self.metadata
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            if let Some(gate) = self.gate.take() {
                let _ = gate.recv();
            }
            if self.fail_after == Some(self.position) {
                return Err(SourceError::Device("unplugged".into()));
            }
            if self.frames.is_some_and(|n| self.position >= n) {
                return Ok(None);
            }
            thread::sleep(self.interval);
            let ts = if self.metadata.fps > 0.0 {
                Duration::from_secs_f64(self.position as f64 / self.metadata.fps)
            } else {
                Duration::ZERO
            };
            self.log.lock().unwrap().push(SourceLog::Read(ts));
            let data = vec![128; (WIDTH * HEIGHT * 3) as usize];
            let frame = Frame::new(data, WIDTH, HEIGHT, 3, self.position, ts);
            self.position += 1;
            Ok(Some(frame))
        }

        fn seek(&mut self, position: Duration) -> Result<(), SourceError> {
            if self.metadata.kind != SourceKind::VideoFile {
                return Err(SourceError::SeekUnsupported(self.metadata.kind));
            }
            self.position = (position.as_secs_f64() * self.metadata.fps).ceil() as usize;
            self.log.lock().unwrap().push(SourceLog::Seek(position));
            Ok(())
        }

        fn close(&mut self) {}
    }

    /// `camera:0` is endless and fast, `camera:1` is unplugged after five
    /// frames, `camera:9` is missing, `*.png` is a still, anything else a
    /// 25 fps clip of `clip_frames` frames.
    #[derive(Default)]
    struct StubOpener {
        clip_frames: usize,
        /// Clips report no duration, like some raw streams.
        unknown_duration: bool,
        gate: Mutex<Option<crossbeam_channel::Receiver<()>>>,
        log: Arc<Mutex<Vec<SourceLog>>>,
    }

    impl SourceOpener for StubOpener {
        fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, SourceError> {
            let (kind, frames, fps, interval) = match descriptor {
                SourceDescriptor::Camera { index: 9 } => {
                    return Err(SourceError::unavailable(descriptor, "no such device"))
                }
                SourceDescriptor::Camera { .. } => {
                    (SourceKind::Camera, None, 30.0, Duration::from_millis(2))
                }
                SourceDescriptor::Image(_) => (SourceKind::Image, Some(1), 0.0, Duration::ZERO),
                SourceDescriptor::VideoFile(_) => (
                    SourceKind::VideoFile,
                    Some(self.clip_frames),
                    25.0,
                    Duration::ZERO,
                ),
            };
            let duration = (fps > 0.0).then(|| {
                Duration::from_secs_f64(self.clip_frames as f64 / fps)
            });
            Ok(Box::new(StubSource {
                metadata: SourceMetadata {
                    kind,
                    width: WIDTH,
                    height: HEIGHT,
                    fps: if kind == SourceKind::Image { 0.0 } else { fps },
                    duration: duration
                        .filter(|_| kind == SourceKind::VideoFile && !self.unknown_duration),
                    total_frames: frames.unwrap_or(0),
                    codec: "raw".into(),
                    source_path: descriptor.path().map(Path::to_path_buf),
                },
                frames,
                position: 0,
                interval,
                gate: self.gate.lock().unwrap().take(),
                fail_after: matches!(descriptor, SourceDescriptor::Camera { index: 1 }).then_some(5),
                log: Arc::clone(&self.log),
            }))
        }
    }

    /// One face per frame, attributed to the backend that found it.
    struct StubDetector {
        kind: BackendKind,
        latency: Duration,
    }

    impl DetectorBackend for StubDetector {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceRegion>, DetectError> {
            thread::sleep(self.latency);
            Ok(vec![FaceRegion {
                bbox: BoundingBox {
                    x: 4,
                    y: 4,
                    width: 12,
                    height: 12,
                },
                confidence: 0.9,
                backend: self.kind,
            }])
        }
    }

    /// Cascade loads at once, the deep detector after 100 ms, the mesh
    /// detector never.
    struct StubDetectors {
        latency: Duration,
    }

    impl DetectorFactory for StubDetectors {
        fn load(&self, kind: BackendKind) -> Result<Arc<dyn DetectorBackend>, ModelLoadError> {
            match kind {
                BackendKind::Cascade => {}
                BackendKind::DeepDetector => thread::sleep(Duration::from_millis(100)),
                BackendKind::LandmarkMesh => {
                    return Err(ModelLoadError::model("landmark-mesh", "missing weights"))
                }
            }
            Ok(Arc::new(StubDetector {
                kind,
                latency: self.latency,
            }))
        }
    }

    struct StubClassifier(EmotionVocabulary);

    impl EmotionClassifier for StubClassifier {
        fn vocabulary(&self) -> EmotionVocabulary {
            self.0
        }

        fn classify(
            &self,
            _frame: &Frame,
            _face: &FaceRegion,
        ) -> Result<EmotionResult, ClassificationError> {
            EmotionResult::from_scores(
                self.0,
                [
                    (Emotion::Happy, 3.0),
                    (Emotion::Neutral, 1.0),
                    (Emotion::Disgust, 1.0),
                ],
            )
        }
    }

    struct StubClassifiers {
        fail: bool,
    }

    impl ClassifierFactory for StubClassifiers {
        fn load(
            &self,
            vocabulary: EmotionVocabulary,
        ) -> Result<Arc<dyn EmotionClassifier>, ModelLoadError> {
            if self.fail {
                return Err(ModelLoadError::model("emotion classifier", "corrupt model"));
            }
            Ok(Arc::new(StubClassifier(vocabulary)))
        }
    }

    #[derive(Clone, Default)]
    struct StubVideoWriter {
        frames: Arc<Mutex<Vec<usize>>>,
    }

    impl VideoWriter for StubVideoWriter {
        fn open(
            &mut self,
            _path: &Path,
            _metadata: &SourceMetadata,
        ) -> Result<(), Box<dyn std::error::Error>> {
            Ok(())
        }

        fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
            self.frames.lock().unwrap().push(frame.index());
            Ok(())
        }

        fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct StubImageWriter {
        saved: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl ImageWriter for StubImageWriter {
        fn write(&self, path: &Path, _frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
            self.saved.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    /// Records (source, frame backend, region backends) of every rendered frame.
    type Rendered = Arc<Mutex<Vec<(SourceId, Option<BackendKind>, Vec<BackendKind>)>>>;

    struct RecordingRenderer(Rendered);

    impl ResultRenderer for RecordingRenderer {
        fn render(&mut self, frame: &AnnotatedFrame) {
            let regions = frame.faces.iter().map(|f| f.region.backend).collect();
            self.0
                .lock()
                .unwrap()
                .push((frame.frame.source(), frame.backend, regions));
        }
    }

    struct Fixture {
        orchestrator: PipelineOrchestrator,
        opener: Arc<StubOpener>,
        video: StubVideoWriter,
        images: StubImageWriter,
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            realtime_playback: false,
            model_load_timeout_secs: 2,
            ..PipelineSettings::default()
        }
    }

    fn fixture_with(
        settings: PipelineSettings,
        opener: StubOpener,
        detector_latency: Duration,
        classifier_fails: bool,
    ) -> Fixture {
        let opener = Arc::new(opener);
        let video = StubVideoWriter::default();
        let images = StubImageWriter::default();
        let writer = video.clone();
        let components = PipelineComponents {
            opener: opener.clone(),
            detectors: Arc::new(StubDetectors {
                latency: detector_latency,
            }),
            classifiers: Arc::new(StubClassifiers {
                fail: classifier_fails,
            }),
            video_writers: Box::new(move || -> Box<dyn VideoWriter> { Box::new(writer.clone()) }),
            image_writer: Box::new(images.clone()),
            logger: Box::new(|| -> Box<dyn PipelineLogger> { Box::new(NullPipelineLogger) }),
        };
        let orchestrator = PipelineOrchestrator::new(settings, components);
        Fixture {
            orchestrator,
            opener,
            video,
            images,
        }
    }

    fn fixture(clip_frames: usize) -> Fixture {
        let opener = StubOpener {
            clip_frames,
            ..StubOpener::default()
        };
        fixture_with(settings(), opener, Duration::ZERO, false)
    }

    fn clip() -> SourceDescriptor {
        SourceDescriptor::VideoFile(PathBuf::from("clip.mp4"))
    }

    fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn wait_for_backend(f: &Fixture, kind: BackendKind) {
        wait_for("backend", || f.orchestrator.switch.current_kind() == Some(kind));
    }

    fn wait_for_classifier(f: &Fixture) {
        wait_for("classifier", || f.orchestrator.snapshot().classifier == Readiness::Ready);
    }

    #[test]
    fn test_still_image_yields_one_classified_frame() {
        let mut f = fixture(0);
        wait_for_backend(&f, BackendKind::Cascade);
        wait_for_classifier(&f);

        let metadata = f
            .orchestrator
            .open_source(SourceDescriptor::Image(PathBuf::from("face.png")))
            .unwrap();
        assert_eq!(metadata.kind, SourceKind::Image);
        assert!(f.orchestrator.wait_until_drained(Duration::from_secs(5)));

        let snapshot = f.orchestrator.snapshot();
        assert_eq!(snapshot.counters.processed, 1);
        assert_eq!(snapshot.playback, None);

        let annotated = f.orchestrator.latest_frame().unwrap();
        assert_eq!(annotated.faces.len(), 1);
        let result = annotated.faces[0].emotion.result().unwrap();
        let total: f32 = result.probabilities().iter().map(|(_, p)| p).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-5);
        assert!(EmotionVocabulary::Seven.contains(result.dominant()));
        assert_eq!(result.dominant(), Emotion::Happy);
        assert!(annotated.faces[0].region.bbox.fits_within(WIDTH, HEIGHT));
    }

    #[test]
    fn test_five_class_vocabulary_drops_other_labels() {
        let opener = StubOpener::default();
        let settings = PipelineSettings {
            vocabulary: EmotionVocabulary::Five,
            ..settings()
        };
        let mut f = fixture_with(settings, opener, Duration::ZERO, false);
        wait_for_backend(&f, BackendKind::Cascade);
        wait_for_classifier(&f);

        f.orchestrator
            .open_source(SourceDescriptor::Image(PathBuf::from("face.png")))
            .unwrap();
        assert!(f.orchestrator.wait_until_drained(Duration::from_secs(5)));

        let annotated = f.orchestrator.latest_frame().unwrap();
        let result = annotated.faces[0].emotion.result().unwrap();
        assert_eq!(result.probabilities().len(), 5);
        assert_relative_eq!(result.probability(Emotion::Happy), 0.75, epsilon = 1e-5);
        assert_relative_eq!(result.probability(Emotion::Disgust), 0.0);
    }

    #[test]
    fn test_wait_until_ready_reports_settled_models() {
        let f = fixture_with(settings(), StubOpener::default(), Duration::ZERO, true);
        assert!(f.orchestrator.wait_until_ready(Duration::from_secs(5)));
        let snapshot = f.orchestrator.snapshot();
        assert!(matches!(snapshot.classifier, Readiness::Failed(_)));
        assert_eq!(snapshot.requested_backend, BackendKind::Cascade);
    }

    #[test]
    fn test_unreachable_camera_leaves_session_unchanged() {
        let mut f = fixture(10);
        f.orchestrator.open_source(clip()).unwrap();
        let before = f.orchestrator.snapshot();

        let err = f
            .orchestrator
            .open_source(SourceDescriptor::Camera { index: 9 })
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));

        let after = f.orchestrator.snapshot();
        assert_eq!(after.source, Some(clip()));
        assert_eq!(after.source_id, before.source_id);
    }

    #[test]
    fn test_unreachable_camera_without_session_opens_nothing() {
        let mut f = fixture(0);
        assert!(f
            .orchestrator
            .open_source(SourceDescriptor::Camera { index: 9 })
            .is_err());
        assert_eq!(f.orchestrator.snapshot().source, None);
    }

    #[test]
    fn test_file_recording_contains_every_frame_in_order() {
        let (release, gate) = crossbeam_channel::bounded(1);
        let opener = StubOpener {
            clip_frames: 40,
            gate: Mutex::new(Some(gate)),
            ..StubOpener::default()
        };
        // A slow detector with a tiny recorder queue still loses nothing
        let settings = PipelineSettings {
            recorder_queue_capacity: 1,
            file_queue_capacity: 2,
            ..settings()
        };
        let mut f = fixture_with(settings, opener, Duration::from_millis(2), false);
        wait_for_backend(&f, BackendKind::Cascade);

        f.orchestrator.open_source(clip()).unwrap();
        f.orchestrator
            .start_recording(Path::new("out.mp4"))
            .unwrap();
        release.send(()).unwrap();

        assert!(f.orchestrator.wait_until_drained(Duration::from_secs(10)));
        let summary = f.orchestrator.stop_recording().unwrap().unwrap();

        assert_eq!(summary.frames_written, 40);
        assert_eq!(summary.frames_dropped, 0);
        assert_eq!(*f.video.frames.lock().unwrap(), (0..40).collect::<Vec<_>>());
        assert_eq!(f.orchestrator.snapshot().counters.dropped_backpressure, 0);
    }

    #[test]
    fn test_close_clears_session() {
        let opener = StubOpener::default();
        let mut f = fixture_with(settings(), opener, Duration::from_millis(20), false);
        f.orchestrator
            .open_source(SourceDescriptor::Camera { index: 0 })
            .unwrap();
        wait_for("captured frames", || f.orchestrator.snapshot().counters.captured > 0);
        f.orchestrator.close();

        let snapshot = f.orchestrator.snapshot();
        assert_eq!(snapshot.source, None);
        assert_eq!(snapshot.counters, SessionCounters::default());
        assert!(f.orchestrator.latest_frame().is_none());
    }

    #[test]
    fn test_live_queue_depth_never_exceeds_one() {
        let opener = StubOpener::default();
        let mut f = fixture_with(settings(), opener, Duration::from_millis(20), false);
        wait_for_backend(&f, BackendKind::Cascade);

        f.orchestrator
            .open_source(SourceDescriptor::Camera { index: 0 })
            .unwrap();
        wait_for("processed frames", || {
            f.orchestrator.snapshot().counters.processed >= 5
        });

        let counters = f.orchestrator.snapshot().counters;
        assert!(counters.max_queue_depth <= 1);
        assert!(counters.dropped_backpressure > 0);
        assert!(counters.captured > counters.processed);
    }

    #[test]
    fn test_backend_switch_never_mixes_backends_within_a_frame() {
        let opener = StubOpener::default();
        let mut f = fixture_with(settings(), opener, Duration::from_millis(3), false);
        let events = f.orchestrator.events();
        let rendered: Rendered = Arc::default();
        f.orchestrator
            .attach_renderer(Box::new(RecordingRenderer(Arc::clone(&rendered))));
        wait_for_backend(&f, BackendKind::Cascade);

        f.orchestrator
            .open_source(SourceDescriptor::Camera { index: 0 })
            .unwrap();
        wait_for("cascade frames", || rendered.lock().unwrap().len() >= 3);

        f.orchestrator.select_backend(BackendKind::DeepDetector);
        assert_eq!(
            f.orchestrator.snapshot().requested_backend,
            BackendKind::DeepDetector
        );
        wait_for("deep frames", || {
            rendered
                .lock()
                .unwrap()
                .iter()
                .any(|(_, b, _)| *b == Some(BackendKind::DeepDetector))
        });
        f.orchestrator.close();

        let rendered = rendered.lock().unwrap();
        for (_, backend, regions) in rendered.iter() {
            assert!(regions.iter().all(|r| Some(*r) == *backend));
        }
        // Once the deep detector took over, cascade never came back
        let first_deep = rendered
            .iter()
            .position(|(_, b, _)| *b == Some(BackendKind::DeepDetector))
            .unwrap();
        assert!(rendered[first_deep..]
            .iter()
            .all(|(_, b, _)| *b == Some(BackendKind::DeepDetector)));
        assert!(events
            .try_iter()
            .any(|e| e == SessionEvent::BackendActivated(BackendKind::DeepDetector)));
    }

    #[test]
    fn test_failed_backend_keeps_previous_and_reports_fault() {
        let opener = StubOpener::default();
        let mut f = fixture_with(settings(), opener, Duration::ZERO, false);
        let events = f.orchestrator.events();
        wait_for_backend(&f, BackendKind::Cascade);
        f.orchestrator
            .open_source(SourceDescriptor::Camera { index: 0 })
            .unwrap();

        f.orchestrator.select_backend(BackendKind::LandmarkMesh);
        wait_for("readiness fault", || {
            events
                .try_iter()
                .any(|e| matches!(e, SessionEvent::ReadinessFault { .. }))
        });
        wait_for("a processed frame", || f.orchestrator.latest_frame().is_some());
        assert!(matches!(
            f.orchestrator.snapshot().requested_backend,
            BackendKind::LandmarkMesh
        ));
        assert_eq!(
            f.orchestrator.latest_frame().unwrap().backend,
            Some(BackendKind::Cascade)
        );
    }

    #[test]
    fn test_classifier_failure_degrades_to_unclassified_faces() {
        let opener = StubOpener::default();
        let mut f = fixture_with(settings(), opener, Duration::ZERO, true);
        let events = f.orchestrator.events();
        wait_for_backend(&f, BackendKind::Cascade);
        wait_for("classifier failure", || {
            matches!(f.orchestrator.snapshot().classifier, Readiness::Failed(_))
        });

        f.orchestrator
            .open_source(SourceDescriptor::Image(PathBuf::from("face.png")))
            .unwrap();
        assert!(f.orchestrator.wait_until_drained(Duration::from_secs(5)));

        let annotated = f.orchestrator.latest_frame().unwrap();
        assert_eq!(annotated.face_count(), 1);
        assert_eq!(annotated.classified_count(), 0);
        assert!(annotated.readiness_note.is_some());
        wait_for("readiness fault event", || {
            events.try_iter().any(|e| {
                matches!(e, SessionEvent::ReadinessFault { ref model, .. } if model == "emotion classifier")
            })
        });
    }

    #[test]
    fn test_pause_then_resume_keeps_position() {
        let opener = StubOpener {
            clip_frames: 250,
            ..StubOpener::default()
        };
        let settings = PipelineSettings {
            realtime_playback: true,
            ..settings()
        };
        let mut f = fixture_with(settings, opener, Duration::ZERO, false);
        f.orchestrator.open_source(clip()).unwrap();
        wait_for("playback", || f.orchestrator.snapshot().counters.captured >= 3);

        let paused = f.orchestrator.pause().unwrap();
        assert_eq!(paused.status, PlaybackStatus::Paused);
        let again = f.orchestrator.pause().unwrap();
        assert_eq!(again, paused);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(f.orchestrator.snapshot().playback, Some(paused));

        let resumed = f.orchestrator.resume().unwrap();
        assert_eq!(resumed.status, PlaybackStatus::Playing);
        assert_eq!(resumed.position, paused.position);
    }

    #[test]
    fn test_seek_lands_paused_and_next_frame_is_at_or_after_target() {
        let opener = StubOpener {
            clip_frames: 250,
            ..StubOpener::default()
        };
        let settings = PipelineSettings {
            realtime_playback: true,
            ..settings()
        };
        let mut f = fixture_with(settings, opener, Duration::ZERO, false);
        let log = Arc::clone(&f.opener.log);
        f.orchestrator.open_source(clip()).unwrap();

        let target = Duration::from_millis(4_210);
        let state = f.orchestrator.seek(target).unwrap();
        assert_eq!(state.status, PlaybackStatus::Paused);
        assert_eq!(state.position, target);

        f.orchestrator.resume().unwrap();
        wait_for("a frame after the seek", || {
            let log = log.lock().unwrap();
            let seek = log.iter().position(|e| *e == SourceLog::Seek(target));
            seek.is_some_and(|i| log.len() > i + 1)
        });

        let log = log.lock().unwrap();
        let seek = log.iter().position(|e| *e == SourceLog::Seek(target)).unwrap();
        match &log[seek + 1] {
            SourceLog::Read(ts) => assert!(*ts >= target),
            other => panic!("expected a read, got {other:?}"),
        }
    }

    #[test]
    fn test_seek_past_end_clamps_to_duration() {
        let mut f = fixture(50);
        f.orchestrator.open_source(clip()).unwrap();
        let state = f.orchestrator.seek(Duration::from_secs(60)).unwrap();
        assert_eq!(state.position, Duration::from_secs(2));
        assert_eq!(state.status, PlaybackStatus::Paused);
    }

    #[test]
    fn test_ended_file_can_be_replayed_by_seeking() {
        let mut f = fixture(10);
        let events = f.orchestrator.events();
        f.orchestrator.open_source(clip()).unwrap();
        wait_for("end of file", || {
            f.orchestrator.snapshot().playback.map(|p| p.status) == Some(PlaybackStatus::Ended)
        });
        assert!(events
            .try_iter()
            .any(|e| matches!(e, SessionEvent::SourceEnded { .. })));

        let state = f.orchestrator.stop().unwrap();
        assert_eq!(state.position, Duration::ZERO);
        assert_eq!(state.status, PlaybackStatus::Paused);

        f.orchestrator.resume().unwrap();
        wait_for("replayed frames", || f.orchestrator.snapshot().counters.captured >= 20);
    }

    #[test]
    fn test_seek_without_known_duration_is_not_clamped() {
        let opener = StubOpener {
            clip_frames: 250,
            unknown_duration: true,
            ..StubOpener::default()
        };
        let mut f = fixture_with(settings(), opener, Duration::ZERO, false);
        let metadata = f.orchestrator.open_source(clip()).unwrap();
        assert_eq!(metadata.duration, None);

        let state = f.orchestrator.seek(Duration::from_secs(6)).unwrap();
        assert_eq!(state.position, Duration::from_secs(6));
        assert_eq!(state.duration, None);
        let forward = f.orchestrator.skip(true).unwrap();
        assert_relative_eq!(forward.position.as_secs_f64(), 7.2, epsilon = 1e-6);
    }

    #[test]
    fn test_skip_moves_by_configured_frames() {
        let mut f = fixture(250);
        f.orchestrator.open_source(clip()).unwrap();
        f.orchestrator.seek(Duration::ZERO).unwrap();

        // 30 frames at 25 fps
        let forward = f.orchestrator.skip(true).unwrap();
        assert_relative_eq!(forward.position.as_secs_f64(), 1.2, epsilon = 1e-6);
        assert_eq!(forward.status, PlaybackStatus::Paused);
        let back = f.orchestrator.skip(false).unwrap();
        assert_eq!(back.position, Duration::ZERO);
        let clamped = f.orchestrator.skip(false).unwrap();
        assert_eq!(clamped.position, Duration::ZERO);
    }

    #[test]
    fn test_playback_commands_on_other_sources() {
        let mut f = fixture(0);
        assert_eq!(f.orchestrator.pause(), Err(PlaybackError::NoSource));

        f.orchestrator
            .open_source(SourceDescriptor::Camera { index: 0 })
            .unwrap();
        assert_eq!(
            f.orchestrator.pause(),
            Err(PlaybackError::NotFileBacked(SourceKind::Camera))
        );
        assert_eq!(
            f.orchestrator.seek(Duration::from_secs(1)),
            Err(PlaybackError::SeekUnsupported(SourceKind::Camera))
        );
        assert_eq!(f.orchestrator.snapshot().playback, None);
    }

    #[test]
    fn test_source_switch_never_delivers_old_frames() {
        let opener = StubOpener {
            clip_frames: 250,
            ..StubOpener::default()
        };
        let mut f = fixture_with(settings(), opener, Duration::from_millis(2), false);
        let rendered: Rendered = Arc::default();
        f.orchestrator
            .attach_renderer(Box::new(RecordingRenderer(Arc::clone(&rendered))));
        wait_for_backend(&f, BackendKind::Cascade);

        f.orchestrator
            .open_source(SourceDescriptor::Camera { index: 0 })
            .unwrap();
        wait_for("camera frames", || !rendered.lock().unwrap().is_empty());
        let first = f.orchestrator.snapshot().source_id.unwrap();

        f.orchestrator.open_source(clip()).unwrap();
        let switched_at = rendered.lock().unwrap().len();
        let second = f.orchestrator.snapshot().source_id.unwrap();
        assert_ne!(first, second);

        wait_for("clip frames", || rendered.lock().unwrap().len() > switched_at);
        f.orchestrator.close();
        let rendered = rendered.lock().unwrap();
        assert!(rendered[switched_at..].iter().all(|(s, _, _)| *s == second));
    }

    #[test]
    fn test_capture_still_saves_latest_frame() {
        let mut f = fixture(0);
        wait_for_backend(&f, BackendKind::Cascade);
        assert!(f.orchestrator.capture_still(Path::new("early.png")).is_err());

        f.orchestrator
            .open_source(SourceDescriptor::Image(PathBuf::from("face.png")))
            .unwrap();
        assert!(f.orchestrator.wait_until_drained(Duration::from_secs(5)));
        f.orchestrator.capture_still(Path::new("shot.png")).unwrap();

        assert_eq!(*f.images.saved.lock().unwrap(), vec![PathBuf::from("shot.png")]);
    }

    #[test]
    fn test_recording_requires_a_source() {
        let mut f = fixture(0);
        assert!(matches!(
            f.orchestrator.start_recording(Path::new("out.mp4")),
            Err(StorageError::Open { .. })
        ));
        assert!(f.orchestrator.stop_recording().is_none());
    }

    #[test]
    fn test_switching_source_stops_recording() {
        let mut f = fixture(250);
        let events = f.orchestrator.events();
        f.orchestrator
            .open_source(SourceDescriptor::Camera { index: 0 })
            .unwrap();
        f.orchestrator
            .start_recording(Path::new("live.mp4"))
            .unwrap();
        assert!(f.orchestrator.snapshot().recording.is_recording());

        f.orchestrator.open_source(clip()).unwrap();
        assert!(!f.orchestrator.snapshot().recording.is_recording());
        assert!(events.try_iter().any(|e| matches!(
            e,
            SessionEvent::RecordingStopped { error: None, .. }
        )));
    }

    #[test]
    fn test_camera_dropping_mid_stream_ends_the_session() {
        let (release, gate) = crossbeam_channel::bounded(1);
        let opener = StubOpener {
            gate: Mutex::new(Some(gate)),
            ..StubOpener::default()
        };
        let mut f = fixture_with(settings(), opener, Duration::ZERO, false);
        let events = f.orchestrator.events();
        wait_for_backend(&f, BackendKind::Cascade);

        let camera = SourceDescriptor::Camera { index: 1 };
        f.orchestrator.open_source(camera).unwrap();
        f.orchestrator
            .start_recording(Path::new("live.mp4"))
            .unwrap();
        release.send(()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(SessionEvent::SessionFault { error, .. }) => {
                    assert_eq!(error, SourceError::Device("unplugged".into()));
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("no fault reported: {e}"),
            }
        }

        let snapshot = f.orchestrator.snapshot();
        assert_eq!(snapshot.source, None);
        assert_eq!(snapshot.source_id, None);
        assert_eq!(snapshot.playback, None);
        assert_eq!(f.orchestrator.pause(), Err(PlaybackError::NoSource));
        assert!(f.orchestrator.latest_frame().is_none());
        assert!(f.orchestrator.wait_until_drained(Duration::ZERO));

        // The recording is finalized with what arrived before the drop
        wait_for("the recording to stop", || {
            !f.orchestrator.snapshot().recording.is_recording()
        });
        let summary = f.orchestrator.stop_recording().unwrap().unwrap();
        assert!(summary.frames_written <= 5);

        f.orchestrator
            .open_source(SourceDescriptor::Camera { index: 0 })
            .unwrap();
        wait_for("frames from the new camera", || {
            f.orchestrator.latest_frame().is_some()
        });
    }
}
