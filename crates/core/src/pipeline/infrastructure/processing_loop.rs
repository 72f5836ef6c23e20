use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::classification::domain::emotion_classifier::EmotionClassifier;
use crate::classification::domain::emotion_result::FaceEmotion;
use crate::detection::domain::detector_backend::{locate, DetectorBackend};
use crate::pipeline::domain::annotated_frame::{AnnotatedFace, AnnotatedFrame};
use crate::pipeline::infrastructure::backend_switch::BackendSwitch;
use crate::pipeline::infrastructure::face_worker_pool::FaceWorkerPool;
use crate::pipeline::infrastructure::frame_queue::CapturedFrame;
use crate::pipeline::infrastructure::presentation::LatestFrameSlot;
use crate::pipeline::infrastructure::run_state::{RunState, IDLE_POLL};
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::recording::recorder::RecordingTap;
use crate::shared::model_slot::{ModelSlot, Readiness};

/// Everything the processing thread reads but does not own.
pub struct ProcessingContext {
    pub switch: Arc<BackendSwitch>,
    pub classifier: Arc<ModelSlot<dyn EmotionClassifier>>,
    pub pool: Arc<FaceWorkerPool>,
    pub tap: Arc<RecordingTap>,
    pub presentation: Arc<LatestFrameSlot>,
}

/// The processing thread: detect, classify, assemble, publish.
///
/// Frames are handled one at a time in capture order, so the recorder
/// sees them in sequence. Cancellation is checked before and after each
/// frame; a frame finished after cancellation is discarded.
pub struct ProcessingLoop {
    frames: Receiver<CapturedFrame>,
    ctx: ProcessingContext,
    run: Arc<RunState>,
    logger: Box<dyn PipelineLogger>,
    total_frames: usize,
    active: Option<Arc<dyn DetectorBackend>>,
    last_sequence: Option<u64>,
}

impl ProcessingLoop {
    pub fn new(
        frames: Receiver<CapturedFrame>,
        ctx: ProcessingContext,
        run: Arc<RunState>,
        logger: Box<dyn PipelineLogger>,
        total_frames: usize,
    ) -> Self {
        Self {
            frames,
            ctx,
            run,
            logger,
            total_frames,
            active: None,
            last_sequence: None,
        }
    }

    pub fn run(mut self) {
        loop {
            let captured = match self.frames.recv_timeout(IDLE_POLL) {
                Ok(captured) => captured,
                Err(RecvTimeoutError::Timeout) if self.run.is_cancelled() => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if self.run.is_cancelled() {
                break;
            }

            self.note_gap(captured.sequence);
            self.logger
                .metric("queue_depth", self.frames.len() as f64);

            let annotated = self.process(captured);
            if self.run.is_cancelled() {
                break;
            }

            if !self.ctx.tap.offer(&annotated) {
                self.logger.count("dropped_recorder", 1);
            }
            let processed = self.run.record_processed(&annotated);
            self.ctx.presentation.publish(annotated);
            self.logger.progress(processed as usize, self.total_frames);
        }

        if self.run.is_faulted() && self.ctx.tap.is_active() {
            // The source is gone, so is anything recording it
            self.ctx.tap.clear();
            self.logger.info("Source failed mid-stream; recording finalized");
        }
        self.logger.summary();
    }

    /// Runs one frame through the active backend and the classifier.
    fn process(&mut self, captured: CapturedFrame) -> AnnotatedFrame {
        let previous = self.active.as_ref().map(|b| b.kind());
        self.ctx.switch.at_frame_boundary(&mut self.active);
        let adopted = self.active.as_ref().map(|b| b.kind());
        if let Some(kind) = adopted.filter(|_| adopted != previous) {
            self.logger.info(&format!(
                "Frame {} onwards detected with {kind} backend",
                captured.sequence
            ));
        }
        let frame = Arc::new(captured.frame);

        let Some(backend) = self.active.clone() else {
            return AnnotatedFrame {
                frame,
                faces: Vec::new(),
                backend: None,
                sequence: captured.sequence,
                readiness_note: Some(self.backend_note()),
            };
        };

        let t0 = Instant::now();
        let regions = locate(backend.as_ref(), &frame);
        self.logger
            .timing("detect", t0.elapsed().as_secs_f64() * 1000.0);
        self.logger.metric("faces", regions.len() as f64);

        let (faces, readiness_note) = match self.ctx.classifier.get() {
            Some(classifier) => {
                let t1 = Instant::now();
                let faces = self.ctx.pool.classify_all(&classifier, &frame, regions);
                self.logger
                    .timing("classify", t1.elapsed().as_secs_f64() * 1000.0);
                (faces, None)
            }
            None => {
                let faces = regions
                    .into_iter()
                    .map(|region| AnnotatedFace {
                        region,
                        emotion: FaceEmotion::Unclassified,
                    })
                    .collect();
                (faces, Some(self.classifier_note()))
            }
        };

        let unclassified = faces
            .iter()
            .filter(|f| f.emotion.result().is_none())
            .count();
        if unclassified > 0 {
            self.logger.count("unclassified_faces", unclassified as u64);
        }

        AnnotatedFrame {
            frame,
            faces,
            backend: Some(backend.kind()),
            sequence: captured.sequence,
            readiness_note,
        }
    }

    /// Sequence gaps are frames the capture queue replaced.
    fn note_gap(&mut self, sequence: u64) {
        let expected = self.last_sequence.map_or(0, |s| s + 1);
        if sequence > expected {
            self.logger.count("dropped_backpressure", sequence - expected);
        }
        self.last_sequence = Some(sequence);
    }

    fn backend_note(&self) -> String {
        let requested = self
            .ctx
            .switch
            .requested_kind()
            .map_or_else(|| "detector".to_string(), |k| format!("{k} backend"));
        match self.ctx.switch.readiness() {
            Readiness::Failed(reason) => format!("{requested} unavailable: {reason}"),
            _ => format!("{requested} loading"),
        }
    }

    fn classifier_note(&self) -> String {
        match self.ctx.classifier.readiness() {
            Readiness::Failed(reason) => format!("emotion classifier unavailable: {reason}"),
            _ => "emotion classifier loading".to_string(),
        }
    }
}
