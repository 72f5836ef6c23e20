use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError};

use crate::pipeline::domain::annotated_frame::AnnotatedFrame;
use crate::pipeline::domain::session::{RecordingStatus, SessionEvent};
use crate::recording::domain::image_writer::ImageWriter;
use crate::recording::domain::overlay_painter::OverlayPainter;
use crate::recording::domain::storage_error::StorageError;
use crate::recording::domain::video_writer::VideoWriter;
use crate::shared::source_metadata::SourceMetadata;

/// What the tap does when the recorder queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Wait for space; every frame is recorded.
    Block,
    /// Drop the frame and count it.
    Drop,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingSummary {
    pub destination: PathBuf,
    pub frames_written: u64,
    pub frames_dropped: u64,
}

#[derive(Clone)]
struct RecorderFeed {
    id: u64,
    tx: Sender<AnnotatedFrame>,
    policy: DeliveryPolicy,
    dropped: Arc<AtomicU64>,
}

/// Where the processing loop hands annotated frames to an active recording.
///
/// Holds no feed while idle, so offering a frame costs one uncontended lock.
#[derive(Default)]
pub struct RecordingTap {
    feed: Mutex<Option<RecorderFeed>>,
}

impl RecordingTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Passes a frame to the recorder if one is active. Returns `false`
    /// only when the frame was dropped.
    pub fn offer(&self, frame: &AnnotatedFrame) -> bool {
        let Some(feed) = self.current() else {
            return true;
        };

        let outcome = match feed.policy {
            DeliveryPolicy::Block => feed
                .tx
                .send(frame.clone())
                .map_err(|e| TrySendError::Disconnected(e.0)),
            DeliveryPolicy::Drop => feed.tx.try_send(frame.clone()),
        };
        match outcome {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if feed.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    log::warn!("Recorder falling behind; dropping frames");
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                // The writer stopped on a storage error
                self.clear_if(feed.id);
                true
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<RecorderFeed> {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, feed: RecorderFeed) {
        *self.feed.lock().unwrap_or_else(PoisonError::into_inner) = Some(feed);
    }

    /// Detaches the recorder. Its writer finishes once the frames already
    /// queued are written.
    pub fn clear(&self) {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn clear_if(&self, id: u64) {
        let mut feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        if feed.as_ref().is_some_and(|f| f.id == id) {
            feed.take();
        }
    }
}

struct ActiveRecording {
    destination: PathBuf,
    written: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    handle: JoinHandle<Result<(), StorageError>>,
}

/// Records annotated video on its own writer thread.
///
/// The processing loop only ever touches the shared [`RecordingTap`]; a
/// slow or failing writer never stalls it for live sources.
pub struct Recorder {
    tap: Arc<RecordingTap>,
    painter: OverlayPainter,
    active: Option<ActiveRecording>,
    next_id: u64,
}

impl Recorder {
    pub fn new(tap: Arc<RecordingTap>) -> Self {
        Self {
            tap,
            painter: OverlayPainter::new(),
            active: None,
            next_id: 0,
        }
    }

    /// Opens `writer` at `destination` and starts accepting frames.
    ///
    /// A recording already in progress is finished first.
    pub fn start(
        &mut self,
        destination: &Path,
        metadata: &SourceMetadata,
        mut writer: Box<dyn VideoWriter>,
        policy: DeliveryPolicy,
        capacity: usize,
        events: Sender<SessionEvent>,
    ) -> Result<(), StorageError> {
        if let Some(Err(e)) = self.stop() {
            log::warn!("Previous recording ended with an error: {e}");
        }

        writer
            .open(destination, metadata)
            .map_err(|e| StorageError::Open {
                path: destination.to_path_buf(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = crossbeam_channel::bounded::<AnnotatedFrame>(capacity.max(1));
        let written = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let destination = destination.to_path_buf();

        let handle = {
            let written = Arc::clone(&written);
            let destination = destination.clone();
            let painter = self.painter;
            thread::spawn(move || {
                let result = write_frames(&rx, writer.as_mut(), &painter, &written, &destination);
                if let Err(ref e) = result {
                    log::warn!("Recording to {} stopped: {e}", destination.display());
                    let _ = events.send(SessionEvent::RecordingStopped {
                        destination,
                        error: Some(e.clone()),
                    });
                }
                result
            })
        };

        self.next_id += 1;
        self.tap.install(RecorderFeed {
            id: self.next_id,
            tx,
            policy,
            dropped: Arc::clone(&dropped),
        });
        log::info!("Recording to {}", destination.display());
        self.active = Some(ActiveRecording {
            destination,
            written,
            dropped,
            handle,
        });
        Ok(())
    }

    /// Detaches the tap, waits for queued frames to be written and closes
    /// the file. `None` when nothing was recording.
    pub fn stop(&mut self) -> Option<Result<RecordingSummary, StorageError>> {
        let active = self.active.take()?;
        self.tap.clear();

        let outcome = active.handle.join().unwrap_or_else(|_| {
            Err(StorageError::Encode {
                path: active.destination.clone(),
                reason: "writer thread panicked".to_string(),
            })
        });
        let summary = RecordingSummary {
            destination: active.destination,
            frames_written: active.written.load(Ordering::Relaxed),
            frames_dropped: active.dropped.load(Ordering::Relaxed),
        };
        log::info!(
            "Recording finished: {} frames written, {} dropped",
            summary.frames_written,
            summary.frames_dropped
        );
        Some(outcome.map(|()| summary))
    }

    pub fn status(&self) -> RecordingStatus {
        match &self.active {
            Some(active) if !active.handle.is_finished() => RecordingStatus::Recording {
                destination: active.destination.clone(),
                frames_written: active.written.load(Ordering::Relaxed),
                frames_dropped: active.dropped.load(Ordering::Relaxed),
            },
            _ => RecordingStatus::Idle,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.active
            .as_ref()
            .map_or(0, |a| a.dropped.load(Ordering::Relaxed))
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(Err(e)) = self.stop() {
            log::warn!("Recording ended with an error: {e}");
        }
    }
}

fn write_frames(
    rx: &crossbeam_channel::Receiver<AnnotatedFrame>,
    writer: &mut dyn VideoWriter,
    painter: &OverlayPainter,
    written: &AtomicU64,
    destination: &Path,
) -> Result<(), StorageError> {
    for annotated in rx.iter() {
        let mut frame = (*annotated.frame).clone();
        painter.paint(&mut frame, &annotated.faces);
        if let Err(e) = writer.write(&frame) {
            let _ = writer.close();
            return Err(StorageError::Write {
                sequence: annotated.sequence,
                reason: e.to_string(),
            });
        }
        written.fetch_add(1, Ordering::Relaxed);
    }

    writer.close().map_err(|e| StorageError::Encode {
        path: destination.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Writes one annotated still: a single-frame recording collapsed into
/// one call.
pub fn save_photo(
    writer: &dyn ImageWriter,
    path: &Path,
    annotated: &AnnotatedFrame,
    painter: &OverlayPainter,
) -> Result<(), StorageError> {
    let mut frame = (*annotated.frame).clone();
    painter.paint(&mut frame, &annotated.faces);
    writer.write(path, &frame).map_err(|e| StorageError::Write {
        sequence: annotated.sequence,
        reason: e.to_string(),
    })
}
