use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::capture::domain::frame_source::{FrameSource, SourceError};
use crate::pipeline::domain::playback_controller::{PlaybackError, PlaybackState};
use crate::pipeline::domain::session::SessionEvent;
use crate::pipeline::infrastructure::frame_queue::{CapturedFrame, FrameQueueProducer, Push};
use crate::pipeline::infrastructure::run_state::{RunState, IDLE_POLL};

/// Consecutive undecodable frames tolerated before the source is declared broken.
const MAX_DECODE_FAILURES: u32 = 8;

/// Repositions a file source. Answered once the source has moved.
pub struct SeekRequest {
    pub target: Duration,
    pub reply: Sender<Result<PlaybackState, PlaybackError>>,
}

/// Sleeps so frames leave at their native rate.
#[derive(Default)]
struct Pacer {
    origin: Option<(Instant, Duration)>,
}

impl Pacer {
    fn wait(&mut self, timestamp: Duration, cancel: &AtomicBool) {
        let (start, base) = *self.origin.get_or_insert((Instant::now(), timestamp));
        let due = start + timestamp.saturating_sub(base);
        while let Some(remaining) = due.checked_duration_since(Instant::now()) {
            if remaining.is_zero() || cancel.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(remaining.min(IDLE_POLL));
        }
    }

    fn reset(&mut self) {
        self.origin = None;
    }
}

/// The capture thread: reads the source and feeds the frame queue.
///
/// Owns the source exclusively. Playback state is shared with the
/// orchestrator, which flips pause/resume directly; seeks arrive as
/// [`SeekRequest`]s because only this thread may touch the source.
pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    producer: FrameQueueProducer,
    seeks: Receiver<SeekRequest>,
    run: Arc<RunState>,
    events: Sender<SessionEvent>,
    pacer: Option<Pacer>,
    next_sequence: u64,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        producer: FrameQueueProducer,
        seeks: Receiver<SeekRequest>,
        run: Arc<RunState>,
        events: Sender<SessionEvent>,
        paced: bool,
    ) -> Self {
        Self {
            source,
            producer,
            seeks,
            run,
            events,
            pacer: paced.then(Pacer::default),
            next_sequence: 0,
        }
    }

    pub fn run(mut self) {
        let cancel = self.run.cancel_flag();
        let mut was_pulling = true;
        let mut decode_failures = 0;

        while !self.run.is_cancelled() {
            if !self.drain_seeks() {
                break;
            }

            if !self.run.is_pulling() {
                was_pulling = false;
                match self.seeks.recv_timeout(IDLE_POLL) {
                    Ok(request) => self.seek(request),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                continue;
            }
            if !was_pulling {
                self.reset_pacing();
                was_pulling = true;
            }

            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    decode_failures = 0;
                    let timestamp = frame.timestamp();
                    if let Some(pacer) = self.pacer.as_mut() {
                        pacer.wait(timestamp, &cancel);
                    }
                    self.run.with_playback(|p| {
                        if p.is_pulling() {
                            p.advance(timestamp);
                        }
                    });

                    let item = CapturedFrame {
                        sequence: self.next_sequence,
                        frame: frame.with_source(self.run.source()),
                    };
                    self.next_sequence += 1;
                    let push = self.producer.push(item);
                    if push == Push::Closed {
                        break;
                    }
                    self.run.record_push(&push, self.producer.depth());
                }
                Ok(None) => {
                    if !self.end_of_stream() {
                        break;
                    }
                }
                Err(SourceError::Decode(reason)) if decode_failures < MAX_DECODE_FAILURES => {
                    decode_failures += 1;
                    log::warn!("Skipping undecodable frame: {reason}");
                }
                Err(error) => {
                    log::warn!("Capture stopped: {error}");
                    self.run.mark_faulted();
                    let _ = self.events.send(SessionEvent::SessionFault {
                        source: self.run.source(),
                        error,
                    });
                    break;
                }
            }
        }

        self.source.close();
        log::debug!("Capture for {:?} finished", self.run.source());
    }

    /// Handles queued seeks without waiting. `false` once the orchestrator
    /// has gone away.
    fn drain_seeks(&mut self) -> bool {
        loop {
            match self.seeks.try_recv() {
                Ok(request) => self.seek(request),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn seek(&mut self, request: SeekRequest) {
        let outcome = match self.source.seek(request.target) {
            Ok(()) => self.run.with_playback(|p| {
                p.complete_seek();
                Ok(p.state())
            }),
            Err(e) => {
                log::warn!("Seek to {:?} failed: {e}", request.target);
                self.run.with_playback(|p| {
                    p.abort_seek();
                    Err(PlaybackError::Seek(e.clone()))
                })
            }
        };
        let outcome =
            outcome.unwrap_or(Err(PlaybackError::SeekUnsupported(self.source.metadata().kind)));

        self.reset_pacing();
        if let Some(state) = self.run.playback_state() {
            let _ = self.events.send(SessionEvent::PlaybackChanged(state));
        }
        let _ = request.reply.send(outcome);
    }

    /// `true` when the loop should stay alive for a later seek.
    fn end_of_stream(&mut self) -> bool {
        let _ = self.events.send(SessionEvent::SourceEnded {
            source: self.run.source(),
        });
        match self.run.with_playback(|p| {
            p.source_exhausted();
            p.state()
        }) {
            Some(state) => {
                log::info!("Reached end of file at {:?}", state.position);
                let _ = self.events.send(SessionEvent::PlaybackChanged(state));
                true
            }
            None => false,
        }
    }

    fn reset_pacing(&mut self) {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.reset();
        }
    }
}
