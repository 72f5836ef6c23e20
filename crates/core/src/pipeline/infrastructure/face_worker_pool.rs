use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use crate::classification::domain::emotion_classifier::EmotionClassifier;
use crate::classification::domain::emotion_result::FaceEmotion;
use crate::pipeline::domain::annotated_frame::AnnotatedFace;
use crate::shared::frame::Frame;
use crate::shared::region::FaceRegion;

struct Job {
    slot: usize,
    frame: Arc<Frame>,
    region: FaceRegion,
    classifier: Arc<dyn EmotionClassifier>,
    reply: Sender<(usize, FaceEmotion)>,
}

/// Small fixed pool that classifies the faces of one frame concurrently.
///
/// Results come back in detector order regardless of which worker
/// finishes first. A face whose classification fails or panics is kept
/// as [`FaceEmotion::Unclassified`].
pub struct FaceWorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl FaceWorkerPool {
    /// With `workers` 0 or 1 every face is classified on the calling thread.
    pub fn new(workers: usize) -> Self {
        if workers <= 1 {
            return Self {
                jobs: None,
                workers: Vec::new(),
            };
        }

        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..workers)
            .map(|_| {
                let rx = rx.clone();
                thread::spawn(move || {
                    for job in rx {
                        let emotion = classify_one(job.classifier.as_ref(), &job.frame, &job.region);
                        let _ = job.reply.send((job.slot, emotion));
                    }
                })
            })
            .collect();

        Self {
            jobs: Some(tx),
            workers,
        }
    }

    pub fn classify_all(
        &self,
        classifier: &Arc<dyn EmotionClassifier>,
        frame: &Arc<Frame>,
        regions: Vec<FaceRegion>,
    ) -> Vec<AnnotatedFace> {
        let Some(jobs) = self.jobs.as_ref().filter(|_| regions.len() > 1) else {
            return regions
                .into_iter()
                .map(|region| {
                    let emotion = classify_one(classifier.as_ref(), frame, &region);
                    AnnotatedFace { region, emotion }
                })
                .collect();
        };

        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        let mut emotions = vec![FaceEmotion::Unclassified; regions.len()];
        let mut submitted = 0;
        for (slot, region) in regions.iter().enumerate() {
            let job = Job {
                slot,
                frame: Arc::clone(frame),
                region: region.clone(),
                classifier: Arc::clone(classifier),
                reply: reply_tx.clone(),
            };
            if jobs.send(job).is_ok() {
                submitted += 1;
            }
        }
        drop(reply_tx);

        for (slot, emotion) in reply_rx.iter().take(submitted) {
            emotions[slot] = emotion;
        }

        regions
            .into_iter()
            .zip(emotions)
            .map(|(region, emotion)| AnnotatedFace { region, emotion })
            .collect()
    }
}

impl Drop for FaceWorkerPool {
    fn drop(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn classify_one(classifier: &dyn EmotionClassifier, frame: &Frame, region: &FaceRegion) -> FaceEmotion {
    match panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(frame, region))) {
        Ok(Ok(result)) => FaceEmotion::Classified(result),
        Ok(Err(e)) => {
            log::warn!("Face at {:?} on frame {} unclassified: {e}", region.bbox, frame.index());
            FaceEmotion::Unclassified
        }
        Err(_) => {
            log::warn!("Classifier panicked on frame {}", frame.index());
            FaceEmotion::Unclassified
        }
    }
}
