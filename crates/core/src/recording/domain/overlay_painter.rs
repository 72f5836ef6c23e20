use crate::classification::domain::emotion_result::FaceEmotion;
use crate::pipeline::domain::annotated_frame::AnnotatedFace;
use crate::shared::constants::CONFIDENT_EMOTION_THRESHOLD;
use crate::shared::frame::Frame;
use crate::shared::region::BoundingBox;

/// Accent for classifications below the confidence threshold.
pub const UNCERTAIN_COLOR: [u8; 3] = [255, 165, 0];

/// Outline for faces the classifier could not handle.
pub const UNCLASSIFIED_COLOR: [u8; 3] = [128, 128, 128];

const MIN_THICKNESS: u32 = 2;

/// Draws one box outline per face onto a frame copy.
///
/// Labels are left to the renderer; only geometry and colour are baked
/// into recordings.
#[derive(Clone, Copy, Debug, Default)]
pub struct OverlayPainter;

impl OverlayPainter {
    pub fn new() -> Self {
        Self
    }

    pub fn paint(&self, frame: &mut Frame, faces: &[AnnotatedFace]) {
        let thickness = line_thickness(frame.width(), frame.height());
        for face in faces {
            draw_outline(frame, &face.region.bbox, thickness, outline_color(&face.emotion));
        }
    }
}

/// Emotion colour when confident, otherwise the uncertain or unclassified accent.
pub fn outline_color(emotion: &FaceEmotion) -> [u8; 3] {
    match emotion {
        FaceEmotion::Classified(result) if result.confidence() >= CONFIDENT_EMOTION_THRESHOLD => {
            result.dominant().color()
        }
        FaceEmotion::Classified(_) => UNCERTAIN_COLOR,
        FaceEmotion::Unclassified => UNCLASSIFIED_COLOR,
    }
}

fn line_thickness(width: u32, height: u32) -> u32 {
    (width.min(height) / 200).max(MIN_THICKNESS)
}

fn draw_outline(frame: &mut Frame, bbox: &BoundingBox, thickness: u32, color: [u8; 3]) {
    let (fw, fh) = (frame.width(), frame.height());
    if !bbox.fits_within(fw, fh) {
        return;
    }
    let channels = frame.channels() as usize;
    if channels < 3 {
        return;
    }
    let t = thickness.min(bbox.width).min(bbox.height);
    let data = frame.data_mut();

    let mut fill = |x0: u32, y0: u32, x1: u32, y1: u32| {
        for y in y0..y1 {
            for x in x0..x1 {
                let offset = (y as usize * fw as usize + x as usize) * channels;
                data[offset..offset + 3].copy_from_slice(&color);
            }
        }
    };

    let (left, top, right, bottom) = (bbox.x, bbox.y, bbox.right(), bbox.bottom());
    fill(left, top, right, top + t);
    fill(left, bottom - t, right, bottom);
    fill(left, top, left + t, bottom);
    fill(right - t, top, right, bottom);
}
