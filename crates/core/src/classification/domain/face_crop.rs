use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};

use crate::classification::domain::emotion_classifier::ClassificationError;
use crate::shared::frame::Frame;
use crate::shared::region::BoundingBox;

/// Cuts `bbox` (grown by `margin` on each side, clamped to the frame) out
/// of `frame` and returns it as a `size` x `size` grayscale patch.
pub fn grayscale_crop(
    frame: &Frame,
    bbox: &BoundingBox,
    margin: f64,
    size: u32,
) -> Result<GrayImage, ClassificationError> {
    let (fw, fh) = (frame.width(), frame.height());
    if !bbox.fits_within(fw, fh) || size == 0 {
        return Err(ClassificationError::EmptyCrop);
    }
    let region = bbox.expanded(margin, fw, fh);

    let channels = frame.channels() as usize;
    let data = frame.data();
    let stride = fw as usize * channels;
    let crop = RgbImage::from_fn(region.width, region.height, |x, y| {
        let offset = (region.y + y) as usize * stride + (region.x + x) as usize * channels;
        if channels >= 3 {
            Rgb([data[offset], data[offset + 1], data[offset + 2]])
        } else {
            Rgb([data[offset]; 3])
        }
    });

    let gray = imageops::grayscale(&crop);
    Ok(imageops::resize(&gray, size, size, FilterType::Triangle))
}
