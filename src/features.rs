use crate::sampler::Waypoint;
use crate::settings::HyperlapseSettings;
use akaze::Akaze;
use bitarray::BitArray;
use cv_core::nalgebra::Point2;
use image::{imageops, DynamicImage, RgbImage};
use log::*;

/// The binary M-LDB descriptor produced by akaze, compared with the Hamming distance.
pub type Descriptor = BitArray<64>;

/// Frames smaller than this in either dimension are not searched for features.
const MINIMUM_EXTENT: u32 = 16;

/// A retrieved image together with the waypoint it was requested for.
#[derive(Debug, Clone)]
pub struct Frame {
    pub waypoint: Waypoint,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(waypoint: Waypoint, image: RgbImage) -> Self {
        Self { waypoint, image }
    }
}

/// Keypoint locations (in pixels) and their descriptors for one frame.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    pub keypoints: Vec<Point2<f64>>,
    pub descriptors: Vec<Descriptor>,
    insufficient: bool,
}

impl DescriptorSet {
    /// Create a set, flagging it as insufficient if it has fewer than `minimum_keypoints`.
    pub fn new(
        keypoints: Vec<Point2<f64>>,
        descriptors: Vec<Descriptor>,
        minimum_keypoints: usize,
    ) -> Self {
        debug_assert_eq!(keypoints.len(), descriptors.len());
        let insufficient = descriptors.len() < minimum_keypoints;
        Self {
            keypoints,
            descriptors,
            insufficient,
        }
    }

    /// A set that can never produce a reliable transform.
    pub fn insufficient() -> Self {
        Self {
            insufficient: true,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Too few keypoints were detected for alignment to be trusted.
    pub fn is_insufficient(&self) -> bool {
        self.insufficient
    }
}

/// Computes rotation tolerant binary descriptors for frames.
#[derive(Debug, Clone)]
pub struct DescriptorExtractor {
    akaze: Akaze,
    minimum_keypoints: usize,
    crop_bottom: u32,
}

impl DescriptorExtractor {
    pub fn new(settings: &HyperlapseSettings) -> Self {
        Self {
            akaze: Akaze::new(settings.akaze_threshold),
            minimum_keypoints: settings.minimum_keypoints,
            crop_bottom: settings.crop_bottom,
        }
    }

    pub fn extract(&self, image: &RgbImage) -> DescriptorSet {
        let (width, height) = image.dimensions();
        let height = if height > self.crop_bottom + MINIMUM_EXTENT {
            height - self.crop_bottom
        } else {
            height
        };
        if width < MINIMUM_EXTENT || height < MINIMUM_EXTENT {
            debug!("frame of {}x{} is too small for extraction", width, height);
            return DescriptorSet::insufficient();
        }
        let image = DynamicImage::ImageRgb8(imageops::crop_imm(image, 0, 0, width, height).to_image());
        if is_flat(&image) {
            // Placeholder images without imagery have no contrast to diffuse.
            debug!("frame has no intensity variation");
            return DescriptorSet::insufficient();
        }

        let (keypoints, descriptors) = self.akaze.extract(&image);
        let keypoints: Vec<Point2<f64>> = keypoints
            .iter()
            .map(|kp| Point2::new(kp.point.0 as f64, kp.point.1 as f64))
            .collect();
        let set = DescriptorSet::new(keypoints, descriptors, self.minimum_keypoints);
        if set.is_insufficient() {
            debug!(
                "only {} keypoints found, {} required",
                set.len(),
                self.minimum_keypoints
            );
        } else {
            trace!("extracted {} descriptors", set.len());
        }
        set
    }
}

fn is_flat(image: &DynamicImage) -> bool {
    let gray = image.to_luma8();
    let mut pixels = gray.pixels().map(|p| p.0[0]);
    match pixels.next() {
        Some(first) => pixels.all(|value| value == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn blank_frame_is_insufficient() {
        let extractor = DescriptorExtractor::new(&HyperlapseSettings::default());
        let blank = RgbImage::from_pixel(320, 240, Rgb([128, 128, 128]));
        let set = extractor.extract(&blank);
        assert!(set.is_insufficient());
        assert!(set.is_empty());
    }

    #[test]
    fn tiny_frame_is_insufficient() {
        let extractor = DescriptorExtractor::new(&HyperlapseSettings::default());
        let tiny = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 0]));
        assert!(extractor.extract(&tiny).is_insufficient());
    }

    #[test]
    fn sets_below_the_minimum_are_flagged() {
        let keypoints = vec![Point2::new(1.0, 2.0); 3];
        let descriptors = vec![Descriptor::zeros(); 3];
        assert!(DescriptorSet::new(keypoints.clone(), descriptors.clone(), 4).is_insufficient());
        assert!(!DescriptorSet::new(keypoints, descriptors, 3).is_insufficient());
    }
}
