use crate::align::AlignedFrame;
use crate::encode::EncodeError;
use crate::features::Frame;
use crate::sampler::Waypoint;
use crate::transform::Transform;
use image::{imageops, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use log::*;

/// A frame warped into the stabilized coordinate frame.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// Position in the output sequence, contiguous from zero.
    pub index: usize,
    pub waypoint: Waypoint,
    pub image: RgbImage,
    /// The cumulative transform the frame was warped by.
    pub transform: Transform,
    /// No reliable transform to the previous frame was found.
    pub no_match: bool,
}

/// Receives rendered frames in output order.
pub trait FrameSink {
    fn push(&mut self, frame: RenderedFrame) -> Result<(), EncodeError>;
}

/// The rendered frames held in memory, in output order.
#[derive(Debug, Clone, Default)]
pub struct RenderedSequence {
    pub frames: Vec<RenderedFrame>,
}

impl RenderedSequence {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The waypoint indices of the rendered frames.
    pub fn waypoint_indices(&self) -> Vec<usize> {
        self.frames.iter().map(|frame| frame.waypoint.index).collect()
    }
}

impl FrameSink for RenderedSequence {
    fn push(&mut self, frame: RenderedFrame) -> Result<(), EncodeError> {
        self.frames.push(frame);
        Ok(())
    }
}

/// Warps aligned frames onto a common canvas.
#[derive(Debug, Clone)]
pub struct SequenceAssembler {
    width: u32,
    height: u32,
    strict_continuity: bool,
    background: Rgb<u8>,
    next_index: usize,
    skipped: usize,
}

impl SequenceAssembler {
    pub fn new(width: u32, height: u32, strict_continuity: bool) -> Self {
        Self {
            width,
            height,
            strict_continuity,
            background: Rgb([0, 0, 0]),
            next_index: 0,
            skipped: 0,
        }
    }

    /// The number of frames dropped because they could not be aligned.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Render `frame` with its cumulative transform.
    ///
    /// Returns `None` only when the frame is unaligned and strict continuity is enabled.
    /// Frames must be given in waypoint order.
    pub fn assemble(&mut self, frame: Frame, aligned: &AlignedFrame) -> Option<RenderedFrame> {
        let no_match = aligned.alignment.is_no_match();
        if no_match && self.strict_continuity {
            debug!("skipping unaligned frame at waypoint {}", frame.waypoint.index);
            self.skipped += 1;
            return None;
        }

        let image = self.warp(&frame.image, &aligned.cumulative);
        let index = self.next_index;
        self.next_index += 1;
        Some(RenderedFrame {
            index,
            waypoint: frame.waypoint,
            image,
            transform: aligned.cumulative,
            no_match,
        })
    }

    /// Warp `image` onto the canvas, padding with the background where nothing maps.
    pub fn warp(&self, image: &RgbImage, transform: &Transform) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(self.width, self.height, self.background);
        if transform.distance_to_identity() < 1e-9 {
            let (width, height) = image.dimensions();
            let visible =
                imageops::crop_imm(image, 0, 0, width.min(self.width), height.min(self.height)).to_image();
            imageops::replace(&mut canvas, &visible, 0, 0);
            return canvas;
        }
        match Projection::from_matrix(transform.to_row_major()) {
            Some(projection) => {
                warp_into(image, &projection, Interpolation::Bilinear, self.background, &mut canvas);
            }
            None => {
                warn!("transform is not invertible, rendering the frame unwarped");
                return self.warp(image, &Transform::identity());
            }
        }
        canvas
    }
}
