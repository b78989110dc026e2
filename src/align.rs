use crate::features::DescriptorSet;
use crate::matching::symmetric_matching;
use crate::settings::{HyperlapseSettings, TransformModel};
use crate::transform::{Homography, PointMatch, Similarity, Transform};
use arrsac::Arrsac;
use cv_core::sample_consensus::{Consensus, Estimator};
use log::*;
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64;

/// Why no reliable transform could be derived between two frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoMatch {
    /// One of the two frames had too few keypoints.
    InsufficientKeypoints,
    /// Fewer filtered matches than required survived matching.
    TooFewMatches(usize),
    /// Sample consensus could not find any model.
    ConsensusFailed,
    /// The best model was supported by too few inliers.
    TooFewInliers(usize),
    /// The model scales the image area implausibly between adjacent frames.
    ImplausibleScale(f64),
}

/// The outcome of aligning a frame against its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub enum Alignment {
    /// The first frame defines the stabilized coordinate frame.
    Reference,
    /// `transform` maps the current frame onto the previous frame.
    Aligned {
        transform: Transform,
        matches: usize,
        inliers: usize,
    },
    /// The frame is carried forward with the identity transform.
    NoMatch(NoMatch),
}

impl Alignment {
    /// The transform relative to the previous frame, identity unless aligned.
    pub fn pairwise(&self) -> Transform {
        match self {
            Alignment::Aligned { transform, .. } => *transform,
            _ => Transform::identity(),
        }
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, Alignment::NoMatch(_))
    }
}

/// One frame's alignment together with its transform into the stabilized coordinate frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedFrame {
    pub alignment: Alignment,
    pub cumulative: Transform,
}

/// The accumulator folded over the frame stream.
///
/// Only the previous frame's descriptors and the running transform are kept, so
/// memory does not grow with the number of frames.
#[derive(Debug, Clone, Default)]
pub struct AlignmentState {
    previous: Option<DescriptorSet>,
    cumulative: Transform,
}

impl AlignmentState {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cumulative(&self) -> &Transform {
        &self.cumulative
    }
}

/// Estimates frame to frame transforms with symmetric matching and ARRSAC.
pub struct FrameAligner<R> {
    lowes_ratio: f32,
    minimum_matches: usize,
    maximum_scale_change: f64,
    model: TransformModel,
    consensus: Arrsac<R>,
}

impl FrameAligner<Pcg64> {
    /// Create an aligner with a fixed seed so that runs are reproducible.
    pub fn new(settings: &HyperlapseSettings) -> Self {
        Self::with_consensus(
            settings,
            Arrsac::new(settings.consensus_threshold, Pcg64::from_seed([5; 32])),
        )
    }
}

impl<R> FrameAligner<R>
where
    R: RngCore,
{
    pub fn with_consensus(settings: &HyperlapseSettings, consensus: Arrsac<R>) -> Self {
        Self {
            lowes_ratio: settings.lowes_ratio,
            minimum_matches: settings.minimum_matches,
            maximum_scale_change: settings.maximum_scale_change,
            model: settings.transform_model,
            consensus,
        }
    }

    /// Align `current` onto `previous`.
    pub fn align(&mut self, previous: &DescriptorSet, current: &DescriptorSet) -> Alignment {
        if previous.is_insufficient() || current.is_insufficient() {
            return Alignment::NoMatch(NoMatch::InsufficientKeypoints);
        }

        let matches: Vec<PointMatch> =
            symmetric_matching(&previous.descriptors, &current.descriptors, self.lowes_ratio)
                .into_iter()
                .map(|[pix, cix]| PointMatch(current.keypoints[cix], previous.keypoints[pix]))
                .collect();
        trace!("{} symmetric matches", matches.len());

        let estimated = match self.model {
            TransformModel::Similarity => self.estimate(&Similarity::new(), &matches),
            TransformModel::Homography => self.estimate(&Homography::new(), &matches),
        };
        let (transform, inliers) = match estimated {
            Ok(estimated) => estimated,
            Err(reason) => return Alignment::NoMatch(reason),
        };

        let scale = transform.area_scale();
        if !scale.is_finite()
            || scale > self.maximum_scale_change
            || scale < self.maximum_scale_change.recip()
        {
            return Alignment::NoMatch(NoMatch::ImplausibleScale(scale));
        }
        Alignment::Aligned {
            transform,
            matches: matches.len(),
            inliers,
        }
    }

    fn estimate<E>(&mut self, estimator: &E, matches: &[PointMatch]) -> Result<(Transform, usize), NoMatch>
    where
        E: Estimator<PointMatch, Model = Transform>,
    {
        let required = self.minimum_matches.max(E::MIN_SAMPLES);
        if matches.len() < required {
            return Err(NoMatch::TooFewMatches(matches.len()));
        }
        let (model, inliers) = self
            .consensus
            .model_inliers(estimator, matches.iter().copied())
            .ok_or(NoMatch::ConsensusFailed)?;
        let inliers: Vec<usize> = inliers.into_iter().collect();
        if inliers.len() < required {
            return Err(NoMatch::TooFewInliers(inliers.len()));
        }
        // Refit on every inlier instead of the minimal sample.
        let refined = estimator
            .estimate(inliers.iter().map(|&ix| matches[ix]))
            .into_iter()
            .next()
            .unwrap_or(model);
        Ok((refined, inliers.len()))
    }

    /// Fold one frame into the running state.
    ///
    /// The pairwise transform is composed with the accumulated transform so that every
    /// frame is expressed in the coordinate frame of the first one. A frame without a
    /// match keeps the accumulated transform of its predecessor.
    pub fn step(&mut self, state: AlignmentState, current: DescriptorSet) -> (AlignmentState, AlignedFrame) {
        let alignment = match &state.previous {
            None => Alignment::Reference,
            Some(previous) => self.align(previous, &current),
        };
        match &alignment {
            Alignment::NoMatch(reason) => debug!("no reliable transform: {:?}", reason),
            Alignment::Aligned { matches, inliers, .. } => {
                trace!("aligned with {} of {} matches", inliers, matches)
            }
            Alignment::Reference => {}
        }
        let cumulative = state.cumulative.compose(&alignment.pairwise());
        (
            AlignmentState {
                previous: Some(current),
                cumulative,
            },
            AlignedFrame {
                alignment,
                cumulative,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Descriptor;
    use cv_core::nalgebra::{Point2, Vector2};
    use rand::Rng;

    fn scene(seed: u8, n: usize) -> DescriptorSet {
        let mut rng = Pcg64::from_seed([seed; 32]);
        let mut keypoints = Vec::with_capacity(n);
        let mut descriptors = Vec::with_capacity(n);
        for _ in 0..n {
            keypoints.push(Point2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..460.0)));
            let mut bytes = [0u8; 64];
            rng.fill(&mut bytes[..]);
            descriptors.push(Descriptor::new(bytes));
        }
        DescriptorSet::new(keypoints, descriptors, 10)
    }

    fn shifted(set: &DescriptorSet, shift: Vector2<f64>) -> DescriptorSet {
        DescriptorSet::new(
            set.keypoints.iter().map(|p| p + shift).collect(),
            set.descriptors.clone(),
            10,
        )
    }

    #[test]
    fn identical_frames_align_to_the_identity() {
        let mut aligner = FrameAligner::new(&HyperlapseSettings::default());
        let set = scene(1, 60);
        match aligner.align(&set, &set) {
            Alignment::Aligned {
                transform, inliers, ..
            } => {
                assert!(transform.distance_to_identity() < 1e-6);
                assert_eq!(inliers, 60);
            }
            other => panic!("expected an alignment, got {:?}", other),
        }
    }

    #[test]
    fn translation_maps_current_onto_previous() {
        let mut aligner = FrameAligner::new(&HyperlapseSettings::default());
        let previous = scene(2, 80);
        let current = shifted(&previous, Vector2::new(6.0, -4.0));
        let transform = aligner.align(&previous, &current).pairwise();
        let p = transform.apply(&current.keypoints[0]).unwrap();
        assert!((p - previous.keypoints[0]).norm() < 1e-6);
    }

    #[test]
    fn homography_model_aligns_translation() {
        let settings = HyperlapseSettings {
            transform_model: TransformModel::Homography,
            ..Default::default()
        };
        let mut aligner = FrameAligner::new(&settings);
        let previous = scene(3, 80);
        let current = shifted(&previous, Vector2::new(-3.0, 2.0));
        let alignment = aligner.align(&previous, &current);
        assert!(!alignment.is_no_match());
        let p = alignment.pairwise().apply(&current.keypoints[7]).unwrap();
        assert!((p - previous.keypoints[7]).norm() < 1e-3);
    }

    #[test]
    fn unrelated_frames_do_not_match() {
        let mut aligner = FrameAligner::new(&HyperlapseSettings::default());
        let alignment = aligner.align(&scene(4, 60), &scene(5, 60));
        assert!(alignment.is_no_match());
        assert_eq!(alignment.pairwise(), Transform::identity());
    }

    #[test]
    fn insufficient_frames_do_not_match() {
        let mut aligner = FrameAligner::new(&HyperlapseSettings::default());
        let alignment = aligner.align(&scene(6, 60), &DescriptorSet::insufficient());
        assert_eq!(alignment, Alignment::NoMatch(NoMatch::InsufficientKeypoints));
    }

    #[test]
    fn zooming_between_frames_is_rejected() {
        let mut aligner = FrameAligner::new(&HyperlapseSettings::default());
        let previous = scene(8, 60);
        let current = DescriptorSet::new(
            previous.keypoints.iter().map(|p| Point2::from(p.coords * 2.0)).collect(),
            previous.descriptors.clone(),
            10,
        );
        match aligner.align(&previous, &current) {
            Alignment::NoMatch(NoMatch::ImplausibleScale(scale)) => assert!((scale - 0.25).abs() < 1e-6),
            other => panic!("expected an implausible scale, got {:?}", other),
        }
        match aligner.align(&current, &previous) {
            Alignment::NoMatch(NoMatch::ImplausibleScale(scale)) => assert!((scale - 4.0).abs() < 1e-6),
            other => panic!("expected an implausible scale, got {:?}", other),
        }
    }

    #[test]
    fn too_few_consistent_matches_are_rejected() {
        let settings = HyperlapseSettings {
            minimum_matches: 12,
            ..Default::default()
        };
        let mut aligner = FrameAligner::new(&settings);
        let previous = scene(9, 16);
        let scattered = scene(10, 16);
        // Ten keypoints move together, the other six land anywhere.
        let keypoints = previous
            .keypoints
            .iter()
            .zip(&scattered.keypoints)
            .enumerate()
            .map(|(ix, (p, q))| if ix < 10 { p + Vector2::new(4.0, 1.0) } else { *q })
            .collect();
        let current = DescriptorSet::new(keypoints, previous.descriptors.clone(), 10);
        assert_eq!(
            aligner.align(&previous, &current),
            Alignment::NoMatch(NoMatch::TooFewInliers(10))
        );
    }

    #[test]
    fn fold_accumulates_and_carries_through_gaps() {
        let mut aligner = FrameAligner::new(&HyperlapseSettings::default());
        let first = scene(7, 80);
        let second = shifted(&first, Vector2::new(5.0, 0.0));
        let third = shifted(&second, Vector2::new(5.0, 0.0));

        let state = AlignmentState::new();
        let (state, a) = aligner.step(state, first);
        assert_eq!(a.alignment, Alignment::Reference);
        assert_eq!(a.cumulative, Transform::identity());

        let (state, b) = aligner.step(state, second);
        let (state, c) = aligner.step(state, third.clone());
        let origin = c.cumulative.apply(&third.keypoints[0]).unwrap();
        assert!((origin - (third.keypoints[0] - Vector2::new(10.0, 0.0))).norm() < 1e-6);
        assert!(!b.alignment.is_no_match());

        let (_, d) = aligner.step(state, DescriptorSet::insufficient());
        assert!(d.alignment.is_no_match());
        assert!((d.cumulative.0 - c.cumulative.0).amax() < 1e-12);
    }
}
