//! # `streetlapse`
//!
//! Stabilized hyperlapse videos from recorded GPS tracks and street-level imagery.
//!
//! A [`Track`] is sampled into evenly spaced [`Waypoint`]s, one image is retrieved per
//! waypoint through an [`ImageSource`], and consecutive images are registered with AKAZE
//! features, symmetric binary matching and ARRSAC so that every frame can be warped into
//! the coordinate frame of the first one. Retrieval is concurrent and bounded; extraction,
//! alignment and assembly run strictly in waypoint order.
//!
//! ## Modules
//! * [`track`] - geographic points and polylines with distance and bearing utilities
//! * [`sampler`] - greedy selection of waypoints under spacing, frame or spend limits
//! * [`features`] - keypoint and descriptor extraction per frame
//! * [`matching`] - ratio-tested symmetric descriptor matching
//! * [`transform`] - frame to frame transforms and their estimators
//! * [`align`] - the transform chain folded over the frame stream
//! * [`assemble`] - warping frames onto a common canvas in order
//! * [`retrieve`] - the image source interface and a Street View client
//! * [`pipeline`] - the bounded producer/consumer run and dry runs
//! * [`encode`] - writing frames and joining them into a video

pub mod align;
pub mod assemble;
pub mod encode;
pub mod features;
pub mod input;
pub mod matching;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod retrieve;
pub mod sampler;
pub mod settings;
pub mod track;
pub mod transform;

pub use align::{AlignedFrame, Alignment, AlignmentState, FrameAligner, NoMatch};
pub use assemble::{FrameSink, RenderedFrame, RenderedSequence, SequenceAssembler};
pub use encode::{DirectorySink, EncodeError, FfmpegEncoder, Minterp};
pub use features::{Descriptor, DescriptorExtractor, DescriptorSet, Frame};
pub use input::{load_track, InputError};
pub use pipeline::{AbortHandle, Pipeline, PipelineError, PipelineStats};
pub use progress::Progress;
pub use report::Report;
pub use retrieve::{ImageSource, RetrievalError, StreetViewClient};
pub use sampler::{sample, SamplePlan, Spacing, Waypoint};
pub use settings::{HyperlapseSettings, TransformModel};
pub use track::{GeoPoint, Track, TrackError};
pub use transform::{PointMatch, Transform};
