use crate::align::{Alignment, AlignmentState, FrameAligner};
use crate::assemble::{FrameSink, SequenceAssembler};
use crate::encode::EncodeError;
use crate::features::{DescriptorExtractor, Frame};
use crate::progress::Progress;
use crate::report::Report;
use crate::retrieve::ImageSource;
use crate::sampler::{sample, SamplePlan, Spacing, Waypoint};
use crate::settings::HyperlapseSettings;
use crate::track::{Track, TrackError};
use futures::{future, stream, StreamExt};
use log::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("could not emit frame: {0}")]
    Sink(#[from] EncodeError),
}

/// Stops a running pipeline from issuing further requests.
///
/// Requests already in flight are allowed to finish and their frames are still
/// processed, so the output is a prefix of the planned sequence.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters collected over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Image requests issued.
    pub requested: usize,
    pub retrieved: usize,
    /// Requests that failed; their waypoints are skipped.
    pub failed: usize,
    /// Frames with a reliable transform to their predecessor.
    pub aligned: usize,
    pub no_match: usize,
    /// Frames emitted to the sink.
    pub written: usize,
}

#[derive(Debug, Default)]
struct Retrieval {
    retrieved: usize,
    failed: usize,
}

/// Samples a track, retrieves one image per waypoint and stabilizes the sequence.
pub struct Pipeline<S> {
    settings: HyperlapseSettings,
    source: Arc<S>,
    progress: Progress,
}

impl<S> Pipeline<S>
where
    S: ImageSource + 'static,
{
    pub fn new(settings: HyperlapseSettings, source: Arc<S>) -> Self {
        Self {
            settings,
            source,
            progress: Progress::disabled(),
        }
    }

    pub fn with_progress(self, progress: Progress) -> Self {
        Self { progress, ..self }
    }

    pub fn settings(&self) -> &HyperlapseSettings {
        &self.settings
    }

    pub fn plan(&self, track: &Track, spacing: Spacing) -> Result<SamplePlan, TrackError> {
        self.progress.message("Finding viewpoints");
        sample(track, spacing)
    }

    /// Report how many images a run would request and what they would cost.
    ///
    /// The image source is never contacted.
    pub fn dry_run(&self, track: &Track, spacing: Spacing) -> Result<Report, TrackError> {
        let plan = self.plan(track, spacing)?;
        info!(
            "dry run: {} waypoints, estimated cost {:.3}",
            plan.len(),
            plan.estimated_cost(self.settings.cost_per_sample)
        );
        Ok(Report::new(track, &plan, self.settings.cost_per_sample))
    }

    /// Retrieve, align and render `waypoints` into `sink` in waypoint order.
    ///
    /// At most `network_concurrency` requests are in flight and at most `queue_capacity`
    /// retrieved frames wait for the alignment stage. Failed retrievals are logged and
    /// skipped. The sink is handed back once every frame was emitted.
    pub async fn run<K>(
        &self,
        waypoints: Vec<Waypoint>,
        sink: K,
        abort: &AbortHandle,
    ) -> Result<(K, PipelineStats), PipelineError>
    where
        K: FrameSink + Send + 'static,
    {
        let total = waypoints.len();
        let (sender, receiver) = mpsc::channel::<Frame>(self.settings.queue_capacity.max(1));
        self.progress.stage("Fetching images");

        let source = self.source.clone();
        let concurrency = self.settings.network_concurrency.max(1);
        let gate = abort.clone();
        let producer = tokio::spawn(async move {
            let mut retrieval = Retrieval::default();
            let mut responses = stream::iter(waypoints)
                .take_while(move |_| future::ready(!gate.is_aborted()))
                .map(|waypoint| {
                    let source = source.clone();
                    async move {
                        let result = source.fetch(&waypoint).await;
                        (waypoint, result)
                    }
                })
                .buffered(concurrency);
            while let Some((waypoint, result)) = responses.next().await {
                match result {
                    Ok(image) => {
                        retrieval.retrieved += 1;
                        if sender.send(Frame::new(waypoint, image)).await.is_err() {
                            // The alignment stage stopped early and reports its own error.
                            break;
                        }
                    }
                    Err(e) => {
                        retrieval.failed += 1;
                        warn!("skipping waypoint {}: {}", waypoint.index, e);
                    }
                }
            }
            retrieval
        });

        let settings = self.settings;
        let progress = self.progress;
        let consumer = tokio::task::spawn_blocking(move || process(settings, progress, total, receiver, sink));

        let retrieval = producer.await?;
        let (sink, mut stats) = consumer.await??;
        if abort.is_aborted() {
            warn!("aborted after {} of {} waypoints", retrieval.retrieved + retrieval.failed, total);
        }
        stats.requested = retrieval.retrieved + retrieval.failed;
        stats.retrieved = retrieval.retrieved;
        stats.failed = retrieval.failed;
        info!(
            "{} frames written, {} aligned, {} without a match, {} retrievals failed",
            stats.written, stats.aligned, stats.no_match, stats.failed
        );
        Ok((sink, stats))
    }
}

/// The sequential stage: extract, align and assemble each frame as it arrives.
fn process<K>(
    settings: HyperlapseSettings,
    progress: Progress,
    total: usize,
    mut receiver: mpsc::Receiver<Frame>,
    mut sink: K,
) -> Result<(K, PipelineStats), EncodeError>
where
    K: FrameSink,
{
    let extractor = DescriptorExtractor::new(&settings);
    let mut aligner = FrameAligner::new(&settings);
    let mut assembler = SequenceAssembler::new(
        settings.image_width,
        settings.image_height,
        settings.strict_continuity,
    );
    let mut state = AlignmentState::new();
    let mut stats = PipelineStats::default();

    let mut seen = 0;
    while let Some(frame) = receiver.blocking_recv() {
        seen += 1;
        let descriptors = extractor.extract(&frame.image);
        let (next, aligned) = aligner.step(state, descriptors);
        state = next;
        match aligned.alignment {
            Alignment::Aligned { .. } => stats.aligned += 1,
            Alignment::NoMatch(_) => stats.no_match += 1,
            Alignment::Reference => {}
        }
        if let Some(rendered) = assembler.assemble(frame, &aligned) {
            sink.push(rendered)?;
            stats.written += 1;
        }
        progress.message(format!("{:.1}% processed", 100.0 * seen as f64 / total.max(1) as f64));
    }
    Ok((sink, stats))
}
