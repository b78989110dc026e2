use log::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use streetlapse::{
    load_track, retrieve::select_panoramas, AbortHandle, DirectorySink, FfmpegEncoder, HyperlapseSettings,
    Minterp, Pipeline, Progress, Report, Spacing, StreetViewClient,
};
use structopt::StructOpt;

#[derive(StructOpt, Clone)]
#[structopt(name = "streetlapse", about = "Turn a GPS track into a stabilized street-level hyperlapse")]
struct Opt {
    /// The track to follow, either a .gpx file or a .json file of `[{"lat", "lng"}]`
    #[structopt(parse(from_os_str))]
    input_path: PathBuf,
    /// Key for the Street View static API, required unless this is a dry run
    #[structopt(long)]
    api_key: Option<String>,
    /// The output video
    #[structopt(short, long, default_value = "streetlapse.mp4")]
    output: PathBuf,
    /// Where rendered frames are written. Default: a new temporary directory
    #[structopt(long)]
    output_dir: Option<PathBuf>,
    /// Distance between images in metres
    #[structopt(long)]
    spacing: Option<f64>,
    /// Images per mile, used when no other spacing is given
    #[structopt(short, long, default_value = "100")]
    frames_per_mile: f64,
    /// The number of intervals the track is divided into, overriding every other spacing
    #[structopt(long)]
    max_frames: Option<usize>,
    /// The most that may be spent on image requests
    #[structopt(long)]
    max_spend: Option<f64>,
    /// Don't fetch anything, only report the number of images and their cost
    #[structopt(short, long)]
    dry_run: bool,
    /// Print the metadata report before creating the video (implied by --dry-run)
    #[structopt(long)]
    print_metadata: bool,
    /// Print the report as JSON
    #[structopt(long)]
    json: bool,
    /// Print JSON progress messages to stdout
    #[structopt(long)]
    progress: bool,
    /// Insert points along every segment of the track, dividing it into this many parts
    #[structopt(long)]
    interp: Option<usize>,
    /// Motion interpolation applied to the video: skip, fast or good
    #[structopt(long, default_value = "good")]
    minterp: Minterp,
    /// Number of image requests in flight
    #[structopt(long)]
    network_concurrency: Option<usize>,
    /// Drop frames that could not be aligned to their predecessor
    #[structopt(long)]
    strict_continuity: bool,
    /// The file where settings are specified.
    ///
    /// This is in the format of `streetlapse::HyperlapseSettings`.
    #[structopt(long, default_value = "streetlapse-settings.json")]
    settings: PathBuf,
}

impl Opt {
    fn spacing(&self, settings: &HyperlapseSettings) -> Spacing {
        if let Some(frames) = self.max_frames {
            Spacing::Budget(frames)
        } else if let Some(max_spend) = self.max_spend {
            Spacing::Spend {
                max_spend,
                cost_per_sample: settings.cost_per_sample,
            }
        } else if let Some(spacing) = self.spacing {
            Spacing::Distance(spacing)
        } else {
            Spacing::frames_per_mile(self.frames_per_mile)
        }
    }
}

fn print_report(report: &Report, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!("{:?}", report);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    let mut settings = HyperlapseSettings::load(&opt.settings);
    if let Some(concurrency) = opt.network_concurrency {
        settings.network_concurrency = concurrency;
    }
    settings.strict_continuity |= opt.strict_continuity;
    let progress = Progress::new(opt.progress);

    progress.stage("Parsing GPX data");
    let mut track = load_track(&opt.input_path)?;
    if let Some(factor) = opt.interp {
        track = track.densify(factor);
        info!("interpolated the track to {} points", track.len());
    }
    info!("track is {:.1} m long with {} points", track.total_distance(), track.len());
    let spacing = opt.spacing(&settings);

    let api_key = opt.api_key.clone().unwrap_or_default();
    if api_key.is_empty() && !opt.dry_run {
        return Err("an --api-key is required unless --dry-run is given".into());
    }
    let client = Arc::new(StreetViewClient::new(api_key, &settings)?);
    let pipeline = Pipeline::new(settings, client.clone()).with_progress(progress);

    if opt.dry_run {
        let report = pipeline.dry_run(&track, spacing)?;
        print_report(&report, opt.json)?;
        return Ok(());
    }

    let plan = pipeline.plan(&track, spacing)?;
    progress.stage("Fetching Streetview metadata");
    let metadata = client.metadata_all(&plan.waypoints, settings.network_concurrency).await;
    let selection = select_panoramas(plan.waypoints.clone(), metadata);
    info!("{} of {} waypoints have distinct imagery", selection.waypoints.len(), plan.len());
    if opt.print_metadata {
        let report = Report::new(&track, &plan, settings.cost_per_sample)
            .with_selection(&selection, settings.cost_per_sample);
        print_report(&report, opt.json)?;
    }

    let output_dir = match &opt.output_dir {
        Some(dir) => dir.clone(),
        None => {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
            std::env::temp_dir().join(format!("streetlapse-{}", now.as_secs()))
        }
    };
    info!("writing frames to {}", output_dir.display());
    let sink = DirectorySink::create(&output_dir)?;

    let abort = AbortHandle::new();
    let on_interrupt = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing requests in flight");
            on_interrupt.abort();
        }
    });

    let (sink, stats) = pipeline.run(selection.waypoints, sink, &abort).await?;
    if stats.written == 0 {
        return Err("no frames could be retrieved".into());
    }

    FfmpegEncoder::new(&settings, progress)
        .encode(sink.directory(), stats.written, &opt.output, opt.minterp)
        .await?;
    Ok(())
}
