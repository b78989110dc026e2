use crate::assemble::{FrameSink, RenderedFrame};
use crate::progress::Progress;
use crate::settings::HyperlapseSettings;
use image::ImageFormat;
use log::*;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not write frame: {0}")]
    Image(#[from] image::ImageError),
    #[error("{program} failed with {status}: {stderr}")]
    Process {
        program: String,
        status: ExitStatus,
        /// The last lines `program` wrote to stderr.
        stderr: String,
    },
}

/// Writes rendered frames as `0.jpg`, `1.jpg`, ... for the encoder to pick up.
#[derive(Debug)]
pub struct DirectorySink {
    directory: PathBuf,
    written: usize,
}

impl DirectorySink {
    pub fn create(directory: impl Into<PathBuf>) -> Result<Self, EncodeError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory, written: 0 })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.directory.join(format!("{}.jpg", index))
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl FrameSink for DirectorySink {
    fn push(&mut self, frame: RenderedFrame) -> Result<(), EncodeError> {
        let path = self.frame_path(frame.index);
        frame.image.save_with_format(&path, ImageFormat::Jpeg)?;
        trace!("wrote {}", path.display());
        self.written += 1;
        Ok(())
    }
}

/// The motion smoothing applied after the frames are joined into a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Minterp {
    /// Keep the joined video as is.
    Skip,
    /// Interpolate, blend and drop frames for a cheap motion blur.
    Fast,
    /// Motion compensated interpolation.
    Good,
}

impl Default for Minterp {
    fn default() -> Self {
        Minterp::Good
    }
}

impl FromStr for Minterp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Minterp::Skip),
            "fast" => Ok(Minterp::Fast),
            "good" => Ok(Minterp::Good),
            other => Err(format!("unknown motion interpolation {:?}, expected skip, fast or good", other)),
        }
    }
}

/// Lines of stderr kept for the error of a failed encoder run.
const STDERR_TAIL: usize = 20;

/// Joins numbered frames into a video with `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
    framerate: u32,
    crf: u32,
    width: u32,
    height: u32,
    progress: Progress,
}

impl FfmpegEncoder {
    pub fn new(settings: &HyperlapseSettings, progress: Progress) -> Self {
        Self {
            program: "ffmpeg".to_owned(),
            framerate: settings.framerate,
            crf: settings.crf,
            width: settings.image_width,
            height: settings.image_height,
            progress,
        }
    }

    /// Use a different executable, for example a full path to `ffmpeg`.
    pub fn with_program(self, program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..self
        }
    }

    fn output_args(&self, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-c:v",
            "libx264",
            "-crf",
            self.crf.to_string().as_str(),
            "-pix_fmt",
            "yuv420p",
            "-preset",
            "ultrafast",
            "-progress",
            "pipe:1",
            "-y",
        ]
        .iter()
        .map(|arg| OsString::from(*arg))
        .collect();
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Arguments that join `0.jpg, 1.jpg, ...` in `frames` into `output`.
    pub fn join_args(&self, frames: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-framerate".into(),
            self.framerate.to_string().into(),
            "-pattern_type".into(),
            "sequence".into(),
            "-i".into(),
            frames.join("%d.jpg").into_os_string(),
            "-s:v".into(),
            format!("{}x{}", self.width, self.height).into(),
        ];
        args.extend(self.output_args(output));
        args
    }

    /// Arguments that smooth the motion of `input` into `output`, if any.
    pub fn smoothing_args(&self, minterp: Minterp, input: &Path, output: &Path) -> Option<Vec<OsString>> {
        let (flag, filter) = match minterp {
            Minterp::Skip => return None,
            Minterp::Fast => (
                "-filter_complex",
                format!(
                    "[0:v]minterpolate=fps={},tblend=all_mode=average,framestep=3[out]",
                    self.framerate
                ),
            ),
            Minterp::Good => (
                "-filter:v",
                format!("minterpolate='mi_mode=mci:mc_mode=aobmc:vsbmc=1:fps={}'", self.framerate),
            ),
        };
        let mut args: Vec<OsString> = vec!["-i".into(), input.as_os_str().to_owned(), flag.into(), filter.into()];
        if minterp == Minterp::Fast {
            args.push(OsString::from("-map"));
            args.push(OsString::from("[out]"));
        }
        args.extend(self.output_args(output));
        Some(args)
    }

    /// Encode `frame_count` frames from `frames` into `output`, then smooth the motion.
    pub async fn encode(
        &self,
        frames: &Path,
        frame_count: usize,
        output: &Path,
        minterp: Minterp,
    ) -> Result<(), EncodeError> {
        let mut joined = output.as_os_str().to_owned();
        joined.push("-original.mp4");
        let joined = PathBuf::from(joined);

        self.progress.stage("Joining images into video sequence");
        self.run(&self.join_args(frames, &joined), frame_count, 100.0).await?;

        match self.smoothing_args(minterp, &joined, output) {
            None => tokio::fs::rename(&joined, output).await?,
            Some(args) => {
                self.progress.stage("Interpolating motion to apply blur");
                self.run(&args, frame_count, 33.3).await?;
            }
        }
        info!("wrote {}", output.display());
        Ok(())
    }

    async fn run(&self, args: &[OsString], frame_count: usize, scale: f64) -> Result<(), EncodeError> {
        debug!("running {} {:?}", self.program, args);
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drained alongside stdout so that neither pipe fills up.
        let program = self.program.clone();
        let stderr = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!("{}: {}", program, line);
                    if tail.len() == STDERR_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Vec::from(tail).join("\n")
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(frame) = progress_frame(&line) {
                    let percent = scale * frame as f64 / frame_count.max(1) as f64;
                    self.progress.message(format!("{:.1}% rendered", percent));
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if status.success() {
            Ok(())
        } else {
            Err(EncodeError::Process {
                program: self.program.clone(),
                status,
                stderr,
            })
        }
    }
}

/// The frame number of an `ffmpeg -progress` line such as `frame=42`.
fn progress_frame(line: &str) -> Option<usize> {
    line.trim().strip_prefix("frame=")?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::Waypoint;
    use crate::track::GeoPoint;
    use crate::transform::Transform;
    use image::{Rgb, RgbImage};

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn progress_lines_are_parsed() {
        assert_eq!(progress_frame("frame=42"), Some(42));
        assert_eq!(progress_frame("frame=  7 "), Some(7));
        assert_eq!(progress_frame("fps=24.0"), None);
        assert_eq!(progress_frame("frame=N/A"), None);
    }

    #[test]
    fn minterp_parses_known_modes() {
        assert_eq!("skip".parse::<Minterp>(), Ok(Minterp::Skip));
        assert_eq!("good".parse::<Minterp>(), Ok(Minterp::Good));
        assert!("best".parse::<Minterp>().is_err());
    }

    #[test]
    fn join_passes_settings_through() {
        let encoder = FfmpegEncoder::new(&HyperlapseSettings::default(), Progress::disabled());
        let args = strings(&encoder.join_args(Path::new("frames"), Path::new("out.mp4")));
        let position = |flag: &str| args.iter().position(|arg| arg == flag).unwrap();
        assert_eq!(args[position("-framerate") + 1], "24");
        assert_eq!(args[position("-s:v") + 1], "640x480");
        assert_eq!(args[position("-crf") + 1], "17");
        assert_eq!(Path::new(&args[position("-i") + 1]), Path::new("frames").join("%d.jpg"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn skipping_smoothing_needs_no_second_pass() {
        let encoder = FfmpegEncoder::new(&HyperlapseSettings::default(), Progress::disabled());
        let (input, output) = (Path::new("a.mp4"), Path::new("b.mp4"));
        assert!(encoder.smoothing_args(Minterp::Skip, input, output).is_none());
        let fast = strings(&encoder.smoothing_args(Minterp::Fast, input, output).unwrap());
        assert!(fast.iter().any(|arg| arg.contains("tblend=all_mode=average")));
        assert!(fast.contains(&"[out]".to_owned()));
    }

    #[test]
    fn directory_sink_numbers_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::create(dir.path().join("frames")).unwrap();
        for index in 0..2 {
            sink.push(RenderedFrame {
                index,
                waypoint: Waypoint {
                    index: index * 3,
                    point: GeoPoint::new(0.0, 0.0),
                    distance: 0.0,
                    heading: 0.0,
                },
                image: RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])),
                transform: Transform::identity(),
                no_match: false,
            })
            .unwrap();
        }
        assert_eq!(sink.written(), 2);
        assert!(sink.frame_path(0).exists());
        assert!(sink.frame_path(1).exists());
        assert!(!sink.frame_path(3).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_runs_report_stderr() {
        let encoder = FfmpegEncoder::new(&HyperlapseSettings::default(), Progress::disabled()).with_program("sh");
        let script = "echo frame=1; for i in $(seq 1 30); do echo line $i >&2; done; echo Invalid data >&2; exit 3";
        let args = [OsString::from("-c"), OsString::from(script)];
        match encoder.run(&args, 1, 100.0).await {
            Err(EncodeError::Process { program, status, stderr }) => {
                assert_eq!(program, "sh");
                assert_eq!(status.code(), Some(3));
                assert!(stderr.ends_with("Invalid data"), "{:?}", stderr);
                assert_eq!(stderr.lines().count(), STDERR_TAIL);
                assert!(!stderr.contains("line 10\n"));
            }
            other => panic!("expected a process error, got {:?}", other),
        }
        assert!(encoder.run(&[OsString::from("-c"), OsString::from("true")], 1, 100.0).await.is_ok());
    }
}
