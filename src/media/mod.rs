//! Media transcoding pipeline: animated images in, video stickers out.

pub mod encode;
pub mod extract;
mod ffmpeg;
pub mod overlay;
pub mod probe;
pub mod workspace;

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use crate::common::errors::JobError;
use encode::{DegradeMode, EncodeParameters, Scale, encode_sequence};
use extract::extract_frames;
use overlay::{Layer, encode_overlay};
use workspace::JobWorkspace;

/// Telegram cuts video stickers at three seconds.
pub const MAX_DURATION_SECS: u32 = 3;

/// Drives extraction and encoding for one job. Cheap to clone: holds only
/// configuration.
#[derive(Debug, Clone)]
pub struct Converter {
    jobs_dir: PathBuf,
    output_dir: PathBuf,
    encoder_threads: u32,
    deadline: Duration,
}

impl Converter {
    pub fn new(
        jobs_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        encoder_threads: u32,
        deadline: Duration,
    ) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
            output_dir: output_dir.into(),
            encoder_threads,
            deadline,
        }
    }

    /// Single-asset path: one frame sequence, one adaptive encode.
    ///
    /// Returns the finished artifact path; intermediates are removed when
    /// the workspace drops, on success and failure alike.
    pub fn convert_to_video(&self, input: &Path) -> Result<PathBuf, JobError> {
        let workspace = JobWorkspace::create(&self.jobs_dir).map_err(JobError::Workspace)?;
        let frames_dir = workspace.frames_dir().map_err(JobError::Workspace)?;

        let sequence = extract_frames(input, &frames_dir, self.deadline)?;

        let out_path = self.result_path(workspace.job_id());
        encode_sequence(
            &sequence.pattern,
            &out_path,
            EncodeParameters::initial(sequence.timing.framerate),
            Scale::FitSticker,
            DegradeMode::Full,
            self.encoder_threads,
            self.deadline,
        )?;

        info!(
            "job {}: converted {} frames into {}",
            workspace.job_id(),
            sequence.frame_count,
            out_path.display()
        );
        Ok(out_path)
    }

    /// Multi-asset path: encode each emote as its own layer, later layers
    /// matched to the base layer's canvas, then composite.
    pub fn overlay_videos(&self, inputs: &[PathBuf]) -> Result<PathBuf, JobError> {
        let workspace = JobWorkspace::create(&self.jobs_dir).map_err(JobError::Workspace)?;

        let mut layers = Vec::with_capacity(inputs.len());
        let mut canvas: Option<(u32, u32)> = None;

        for (index, input) in inputs.iter().enumerate() {
            let frames_dir = workspace
                .indexed_frames_dir(index)
                .map_err(JobError::Workspace)?;
            let sequence = extract_frames(input, &frames_dir, self.deadline)?;

            let scale = match canvas {
                Some((width, height)) => Scale::Exact { width, height },
                None => Scale::FitSticker,
            };
            let video_path = workspace.layer_video_path(index);
            encode_sequence(
                &sequence.pattern,
                &video_path,
                EncodeParameters::initial(sequence.timing.framerate),
                scale,
                DegradeMode::BitrateOnly,
                self.encoder_threads,
                self.deadline,
            )?;

            // The base layer's encoded output defines the composite canvas.
            if canvas.is_none() {
                let dimensions = probe::video_dimensions(&video_path, self.deadline)
                    .map_err(JobError::Encode)?;
                canvas = Some(dimensions);
            }

            layers.push(Layer {
                video_path,
                duration: sequence.timing.duration,
            });
        }

        let out_path = self.result_path(workspace.job_id());
        encode_overlay(&layers, &out_path, self.encoder_threads, self.deadline)?;

        info!(
            "job {}: composited {} layers into {}",
            workspace.job_id(),
            layers.len(),
            out_path.display()
        );
        Ok(out_path)
    }

    fn result_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(format!("{}.webm", job_id))
    }
}
