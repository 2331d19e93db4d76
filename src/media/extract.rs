//! Frame-sequence extraction from animated source images.
//!
//! ImageMagick does the heavy lifting: `-coalesce` expands patch frames to
//! full-canvas frames, `+repage` drops virtual canvas offsets so every frame
//! sits at absolute coordinates, and alpha is preserved throughout.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use image::{Rgba, RgbaImage};
use log::debug;

use super::ffmpeg::{capture_with_deadline, run_with_deadline};
use crate::common::errors::JobError;

/// ffmpeg-style mask for numbered frame files.
pub const FRAME_PATTERN: &str = "frame_%03d.png";

/// Highest framerate worth encoding a sticker at.
const MAX_FRAMERATE: u32 = 30;
/// Applied when the source carries no usable timing metadata.
const FALLBACK_FRAMERATE: u32 = 1;

/// Playback timing derived from the source's per-frame display delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    /// Frames per second; always within `1..=30`.
    pub framerate: u32,
    /// Total source duration in seconds; `0.0` for timing-less sources.
    pub duration: f64,
}

/// An extracted, numbered frame sequence.
#[derive(Debug)]
pub struct FrameSequence {
    /// Input pattern for the encoder (`<frames_dir>/frame_%03d.png`).
    pub pattern: PathBuf,
    pub frame_count: usize,
    pub timing: FrameTiming,
}

/// Extracts `input` into `frames_dir` and derives its playback timing.
pub fn extract_frames(
    input: &Path,
    frames_dir: &Path,
    deadline: Duration,
) -> Result<FrameSequence, JobError> {
    let timing = derive_timing(input, deadline)?;

    let pattern = frames_dir.join(FRAME_PATTERN);
    let mut cmd = Command::new("magick");
    cmd.arg(input).args(["-coalesce", "+repage"]).arg(&pattern);
    run_with_deadline(&mut cmd, deadline).map_err(JobError::Extraction)?;

    let frames = list_frames(frames_dir).map_err(JobError::Extraction)?;
    if frames.is_empty() {
        return Err(JobError::Extraction(anyhow!(
            "magick produced no frames for {}",
            input.display()
        )));
    }

    for frame in &frames {
        patch_blank_frame(frame).map_err(JobError::Extraction)?;
    }

    debug!(
        "extracted {} frames from {} at {} fps",
        frames.len(),
        input.display(),
        timing.framerate
    );

    Ok(FrameSequence {
        pattern,
        frame_count: frames.len(),
        timing,
    })
}

fn derive_timing(input: &Path, deadline: Duration) -> Result<FrameTiming, JobError> {
    let mut cmd = Command::new("magick");
    cmd.args(["identify", "-format", "%T\n"]).arg(input);
    let output = capture_with_deadline(&mut cmd, deadline).map_err(JobError::Timing)?;

    let delays = parse_delays(&output).map_err(JobError::Timing)?;
    Ok(timing_from_delays(&delays))
}

/// `identify -format %T` prints one display delay per frame, in
/// centiseconds.
fn parse_delays(output: &str) -> Result<Vec<u32>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<u32>()
                .with_context(|| format!("unexpected identify delay line {:?}", line))
        })
        .collect()
}

fn timing_from_delays(delays: &[u32]) -> FrameTiming {
    // Widened sum: per-frame delays come from untrusted input and a u32
    // accumulator can overflow.
    let total: u64 = delays.iter().map(|&delay| u64::from(delay)).sum();
    if delays.is_empty() || total == 0 {
        // Static or timing-less sources degrade to a one-frame slideshow
        // instead of failing the job.
        return FrameTiming {
            framerate: FALLBACK_FRAMERATE,
            duration: 0.0,
        };
    }

    let duration = total as f64 / 100.0;
    let framerate = (delays.len() as f64 / duration).round() as u32;
    FrameTiming {
        framerate: framerate.clamp(FALLBACK_FRAMERATE, MAX_FRAMERATE),
        duration,
    }
}

fn list_frames(frames_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(frames_dir)
        .with_context(|| format!("failed to read frame directory {}", frames_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    frames.sort();
    Ok(frames)
}

/// libvpx maps fully transparent frames to opaque black; a single low-alpha
/// pixel in the corner keeps such frames transparent after encoding.
fn patch_blank_frame(path: &Path) -> Result<()> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode frame {}", path.display()))?;
    let mut rgba = image.into_rgba8();
    if !is_blank(&rgba) {
        return Ok(());
    }

    mark_corner(&mut rgba);
    rgba.save(path)
        .with_context(|| format!("failed to rewrite blank frame {}", path.display()))?;
    Ok(())
}

fn is_blank(image: &RgbaImage) -> bool {
    image.as_raw().iter().all(|&byte| byte == 0)
}

fn mark_corner(image: &mut RgbaImage) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    image.put_pixel(0, 0, Rgba([255, 0, 0, 26]));
}
