//! ffprobe helpers.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use super::ffmpeg::capture_with_deadline;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
}

/// Pixel dimensions of the first video stream.
pub fn video_dimensions(path: &Path, deadline: Duration) -> Result<(u32, u32)> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "json",
    ])
    .arg(path);

    let stdout = capture_with_deadline(&mut cmd, deadline)
        .with_context(|| format!("ffprobe failed for {}", path.display()))?;
    parse_dimensions(&stdout)
}

fn parse_dimensions(json: &str) -> Result<(u32, u32)> {
    let parsed: ProbeOutput =
        serde_json::from_str(json).context("failed to parse ffprobe output")?;
    let stream = parsed
        .streams
        .first()
        .ok_or_else(|| anyhow!("no video stream found"))?;
    Ok((stream.width, stream.height))
}
