//! N-layer overlay composition.
//!
//! Layers are pre-encoded single-emote videos; layer 0 is the base and the
//! timing/canvas reference. The compositing graph is built as an explicit
//! structure first and only then serialized to ffmpeg arguments, so the
//! looping and chaining rules are testable without invoking ffmpeg.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use log::{debug, info};

use super::MAX_DURATION_SECS;
use super::encode::{OVERLAY_BITRATE, degrade_bitrate};
use super::ffmpeg::{output_size, run_with_deadline, silent_ffmpeg};
use crate::common::MAX_RESULT_SIZE;
use crate::common::errors::JobError;

/// One pre-encoded single-emote video plus its source duration.
#[derive(Debug, Clone)]
pub struct Layer {
    pub video_path: PathBuf,
    /// Source duration in seconds, before any looping.
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GraphInput {
    path: PathBuf,
    loop_forever: bool,
}

/// One overlay step: paste input `overlay_index` on top of `base_pad`,
/// producing `out_pad` (`None` for the final node).
#[derive(Debug, Clone, PartialEq, Eq)]
struct OverlayNode {
    base_pad: String,
    overlay_index: usize,
    out_pad: Option<String>,
}

/// Explicit compositing graph for one overlay invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayGraph {
    inputs: Vec<GraphInput>,
    nodes: Vec<OverlayNode>,
}

impl OverlayGraph {
    /// Builds the sequential left-to-right overlay chain.
    ///
    /// Non-base layers always loop: they are not the timing reference. The
    /// base loops only when some overlay outlasts it, so the composite does
    /// not end before the longest overlay.
    pub fn build(layers: &[Layer]) -> Result<Self, JobError> {
        if layers.len() < 2 {
            return Err(JobError::InsufficientLayers(layers.len()));
        }

        let base_duration = layers[0].duration;
        let base_loops = layers[1..]
            .iter()
            .any(|layer| layer.duration > base_duration);

        let inputs = layers
            .iter()
            .enumerate()
            .map(|(index, layer)| GraphInput {
                path: layer.video_path.clone(),
                loop_forever: if index == 0 { base_loops } else { true },
            })
            .collect();

        let mut nodes = Vec::with_capacity(layers.len() - 1);
        let mut previous_pad = "0".to_string();
        for index in 1..layers.len() {
            let last = index == layers.len() - 1;
            let out_pad = (!last).then(|| format!("tmp{}", index));
            nodes.push(OverlayNode {
                base_pad: previous_pad.clone(),
                overlay_index: index,
                out_pad: out_pad.clone(),
            });
            if let Some(pad) = out_pad {
                previous_pad = pad;
            }
        }

        Ok(Self { inputs, nodes })
    }

    pub fn base_loops(&self) -> bool {
        self.inputs[0].loop_forever
    }

    /// Serializes the node chain into a filter_complex expression.
    pub fn filter_graph(&self) -> String {
        let mut out = String::new();
        for (position, node) in self.nodes.iter().enumerate() {
            if position > 0 {
                out.push_str("; ");
            }
            out.push_str(&format!(
                "[{}][{}] overlay=shortest=1",
                node.base_pad, node.overlay_index
            ));
            if let Some(pad) = &node.out_pad {
                out.push_str(&format!(" [{}]", pad));
            }
        }
        out
    }

    /// Full ffmpeg argv for one composite attempt.
    pub fn to_args(&self, bitrate: u32, threads: u32, out_path: &Path) -> Result<Vec<String>> {
        if bitrate == 0 {
            bail!("bitrate must be positive");
        }

        let mut args: Vec<String> = vec!["-y".into()];
        for input in &self.inputs {
            if input.loop_forever {
                args.extend(["-stream_loop".into(), "-1".into()]);
            }
            // Force the VP9 decoder so the alpha channel survives decoding.
            args.extend([
                "-c:v".into(),
                "libvpx-vp9".into(),
                "-i".into(),
                input.path.to_string_lossy().into_owned(),
            ]);
        }
        args.extend([
            "-filter_complex".into(),
            self.filter_graph(),
            "-c:v".into(),
            "libvpx-vp9".into(),
            "-pix_fmt".into(),
            "yuva420p".into(),
            "-b:v".into(),
            format!("{}K", bitrate),
            "-auto-alt-ref".into(),
            "0".into(),
            "-an".into(),
            "-t".into(),
            MAX_DURATION_SECS.to_string(),
            "-threads".into(),
            threads.to_string(),
            out_path.to_string_lossy().into_owned(),
        ]);
        Ok(args)
    }
}

/// Composites the layers under the same size ceiling as single encodes.
/// Overlays only ever trade bitrate; layer framerates are already baked in.
/// The output file is removed on any terminal failure.
pub fn encode_overlay(
    layers: &[Layer],
    out_path: &Path,
    threads: u32,
    deadline: Duration,
) -> Result<(), JobError> {
    let result = composite_loop(layers, out_path, threads, deadline);
    if result.is_err() {
        let _ = std::fs::remove_file(out_path);
    }
    result
}

fn composite_loop(
    layers: &[Layer],
    out_path: &Path,
    threads: u32,
    deadline: Duration,
) -> Result<(), JobError> {
    let graph = OverlayGraph::build(layers)?;
    let mut bitrate = OVERLAY_BITRATE;

    loop {
        let args = graph
            .to_args(bitrate, threads, out_path)
            .map_err(JobError::Encode)?;
        let mut cmd = silent_ffmpeg();
        cmd.args(&args);
        run_with_deadline(&mut cmd, deadline).map_err(JobError::Encode)?;

        let size = output_size(out_path).map_err(JobError::Encode)?;
        if size <= MAX_RESULT_SIZE {
            debug!(
                "composited {} layers at {} kbps ({} bytes)",
                layers.len(),
                bitrate,
                size
            );
            return Ok(());
        }

        match degrade_bitrate(bitrate) {
            Some(next) => {
                info!(
                    "composite size {} exceeds ceiling, lowering bitrate to {} kbps",
                    size, next
                );
                bitrate = next;
            }
            None => {
                return Err(JobError::QualityFloorExceeded {
                    ceiling: MAX_RESULT_SIZE,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str, duration: f64) -> Layer {
        Layer {
            video_path: PathBuf::from(name),
            duration,
        }
    }

    #[test]
    fn single_layer_is_insufficient() {
        let err = OverlayGraph::build(&[layer("a.webm", 1.0)]).unwrap_err();
        assert!(matches!(err, JobError::InsufficientLayers(1)));
        assert!(matches!(
            OverlayGraph::build(&[]).unwrap_err(),
            JobError::InsufficientLayers(0)
        ));
    }

    #[test]
    fn base_loops_when_an_overlay_outlasts_it() {
        let graph = OverlayGraph::build(&[
            layer("base.webm", 3.0),
            layer("short.webm", 1.0),
            layer("long.webm", 5.0),
        ])
        .unwrap();

        assert!(graph.base_loops());
        // Non-base layers loop unconditionally.
        assert!(graph.inputs[1].loop_forever);
        assert!(graph.inputs[2].loop_forever);
    }

    #[test]
    fn base_plays_once_when_it_is_the_longest() {
        let graph = OverlayGraph::build(&[
            layer("base.webm", 3.0),
            layer("short.webm", 1.0),
            layer("shorter.webm", 2.0),
        ])
        .unwrap();

        assert!(!graph.base_loops());
        assert!(graph.inputs[1].loop_forever);
    }

    #[test]
    fn two_layer_filter_graph_has_no_intermediate_pad() {
        let graph =
            OverlayGraph::build(&[layer("base.webm", 2.0), layer("top.webm", 2.0)]).unwrap();
        assert_eq!(graph.filter_graph(), "[0][1] overlay=shortest=1");
    }

    #[test]
    fn three_layer_filter_graph_chains_through_named_pads() {
        let graph = OverlayGraph::build(&[
            layer("base.webm", 2.0),
            layer("mid.webm", 2.0),
            layer("top.webm", 2.0),
        ])
        .unwrap();
        assert_eq!(
            graph.filter_graph(),
            "[0][1] overlay=shortest=1 [tmp1]; [tmp1][2] overlay=shortest=1"
        );
    }

    #[test]
    fn args_loop_every_input_when_base_loops() {
        let graph = OverlayGraph::build(&[
            layer("base.webm", 1.0),
            layer("long.webm", 5.0),
        ])
        .unwrap();
        let args = graph.to_args(400, 2, Path::new("out.webm")).unwrap();

        let loops = args.iter().filter(|arg| *arg == "-stream_loop").count();
        assert_eq!(loops, 2);
        assert!(args.contains(&"-filter_complex".to_string()));
        assert!(args.contains(&"400K".to_string()));
        assert_eq!(args.last().unwrap(), "out.webm");
    }

    #[test]
    fn args_skip_the_base_loop_when_not_needed() {
        let graph = OverlayGraph::build(&[
            layer("base.webm", 5.0),
            layer("short.webm", 1.0),
        ])
        .unwrap();
        let args = graph.to_args(400, 2, Path::new("out.webm")).unwrap();

        let loops = args.iter().filter(|arg| *arg == "-stream_loop").count();
        assert_eq!(loops, 1);
        // The base input comes first and must not be preceded by a loop flag.
        assert_eq!(args[0], "-y");
        assert_eq!(args[1], "-c:v");
    }

    #[test]
    fn zero_bitrate_is_rejected() {
        let graph =
            OverlayGraph::build(&[layer("a.webm", 1.0), layer("b.webm", 1.0)]).unwrap();
        assert!(graph.to_args(0, 2, Path::new("out.webm")).is_err());
    }

    #[test]
    fn failed_composite_removes_the_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.webm");
        std::fs::write(&out_path, vec![0u8; 1024]).unwrap();

        // The layer videos do not exist, so the invocation cannot succeed
        // whichever way it fails.
        let layers = [
            layer(dir.path().join("missing-0.webm").to_str().unwrap(), 2.0),
            layer(dir.path().join("missing-1.webm").to_str().unwrap(), 2.0),
        ];
        let result = encode_overlay(&layers, &out_path, 1, Duration::from_millis(50));

        assert!(result.is_err());
        assert!(!out_path.exists());
    }

    #[test]
    fn overlay_bitrate_degrades_to_the_floor() {
        let mut bitrate = OVERLAY_BITRATE;
        let mut steps = 0;
        while let Some(next) = degrade_bitrate(bitrate) {
            assert!(next < bitrate);
            bitrate = next;
            steps += 1;
        }
        assert_eq!(bitrate, 140);
        assert_eq!(steps, 13);
    }
}
