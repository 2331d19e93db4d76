//! Adaptive VP9 encoding under a hard output-size ceiling.
//!
//! An encode attempt is a single ffmpeg invocation; the degrade loop repeats
//! attempts with lowered parameters until the artifact fits
//! [`MAX_RESULT_SIZE`] or the quality floor is reached.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use log::{debug, info};

use super::MAX_DURATION_SECS;
use super::ffmpeg::{output_size, run_with_deadline, silent_ffmpeg};
use crate::common::MAX_RESULT_SIZE;
use crate::common::errors::JobError;

pub const DEFAULT_BITRATE: u32 = 250;
/// Composited layers carry more detail, so overlays start higher.
pub const OVERLAY_BITRATE: u32 = DEFAULT_BITRATE + 150;

const BITRATE_DROP: u32 = 20;
const FRAMERATE_DROP: u32 = 2;

const BITRATE_FIRST_THRESHOLD: u32 = 150;
const BITRATE_SECOND_THRESHOLD: u32 = 100;
const FRAMERATE_FIRST_THRESHOLD: u32 = 25;
const FRAMERATE_SECOND_THRESHOLD: u32 = 20;

/// One bitrate-only degradation step, shared with the overlay path.
/// `None` once the floor is crossed.
pub(crate) fn degrade_bitrate(bitrate: u32) -> Option<u32> {
    (bitrate > BITRATE_FIRST_THRESHOLD).then(|| bitrate - BITRATE_DROP)
}

/// Which quality parameters a degrade loop is allowed to trade away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeMode {
    /// Walk bitrate and framerate thresholds in a fixed order. Used for
    /// single-asset jobs.
    Full,
    /// Only ever lower bitrate. Used for overlay layer encodes, where
    /// lowering the framerate would desync layer timing.
    BitrateOnly,
}

/// Encoding parameters for one attempt. Monotonically non-increasing across
/// retries within one job; never shared across jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParameters {
    /// Target bitrate in kbps.
    pub bitrate: u32,
    pub framerate: u32,
}

impl EncodeParameters {
    pub fn initial(framerate: u32) -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            framerate,
        }
    }

    /// One degradation step. Thresholds are walked in a fixed order, so the
    /// loop is deterministic and strictly decreases exactly one parameter
    /// per step. `None` means the quality floor is reached.
    pub fn degraded(self, mode: DegradeMode) -> Option<Self> {
        match mode {
            DegradeMode::BitrateOnly => {
                degrade_bitrate(self.bitrate).map(|bitrate| Self { bitrate, ..self })
            }
            DegradeMode::Full => {
                if self.bitrate >= BITRATE_FIRST_THRESHOLD {
                    return Some(Self {
                        bitrate: self.bitrate - BITRATE_DROP,
                        ..self
                    });
                }
                if self.framerate >= FRAMERATE_FIRST_THRESHOLD {
                    return Some(Self {
                        framerate: self.framerate - FRAMERATE_DROP,
                        ..self
                    });
                }
                if self.bitrate >= BITRATE_SECOND_THRESHOLD {
                    return Some(Self {
                        bitrate: self.bitrate - BITRATE_DROP,
                        ..self
                    });
                }
                if self.framerate >= FRAMERATE_SECOND_THRESHOLD {
                    return Some(Self {
                        framerate: self.framerate - FRAMERATE_DROP,
                        ..self
                    });
                }
                None
            }
        }
    }
}

/// Output scaling for a sequence encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Fit the longer side to 512 px, keeping aspect ratio on the shorter.
    FitSticker,
    /// Exact dimensions; used to match overlay layers to the base canvas.
    Exact { width: u32, height: u32 },
}

impl Scale {
    fn filter_expr(self) -> String {
        match self {
            Self::FitSticker => "'if(gte(iw,ih),512,-1)':'if(gte(ih,iw),512,-1)'".to_string(),
            Self::Exact { width, height } => format!("{}:{}", width, height),
        }
    }
}

/// Typed ffmpeg invocation for turning a numbered frame sequence into a
/// silent VP9 webm with alpha. Validated before serialization.
#[derive(Debug, Clone, Copy)]
pub struct SequenceEncodeArgs<'a> {
    pub pattern: &'a Path,
    pub out_path: &'a Path,
    pub params: EncodeParameters,
    pub scale: Scale,
    pub threads: u32,
}

impl SequenceEncodeArgs<'_> {
    pub fn validate(&self) -> Result<()> {
        if self.params.bitrate == 0 {
            bail!("bitrate must be positive");
        }
        if self.params.framerate == 0 {
            bail!("framerate must be positive");
        }
        if let Scale::Exact { width, height } = self.scale {
            if width == 0 || height == 0 {
                bail!("exact scale dimensions must be positive");
            }
        }
        Ok(())
    }

    pub fn to_args(&self) -> Result<Vec<String>> {
        self.validate()?;
        Ok(vec![
            "-y".into(),
            "-framerate".into(),
            self.params.framerate.to_string(),
            "-i".into(),
            self.pattern.to_string_lossy().into_owned(),
            "-vf".into(),
            format!("scale={},format=yuva420p", self.scale.filter_expr()),
            "-c:v".into(),
            "libvpx-vp9".into(),
            "-b:v".into(),
            format!("{}K", self.params.bitrate),
            // Alt-ref frames break the alpha channel in libvpx-vp9.
            "-auto-alt-ref".into(),
            "0".into(),
            "-an".into(),
            "-threads".into(),
            self.threads.to_string(),
            "-t".into(),
            MAX_DURATION_SECS.to_string(),
            self.out_path.to_string_lossy().into_owned(),
        ])
    }
}

/// Re-encodes until the artifact fits the size ceiling.
///
/// Terminates in a bounded number of steps: every step strictly decreases
/// bitrate or framerate and both have hard floors. The output file is
/// removed on any terminal failure, so no partial or stale artifact
/// survives a failed job.
pub fn encode_sequence(
    pattern: &Path,
    out_path: &Path,
    params: EncodeParameters,
    scale: Scale,
    mode: DegradeMode,
    threads: u32,
    deadline: Duration,
) -> Result<(), JobError> {
    let result = degrade_loop(pattern, out_path, params, scale, mode, threads, deadline);
    if result.is_err() {
        let _ = std::fs::remove_file(out_path);
    }
    result
}

fn degrade_loop(
    pattern: &Path,
    out_path: &Path,
    mut params: EncodeParameters,
    scale: Scale,
    mode: DegradeMode,
    threads: u32,
    deadline: Duration,
) -> Result<(), JobError> {
    loop {
        let args = SequenceEncodeArgs {
            pattern,
            out_path,
            params,
            scale,
            threads,
        };
        run_encode(&args, deadline).map_err(JobError::Encode)?;

        let size = output_size(out_path).map_err(JobError::Encode)?;
        if size <= MAX_RESULT_SIZE {
            debug!(
                "encoded {} at {} kbps / {} fps ({} bytes)",
                out_path.display(),
                params.bitrate,
                params.framerate,
                size
            );
            return Ok(());
        }

        match params.degraded(mode) {
            Some(next) => {
                info!(
                    "result size {} exceeds ceiling, lowering quality to {} kbps, {} fps",
                    size, next.bitrate, next.framerate
                );
                params = next;
            }
            None => {
                return Err(JobError::QualityFloorExceeded {
                    ceiling: MAX_RESULT_SIZE,
                });
            }
        }
    }
}

fn run_encode(args: &SequenceEncodeArgs<'_>, deadline: Duration) -> Result<()> {
    let argv = args.to_args()?;
    let mut cmd: Command = silent_ffmpeg();
    cmd.args(&argv);
    run_with_deadline(&mut cmd, deadline)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degrade_sequence(mut params: EncodeParameters, mode: DegradeMode) -> Vec<EncodeParameters> {
        let mut steps = Vec::new();
        while let Some(next) = params.degraded(mode) {
            steps.push(next);
            params = next;
        }
        steps
    }

    #[test]
    fn full_walk_is_deterministic_and_bounded() {
        let start = EncodeParameters::initial(30);
        let steps = degrade_sequence(start, DegradeMode::Full);

        // 6 bitrate drops (250..=150), 3 framerate drops (30..=25 range),
        // 2 bitrate drops (130..=100 range), 3 framerate drops (24..=20
        // range), then the floor.
        assert_eq!(steps.len(), 14);
        assert_eq!(
            *steps.last().unwrap(),
            EncodeParameters {
                bitrate: 90,
                framerate: 18
            }
        );
    }

    #[test]
    fn each_step_strictly_decreases_exactly_one_parameter() {
        let mut previous = EncodeParameters::initial(30);
        for step in degrade_sequence(previous, DegradeMode::Full) {
            let bitrate_dropped = step.bitrate < previous.bitrate;
            let framerate_dropped = step.framerate < previous.framerate;
            assert!(bitrate_dropped ^ framerate_dropped, "step {:?}", step);
            previous = step;
        }
    }

    #[test]
    fn full_walk_prefers_bitrate_first() {
        let start = EncodeParameters::initial(30);
        assert_eq!(
            start.degraded(DegradeMode::Full).unwrap(),
            EncodeParameters {
                bitrate: 230,
                framerate: 30
            }
        );

        // Once bitrate falls below the first threshold, framerate goes next.
        let low_bitrate = EncodeParameters {
            bitrate: 140,
            framerate: 30,
        };
        assert_eq!(
            low_bitrate.degraded(DegradeMode::Full).unwrap(),
            EncodeParameters {
                bitrate: 140,
                framerate: 28
            }
        );
    }

    #[test]
    fn exhausted_parameters_hit_the_floor() {
        let exhausted = EncodeParameters {
            bitrate: 90,
            framerate: 18,
        };
        assert_eq!(exhausted.degraded(DegradeMode::Full), None);
    }

    #[test]
    fn bitrate_only_mode_never_touches_framerate() {
        let start = EncodeParameters {
            bitrate: OVERLAY_BITRATE,
            framerate: 30,
        };
        let steps = degrade_sequence(start, DegradeMode::BitrateOnly);
        assert!(steps.iter().all(|step| step.framerate == 30));
        assert_eq!(steps.last().unwrap().bitrate, 140);
    }

    #[test]
    fn sequence_args_serialize_in_invocation_order() {
        let args = SequenceEncodeArgs {
            pattern: Path::new("frames/frame_%03d.png"),
            out_path: Path::new("out.webm"),
            params: EncodeParameters::initial(24),
            scale: Scale::FitSticker,
            threads: 2,
        };
        let argv = args.to_args().unwrap();
        assert_eq!(
            argv,
            vec![
                "-y",
                "-framerate",
                "24",
                "-i",
                "frames/frame_%03d.png",
                "-vf",
                "scale='if(gte(iw,ih),512,-1)':'if(gte(ih,iw),512,-1)',format=yuva420p",
                "-c:v",
                "libvpx-vp9",
                "-b:v",
                "250K",
                "-auto-alt-ref",
                "0",
                "-an",
                "-threads",
                "2",
                "-t",
                "3",
                "out.webm",
            ]
        );
    }

    #[test]
    fn exact_scale_serializes_dimensions() {
        let args = SequenceEncodeArgs {
            pattern: Path::new("f_%03d.png"),
            out_path: Path::new("layer-1.webm"),
            params: EncodeParameters::initial(30),
            scale: Scale::Exact {
                width: 512,
                height: 384,
            },
            threads: 1,
        };
        let argv = args.to_args().unwrap();
        assert!(argv.contains(&"scale=512:384,format=yuva420p".to_string()));
    }

    #[test]
    fn failed_encode_removes_the_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.webm");
        // Stale artifact from an earlier attempt.
        std::fs::write(&out_path, vec![0u8; 1024]).unwrap();

        // No frames exist at the pattern, so the invocation cannot succeed
        // whichever way it fails (spawn failure, nonzero exit, or the
        // deadline kill).
        let result = encode_sequence(
            &dir.path().join("missing_%03d.png"),
            &out_path,
            EncodeParameters::initial(30),
            Scale::FitSticker,
            DegradeMode::Full,
            1,
            Duration::from_millis(50),
        );

        assert!(result.is_err());
        assert!(!out_path.exists());
    }

    #[test]
    fn invalid_parameters_are_rejected_before_serialization() {
        let base = SequenceEncodeArgs {
            pattern: Path::new("f_%03d.png"),
            out_path: Path::new("out.webm"),
            params: EncodeParameters {
                bitrate: 0,
                framerate: 30,
            },
            scale: Scale::FitSticker,
            threads: 2,
        };
        assert!(base.to_args().is_err());

        let zero_fps = SequenceEncodeArgs {
            params: EncodeParameters {
                bitrate: 250,
                framerate: 0,
            },
            ..base
        };
        assert!(zero_fps.to_args().is_err());

        let zero_scale = SequenceEncodeArgs {
            params: EncodeParameters::initial(30),
            scale: Scale::Exact {
                width: 0,
                height: 384,
            },
            ..base
        };
        assert!(zero_scale.to_args().is_err());
    }
}
