use std::io;

use thiserror::Error;

/// Everything that can terminate a sticker job.
///
/// The detailed cause is for logs only; users receive a generic notice on
/// any terminal failure.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid input: {0}")]
    Validation(&'static str),

    #[error("failed to fetch emote {emote_id}")]
    Fetch {
        emote_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("frame extraction failed")]
    Extraction(#[source] anyhow::Error),

    #[error("frame timing derivation failed")]
    Timing(#[source] anyhow::Error),

    #[error("video encode failed")]
    Encode(#[source] anyhow::Error),

    #[error("quality floor exceeded before meeting the {ceiling} byte ceiling")]
    QualityFloorExceeded { ceiling: u64 },

    #[error("overlay requires at least two layers, got {0}")]
    InsufficientLayers(usize),

    #[error("job workspace failure")]
    Workspace(#[source] io::Error),

    #[error("failed to deliver result")]
    Delivery(#[source] anyhow::Error),
}

impl JobError {
    pub fn fetch(emote_id: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Fetch {
            emote_id: emote_id.into(),
            source,
        }
    }

    /// Full cause chain, one line. `Display` alone loses the sources.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}
