//! End-to-end job execution: fetch the emotes, transcode, deliver.

use std::sync::Arc;

use futures::future::try_join_all;
use log::info;

use super::dispatcher::{JobRunner, UserRequest};
use crate::common::errors::JobError;
use crate::media::Converter;
use crate::media::workspace::ScopedFile;
use crate::webapi::seventv::SevenTvApi;
use crate::webapi::telegram::TelegramApi;

/// Production [`JobRunner`]. One instance serves the whole worker pool.
pub struct Pipeline {
    pub telegram: Arc<TelegramApi>,
    pub seventv: Arc<SevenTvApi>,
    pub converter: Converter,
}

impl JobRunner for Pipeline {
    fn run(&self, request: &UserRequest) -> impl Future<Output = Result<(), JobError>> + Send {
        async move {
            let inputs = self.fetch_inputs(&request.emote_ids).await?;
            let artifact = self.convert(&inputs).await?;
            self.telegram
                .send_document(request.chat_id, request.reply_to_message_id, artifact.path())
                .await
                .map_err(JobError::Delivery)?;
            info!(
                "delivered {} to chat {}",
                artifact.path().display(),
                request.chat_id
            );
            Ok(())
        }
    }
}

impl Pipeline {
    /// Fetches all requested emotes concurrently. The first failure wins;
    /// files already on disk are cleaned up by their guards.
    async fn fetch_inputs(&self, emote_ids: &[String]) -> Result<Vec<ScopedFile>, JobError> {
        try_join_all(emote_ids.iter().map(|emote_id| async move {
            self.seventv
                .download_webp(emote_id)
                .await
                .map(ScopedFile::new)
                .map_err(|source| JobError::fetch(emote_id, source))
        }))
        .await
    }

    /// Runs the transcode off the async runtime; the external encoder
    /// processes block their thread for the duration.
    async fn convert(&self, inputs: &[ScopedFile]) -> Result<ScopedFile, JobError> {
        let converter = self.converter.clone();
        let paths: Vec<_> = inputs.iter().map(|input| input.path().to_owned()).collect();

        let outcome = tokio::task::spawn_blocking(move || {
            if let [input] = paths.as_slice() {
                converter.convert_to_video(input)
            } else {
                converter.overlay_videos(&paths)
            }
        })
        .await
        .map_err(|err| JobError::Encode(anyhow::anyhow!("conversion task panicked: {}", err)))?;

        outcome.map(ScopedFile::new)
    }
}
