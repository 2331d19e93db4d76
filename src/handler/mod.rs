//! Incoming message handling: parse emote links, submit jobs, keep the
//! requester informed.

use std::sync::{Arc, LazyLock};

use log::{debug, error, info, warn};
use regex::Regex;

use crate::background::dispatcher::{Dispatcher, SubmitError};
use crate::common::errors::JobError;
use crate::webapi::telegram::{Message, TelegramApi, Update};

/// At most this many emotes are composited into one sticker; extra links
/// in a message are ignored.
const MAX_OVERLAY_EMOTES: usize = 3;

static EMOTE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://(?:www\.)?7tv\.app/emotes/([A-Za-z0-9]{26})$")
        .expect("emote url pattern must compile")
});

const WELCOME_TEXT: &str = "Send me a 7tv emote link and I will convert it into a \
    video sticker. Send up to three links in one message to stack them into a \
    single sticker.";
const INVALID_URL_TEXT: &str = "Invalid emote URL";
const ALREADY_ACTIVE_TEXT: &str = "You have another emote being processed, please wait";
const QUEUED_TEXT: &str = "Emote added to processing queue";
const FAILURE_TEXT: &str = "Unknown error while processing emote";

pub struct Handler {
    pub telegram: Arc<TelegramApi>,
    pub dispatcher: Dispatcher,
}

impl Handler {
    /// Entry point for one polled update. Never returns an error: every
    /// outcome ends in a user notice or a log line.
    pub async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.clone() else {
            return;
        };

        if let Some(command) = text.strip_prefix('/') {
            if command == "start" {
                self.notify(message.chat.id, WELCOME_TEXT).await;
            } else {
                debug!("ignoring unknown command /{}", command);
            }
            return;
        }

        self.create_video_from_emote(&message, &text).await;
    }

    async fn create_video_from_emote(&self, message: &Message, text: &str) {
        let chat_id = message.chat.id;
        let emote_ids = match parse_emote_ids(text) {
            Ok(ids) => ids,
            Err(_) => {
                self.notify(chat_id, INVALID_URL_TEXT).await;
                return;
            }
        };

        let receiver = match self
            .dispatcher
            .submit(chat_id, message.message_id, emote_ids)
            .await
        {
            Ok(receiver) => receiver,
            Err(SubmitError::AlreadyActive) => {
                self.notify(chat_id, ALREADY_ACTIVE_TEXT).await;
                return;
            }
            Err(SubmitError::Closed) => {
                error!("job queue is closed; dropping request from chat {}", chat_id);
                self.notify(chat_id, FAILURE_TEXT).await;
                return;
            }
        };

        let status = self.telegram.send_message(chat_id, QUEUED_TEXT).await.ok();

        let outcome = receiver.await;

        if let Some(status) = status {
            if let Err(err) = self
                .telegram
                .delete_message(chat_id, status.message_id)
                .await
            {
                warn!("failed to delete status message: {:#}", err);
            }
        }

        match outcome {
            Ok(Ok(())) => {
                info!("job for chat {} finished", chat_id);
            }
            Ok(Err(err)) => {
                error!("job for chat {} failed: {}", chat_id, err.chain());
                self.notify(chat_id, FAILURE_TEXT).await;
            }
            Err(_) => {
                // Worker dropped the request without resolving it, which
                // only happens on shutdown.
                warn!("job for chat {} was dropped unresolved", chat_id);
            }
        }
    }

    async fn notify(&self, chat_id: i64, text: &str) {
        if let Err(err) = self.telegram.send_message(chat_id, text).await {
            warn!("failed to notify chat {}: {:#}", chat_id, err);
        }
    }
}

/// Extracts emote ids from a message. Every whitespace-separated token
/// considered must be a full emote page link; tokens past the overlay limit
/// are ignored.
fn parse_emote_ids(text: &str) -> Result<Vec<String>, JobError> {
    let ids: Vec<String> = text
        .split_whitespace()
        .take(MAX_OVERLAY_EMOTES)
        .map(|token| {
            EMOTE_URL
                .captures(token)
                .map(|captures| captures[1].to_string())
                .ok_or(JobError::Validation("not a 7tv emote link"))
        })
        .collect::<Result<_, _>>()?;

    if ids.is_empty() {
        return Err(JobError::Validation("no emote link in message"));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID_A: &str = "01GZS2YFFR000EYSQZZZZZZZZZ";
    const ID_B: &str = "01H0000000000000000000000A";

    #[test]
    fn single_link_parses() {
        let ids = parse_emote_ids(&format!("https://7tv.app/emotes/{}", ID_A)).unwrap();
        assert_eq!(ids, vec![ID_A.to_string()]);
    }

    #[test]
    fn www_prefix_is_accepted() {
        let ids = parse_emote_ids(&format!("https://www.7tv.app/emotes/{}", ID_A)).unwrap();
        assert_eq!(ids, vec![ID_A.to_string()]);
    }

    #[test]
    fn multiple_links_parse_in_order() {
        let text = format!(
            "https://7tv.app/emotes/{} https://7tv.app/emotes/{}",
            ID_A, ID_B
        );
        let ids = parse_emote_ids(&text).unwrap();
        assert_eq!(ids, vec![ID_A.to_string(), ID_B.to_string()]);
    }

    #[test]
    fn links_past_the_limit_are_ignored() {
        let link = format!("https://7tv.app/emotes/{}", ID_A);
        let text = format!("{0} {0} {0} {0} {0}", link);
        let ids = parse_emote_ids(&text).unwrap();
        assert_eq!(ids.len(), MAX_OVERLAY_EMOTES);
    }

    #[test]
    fn http_scheme_is_rejected() {
        let result = parse_emote_ids(&format!("http://7tv.app/emotes/{}", ID_A));
        assert!(matches!(result, Err(JobError::Validation(_))));
    }

    #[test]
    fn short_id_is_rejected() {
        let result = parse_emote_ids("https://7tv.app/emotes/ABC123");
        assert!(matches!(result, Err(JobError::Validation(_))));
    }

    #[test]
    fn plain_text_is_rejected() {
        assert!(parse_emote_ids("hello there").is_err());
    }

    #[test]
    fn empty_message_is_rejected() {
        assert!(matches!(
            parse_emote_ids("   "),
            Err(JobError::Validation(_))
        ));
    }

    #[test]
    fn one_bad_token_rejects_the_whole_message() {
        let text = format!("https://7tv.app/emotes/{} not-a-link", ID_A);
        assert!(parse_emote_ids(&text).is_err());
    }
}
