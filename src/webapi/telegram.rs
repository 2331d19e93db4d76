//! Thin Telegram Bot API client.
//!
//! Just the handful of methods the bot needs; no framework, plain HTTP.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;

/// Long-poll wait passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(api_key: &str) -> Result<Self> {
        // No overall request timeout: getUpdates holds the connection open
        // on purpose.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build telegram http client")?;

        Ok(Self {
            client,
            base_url: format!("https://api.telegram.org/bot{}", api_key),
        })
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(format!("{}/getUpdates", self.base_url))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
            ])
            .send()
            .await
            .context("getUpdates request failed")?;
        Self::unwrap_response(response).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message> {
        let response = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .context("sendMessage request failed")?;
        Self::unwrap_response(response).await
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/deleteMessage", self.base_url))
            .json(&json!({ "chat_id": chat_id, "message_id": message_id }))
            .send()
            .await
            .context("deleteMessage request failed")?;
        let _: bool = Self::unwrap_response(response).await?;
        Ok(())
    }

    /// Sends the finished sticker as a document reply.
    pub async fn send_document(
        &self,
        chat_id: i64,
        reply_to_message_id: i64,
        path: &Path,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read attachment {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sticker.webm".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/webm")
            .context("invalid attachment mime type")?;

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("reply_to_message_id", reply_to_message_id.to_string())
            .part("document", part);

        let response = self
            .client
            .post(format!("{}/sendDocument", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("sendDocument request failed")?;
        let _: Message = Self::unwrap_response(response).await?;
        Ok(())
    }

    async fn unwrap_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("failed to decode telegram response (http {})", status))?;
        if !body.ok {
            return Err(anyhow!(
                "telegram api error: {}",
                body.description.unwrap_or_else(|| status.to_string())
            ));
        }
        body.result
            .ok_or_else(|| anyhow!("telegram api returned ok without a result"))
    }
}
