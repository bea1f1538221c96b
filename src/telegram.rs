use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::snippet;

/// Classification input used when a photo arrives without any caption, so the
/// image is archived instead of silently dropped.
pub const MISSING_CAPTION_PLACEHOLDER: &str = "(這張圖片沒有附帶說明)";

/// One webhook delivery from the Bot API. Only the fields the pipeline
/// consumes are modeled; unknown fields are ignored on deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: Option<i64>,
    pub message: Option<TelegramMessage>,
    pub edited_message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: Option<i64>,
    pub from: Option<TelegramUser>,
    pub chat: Option<TelegramChat>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: i64,
    pub height: i64,
}

/// Canonical shape of one update after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedUpdate {
    /// No chat to reply to (channel posts, service messages). Acked silently.
    Ignored,
    /// A chat we can reply to, but nothing classifiable (sticker, voice, ...).
    AwaitingContent { chat_id: i64 },
    Content(InboundEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub user_id: Option<i64>,
    /// Classification input: the message text, the photo caption, or the
    /// missing-caption placeholder.
    pub text: String,
    pub photo: Option<PhotoSize>,
}

impl TelegramUpdate {
    /// Collapses the heterogeneous update shapes into the canonical input.
    /// `message` wins over `edited_message`; both flow through the same
    /// pipeline (an edit archives a fresh note).
    pub fn normalize(&self) -> NormalizedUpdate {
        let message = match self.message.as_ref().or(self.edited_message.as_ref()) {
            Some(m) => m,
            None => return NormalizedUpdate::Ignored,
        };
        let chat_id = match message.chat.as_ref() {
            Some(chat) => chat.id,
            None => return NormalizedUpdate::Ignored,
        };
        let user_id = message.from.as_ref().map(|u| u.id);

        if let Some(text) = non_blank(message.text.as_deref()) {
            return NormalizedUpdate::Content(InboundEvent {
                chat_id,
                user_id,
                text,
                photo: None,
            });
        }

        // Telegram orders photo variants by ascending resolution; the last
        // entry is the full-size one.
        let photo = message
            .photo
            .as_ref()
            .and_then(|sizes| sizes.last())
            .cloned();
        if let Some(photo) = photo {
            let text = non_blank(message.caption.as_deref())
                .unwrap_or_else(|| MISSING_CAPTION_PLACEHOLDER.to_string());
            return NormalizedUpdate::Content(InboundEvent {
                chat_id,
                user_id,
                text,
                photo: Some(photo),
            });
        }

        NormalizedUpdate::AwaitingContent { chat_id }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram api returned status {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("telegram file {file_id} has no downloadable path")]
    MissingFilePath { file_id: String },
}

/// Outbound Bot API client: replies and the two-step file resolution.
#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct FileEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<FileInfo>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

impl TelegramClient {
    pub fn new(base_url: &str, token: &str, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Single `sendMessage` call with Markdown markup and link previews off.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let body = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TelegramError::Api {
                status: status.as_u16(),
                detail: snippet(&detail),
            });
        }
        Ok(())
    }

    /// Step one of attachment resolution: `getFile` maps a file id to a
    /// server-relative download path.
    pub async fn resolve_file_path(&self, file_id: &str) -> Result<String, TelegramError> {
        let url = format!("{}/bot{}/getFile", self.base_url, self.token);
        let response = self
            .client
            .get(&url)
            .query(&[("file_id", file_id)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TelegramError::Api {
                status: status.as_u16(),
                detail: snippet(&detail),
            });
        }
        let envelope: FileEnvelope = response.json().await?;
        if !envelope.ok {
            return Err(TelegramError::Api {
                status: status.as_u16(),
                detail: envelope
                    .description
                    .unwrap_or_else(|| "getFile rejected".to_string()),
            });
        }
        envelope
            .result
            .and_then(|info| info.file_path)
            .ok_or_else(|| TelegramError::MissingFilePath {
                file_id: file_id.to_string(),
            })
    }

    /// Step two: fetch the raw bytes from the file endpoint.
    pub async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, TelegramError> {
        let url = format!(
            "{}/file/bot{}/{}",
            self.base_url,
            self.token,
            file_path.trim_start_matches('/')
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TelegramError::Api {
                status: status.as_u16(),
                detail: snippet(&detail),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
