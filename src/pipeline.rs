use chrono::Utc;

use crate::classify::{Classification, GeminiClassifier};
use crate::store::{content_type_for, extension_of, storage_key, Attachment, Note, SupabaseStore};
use crate::telegram::{
    InboundEvent, NormalizedUpdate, PhotoSize, TelegramClient, TelegramUpdate,
};

/// Sent when a message carries neither text nor a photo (stickers, voice,
/// polls). Nothing is persisted for these.
pub const GUIDANCE_MESSAGE: &str = "請傳送文字或圖片訊息，我才能幫你歸檔 📝";

/// A stage failure the pipeline absorbed instead of aborting. Every variant
/// maps to the same success acknowledgment; they exist for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    AttachmentUnavailable,
    ClassificationUnavailable,
    PersistenceFailed,
    NotificationFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// No chat to reply to; nothing happened.
    Ignored,
    /// No classifiable content; guidance sent instead.
    Guided,
    /// Classification ran and a note was assembled (possibly degraded).
    Archived,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    pub degradations: Vec<Degradation>,
}

/// Sequences one update through normalize → attachment → classify → persist
/// → notify. Every failure past normalization is absorbed into the report;
/// the caller always acknowledges the webhook.
pub struct IngestPipeline {
    telegram: TelegramClient,
    classifier: GeminiClassifier,
    store: SupabaseStore,
}

impl IngestPipeline {
    pub fn new(telegram: TelegramClient, classifier: GeminiClassifier, store: SupabaseStore) -> Self {
        Self {
            telegram,
            classifier,
            store,
        }
    }

    pub async fn handle_update(&self, update: &TelegramUpdate) -> PipelineReport {
        match update.normalize() {
            NormalizedUpdate::Ignored => {
                tracing::info!(update_id = ?update.update_id, "update has no chat to reply to; ignoring");
                PipelineReport {
                    outcome: PipelineOutcome::Ignored,
                    degradations: Vec::new(),
                }
            }
            NormalizedUpdate::AwaitingContent { chat_id } => {
                let mut degradations = Vec::new();
                if let Err(err) = self.telegram.send_message(chat_id, GUIDANCE_MESSAGE).await {
                    tracing::warn!(chat_id, error = %err, "failed to send guidance message");
                    degradations.push(Degradation::NotificationFailed);
                }
                PipelineReport {
                    outcome: PipelineOutcome::Guided,
                    degradations,
                }
            }
            NormalizedUpdate::Content(event) => self.archive(event).await,
        }
    }

    async fn archive(&self, event: InboundEvent) -> PipelineReport {
        let mut degradations = Vec::new();

        let mut attachments = Vec::new();
        if let Some(photo) = event.photo.as_ref() {
            match self.fetch_attachment(photo).await {
                Some(attachment) => attachments.push(attachment),
                None => degradations.push(Degradation::AttachmentUnavailable),
            }
        }

        let classification = match self.classifier.classify(&event.text).await {
            Ok(classification) => classification,
            Err(err) => {
                tracing::warn!(chat_id = event.chat_id, error = %err, "classification unavailable; using fallback");
                degradations.push(Degradation::ClassificationUnavailable);
                Classification::fallback(&event.text)
            }
        };

        let note = Note {
            tg_chat_id: event.chat_id,
            tg_user_id: event.user_id,
            title: classification.title.clone(),
            summary: classification.summary.clone(),
            tags: classification.tags.clone(),
            raw_text: event.text.clone(),
            attachments: attachments.clone(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.insert_note(&note).await {
            tracing::warn!(chat_id = event.chat_id, error = %err, "note insert failed; replying anyway");
            degradations.push(Degradation::PersistenceFailed);
        }

        let reply = format_reply(&classification, !attachments.is_empty());
        if let Err(err) = self.telegram.send_message(event.chat_id, &reply).await {
            tracing::warn!(chat_id = event.chat_id, error = %err, "failed to send reply");
            degradations.push(Degradation::NotificationFailed);
        }

        tracing::info!(
            chat_id = event.chat_id,
            title = %classification.title,
            attachments = attachments.len(),
            degradations = degradations.len(),
            "ingestion pipeline completed"
        );
        PipelineReport {
            outcome: PipelineOutcome::Archived,
            degradations,
        }
    }

    /// Resolve, download and store one photo. Any failure in the chain logs
    /// the cause and yields `None`; losing the image must not lose the note.
    async fn fetch_attachment(&self, photo: &PhotoSize) -> Option<Attachment> {
        let file_path = match self.telegram.resolve_file_path(&photo.file_id).await {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(file_id = %photo.file_id, error = %err, "attachment resolution failed; archiving without image");
                return None;
            }
        };
        let bytes = match self.telegram.download_file(&file_path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(file_id = %photo.file_id, error = %err, "attachment download failed; archiving without image");
                return None;
            }
        };
        let key = storage_key(&photo.file_id, &file_path, Utc::now());
        let content_type = content_type_for(&extension_of(&file_path));
        match self.store.upload_object(&key, content_type, bytes).await {
            Ok(url) => Some(Attachment::image(url, photo.width, photo.height)),
            Err(err) => {
                tracing::warn!(file_id = %photo.file_id, error = %err, "attachment upload failed; archiving without image");
                None
            }
        }
    }
}

/// Fixed-structure acknowledgment: title, summary, `#tag` list, plus an
/// image line when an attachment was stored. Markdown, previews disabled.
pub fn format_reply(classification: &Classification, has_image: bool) -> String {
    let mut reply = format!("✅ 已歸檔！\n\n📌 *{}*", classification.title);
    if !classification.summary.is_empty() {
        reply.push_str("\n\n");
        reply.push_str(&classification.summary);
    }
    if !classification.tags.is_empty() {
        let tags = classification
            .tags
            .iter()
            .map(|tag| format!("#{}", tag))
            .collect::<Vec<_>>()
            .join(" ");
        reply.push_str("\n\n🏷 ");
        reply.push_str(&tags);
    }
    if has_image {
        reply.push_str("\n\n🖼 圖片已存檔");
    }
    reply
}
