use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::snippet;

pub const NOTES_TABLE: &str = "notes";
pub const ASSETS_BUCKET: &str = "assets";

/// Persisted archive record. One row per ingested update; never updated or
/// deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub tg_chat_id: i64,
    pub tg_user_id: Option<i64>,
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub raw_text: String,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub width: i64,
    pub height: i64,
}

impl Attachment {
    pub fn image(url: String, width: i64, height: i64) -> Self {
        Self {
            kind: "image".to_string(),
            url,
            width,
            height,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("datastore returned status {status}: {detail}")]
    Status { status: u16, detail: String },
}

/// Supabase client: PostgREST for note rows, the storage API for attachment
/// objects. Service-role key, server side only.
#[derive(Clone)]
pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: &str, service_key: &str, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    /// Single insert, no upsert. The caller decides whether a failure is
    /// fatal (for the webhook pipeline it is not).
    pub async fn insert_note(&self, note: &Note) -> Result<(), StoreError> {
        let url = format!("{}/rest/v1/{}", self.base_url, NOTES_TABLE);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("prefer", "return=minimal")
            .json(note)
            .send()
            .await?;
        self.check(response).await.map(|_| ())
    }

    /// Newest-50 listing with the optional `q` substring and `tag`
    /// membership filters, pushed down to PostgREST.
    pub async fn query_notes(
        &self,
        q: Option<&str>,
        tag: Option<&str>,
    ) -> Result<Vec<Note>, StoreError> {
        let url = format!("{}/rest/v1/{}", self.base_url, NOTES_TABLE);
        let response = self
            .client
            .get(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .query(&notes_query_params(q, tag))
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    /// Uploads attachment bytes into the public assets bucket and returns
    /// the public URL.
    pub async fn upload_object(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StoreError> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, ASSETS_BUCKET, key
        );
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await?;
        self.check(response).await?;
        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, ASSETS_BUCKET, key
        ))
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            detail: snippet(&detail),
        })
    }
}

fn notes_query_params(q: Option<&str>, tag: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("select", "*".to_string()),
        ("order", "created_at.desc".to_string()),
        ("limit", "50".to_string()),
    ];
    if let Some(q) = q.map(sanitize_filter_term).filter(|v| !v.is_empty()) {
        params.push((
            "or",
            format!(
                "(title.ilike.*{}*,summary.ilike.*{}*,raw_text.ilike.*{}*)",
                q, q, q
            ),
        ));
    }
    if let Some(tag) = tag.map(sanitize_filter_term).filter(|v| !v.is_empty()) {
        params.push(("tags", format!("cs.{{{}}}", tag)));
    }
    params
}

/// Filter values travel inside the PostgREST filter grammar itself, so its
/// reserved characters are dropped from user-supplied terms. A term made of
/// nothing else comes back empty and the filter is skipped.
fn sanitize_filter_term(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '{' | '}' | '"' | '\\'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Collision-resistant object key: upload instant in unix millis plus the
/// platform file id, extension taken from the resolved file path.
pub fn storage_key(file_id: &str, file_path: &str, at: DateTime<Utc>) -> String {
    format!(
        "photos/{}_{}.{}",
        at.timestamp_millis(),
        file_id,
        extension_of(file_path)
    )
}

pub fn extension_of(file_path: &str) -> String {
    let candidate = file_path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match candidate {
        Some(ext) if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => ext,
        _ => "jpg".to_string(),
    }
}

pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
