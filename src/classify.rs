use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::snippet;

/// Title substituted when the model call fails or returns an unusable
/// payload; the note is archived anyway with the raw input as its summary.
pub const FALLBACK_TITLE: &str = "AI 解析失敗";

const MAX_TAGS: usize = 5;

static DEFAULT_TAG_VOCABULARY: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "旅遊", "美食", "購物", "工作", "學習", "健康", "理財", "科技", "生活", "娛樂",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

pub fn default_tag_vocabulary() -> Vec<String> {
    DEFAULT_TAG_VOCABULARY.clone()
}

/// Structured archive fields produced by the model (or synthesized on
/// failure). Consumed into the persisted note, never stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
}

impl Classification {
    /// Degraded substitute: the note keeps the user's words even when the
    /// model cannot be reached or answers garbage.
    pub fn fallback(input: &str) -> Self {
        Self {
            title: FALLBACK_TITLE.to_string(),
            summary: input.to_string(),
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classification backend returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("classification backend returned no candidate text")]
    EmptyResponse,
    #[error("classification payload is not the expected JSON object: {detail}")]
    Invalid { detail: String },
}

/// Gemini `generateContent` client with the fixed archival instruction.
/// One attempt per inbound event; the orchestrator substitutes
/// [`Classification::fallback`] on any error.
#[derive(Clone)]
pub struct GeminiClassifier {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    instruction: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: ContentPayload<'a>,
    contents: Vec<ContentPayload<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct ContentPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClassifier {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        vocabulary: &[String],
        timeout_ms: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            instruction: build_instruction(vocabulary),
        }
    }

    /// Single `generateContent` call requesting a JSON response, followed by
    /// the strict parse of the candidate text.
    pub async fn classify(&self, input: &str) -> Result<Classification, ClassifyError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let request = GenerateContentRequest {
            system_instruction: ContentPayload {
                role: None,
                parts: vec![TextPart {
                    text: &self.instruction,
                }],
            },
            contents: vec![ContentPayload {
                role: Some("user"),
                parts: vec![TextPart { text: input }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                detail: snippet(&detail),
            });
        }

        let payload: GenerateContentResponse = response.json().await?;
        let text = payload
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|content| content.parts.first())
            .and_then(|part| part.text.as_deref())
            .ok_or(ClassifyError::EmptyResponse)?;
        parse_classification(text)
    }
}

/// Strict parse of the model output. The contract forbids markdown fencing,
/// but models still emit it, so a surrounding ``` fence is stripped before
/// parsing. Missing fields default to empty; anything else is `Invalid`.
pub fn parse_classification(raw: &str) -> Result<Classification, ClassifyError> {
    #[derive(Deserialize)]
    struct RawClassification {
        #[serde(default)]
        title: String,
        #[serde(default)]
        summary: String,
        #[serde(default)]
        tags: Vec<String>,
    }

    let cleaned = strip_code_fence(raw);
    let value: serde_json::Value =
        serde_json::from_str(cleaned).map_err(|err| ClassifyError::Invalid {
            detail: err.to_string(),
        })?;
    if !value.is_object() {
        return Err(ClassifyError::Invalid {
            detail: "top-level value is not an object".to_string(),
        });
    }
    let parsed: RawClassification =
        serde_json::from_value(value).map_err(|err| ClassifyError::Invalid {
            detail: err.to_string(),
        })?;
    let mut tags = parsed.tags;
    tags.truncate(MAX_TAGS);
    Ok(Classification {
        title: parsed.title,
        summary: parsed.summary,
        tags,
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = match trimmed.strip_prefix("```") {
        Some(rest) => rest,
        None => return trimmed,
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    inner.trim()
}

fn build_instruction(vocabulary: &[String]) -> String {
    format!(
        "你是一位資料歸檔專家。請分析以下內容。\n\
         你的任務是精準地產生一個 JSON 物件，包含三個欄位：\n\
         1. \"title\": 一個簡短、吸引人的標題。\n\
         2. \"summary\": 一段不超過 100 字的精簡摘要。\n\
         3. \"tags\": 一個包含 1 到 5 個最相關標籤的陣列。\n\
         標籤請優先從這個清單挑選：{}。\n\
         最多允許 1 到 2 個清單以外的標籤。\n\n\
         範例輸出：\n\
         {{\"title\": \"標題\", \"summary\": \"摘要...\", \"tags\": [\"標籤1\", \"標籤2\"]}}\n\n\
         請只回傳這個 JSON 物件，不要有任何 \"json\" 或 \"```\" 的標記。",
        vocabulary.join("、")
    )
}
