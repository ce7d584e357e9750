// src/engine/gemini.rs
//
// Client for the Google Generative Language `generateContent` endpoint with image output.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use super::{EngineError, GenerationRequest, ImageGenerator, RenderedImage};

pub const API_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    InlineData(InlineDataPart),
    Text(TextPart),
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataPart {
    inline_data: Blob,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

pub struct GeminiGenerator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl GeminiGenerator {
    pub fn new(client: reqwest::Client, api_url: &str, api_key: String, model: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
        }
    }
}

/// Wraps the user's prompt for product photography.
pub fn build_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "Create a professional, photorealistic product photograph: {}",
        request.prompt.trim()
    );
    if let Some(negative) = request.negative_prompt.as_deref().map(str::trim) {
        if !negative.is_empty() {
            prompt.push_str(&format!(". Avoid: {negative}"));
        }
    }
    prompt.push_str(&format!(
        ". Style: commercial photography, professional studio lighting, product marketing quality. \
         Target resolution {}x{}.",
        request.width, request.height
    ));
    prompt
}

/// Rate limits, server errors and exhausted budgets can clear up on their own.
fn classify_http_error(status: reqwest::StatusCode, body: &str) -> EngineError {
    let lowered = body.to_ascii_lowercase();
    let exhausted = lowered.contains("resource_exhausted")
        || lowered.contains("quota")
        || lowered.contains("budget");

    let msg = format!("gemini status={} body={body}", status.as_u16());
    if status.as_u16() == 429 || status.is_server_error() || exhausted {
        EngineError::Transient(msg)
    } else {
        EngineError::Permanent(msg)
    }
}

#[async_trait]
impl ImageGenerator for GeminiGenerator {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<RenderedImage>, EngineError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::Text(TextPart {
                    text: build_prompt(request),
                })],
                role: Some("user".to_string()),
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_url, self.model
        );
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("gemini request error: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| EngineError::Transient(format!("gemini body error: {e}")))?;
        if !status.is_success() {
            return Err(classify_http_error(status, &text));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| EngineError::Permanent(format!("gemini parse error: {e}; body={text}")))?;

        if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(EngineError::Permanent(format!("prompt blocked: {reason}")));
        }

        let mut images = Vec::new();
        for part in parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
        {
            let Part::InlineData(part) = part else {
                continue;
            };
            match BASE64.decode(part.inline_data.data.as_bytes()) {
                Ok(bytes) => images.push(RenderedImage {
                    bytes,
                    mime_type: part.inline_data.mime_type,
                }),
                Err(e) => log::warn!("gemini returned undecodable image data: {e}"),
            }
            if images.len() as u32 >= request.count {
                break;
            }
        }

        Ok(images)
    }
}
