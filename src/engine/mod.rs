// src/engine/mod.rs

pub mod gemini;
pub mod placeholder;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::{Config, ConfigError, EngineKind};

/// Vendor-neutral description of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: i32,
    pub height: i32,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Quota, budget, rate limit or an unreachable vendor. May succeed later.
    Transient(String),
    Permanent(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Transient(msg) => write!(f, "transient engine error: {msg}"),
            EngineError::Permanent(msg) => write!(f, "permanent engine error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// The external image-generation capability. Implementations may return fewer
/// images than `request.count`, including none.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<RenderedImage>, EngineError>;
}

/// Picks the generator once at startup. There is no fallback between engines.
pub fn from_config(config: &Config) -> Result<Arc<dyn ImageGenerator>, ConfigError> {
    match config.engine {
        EngineKind::Gemini => {
            let api_key = config
                .gemini_api_key
                .clone()
                .ok_or(ConfigError::Missing("GOOGLE_AI_API_KEY"))?;
            let client =
                crate::http_client(config.gemini_timeout).map_err(|e| ConfigError::Invalid {
                    key: "GEMINI_TIMEOUT_SECS",
                    value: e.to_string(),
                })?;
            Ok(Arc::new(gemini::GeminiGenerator::new(
                client,
                &config.gemini_api_base,
                api_key,
                &config.gemini_model,
            )))
        }
        EngineKind::Placeholder => Ok(Arc::new(placeholder::PlaceholderGenerator)),
    }
}
