// src/engine/placeholder.rs

use async_trait::async_trait;

use super::{EngineError, GenerationRequest, ImageGenerator, RenderedImage};

/// 1x1 transparent PNG.
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Local development engine: never calls out, always returns `count` images.
pub struct PlaceholderGenerator;

#[async_trait]
impl ImageGenerator for PlaceholderGenerator {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<RenderedImage>, EngineError> {
        Ok((0..request.count)
            .map(|_| RenderedImage {
                bytes: PLACEHOLDER_PNG.to_vec(),
                mime_type: "image/png".to_string(),
            })
            .collect())
    }
}
