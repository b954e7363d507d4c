//! Contract for the external tool-synthesis engine.
//!
//! The `Tool` corrective action asks the engine to generate a tool that fills
//! the gap behind a failed attempt; only its name and description flow back
//! into the next attempt's task text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Confidence attached to every synthesis request made by the gatherer.
pub const SYNTHESIS_CONFIDENCE: f64 = 0.8;

/// What to synthesize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    pub purpose: String,
    pub confidence: f64,
}

/// What the engine produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedTool {
    pub name: String,
    pub description: String,
}

#[async_trait]
pub trait ToolSynthesizer: Send + Sync {
    async fn generate_tool(&self, request: ToolRequest) -> anyhow::Result<SynthesizedTool>;
}
