//! LLM integration for Agent Factory.
//!
//! Supports:
//! - **Anthropic**: Messages API via rig-core, blocking and streaming
//!
//! Uses the rig-core crate for HTTP transport and the `RigAdapter` to bridge
//! rig's `CompletionModel` trait to our `LlmProvider` trait. The orchestrator
//! only sees `LlmProvider`, so tests plug in behind the same seam.

pub mod provider;
mod rig_adapter;
pub mod stream;

pub use provider::*;
pub use rig_adapter::RigAdapter;
pub use stream::TextStream;

use std::sync::Arc;
use std::time::Duration;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Request timeout; a timeout is reported as `BackendUnavailable`.
    pub timeout: Duration,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> = anthropic::Client::builder()
        .api_key(config.api_key.expose_secret())
        .base_url(config.base_url.trim_end_matches('/'))
        .build()
        .map_err(|e| LlmError::BackendUnavailable {
            provider: "anthropic".to_string(),
            reason: format!("Failed to create Anthropic client: {}", e),
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(
        RigAdapter::new(model, &config.model)
            .with_provider("anthropic")
            .with_timeout(config.timeout),
    ))
}
