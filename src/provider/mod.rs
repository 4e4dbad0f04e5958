//! Model provider abstraction
//!
//! A [`ChatProvider`] is one LLM backend. Backends are looked up by name in
//! a [`ProviderRegistry`] of constructors, so adding a backend means
//! registering a constructor rather than editing a dispatch table. Wire
//! protocols live outside this crate; [`EchoProvider`] and
//! [`ScriptedProvider`] are the in-process implementations.

mod echo;
mod scripted;

pub use echo::EchoProvider;
pub use scripted::{ScriptStep, ScriptedProvider};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::agent::types::{ChatMessage, ToolCall};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::tools::ToolSpec;

/// Sampling settings passed to the provider on every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        }
    }

    /// Values set in `overrides` win.
    pub fn merged(&self, overrides: Option<&ModelSettings>) -> ModelSettings {
        match overrides {
            Some(o) => ModelSettings {
                temperature: o.temperature.or(self.temperature),
                max_tokens: o.max_tokens.or(self.max_tokens),
            },
            None => *self,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub settings: ModelSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl ProviderResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls: calls,
            finish_reason: Some("tool_calls".to_string()),
        }
    }
}

/// One increment of a streamed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Ends at end-of-stream; an `Err` item means the stream failed.
pub type ProviderStream = BoxStream<'static, EngineResult<StreamChunk>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, ctx: &RequestContext, request: ProviderRequest)
        -> EngineResult<ProviderResponse>;

    /// Streaming variant. The default delivers the whole `send` response
    /// as one chunk.
    async fn stream(&self, ctx: &RequestContext, request: ProviderRequest)
        -> EngineResult<ProviderStream> {
        let response = self.send(ctx, request).await?;
        let chunk = StreamChunk {
            content: response.content,
            tool_calls: response.tool_calls,
        };
        Ok(stream::once(async move { Ok(chunk) }).boxed())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Where provider credentials come from.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self, provider: &str) -> EngineResult<ProviderCredentials>;
}

/// Reads `<PROVIDER>_API_KEY` (required) and `<PROVIDER>_BASE_URL`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn var_prefix(provider: &str) -> String {
        provider
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }
}

impl CredentialSource for EnvCredentials {
    fn credentials(&self, provider: &str) -> EngineResult<ProviderCredentials> {
        let prefix = Self::var_prefix(provider);
        let key_var = format!("{}_API_KEY", prefix);
        let api_key = std::env::var(&key_var).map_err(|_| {
            EngineError::Configuration(format!(
                "missing API key for provider '{}' (set {})",
                provider, key_var
            ))
        })?;
        Ok(ProviderCredentials {
            api_key: Some(api_key),
            base_url: std::env::var(format!("{}_BASE_URL", prefix)).ok(),
        })
    }
}

/// Fixed credentials per provider name.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<String, ProviderCredentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: &str, credentials: ProviderCredentials) -> Self {
        self.entries.insert(provider.to_string(), credentials);
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&self, provider: &str) -> EngineResult<ProviderCredentials> {
        let credentials = self.entries.get(provider).cloned().ok_or_else(|| {
            EngineError::Configuration(format!("no credentials for provider '{}'", provider))
        })?;
        if credentials.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(EngineError::Configuration(format!(
                "missing API key for provider '{}'",
                provider
            )));
        }
        Ok(credentials)
    }
}

pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderCredentials) -> EngineResult<Arc<dyn ChatProvider>> + Send + Sync>;

/// Provider constructors keyed by provider name.
#[derive(Default)]
pub struct ProviderRegistry {
    constructors: RwLock<HashMap<String, ProviderConstructor>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the offline `echo` provider.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("echo", |_credentials| {
            Ok(Arc::new(EchoProvider::new()) as Arc<dyn ChatProvider>)
        });
        registry
    }

    pub fn register<F>(&self, name: &str, constructor: F)
    where
        F: Fn(&ProviderCredentials) -> EngineResult<Arc<dyn ChatProvider>> + Send + Sync + 'static,
    {
        tracing::debug!(provider = %name, "Registered provider");
        self.constructors
            .write()
            .insert(name.to_string(), Arc::new(constructor));
    }

    /// Register a single shared provider instance under `name`.
    pub fn register_instance(&self, name: &str, provider: Arc<dyn ChatProvider>) {
        self.register(name, move |_credentials| Ok(Arc::clone(&provider)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn build(
        &self,
        name: &str,
        credentials: &ProviderCredentials,
    ) -> EngineResult<Arc<dyn ChatProvider>> {
        let constructor = self
            .constructors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProvider(name.to_string()))?;
        constructor(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_merge() {
        let base = ModelSettings::new(0.7, 1000);
        let merged = base.merged(Some(&ModelSettings {
            temperature: Some(0.1),
            max_tokens: None,
        }));
        assert_eq!(merged, ModelSettings::new(0.1, 1000));
        assert_eq!(base.merged(None), base);
    }

    #[test]
    fn test_registry_build() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.contains("echo"));
        let provider = registry.build("echo", &ProviderCredentials::default()).unwrap();
        assert_eq!(provider.name(), "echo");

        let err = registry
            .build("openai", &ProviderCredentials::default())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Unknown provider 'openai'");
    }

    #[test]
    fn test_static_credentials() {
        let creds = StaticCredentials::new()
            .with(
                "acme",
                ProviderCredentials {
                    api_key: Some("sk-1".into()),
                    base_url: None,
                },
            )
            .with("blank", ProviderCredentials::default());
        assert_eq!(creds.credentials("acme").unwrap().api_key.as_deref(), Some("sk-1"));
        assert!(creds.credentials("blank").is_err());
        assert!(creds.credentials("other").is_err());
    }

    #[test]
    fn test_env_var_prefix() {
        assert_eq!(EnvCredentials::var_prefix("open-ai"), "OPEN_AI");
        assert!(EnvCredentials
            .credentials("agent_engine_test_provider_without_key")
            .is_err());
    }

    struct Fixed;

    #[async_trait]
    impl ChatProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn send(
            &self,
            _ctx: &RequestContext,
            _request: ProviderRequest,
        ) -> EngineResult<ProviderResponse> {
            Ok(ProviderResponse::text("whole answer"))
        }
    }

    #[tokio::test]
    async fn test_default_stream_wraps_send() {
        let ctx = RequestContext::new();
        let chunks: Vec<_> = Fixed
            .stream(&ctx, ProviderRequest::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().content, "whole answer");
    }
}
