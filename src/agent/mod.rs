//! Tool-using conversational agents
//!
//! This module provides:
//! - **Agent**: one model identity with a system prompt, tools and memory
//! - **Memory**: the short-term history an agent replays every turn
//! - **ChatStream**: incremental output of a streamed turn
//! - **ConversationManager**: conversation logs with per-message feedback
//! - **AgentFactory**: template-based agent construction
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_engine::agent::{Agent, AgentConfig};
//! use agent_engine::provider::ProviderRegistry;
//! use agent_engine::RequestContext;
//!
//! let mut agent = Agent::new(AgentConfig::new("helper", "echo-1", "echo"))?;
//! agent.connect(&ProviderRegistry::with_defaults(), &Default::default())?;
//!
//! let reply = agent.chat(&RequestContext::new(), "Hello!").await?;
//! ```

pub mod conversation;
pub mod events;
pub mod factory;
pub mod memory;
mod runtime;
mod stream;
pub mod types;

pub use conversation::{Conversation, ConversationManager, Feedback, Message};
pub use events::{AgentEvent, EventCallback, EventData, EventType};
pub use factory::{AgentDefaults, AgentFactory, AgentSpec, AgentTemplate, AgentType};
pub use memory::{Memory, SimpleMemory};
pub use runtime::TurnOutcome;
pub use stream::ChatStream;
pub use types::{AgentId, ChatMessage, ConversationId, MessageId, Role, ToolCall, ToolResult};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::provider::{ChatProvider, ModelSettings, ProviderCredentials, ProviderRegistry};
use crate::tools::Tool;
use runtime::TurnRunner;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
pub const DEFAULT_STREAM_BUFFER: usize = 32;
pub const DEFAULT_MEMORY_SIZE: usize = 100;

/// Construction parameters for an [`Agent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Reuse an existing id instead of generating one
    pub id: Option<AgentId>,
    pub name: String,
    pub description: String,
    pub model: String,
    pub provider: String,
    pub system_prompt: String,
    pub settings: ModelSettings,
    pub memory_size: usize,
    pub max_tool_rounds: usize,
    pub stream_buffer: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            description: String::new(),
            model: String::new(),
            provider: String::new(),
            system_prompt: String::new(),
            settings: ModelSettings::default(),
            memory_size: DEFAULT_MEMORY_SIZE,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl AgentConfig {
    pub fn new(name: &str, model: &str, provider: &str) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    fn validate(&self) -> EngineResult<()> {
        for (field, value) in [
            ("name", &self.name),
            ("model", &self.model),
            ("provider", &self.provider),
        ] {
            if value.trim().is_empty() {
                return Err(EngineError::Configuration(format!(
                    "agent {} cannot be empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Serializable view of an agent's configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub name: String,
    pub description: String,
    pub model: String,
    pub provider: String,
    pub system_prompt: String,
    pub tools: Vec<String>,
    pub settings: ModelSettings,
    pub streaming: bool,
}

/// A conversational agent.
///
/// The agent exclusively owns its tool list and memory. One turn at a time
/// is the expected usage; the memory tolerates concurrent turns but their
/// messages interleave.
pub struct Agent {
    id: AgentId,
    name: String,
    description: String,
    model: String,
    provider_name: String,
    system_prompt: String,
    settings: ModelSettings,
    tools: Vec<Tool>,
    memory: Arc<dyn Memory>,
    provider: Option<Arc<dyn ChatProvider>>,
    streaming: bool,
    callbacks: Vec<EventCallback>,
    max_tool_rounds: usize,
    stream_buffer: usize,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("provider", &self.provider_name)
            .field("tools", &self.tool_names())
            .field("connected", &self.provider.is_some())
            .finish()
    }
}

impl Agent {
    /// Create an agent with a bounded [`SimpleMemory`]
    pub fn new(config: AgentConfig) -> EngineResult<Self> {
        let memory = Arc::new(SimpleMemory::new(config.memory_size));
        Self::with_memory(config, memory)
    }

    pub fn with_memory(config: AgentConfig, memory: Arc<dyn Memory>) -> EngineResult<Self> {
        config.validate()?;
        let id = config
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok(Self {
            id,
            name: config.name,
            description: config.description,
            model: config.model,
            provider_name: config.provider,
            system_prompt: config.system_prompt,
            settings: config.settings,
            tools: Vec::new(),
            memory,
            provider: None,
            streaming: false,
            callbacks: Vec::new(),
            max_tool_rounds: config.max_tool_rounds,
            stream_buffer: config.stream_buffer,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_system_prompt(&mut self, prompt: &str) {
        self.system_prompt = prompt.to_string();
    }

    pub fn settings(&self) -> ModelSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: ModelSettings) {
        self.settings = settings;
    }

    pub fn memory(&self) -> Arc<dyn Memory> {
        Arc::clone(&self.memory)
    }

    pub fn set_memory(&mut self, memory: Arc<dyn Memory>) {
        self.memory = memory;
    }

    pub fn clear_memory(&self) -> EngineResult<()> {
        self.memory.clear()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// Add a tool. Returns false and logs a warning if the name is taken.
    pub fn add_tool(&mut self, tool: Tool) -> bool {
        if self.tools.iter().any(|t| t.name == tool.name) {
            warn!(agent_id = %self.id, tool = %tool.name, "Tool already attached, skipping");
            return false;
        }
        self.tools.push(tool);
        true
    }

    /// Add several tools, skipping taken names. Returns how many were added.
    pub fn add_tools(&mut self, tools: Vec<Tool>) -> usize {
        let mut added = 0;
        for tool in tools {
            if self.add_tool(tool) {
                added += 1;
            }
        }
        added
    }

    pub fn remove_tool(&mut self, name: &str) -> bool {
        let before = self.tools.len();
        self.tools.retain(|t| t.name != name);
        self.tools.len() != before
    }

    pub fn is_connected(&self) -> bool {
        self.provider.is_some()
    }

    /// Attach a provider and emit a `start` event.
    pub fn attach_provider(&mut self, provider: Arc<dyn ChatProvider>) {
        info!(agent_id = %self.id, provider = %provider.name(), model = %self.model, "Agent connected");
        self.provider = Some(provider);
        let event = AgentEvent {
            agent_id: self.id.clone(),
            timestamp: crate::unix_timestamp_millis(),
            data: EventData::Start {
                model: self.model.clone(),
                provider: self.provider_name.clone(),
            },
        };
        for callback in &self.callbacks {
            callback(&event);
        }
    }

    /// Build this agent's provider from `registry` and attach it.
    pub fn connect(
        &mut self,
        registry: &ProviderRegistry,
        credentials: &ProviderCredentials,
    ) -> EngineResult<()> {
        let provider = registry.build(&self.provider_name, credentials)?;
        self.attach_provider(provider);
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn add_callback<F>(&mut self, callback: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
    }

    pub fn max_tool_rounds(&self) -> usize {
        self.max_tool_rounds
    }

    fn runner(&self, stream: bool) -> EngineResult<TurnRunner> {
        let provider = self.provider.clone().ok_or_else(|| {
            EngineError::NotInitialized(format!("agent '{}' has no provider attached", self.name))
        })?;
        Ok(TurnRunner {
            agent_id: self.id.clone(),
            model: self.model.clone(),
            provider_name: self.provider_name.clone(),
            provider,
            system_prompt: self.system_prompt.clone(),
            settings: self.settings,
            tools: self.tools.clone(),
            memory: Arc::clone(&self.memory),
            callbacks: self.callbacks.clone(),
            max_tool_rounds: self.max_tool_rounds,
            stream,
        })
    }

    /// Run one turn and return the final assistant text.
    ///
    /// In streaming mode this drains [`Agent::chat_stream`] and returns the
    /// concatenated text.
    pub async fn chat(&self, ctx: &RequestContext, message: &str) -> EngineResult<String> {
        if self.streaming {
            return self.chat_stream(ctx, message)?.collect_text().await;
        }
        Ok(self.runner(false)?.run(ctx, message, None).await?.content)
    }

    /// Run one turn and return the text together with its tool trace.
    pub async fn chat_detailed(
        &self,
        ctx: &RequestContext,
        message: &str,
    ) -> EngineResult<TurnOutcome> {
        self.runner(self.streaming)?.run(ctx, message, None).await
    }

    /// Start a streamed turn on a background task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn chat_stream(&self, ctx: &RequestContext, message: &str) -> EngineResult<ChatStream> {
        let runner = self.runner(true)?;
        Ok(ChatStream::spawn(
            runner,
            ctx.clone(),
            message.to_string(),
            self.stream_buffer,
        ))
    }

    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            model: self.model.clone(),
            provider: self.provider_name.clone(),
            system_prompt: self.system_prompt.clone(),
            tools: self.tool_names(),
            settings: self.settings,
            streaming: self.streaming,
        }
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(&self.descriptor())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderResponse, ScriptStep, ScriptedProvider};
    use crate::tools::{ParamSpec, ParamType, ToolSchema};
    use futures::StreamExt;
    use parking_lot::Mutex;
    use serde_json::json;

    fn echo_tool() -> Tool {
        Tool::new(
            "echo",
            "Echo text back",
            ToolSchema::new().param(ParamSpec::required("text", ParamType::String, "text")),
            |_ctx, args| async move {
                let text = args.str("text")?.to_string();
                Ok::<_, EngineError>(json!({ "echo": text }))
            },
        )
    }

    fn agent_with(provider: Arc<ScriptedProvider>) -> Agent {
        let mut agent = Agent::new(AgentConfig::new("tester", "test-model", "scripted")).unwrap();
        agent.attach_provider(provider);
        agent
    }

    fn record_events(agent: &mut Agent) -> Arc<Mutex<Vec<AgentEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        agent.add_callback(move |event| sink.lock().push(event.clone()));
        events
    }

    #[test]
    fn test_config_validation() {
        assert!(Agent::new(AgentConfig::new("", "m", "p")).is_err());
        assert!(Agent::new(AgentConfig::new("a", " ", "p")).is_err());
        assert!(Agent::new(AgentConfig::new("a", "m", "")).is_err());

        let agent = Agent::new(AgentConfig {
            id: Some("fixed-id".into()),
            ..AgentConfig::new("a", "m", "p")
        })
        .unwrap();
        assert_eq!(agent.id(), "fixed-id");
    }

    #[test]
    fn test_duplicate_tools_skipped() {
        let mut agent = Agent::new(AgentConfig::new("a", "m", "p")).unwrap();
        assert_eq!(agent.add_tools(vec![echo_tool(), echo_tool()]), 1);
        assert_eq!(agent.tool_names(), vec!["echo"]);
        assert!(agent.remove_tool("echo"));
        assert!(!agent.remove_tool("echo"));
    }

    #[tokio::test]
    async fn test_chat_requires_provider() {
        let agent = Agent::new(AgentConfig::new("a", "m", "p")).unwrap();
        let err = agent.chat(&RequestContext::new(), "hi").await.unwrap_err();
        assert!(matches!(err, EngineError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_plain_turn_events_and_memory() {
        let provider = Arc::new(ScriptedProvider::replies(vec![ProviderResponse::text("hello")]));
        let mut agent = agent_with(Arc::clone(&provider));
        agent.set_system_prompt("be nice");
        let events = record_events(&mut agent);

        let reply = agent.chat(&RequestContext::new(), "hi").await.unwrap();
        assert_eq!(reply, "hello");

        let kinds: Vec<EventType> = events.lock().iter().map(|e| e.event_type()).collect();
        assert_eq!(
            kinds,
            vec![EventType::Start, EventType::Thinking, EventType::Complete]
        );

        let history = agent.memory().messages().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "hello");

        let sent = &provider.requests()[0].messages;
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent.last().unwrap().content, "hi");
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let provider = Arc::new(ScriptedProvider::replies(vec![
            ProviderResponse::tool_calls(vec![
                ToolCall::new("c1", "missing", "{}"),
                ToolCall::new("c2", "echo", "{not json"),
                ToolCall::new("c3", "echo", r#"{"text": 5}"#),
                ToolCall::new("c4", "echo", r#"{"text": "ok"}"#),
            ]),
            ProviderResponse::text("done"),
        ]));
        let mut agent = agent_with(Arc::clone(&provider));
        agent.add_tool(echo_tool());

        let outcome = agent
            .chat_detailed(&RequestContext::new(), "go")
            .await
            .unwrap();
        assert_eq!(outcome.content, "done");
        assert_eq!(outcome.rounds, 1);

        let results = &outcome.tool_results;
        assert_eq!(results[0].content, "Tool not found: missing");
        assert!(results[1].content.starts_with("Invalid arguments: "));
        assert!(results[2].content.starts_with("Invalid arguments: "));
        assert!(!results[3].is_error);
        assert_eq!(results[3].content, r#"{"echo":"ok"}"#);

        let second = &provider.requests()[1].messages;
        let tool_messages: Vec<_> = second.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_messages.len(), 4);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("c1"));

        // only the user message and the final answer are remembered
        assert_eq!(agent.memory().messages().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_only_unencodable_output_is_reported_as_serialization_failure() {
        let tuple_keys = Tool::new(
            "tuple_keys",
            "Returns a map JSON cannot encode",
            ToolSchema::new(),
            |_ctx, _args| async move {
                let mut out = std::collections::HashMap::new();
                out.insert((1, 2), "pair");
                Ok::<_, EngineError>(out)
            },
        );
        let bad_input = Tool::new(
            "bad_input",
            "Parses malformed JSON itself",
            ToolSchema::new(),
            |_ctx, _args| async move {
                let parsed: serde_json::Value = serde_json::from_str("{broken")?;
                Ok::<_, EngineError>(parsed)
            },
        );
        let provider = Arc::new(ScriptedProvider::replies(vec![
            ProviderResponse::tool_calls(vec![
                ToolCall::new("c1", "tuple_keys", "{}"),
                ToolCall::new("c2", "bad_input", "{}"),
            ]),
            ProviderResponse::text("done"),
        ]));
        let mut agent = agent_with(provider);
        agent.add_tools(vec![tuple_keys, bad_input]);

        let outcome = agent
            .chat_detailed(&RequestContext::new(), "go")
            .await
            .unwrap();
        let results = &outcome.tool_results;
        assert!(results[0].is_error);
        assert!(results[0].content.starts_with("Failed to serialize tool result: "));
        assert!(results[1].is_error);
        assert!(results[1].content.starts_with("Serialization error: "));
    }

    #[tokio::test]
    async fn test_tool_loop_limit() {
        let provider = Arc::new(ScriptedProvider::repeating(ProviderResponse::tool_calls(
            vec![ToolCall::new("c", "echo", r#"{"text":"again"}"#)],
        )));
        let mut agent = Agent::new(AgentConfig {
            max_tool_rounds: 3,
            ..AgentConfig::new("looper", "m", "scripted")
        })
        .unwrap();
        agent.attach_provider(Arc::clone(&provider) as Arc<dyn ChatProvider>);
        agent.add_tool(echo_tool());
        let events = record_events(&mut agent);

        let err = agent.chat(&RequestContext::new(), "loop").await.unwrap_err();
        assert!(matches!(err, EngineError::ToolLoopLimit(3)));
        assert_eq!(provider.call_count(), 4);
        assert_eq!(
            events.lock().last().map(|e| e.event_type()),
            Some(EventType::Error)
        );
    }

    #[tokio::test]
    async fn test_provider_failure_emits_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptStep::Fail("down".into())]));
        let mut agent = agent_with(provider);
        let events = record_events(&mut agent);

        let err = agent.chat(&RequestContext::new(), "hi").await.unwrap_err();
        assert_eq!(err.to_string(), "Provider error: down");
        let last = events.lock().last().cloned().unwrap();
        assert_eq!(
            last.data,
            EventData::Error {
                error: "Provider error: down".into()
            }
        );
    }

    #[tokio::test]
    async fn test_stream_tokens_match_chat() {
        let provider = Arc::new(ScriptedProvider::replies(vec![ProviderResponse::text(
            "streamed answer here",
        )]));
        let mut agent = agent_with(provider);
        let events = record_events(&mut agent);

        let stream = agent.chat_stream(&RequestContext::new(), "q").unwrap();
        let pieces: Vec<String> = stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(pieces.concat(), "streamed answer here");
        assert!(pieces.len() > 1);

        let tokens = events
            .lock()
            .iter()
            .filter(|e| e.event_type() == EventType::Token)
            .count();
        assert_eq!(tokens, pieces.len());
        assert_eq!(
            agent.memory().messages().unwrap()[1].content,
            "streamed answer here"
        );
    }

    #[tokio::test]
    async fn test_stream_closes_with_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptStep::FailMidStream {
            partial: "par".into(),
            error: "reset".into(),
        }]));
        let mut agent = agent_with(provider);
        agent.set_streaming(true);

        let items: Vec<EngineResult<String>> = agent
            .chat_stream(&RequestContext::new(), "q")
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "par");
        assert!(items[1].is_err());

        assert!(agent.chat(&RequestContext::new(), "again").await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_turn() {
        let provider = Arc::new(ScriptedProvider::replies(vec![ProviderResponse::text("x")]));
        let agent = agent_with(Arc::clone(&provider));
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = agent.chat(&ctx, "hi").await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_descriptor_json() {
        let mut agent = Agent::new(AgentConfig::new("desc", "m", "echo")).unwrap();
        agent.add_tool(echo_tool());
        agent.set_streaming(true);
        let json: serde_json::Value = serde_json::from_str(&agent.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "desc");
        assert_eq!(json["tools"], json!(["echo"]));
        assert_eq!(json["streaming"], true);
    }
}
