//! The turn loop: provider calls, tool resolution and event emission

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::events::{AgentEvent, EventCallback, EventData};
use super::memory::Memory;
use super::types::{ChatMessage, ToolCall, ToolResult};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::provider::{ChatProvider, ModelSettings, ProviderRequest, ProviderResponse};
use crate::tools::Tool;
use crate::unix_timestamp_millis;

/// Receives streamed text. A closed receiver aborts the turn.
pub(crate) type TokenSink = mpsc::Sender<EngineResult<String>>;

/// Result of a completed turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// Final assistant text
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    /// Tool rounds resolved before the final answer
    pub rounds: usize,
}

/// Everything one turn needs, detached from the owning agent so it can
/// move into a streaming worker.
#[derive(Clone)]
pub(crate) struct TurnRunner {
    pub agent_id: String,
    pub model: String,
    pub provider_name: String,
    pub provider: Arc<dyn ChatProvider>,
    pub system_prompt: String,
    pub settings: ModelSettings,
    pub tools: Vec<Tool>,
    pub memory: Arc<dyn Memory>,
    pub callbacks: Vec<EventCallback>,
    pub max_tool_rounds: usize,
    pub stream: bool,
}

impl TurnRunner {
    fn emit(&self, data: EventData) {
        if self.callbacks.is_empty() {
            return;
        }
        let event = AgentEvent {
            agent_id: self.agent_id.clone(),
            timestamp: unix_timestamp_millis(),
            data,
        };
        for callback in &self.callbacks {
            callback(&event);
        }
    }

    /// Run one turn; every failure is also reported as an error event.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        user_message: &str,
        sink: Option<&TokenSink>,
    ) -> EngineResult<TurnOutcome> {
        let result = self.run_turn(ctx, user_message, sink).await;
        if let Err(e) = &result {
            warn!(agent_id = %self.agent_id, error = %e, "Agent turn failed");
            self.emit(EventData::Error {
                error: e.to_string(),
            });
        }
        result
    }

    #[instrument(skip(self, ctx, user_message, sink), fields(agent_id = %self.agent_id, model = %self.model))]
    async fn run_turn(
        &self,
        ctx: &RequestContext,
        user_message: &str,
        sink: Option<&TokenSink>,
    ) -> EngineResult<TurnOutcome> {
        self.emit(EventData::Start {
            model: self.model.clone(),
            provider: self.provider_name.clone(),
        });
        ctx.check()?;

        let mut messages = self.initial_messages(user_message);
        let specs: Vec<_> = self.tools.iter().map(Tool::spec).collect();
        let mut outcome = TurnOutcome::default();

        loop {
            ctx.check()?;
            self.emit(EventData::Thinking);

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: specs.clone(),
                settings: self.settings,
            };
            let response = self.call_provider(ctx, request, sink).await?;

            if response.tool_calls.is_empty() {
                if let Err(e) = self
                    .memory
                    .add_message(ChatMessage::assistant(response.content.clone()))
                {
                    warn!(error = %e, "Failed to store assistant message");
                }
                self.emit(EventData::Complete {
                    content: response.content.clone(),
                });
                outcome.content = response.content;
                debug!(rounds = outcome.rounds, "Turn complete");
                return Ok(outcome);
            }

            if outcome.rounds >= self.max_tool_rounds {
                return Err(EngineError::ToolLoopLimit(self.max_tool_rounds));
            }
            outcome.rounds += 1;

            let results = self.resolve_tool_calls(ctx, &response.tool_calls).await;
            messages.push(ChatMessage::assistant_with_tools(
                response.content,
                response.tool_calls.clone(),
            ));
            messages.extend(results.iter().map(ChatMessage::tool));
            outcome.tool_calls.extend(response.tool_calls);
            outcome.tool_results.extend(results);
        }
    }

    /// System prompt, then history, always ending with the current user
    /// message even when memory is unavailable.
    fn initial_messages(&self, user_message: &str) -> Vec<ChatMessage> {
        let user = ChatMessage::user(user_message);
        if let Err(e) = self.memory.add_message(user.clone()) {
            warn!(error = %e, "Failed to store user message");
        }

        let mut messages = Vec::new();
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        match self.memory.messages() {
            Ok(history) => messages.extend(history),
            Err(e) => warn!(error = %e, "Failed to read memory"),
        }
        if messages.last() != Some(&user) {
            messages.push(user);
        }
        messages
    }

    async fn call_provider(
        &self,
        ctx: &RequestContext,
        request: ProviderRequest,
        sink: Option<&TokenSink>,
    ) -> EngineResult<ProviderResponse> {
        if !self.stream {
            return ctx.run(self.provider.send(ctx, request)).await;
        }

        let mut stream = ctx.run(self.provider.stream(ctx, request)).await?;
        let mut response = ProviderResponse::default();
        while let Some(item) = ctx.run(async { Ok(stream.next().await) }).await? {
            let chunk = item?;
            if !chunk.content.is_empty() {
                response.content.push_str(&chunk.content);
                self.emit(EventData::Token {
                    content: chunk.content.clone(),
                });
                if let Some(sink) = sink {
                    if sink.send(Ok(chunk.content)).await.is_err() {
                        return Err(EngineError::Stream("stream reader closed".to_string()));
                    }
                }
            }
            response.tool_calls.extend(chunk.tool_calls);
        }
        Ok(response)
    }

    /// Resolve calls in order. Failures become error results the model can
    /// read; they never abort the turn.
    async fn resolve_tool_calls(&self, ctx: &RequestContext, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            self.emit(EventData::ToolCall {
                tool_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let result = match self.execute_tool(ctx, call).await {
                Ok(value) => match serde_json::to_string(&value) {
                    Ok(text) => {
                        self.emit(EventData::ToolResult {
                            tool_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            result: Some(value),
                            error: None,
                        });
                        ToolResult::success(call, text)
                    }
                    Err(e) => {
                        self.tool_failure(call, EngineError::ToolOutput(e.to_string()).to_string())
                    }
                },
                Err(message) => self.tool_failure(call, message),
            };
            results.push(result);
        }
        results
    }

    fn tool_failure(&self, call: &ToolCall, message: String) -> ToolResult {
        debug!(tool = %call.name, error = %message, "Tool call failed");
        self.emit(EventData::ToolResult {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: None,
            error: Some(message.clone()),
        });
        ToolResult::error(call, message)
    }

    async fn execute_tool(&self, ctx: &RequestContext, call: &ToolCall) -> Result<Value, String> {
        let raw = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str::<Value>(&call.arguments)
                .map_err(|e| EngineError::InvalidArguments(e.to_string()).to_string())?
        };

        let tool = self
            .tools
            .iter()
            .find(|t| t.name == call.name)
            .ok_or_else(|| format!("Tool not found: {}", call.name))?;

        let args = tool.schema.validate(raw).map_err(|e| match e {
            EngineError::InvalidArguments(_) => e.to_string(),
            other => EngineError::InvalidArguments(other.to_string()).to_string(),
        })?;

        tool.call(ctx, args).await.map_err(|e| e.to_string())
    }
}
