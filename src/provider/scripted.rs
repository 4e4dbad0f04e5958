//! Deterministic provider for tests.
//!
//! Not a real model backend: it exists so callers can drive the agent loop
//! through exact tool-call and failure sequences without network access.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use super::{ChatProvider, ProviderRequest, ProviderResponse, ProviderStream, StreamChunk};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};

/// One scripted provider reaction.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(ProviderResponse),
    /// The call itself fails.
    Fail(String),
    /// Streams `partial` then fails with `error`. `send` fails outright.
    FailMidStream { partial: String, error: String },
}

/// Test utility that plays back a fixed script and records every request.
///
/// Once the script is exhausted it repeats the `fallback` reply if one is
/// set, otherwise fails.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    fallback: Option<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Default::default()
        }
    }

    pub fn replies(responses: Vec<ProviderResponse>) -> Self {
        Self::new(responses.into_iter().map(ScriptStep::Reply).collect())
    }

    /// Answer every call with the same response.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_step(&self, request: ProviderRequest) -> EngineResult<ScriptStep> {
        self.requests.lock().push(request);
        if let Some(step) = self.steps.lock().pop_front() {
            return Ok(step);
        }
        self.fallback
            .clone()
            .map(ScriptStep::Reply)
            .ok_or_else(|| EngineError::Provider("script exhausted".to_string()))
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        request: ProviderRequest,
    ) -> EngineResult<ProviderResponse> {
        ctx.check()?;
        match self.next_step(request)? {
            ScriptStep::Reply(response) => Ok(response),
            ScriptStep::Fail(error) | ScriptStep::FailMidStream { error, .. } => {
                Err(EngineError::Provider(error))
            }
        }
    }

    async fn stream(
        &self,
        ctx: &RequestContext,
        request: ProviderRequest,
    ) -> EngineResult<ProviderStream> {
        ctx.check()?;
        let items: Vec<EngineResult<StreamChunk>> = match self.next_step(request)? {
            ScriptStep::Reply(response) => {
                let mut items: Vec<EngineResult<StreamChunk>> = response
                    .content
                    .split_inclusive(' ')
                    .map(|word| {
                        Ok(StreamChunk {
                            content: word.to_string(),
                            tool_calls: Vec::new(),
                        })
                    })
                    .collect();
                if !response.tool_calls.is_empty() {
                    items.push(Ok(StreamChunk {
                        content: String::new(),
                        tool_calls: response.tool_calls,
                    }));
                }
                items
            }
            ScriptStep::Fail(error) => return Err(EngineError::Provider(error)),
            ScriptStep::FailMidStream { partial, error } => vec![
                Ok(StreamChunk {
                    content: partial,
                    tool_calls: Vec::new(),
                }),
                Err(EngineError::Stream(error)),
            ],
        };
        Ok(stream::iter(items).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_playback() {
        let provider = ScriptedProvider::new(vec![
            ScriptStep::Reply(ProviderResponse::text("first")),
            ScriptStep::Fail("boom".into()),
        ]);
        let ctx = RequestContext::new();
        let first = provider.send(&ctx, ProviderRequest::default()).await.unwrap();
        assert_eq!(first.content, "first");
        assert!(provider.send(&ctx, ProviderRequest::default()).await.is_err());
        let err = provider
            .send(&ctx, ProviderRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Provider error: script exhausted");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mid_stream_failure() {
        let provider = ScriptedProvider::new(vec![ScriptStep::FailMidStream {
            partial: "half".into(),
            error: "connection reset".into(),
        }]);
        let ctx = RequestContext::new();
        let items: Vec<_> = provider
            .stream(&ctx, ProviderRequest::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
