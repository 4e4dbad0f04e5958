use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{ChatProvider, ProviderRequest, ProviderResponse, ProviderStream, StreamChunk};
use crate::agent::types::Role;
use crate::context::RequestContext;
use crate::error::EngineResult;

/// Offline provider that answers with the latest user or tool message.
///
/// Never requests tools, so a turn always completes in one round.
#[derive(Debug, Clone, Default)]
pub struct EchoProvider;

impl EchoProvider {
    pub fn new() -> Self {
        Self
    }

    fn reply(request: &ProviderRequest) -> String {
        request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User | Role::Tool))
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        request: ProviderRequest,
    ) -> EngineResult<ProviderResponse> {
        ctx.check()?;
        Ok(ProviderResponse::text(Self::reply(&request)))
    }

    async fn stream(
        &self,
        ctx: &RequestContext,
        request: ProviderRequest,
    ) -> EngineResult<ProviderStream> {
        ctx.check()?;
        let chunks: Vec<EngineResult<StreamChunk>> = Self::reply(&request)
            .split_inclusive(' ')
            .map(|word| {
                Ok(StreamChunk {
                    content: word.to_string(),
                    tool_calls: Vec::new(),
                })
            })
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
