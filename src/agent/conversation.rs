//! Conversation logs for agents

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::memory::{Memory, SimpleMemory};
use super::types::{AgentId, ChatMessage, ConversationId, MessageId, Role, ToolCall, ToolResult};
use super::{Agent, DEFAULT_MEMORY_SIZE};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::{unix_timestamp, unix_timestamp_millis};

/// User rating attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// 1 to 5
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    pub submitted_at: u64,
}

/// One entry of a conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

/// A conversation between a user and one agent
#[derive(Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub agent_id: AgentId,
    pub title: String,
    pub created_at: u64,
    pub updated_at: u64,
    memory: Arc<dyn Memory>,
    agent: Arc<Agent>,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("agent_id", &self.agent_id)
            .field("title", &self.title)
            .finish()
    }
}

impl Conversation {
    pub fn memory(&self) -> Arc<dyn Memory> {
        Arc::clone(&self.memory)
    }

    pub fn agent(&self) -> Arc<Agent> {
        Arc::clone(&self.agent)
    }
}

#[derive(Default)]
struct ConversationState {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

/// Owns every conversation and its message log.
///
/// A single lock guards both maps, so a message append and its memory
/// write are observed together.
pub struct ConversationManager {
    state: RwLock<ConversationState>,
    memory_size: usize,
}

impl Default for ConversationManager {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

impl ConversationManager {
    /// `memory_size` bounds each conversation's memory
    pub fn new(memory_size: usize) -> Self {
        Self {
            state: RwLock::new(ConversationState::default()),
            memory_size,
        }
    }

    pub fn create_conversation(&self, agent: Arc<Agent>, title: &str) -> Conversation {
        let now = unix_timestamp();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent.id().to_string(),
            title: if title.trim().is_empty() {
                "New conversation".to_string()
            } else {
                title.to_string()
            },
            created_at: now,
            updated_at: now,
            memory: Arc::new(SimpleMemory::new(self.memory_size)),
            agent,
        };

        let mut state = self.state.write();
        state
            .messages
            .insert(conversation.id.clone(), Vec::new());
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        info!(conversation_id = %conversation.id, agent_id = %conversation.agent_id, "Created conversation");
        conversation
    }

    pub fn get_conversation(&self, id: &str) -> EngineResult<Conversation> {
        self.state
            .read()
            .conversations
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::ConversationNotFound(id.to_string()))
    }

    /// Conversations of one agent, oldest first
    pub fn list_conversations(&self, agent_id: &str) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = self
            .state
            .read()
            .conversations
            .values()
            .filter(|c| c.agent_id == agent_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        conversations
    }

    pub fn delete_conversation(&self, id: &str) -> EngineResult<()> {
        let mut state = self.state.write();
        if state.conversations.remove(id).is_none() {
            return Err(EngineError::ConversationNotFound(id.to_string()));
        }
        state.messages.remove(id);
        debug!(conversation_id = %id, "Deleted conversation");
        Ok(())
    }

    pub fn add_message(&self, conversation_id: &str, role: Role, content: &str) -> EngineResult<Message> {
        self.append(conversation_id, role, content, Vec::new(), Vec::new())
    }

    fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        tool_calls: Vec<ToolCall>,
        tool_results: Vec<ToolResult>,
    ) -> EngineResult<Message> {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            tool_calls,
            tool_results,
            created_at: unix_timestamp_millis(),
            feedback: None,
        };

        let mut guard = self.state.write();
        let state = &mut *guard;
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| EngineError::ConversationNotFound(conversation_id.to_string()))?;

        let mut memory_message = ChatMessage::new(role, content);
        memory_message.tool_calls = message.tool_calls.clone();
        conversation.memory.add_message(memory_message)?;
        conversation.updated_at = unix_timestamp();

        state
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    pub fn get_messages(&self, conversation_id: &str) -> EngineResult<Vec<Message>> {
        let state = self.state.read();
        if !state.conversations.contains_key(conversation_id) {
            return Err(EngineError::ConversationNotFound(conversation_id.to_string()));
        }
        Ok(state
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Log the user message, run the agent, and log its reply with the
    /// tool calls made along the way.
    ///
    /// If the agent fails the user message stays logged and the error is
    /// returned.
    pub async fn send_message(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
        content: &str,
    ) -> EngineResult<Message> {
        let agent = self.get_conversation(conversation_id)?.agent();
        self.add_message(conversation_id, Role::User, content)?;

        let outcome = agent.chat_detailed(ctx, content).await?;
        self.append(
            conversation_id,
            Role::Assistant,
            &outcome.content,
            outcome.tool_calls,
            outcome.tool_results,
        )
    }

    pub fn add_feedback(
        &self,
        conversation_id: &str,
        message_id: &str,
        rating: u8,
        comment: &str,
    ) -> EngineResult<()> {
        if !(1..=5).contains(&rating) {
            return Err(EngineError::InvalidInput(
                "rating must be between 1 and 5".to_string(),
            ));
        }

        let mut state = self.state.write();
        if !state.conversations.contains_key(conversation_id) {
            return Err(EngineError::ConversationNotFound(conversation_id.to_string()));
        }
        let message = state
            .messages
            .get_mut(conversation_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| EngineError::MessageNotFound(message_id.to_string()))?;
        message.feedback = Some(Feedback {
            rating,
            comment: comment.to_string(),
            submitted_at: unix_timestamp(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::provider::{EchoProvider, ProviderResponse, ScriptedProvider};

    fn echo_agent() -> Arc<Agent> {
        let mut agent = Agent::new(AgentConfig::new("echoer", "echo-1", "echo")).unwrap();
        agent.attach_provider(Arc::new(EchoProvider::new()));
        Arc::new(agent)
    }

    #[test]
    fn test_create_list_delete() {
        let manager = ConversationManager::default();
        let agent = echo_agent();
        let first = manager.create_conversation(Arc::clone(&agent), "first");
        let second = manager.create_conversation(Arc::clone(&agent), "");
        assert_eq!(second.title, "New conversation");

        assert_eq!(manager.list_conversations(agent.id()).len(), 2);
        assert!(manager.list_conversations("someone-else").is_empty());

        manager.delete_conversation(&first.id).unwrap();
        assert!(matches!(
            manager.get_conversation(&first.id),
            Err(EngineError::ConversationNotFound(_))
        ));
        assert!(manager.delete_conversation(&first.id).is_err());
        assert!(manager.get_messages(&first.id).is_err());
    }

    #[test]
    fn test_add_message_mirrors_memory() {
        let manager = ConversationManager::default();
        let conversation = manager.create_conversation(echo_agent(), "t");
        manager
            .add_message(&conversation.id, Role::User, "hello")
            .unwrap();

        let messages = manager.get_messages(&conversation.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(conversation.memory().messages().unwrap().len(), 1);

        assert!(manager.add_message("missing", Role::User, "x").is_err());
    }

    #[tokio::test]
    async fn test_send_message_logs_both_sides() {
        let manager = ConversationManager::default();
        let conversation = manager.create_conversation(echo_agent(), "chat");
        let reply = manager
            .send_message(&RequestContext::new(), &conversation.id, "ping")
            .await
            .unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "ping");

        let log = manager.get_messages(&conversation.id).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_send_message_failure_keeps_user_message() {
        let mut agent = Agent::new(AgentConfig::new("a", "m", "scripted")).unwrap();
        agent.attach_provider(Arc::new(ScriptedProvider::replies(Vec::<ProviderResponse>::new())));
        let manager = ConversationManager::default();
        let conversation = manager.create_conversation(Arc::new(agent), "t");

        assert!(manager
            .send_message(&RequestContext::new(), &conversation.id, "hi")
            .await
            .is_err());
        assert_eq!(manager.get_messages(&conversation.id).unwrap().len(), 1);
    }

    #[test]
    fn test_feedback_bounds() {
        let manager = ConversationManager::default();
        let conversation = manager.create_conversation(echo_agent(), "t");
        let message = manager
            .add_message(&conversation.id, Role::Assistant, "answer")
            .unwrap();

        for bad in [0u8, 6] {
            let err = manager
                .add_feedback(&conversation.id, &message.id, bad, "")
                .unwrap_err();
            assert_eq!(err.to_string(), "Invalid input: rating must be between 1 and 5");
        }
        assert!(matches!(
            manager.add_feedback(&conversation.id, "nope", 3, ""),
            Err(EngineError::MessageNotFound(_))
        ));

        manager
            .add_feedback(&conversation.id, &message.id, 5, "great")
            .unwrap();
        let stored = &manager.get_messages(&conversation.id).unwrap()[0];
        assert_eq!(stored.feedback.as_ref().map(|f| f.rating), Some(5));
    }
}
