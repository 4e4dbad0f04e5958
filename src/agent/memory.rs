//! Short-term conversational memory

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::types::{ChatMessage, Role};
use crate::error::EngineResult;

/// Message history an agent reads before each turn.
///
/// Implementations must be safe for concurrent use. The agent logs and
/// tolerates write failures; a failed read falls back to the current user
/// message alone.
pub trait Memory: Send + Sync {
    fn add_message(&self, message: ChatMessage) -> EngineResult<()>;

    /// Messages in insertion order
    fn messages(&self) -> EngineResult<Vec<ChatMessage>>;

    fn clear(&self) -> EngineResult<()>;
}

/// Bounded in-process history. Once `max_size` messages are held the
/// oldest is evicted; a `max_size` of 0 keeps everything.
#[derive(Debug)]
pub struct SimpleMemory {
    messages: Mutex<VecDeque<ChatMessage>>,
    max_size: usize,
}

impl SimpleMemory {
    pub fn new(max_size: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn last_user_message(&self) -> Option<ChatMessage> {
        self.last_with_role(Role::User)
    }

    pub fn last_assistant_message(&self) -> Option<ChatMessage> {
        self.last_with_role(Role::Assistant)
    }

    fn last_with_role(&self, role: Role) -> Option<ChatMessage> {
        self.messages
            .lock()
            .iter()
            .rev()
            .find(|m| m.role == role)
            .cloned()
    }
}

impl Default for SimpleMemory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Memory for SimpleMemory {
    fn add_message(&self, message: ChatMessage) -> EngineResult<()> {
        let mut messages = self.messages.lock();
        messages.push_back(message);
        if self.max_size > 0 {
            while messages.len() > self.max_size {
                messages.pop_front();
            }
        }
        Ok(())
    }

    fn messages(&self) -> EngineResult<Vec<ChatMessage>> {
        Ok(self.messages.lock().iter().cloned().collect())
    }

    fn clear(&self) -> EngineResult<()> {
        self.messages.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_eviction_keeps_newest() {
        let memory = SimpleMemory::new(3);
        for i in 0..5 {
            memory.add_message(ChatMessage::user(format!("m{}", i))).unwrap();
        }
        let contents: Vec<String> = memory
            .messages()
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_unbounded() {
        let memory = SimpleMemory::new(0);
        for i in 0..250 {
            memory.add_message(ChatMessage::user(i.to_string())).unwrap();
        }
        assert_eq!(memory.len(), 250);
    }

    #[test]
    fn test_last_by_role_and_clear() {
        let memory = SimpleMemory::default();
        memory.add_message(ChatMessage::user("q1")).unwrap();
        memory.add_message(ChatMessage::assistant("a1")).unwrap();
        memory.add_message(ChatMessage::user("q2")).unwrap();

        assert_eq!(memory.last_user_message().unwrap().content, "q2");
        assert_eq!(memory.last_assistant_message().unwrap().content, "a1");

        memory.clear().unwrap();
        assert!(memory.is_empty());
        assert!(memory.last_user_message().is_none());
    }

    #[test]
    fn test_concurrent_writers() {
        let memory = Arc::new(SimpleMemory::new(0));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let memory = Arc::clone(&memory);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        memory
                            .add_message(ChatMessage::user(format!("{}-{}", t, i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(memory.len(), 200);
    }
}
