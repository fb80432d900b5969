use crate::provider::{ChatMessage, Role};

/// Histories longer than this are trimmed before being sent.
const MAX_MESSAGES: usize = 20;
/// Recent messages kept, besides the system prompt, when trimming.
const KEEP_RECENT: usize = 18;
const PREVIEW_CHARS: usize = 100;

/// Conversation so far. The first message is always the system prompt.
#[derive(Debug, Clone)]
pub struct History {
    system_prompt: String,
    messages: Vec<ChatMessage>,
}

impl History {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        let messages = vec![ChatMessage::new(Role::System, system_prompt.clone())];
        Self {
            system_prompt,
            messages,
        }
    }

    pub fn reset(&mut self) {
        self.messages.truncate(1);
        self.messages[0] = ChatMessage::new(Role::System, self.system_prompt.clone());
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(Role::User, content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(Role::Assistant, content));
    }

    /// Drop the trailing user message after its request failed.
    pub fn pop_failed_user(&mut self) -> Option<ChatMessage> {
        match self.messages.last() {
            Some(m) if m.role == Role::User => self.messages.pop(),
            _ => None,
        }
    }

    /// Number of messages, excluding the system prompt.
    pub fn len(&self) -> usize {
        self.messages.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages to send: the system prompt plus a bounded tail.
    pub fn managed(&self) -> Vec<ChatMessage> {
        if self.messages.len() <= MAX_MESSAGES {
            return self.messages.clone();
        }
        let mut out = Vec::with_capacity(KEEP_RECENT + 1);
        out.push(self.messages[0].clone());
        out.extend_from_slice(&self.messages[self.messages.len() - KEEP_RECENT..]);
        out
    }

    /// Numbered one-line previews of every turn.
    pub fn previews(&self) -> Vec<(usize, Role, String)> {
        self.messages[1..]
            .iter()
            .enumerate()
            .map(|(i, m)| (i + 1, m.role, preview(&m.content)))
            .collect()
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
