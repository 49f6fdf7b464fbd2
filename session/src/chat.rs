use std::sync::Arc;
use watchparty_protocol::types::normalize_chat_text;
use watchparty_protocol::{ChatMessage, ChatSender, ClientCommand, Clock, ParticipantId};

use crate::error::SessionError;

/// Ordered chat history for the current room.
///
/// Messages we send are appended immediately; the hub's echo of them is
/// recognized by sender id and dropped.
pub struct ChatChannel {
    local: ChatSender,
    clock: Arc<dyn Clock>,
    messages: Vec<ChatMessage>,
}

impl ChatChannel {
    pub fn new(local_id: ParticipantId, display_name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            local: ChatSender { id: local_id, name: display_name.into() },
            clock,
            messages: Vec::new(),
        }
    }

    pub fn set_local_id(&mut self, id: ParticipantId) {
        self.local.id = id;
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Appends a local message and returns the command that publishes it.
    pub fn send(&mut self, text: &str) -> Result<ClientCommand, SessionError> {
        let text = normalize_chat_text(text)
            .ok_or_else(|| SessionError::InvalidValue("chat message is empty or too long".to_string()))?;
        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            sent_at: self.clock.now_ms(),
            sender: self.local.clone(),
        };
        let command = ClientCommand::ChatMessage {
            id: message.id.clone(),
            text: message.text.clone(),
            sent_at: message.sent_at,
        };
        self.messages.push(message);
        Ok(command)
    }

    /// Appends a relayed message in arrival order. Returns false for our own echo.
    pub fn receive(&mut self, message: ChatMessage) -> bool {
        if message.sender_id() == &self.local.id {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
