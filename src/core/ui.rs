use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core::error::UiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The remote chat surface replies are rendered into.
#[async_trait]
pub trait ChatUi: Send + Sync {
    async fn send_message(&self, chat: ChatId, content: &str) -> Result<MessageId, UiError>;

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        content: &str,
    ) -> Result<(), UiError>;

    async fn send_image(&self, chat: ChatId, media_type: &str, data: &[u8]) -> Result<(), UiError>;
}

/// A [`ChatUi`] bound to one conversation.
#[derive(Clone)]
pub struct UiChannel {
    ui: Arc<dyn ChatUi>,
    chat: ChatId,
}

impl UiChannel {
    pub fn new(ui: Arc<dyn ChatUi>, chat: ChatId) -> Self {
        Self { ui, chat }
    }

    pub fn chat(&self) -> ChatId {
        self.chat
    }

    pub async fn send(&self, content: &str) -> Result<MessageId, UiError> {
        self.ui.send_message(self.chat, content).await
    }

    pub async fn edit(&self, message_id: MessageId, content: &str) -> Result<(), UiError> {
        self.ui.edit_message(self.chat, message_id, content).await
    }

    pub async fn send_image(&self, media_type: &str, data: &[u8]) -> Result<(), UiError> {
        self.ui.send_image(self.chat, media_type, data).await
    }
}
