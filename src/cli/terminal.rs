use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::core::error::UiError;
use crate::core::ui::{ChatId, ChatUi, MessageId};

/// Only the most recent messages stay editable; older ones are forgotten.
const EDITABLE_MESSAGES: i64 = 8;

/// Renders chat messages on stdout. Edits that extend the previous content
/// print only the new suffix, so a streaming reply reads naturally.
pub struct TerminalUi {
    next_id: AtomicI64,
    rendered: Mutex<HashMap<MessageId, String>>,
    image_dir: PathBuf,
}

impl TerminalUi {
    pub fn new(image_dir: PathBuf) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            rendered: Mutex::new(HashMap::new()),
            image_dir,
        }
    }

    #[cfg(test)]
    pub fn editable_count(&self) -> usize {
        self.rendered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn write(&self, text: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()
    }
}

#[async_trait]
impl ChatUi for TerminalUi {
    async fn send_message(&self, _chat: ChatId, content: &str) -> Result<MessageId, UiError> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.write(&format!("\n\x1b[36m{content}\x1b[0m"))
            .map_err(|e| UiError::Send(e.to_string()))?;
        let mut rendered = self.rendered.lock().unwrap_or_else(PoisonError::into_inner);
        rendered.insert(id, content.to_string());
        rendered.retain(|kept, _| id.0 - kept.0 < EDITABLE_MESSAGES);
        Ok(id)
    }

    async fn edit_message(
        &self,
        _chat: ChatId,
        message_id: MessageId,
        content: &str,
    ) -> Result<(), UiError> {
        let mut rendered = self.rendered.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = rendered.get(&message_id).ok_or_else(|| UiError::Edit {
            message_id,
            reason: "unknown message".into(),
        })?;

        let output = if let Some(suffix) = content.strip_prefix(previous.as_str()) {
            format!("\x1b[36m{suffix}\x1b[0m")
        } else if !previous.contains('\n') {
            format!("\r\x1b[2K\x1b[36m{content}\x1b[0m")
        } else {
            format!("\n\x1b[36m{content}\x1b[0m")
        };
        self.write(&output).map_err(|e| UiError::Edit {
            message_id,
            reason: e.to_string(),
        })?;
        rendered.insert(message_id, content.to_string());
        Ok(())
    }

    async fn send_image(&self, _chat: ChatId, media_type: &str, data: &[u8]) -> Result<(), UiError> {
        let extension = media_type.rsplit('/').next().unwrap_or("png");
        let path = self
            .image_dir
            .join(format!("{}.{extension}", uuid::Uuid::new_v4()));

        tokio::fs::create_dir_all(&self.image_dir)
            .await
            .map_err(|e| UiError::Image(e.to_string()))?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| UiError::Image(e.to_string()))?;

        self.write(&format!("\n\x1b[33m[image saved to {}]\x1b[0m", path.display()))
            .map_err(|e| UiError::Image(e.to_string()))
    }
}
