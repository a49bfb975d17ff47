use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::error::UiError;
use crate::core::ui::{MessageId, UiChannel};

const FRAMES: [&str; 3] = [".", "..", "..."];

/// Animated placeholder shown until the reply stream opens.
///
/// The placeholder message is owned by the animation task until
/// [`LoadingIndicator::handoff`] returns, after which nothing but the caller
/// writes to it.
pub struct LoadingIndicator {
    message_id: MessageId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LoadingIndicator {
    /// Sends the placeholder and starts animating it.
    pub async fn start(channel: UiChannel, text: &str, interval: Duration) -> Result<Self, UiError> {
        let message_id = channel.send(text).await?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(animate(
            channel,
            message_id,
            text.to_string(),
            interval,
            cancel.clone(),
        ));

        Ok(Self {
            message_id,
            cancel,
            task: Some(task),
        })
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Asks the animation to stop at its next tick. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops the animation and waits for it, so the placeholder can be
    /// edited by the caller without racing a pending tick.
    pub async fn handoff(mut self) -> MessageId {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Loading animation task failed");
            }
        }
        self.message_id
    }
}

impl Drop for LoadingIndicator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn animate(
    channel: UiChannel,
    message_id: MessageId,
    text: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut frame = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let content = format!("{text}{}", FRAMES[frame]);
        if let Err(e) = channel.edit(message_id, &content).await {
            tracing::warn!(error = %e, %message_id, "Failed to update loading message");
        }
        frame = (frame + 1) % FRAMES.len();
    }
    tracing::debug!(%message_id, "Loading animation stopped");
}
