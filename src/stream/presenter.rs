use std::time::Duration;
use tokio::time::Instant;

use crate::core::config::StreamConfig;
use crate::core::ui::{MessageId, UiChannel};
use crate::stream::accumulator::DecodedImage;
use crate::stream::splitter::{split_chunks, tail_preview};

/// Minimum spacing between live edits. The interval relaxes once the reply
/// contains a full paragraph.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    pub initial_interval: Duration,
    pub settled_interval: Duration,
}

impl ThrottlePolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            settled_interval: interval,
        }
    }

    pub fn interval_for(&self, text: &str) -> Duration {
        if text.contains("\n\n") {
            self.settled_interval
        } else {
            self.initial_interval
        }
    }
}

impl From<&StreamConfig> for ThrottlePolicy {
    fn from(config: &StreamConfig) -> Self {
        Self {
            initial_interval: config.edit_interval(),
            settled_interval: config.settled_edit_interval(),
        }
    }
}

/// Tracks what was last shown and when.
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    policy: ThrottlePolicy,
    last_pushed_text: String,
    last_push: Option<Instant>,
}

impl ThrottleGate {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            last_pushed_text: String::new(),
            last_push: None,
        }
    }

    pub fn should_push(&self, text: &str, now: Instant) -> bool {
        if text.is_empty() || text == self.last_pushed_text {
            return false;
        }
        match self.last_push {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.policy.interval_for(text),
        }
    }

    pub fn mark_pushed(&mut self, text: &str, now: Instant) {
        self.last_pushed_text.clear();
        self.last_pushed_text.push_str(text);
        self.last_push = Some(now);
    }

    pub fn last_pushed_text(&self) -> &str {
        &self.last_pushed_text
    }
}

/// Owns the live message while a reply streams in.
pub struct LivePresenter {
    channel: UiChannel,
    message_id: MessageId,
    gate: ThrottleGate,
    limit: usize,
    pushes: usize,
}

impl LivePresenter {
    pub fn new(channel: UiChannel, message_id: MessageId, policy: ThrottlePolicy, limit: usize) -> Self {
        Self {
            channel,
            message_id,
            gate: ThrottleGate::new(policy),
            limit: limit.max(1),
            pushes: 0,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Intermediate edits issued so far.
    pub fn push_count(&self) -> usize {
        self.pushes
    }

    /// Edits the live message if the gate allows it. A failed edit still
    /// counts as pushed; the next update carries the newer text anyway.
    pub async fn update(&mut self, text: &str) -> bool {
        let now = Instant::now();
        if !self.gate.should_push(text, now) {
            return false;
        }
        self.gate.mark_pushed(text, now);
        self.pushes += 1;

        let preview = tail_preview(text, self.limit);
        if let Err(e) = self.channel.edit(self.message_id, &preview).await {
            tracing::warn!(error = %e, message_id = %self.message_id, "Live edit failed");
        }
        true
    }

    /// Images skip the throttle and go out as their own messages.
    pub async fn push_image(&self, image: &DecodedImage) {
        if let Err(e) = self.channel.send_image(&image.media_type, &image.data).await {
            tracing::warn!(error = %e, bytes = image.data.len(), "Image delivery failed");
        }
    }

    /// Final, unconditional render. The first chunk replaces the live
    /// message; the rest follow as new messages. Empty text is replaced by
    /// `placeholder`.
    pub async fn finalize(self, text: &str, placeholder: &str) -> Vec<MessageId> {
        let content = if text.is_empty() { placeholder } else { text };
        let mut delivered = Vec::new();

        for (index, chunk) in split_chunks(content, self.limit).into_iter().enumerate() {
            if index == 0 {
                match self.channel.edit(self.message_id, &chunk).await {
                    Ok(()) => delivered.push(self.message_id),
                    Err(e) => tracing::warn!(error = %e, "Final edit failed"),
                }
            } else {
                match self.channel.send(&chunk).await {
                    Ok(id) => delivered.push(id),
                    Err(e) => tracing::warn!(error = %e, chunk = index, "Sending continuation failed"),
                }
            }
        }

        delivered
    }

    /// Replaces the live message with an error notice.
    pub async fn fail(self, notice: &str) {
        if let Err(e) = self.channel.edit(self.message_id, notice).await {
            tracing::warn!(error = %e, "Could not show error notice");
        }
    }
}
