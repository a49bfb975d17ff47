//! Turning a completion byte stream into a live-updated reply.

pub mod accumulator;
pub mod frame;
pub mod loading;
pub mod presenter;
pub mod splitter;

#[cfg(test)]
mod tests;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::error::ProviderError;
use crate::core::provider::ByteStream;

pub use accumulator::{DecodedImage, InProgressMessage};
pub use frame::{event_payloads, Frame, FrameDecoder};
pub use loading::LoadingIndicator;
pub use presenter::{LivePresenter, ThrottleGate, ThrottlePolicy};
pub use splitter::split_chunks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Sentinel received or the body closed cleanly.
    Completed,
    /// The stream handle was cancelled; the message holds what arrived.
    Cancelled,
}

#[derive(Debug)]
pub struct StreamOutcome {
    pub message: InProgressMessage,
    pub termination: Termination,
}

/// Drives one reply: parses frames, accumulates deltas and feeds the
/// presenter, strictly in arrival order. Does not finalize.
///
/// Cancelling `cancel` drops the byte source and returns the partial message.
pub async fn relay_stream(
    source: ByteStream,
    presenter: &mut LivePresenter,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, ProviderError> {
    let mut events = event_payloads(source);
    let mut message = InProgressMessage::new();
    let mut frames = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(frames, chars = message.text.len(), "Stream cancelled");
                return Ok(StreamOutcome {
                    message,
                    termination: Termination::Cancelled,
                });
            }
            next = events.next() => next,
        };

        match next {
            None => break,
            Some(Err(e)) => {
                tracing::error!(error = %e, frames, "Reading completion stream failed");
                return Err(e);
            }
            Some(Ok(payload)) => {
                frames += 1;
                tracing::debug!(frame = frames, "Stream frame");
                let applied = message.apply(&payload);
                for image in &applied.images {
                    presenter.push_image(image).await;
                }
                if applied.changed {
                    presenter.update(&message.text).await;
                }
            }
        }
    }

    tracing::debug!(
        frames,
        chars = message.text.len(),
        images = message.images.len(),
        "Stream completed"
    );
    Ok(StreamOutcome {
        message,
        termination: Termination::Completed,
    })
}
