use async_trait::async_trait;
use bytes::Bytes;
use std::pin::Pin;

use crate::core::error::ProviderError;
use crate::core::message::Message;

/// Raw response body of an opened completion stream.
pub type ByteStream = Pin<Box<dyn futures_core::Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Everything needed to ask the backend for the next reply.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a streaming completion. Retries happen here, before the first
    /// byte; once the stream is returned it is never restarted.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ProviderError>;

    /// Total cost reported for a finished generation.
    async fn generation_cost(&self, generation_id: &str) -> Result<f64, ProviderError>;
}
