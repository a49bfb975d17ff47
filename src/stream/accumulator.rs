use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::core::message::ContentPart;

const DEFAULT_IMAGE_TYPE: &str = "image/png";

#[derive(Debug, Deserialize, Default)]
struct ChunkPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

/// Every field is optional so that one bad image entry or a non-string
/// content value never discards the rest of the frame.
#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<serde_json::Value>,
    #[serde(default)]
    images: Option<Vec<ImageDelta>>,
}

#[derive(Debug, Deserialize, Default)]
struct ImageDelta {
    #[serde(default)]
    image_url: Option<ImageUrl>,
}

#[derive(Debug, Deserialize, Default)]
struct ImageUrl {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub media_type: String,
    pub data: Vec<u8>,
}

impl From<DecodedImage> for ContentPart {
    fn from(image: DecodedImage) -> Self {
        ContentPart::image(image.media_type, image.data)
    }
}

/// What one payload contributed.
#[derive(Debug, Default)]
pub struct Applied {
    /// Text grew.
    pub changed: bool,
    /// Images decoded from this payload, in arrival order.
    pub images: Vec<DecodedImage>,
}

/// The reply being assembled from stream deltas. Text and images only grow.
#[derive(Debug, Clone, Default)]
pub struct InProgressMessage {
    pub text: String,
    pub images: Vec<DecodedImage>,
    /// Generation id reported by the backend, if any.
    pub generation_id: Option<String>,
    /// Cost reported inline by the backend, if any.
    pub reported_cost: Option<f64>,
}

impl InProgressMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.images.is_empty()
    }

    /// Folds one event payload into the message. A payload that does not
    /// parse leaves the message untouched.
    pub fn apply(&mut self, payload: &str) -> Applied {
        let chunk: ChunkPayload = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed stream frame");
                return Applied::default();
            }
        };

        if self.generation_id.is_none() {
            self.generation_id = chunk.id;
        }
        if let Some(cost) = chunk.usage.and_then(|u| u.cost) {
            self.reported_cost = Some(cost);
        }

        let mut applied = Applied::default();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return applied;
        };

        if let Some(text) = choice
            .delta
            .content
            .as_ref()
            .and_then(|c| c.as_str())
            .filter(|t| !t.is_empty())
        {
            self.text.push_str(text);
            applied.changed = true;
        }

        for image in choice.delta.images.into_iter().flatten() {
            let Some(url) = image
                .image_url
                .and_then(|u| u.url)
                .filter(|u| !u.is_empty())
            else {
                tracing::debug!("Skipping image delta without a url");
                continue;
            };
            match decode_data_uri(&url) {
                Ok(decoded) => {
                    self.images.push(decoded.clone());
                    applied.images.push(decoded);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable image delta");
                }
            }
        }

        applied
    }

    pub fn image_parts(&self) -> Vec<ContentPart> {
        self.images.iter().cloned().map(ContentPart::from).collect()
    }
}

/// Decodes `data:<mime>;base64,<payload>`. Everything up to the first comma
/// is treated as the scheme prefix.
pub fn decode_data_uri(uri: &str) -> Result<DecodedImage, base64::DecodeError> {
    let (prefix, encoded) = match uri.find(',') {
        Some(i) => (&uri[..i], &uri[i + 1..]),
        None => ("", uri),
    };
    let data = STANDARD.decode(encoded.trim())?;
    let media_type = prefix
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .filter(|mime| !mime.is_empty())
        .unwrap_or(DEFAULT_IMAGE_TYPE)
        .to_string();
    Ok(DecodedImage { media_type, data })
}
