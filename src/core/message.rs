use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl ContentPart {
    pub fn image(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        ContentPart::Image {
            media_type: media_type.into(),
            data,
        }
    }

    /// `data:<mime>;base64,<payload>` form used on the wire.
    pub fn data_uri(&self) -> Option<String> {
        match self {
            ContentPart::Image { media_type, data } => {
                Some(format!("data:{media_type};base64,{}", STANDARD.encode(data)))
            }
            ContentPart::Text { .. } => None,
        }
    }
}

/// A conversation entry. Holds at most one text part, followed by any images
/// in the order they were produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, text: String, images: Vec<ContentPart>) -> Self {
        let mut parts = Vec::with_capacity(images.len() + 1);
        if !text.is_empty() || images.is_empty() {
            parts.push(ContentPart::Text { text });
        }
        parts.extend(
            images
                .into_iter()
                .filter(|p| matches!(p, ContentPart::Image { .. })),
        );
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    pub fn new_user(text: String, images: Vec<ContentPart>) -> Self {
        Self::new(MessageRole::User, text, images)
    }

    pub fn new_assistant(text: String, images: Vec<ContentPart>) -> Self {
        Self::new(MessageRole::Assistant, text, images)
    }

    pub fn text_content(&self) -> &str {
        self.parts
            .iter()
            .find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or("")
    }

    pub fn images(&self) -> impl Iterator<Item = &ContentPart> {
        self.parts
            .iter()
            .filter(|p| matches!(p, ContentPart::Image { .. }))
    }

    pub fn has_images(&self) -> bool {
        self.images().next().is_some()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
