//! Messages exchanged with models, and the file payloads they may embed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::tool_call::{ToolCallRequest, ToolCallResult};
use crate::error::{Error, Result};

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message: a role plus an ordered list of content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
}

impl Message {
    /// Build a message with a single text part.
    pub fn with_text(role: Role, text: impl Into<String>) -> Self {
        Message {
            role,
            content: vec![MessageContent::text(text)],
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Iterate over the file parts of the message.
    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.content.iter().filter_map(|c| c.file.as_ref())
    }

    /// Mutable iteration over file parts, used when swapping data for
    /// storage urls.
    pub fn files_mut(&mut self) -> impl Iterator<Item = &mut File> {
        self.content.iter_mut().filter_map(|c| c.file.as_mut())
    }
}

/// One content part. Exactly one of the fields is expected to be set;
/// the struct-of-options shape matches the wire format.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Structured output object, present on assistant messages produced
    /// against an output schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<File>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_request: Option<ToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_result: Option<ToolCallResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn object(object: Value) -> Self {
        MessageContent {
            object: Some(object),
            ..Default::default()
        }
    }

    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        MessageContent {
            reasoning: Some(reasoning.into()),
            ..Default::default()
        }
    }

    pub fn tool_call_request(request: ToolCallRequest) -> Self {
        MessageContent {
            tool_call_request: Some(request),
            ..Default::default()
        }
    }
}

/// A file payload referenced by a message: either a remote url or inline
/// base64 data. `storage_url` is filled once the payload has been persisted
/// to the blob store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct File {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
}

impl File {
    /// Validate the file reference and normalize `data:` urls into the
    /// `data` + `content_type` fields.
    pub fn normalized(mut self) -> Result<File> {
        if let Some(url) = self.url.clone() {
            if let Some(rest) = url.strip_prefix("data:") {
                let (media, payload) = rest
                    .split_once(";base64,")
                    .ok_or_else(|| Error::InvalidFile("data url is not base64 encoded".into()))?;
                self.content_type = Some(media.to_string());
                self.data = Some(payload.to_string());
                self.url = None;
            } else if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::InvalidFile(format!("unsupported file url: {url}")));
            }
        }
        if self.url.is_none() && self.data.is_none() {
            return Err(Error::InvalidFile("file has neither url nor data".into()));
        }
        if let Some(data) = &self.data {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|_| Error::InvalidFile("file data is not valid base64".into()))?;
        }
        Ok(self)
    }

    /// Whether the content type denotes an image.
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }

    /// Guess a content type from leading magic bytes.
    pub fn sniff_content_type(data: &[u8]) -> Option<&'static str> {
        const SIGNATURES: &[(&[u8], &str)] = &[
            (b"\xff\xd8\xff", "image/jpeg"),
            (b"\x89PNG\r\n\x1a\n", "image/png"),
            (b"GIF87a", "image/gif"),
            (b"GIF89a", "image/gif"),
            (b"%PDF", "application/pdf"),
            (b"ID3", "audio/mpeg"),
            (b"\xff\xfb", "audio/mpeg"),
        ];
        for (sig, mime) in SIGNATURES {
            if data.starts_with(sig) {
                return Some(mime);
            }
        }
        if data.starts_with(b"RIFF") && data.len() >= 12 {
            if &data[8..12] == b"WEBP" {
                return Some("image/webp");
            }
            if &data[8..12] == b"WAVE" {
                return Some("audio/wav");
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_is_normalized() {
        let file = File {
            url: Some("data:image/png;base64,aGVsbG8=".into()),
            ..Default::default()
        };
        let file = file.normalized().unwrap();
        assert_eq!(file.content_type.as_deref(), Some("image/png"));
        assert_eq!(file.data.as_deref(), Some("aGVsbG8="));
        assert!(file.url.is_none());
        assert!(file.is_image());
    }

    #[test]
    fn non_http_url_is_rejected() {
        let file = File {
            url: Some("file:///etc/passwd".into()),
            ..Default::default()
        };
        assert!(matches!(file.normalized(), Err(Error::InvalidFile(_))));
    }

    #[test]
    fn sniffing_recognizes_common_formats() {
        assert_eq!(
            File::sniff_content_type(b"\x89PNG\r\n\x1a\nrest"),
            Some("image/png")
        );
        assert_eq!(File::sniff_content_type(b"%PDF-1.7"), Some("application/pdf"));
        assert_eq!(File::sniff_content_type(b"RIFFxxxxWEBP"), Some("image/webp"));
        assert_eq!(File::sniff_content_type(b"plain text"), None);
    }
}
