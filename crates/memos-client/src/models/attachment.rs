//! Attachment model

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::error::ValidationError;

use super::names::{AttachmentName, MemoName};
use super::{timestamp_to_wire, FieldReader, WireModel};

/// Attachment metadata. The binary payload is never held here; it is
/// streamed through the transport on upload and download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Resource name, `attachments/{id}`
    pub name: AttachmentName,
    pub create_time: DateTime<Utc>,
    /// Original file name
    pub filename: String,
    /// Content MIME type
    pub mime_type: String,
    /// Attachment size in bytes
    pub size_bytes: i64,
    /// Link when the file is hosted outside the server
    pub external_link: Option<String>,
    /// Memo this attachment is linked to, by name only.
    pub memo: Option<MemoName>,
}

impl Attachment {
    /// Path segment used by the file endpoint: `/file/attachments/{id}/{filename}`.
    #[must_use]
    pub fn file_path(&self) -> String {
        format!(
            "/file/{}/{}",
            self.name,
            urlencoding::encode(&self.filename)
        )
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Lowercased file extension, or empty when the name has none.
    #[must_use]
    pub fn extension(&self) -> String {
        self.filename
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_lowercase())
            .unwrap_or_default()
    }
}

impl WireModel for Attachment {
    const KIND: &'static str = "attachment";

    fn from_wire(value: &Value) -> Result<Self, ValidationError> {
        let mut reader = FieldReader::new(Self::KIND, value)?;

        let name = reader.required_with("name", "name", AttachmentName::parse_strict);
        let create_time = reader.required_timestamp("createTime", "create_time");
        let filename = reader.required_with("filename", "filename", |raw| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Err("filename must not be empty".to_string())
            } else {
                Ok(trimmed.to_string())
            }
        });
        let mime_type = reader.required_with("type", "type", |raw| {
            if raw.contains('/') {
                Ok(raw.to_string())
            } else {
                Err(format!("'{raw}' is not a MIME type"))
            }
        });
        let size_bytes = reader.int64_or_default("size", "size");
        if let Some(size) = size_bytes.filter(|size| *size < 0) {
            reader.violation("size", format!("size must be non-negative, found {size}"));
        }
        let external_link = reader.optional_string("externalLink", "external_link");
        let memo = reader.optional_with("memo", "memo", MemoName::parse_strict);

        match (name, create_time, filename, mime_type, size_bytes, memo) {
            (Some(name), Some(create_time), Some(filename), Some(mime_type), Some(size_bytes), Ok(memo))
                if reader.is_clean() =>
            {
                Ok(Self {
                    name,
                    create_time,
                    filename,
                    mime_type,
                    size_bytes,
                    external_link,
                    memo,
                })
            }
            _ => Err(reader.into_error()),
        }
    }

    fn to_wire(&self) -> Value {
        let mut object = Map::new();
        object.insert("name".to_string(), json!(self.name));
        object.insert("createTime".to_string(), timestamp_to_wire(&self.create_time));
        object.insert("filename".to_string(), json!(self.filename));
        object.insert("type".to_string(), json!(self.mime_type));
        object.insert("size".to_string(), json!(self.size_bytes.to_string()));
        if let Some(external_link) = &self.external_link {
            object.insert("externalLink".to_string(), json!(external_link));
        }
        if let Some(memo) = &self.memo {
            object.insert("memo".to_string(), json!(memo));
        }
        Value::Object(object)
    }
}
