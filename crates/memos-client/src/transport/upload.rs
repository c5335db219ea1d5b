//! Streamed multipart uploads.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::Stream;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ValidationError;
use crate::{Error, Result};

const UPLOAD_SUBJECT: &str = "attachment upload";

/// Where upload bytes come from. Both variants can be reopened, so an upload
/// rejected with 401 is sent again from the start.
#[derive(Debug, Clone)]
pub enum UploadSource {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

/// A file to upload as a new attachment.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    source: UploadSource,
    filename: String,
    mime_type: String,
}

impl AttachmentUpload {
    /// Upload a local file. Filename and MIME type come from the path.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ValidationError::single(
                    UPLOAD_SUBJECT,
                    "path",
                    format!("'{}' has no usable file name", path.display()),
                )
            })?;
        let mime_type = guess_mime_type(&filename);
        Ok(Self {
            source: UploadSource::File(path),
            filename,
            mime_type,
        })
    }

    /// Upload bytes already in memory.
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let filename = filename.into();
        let mime_type = guess_mime_type(&filename);
        Self {
            source: UploadSource::Memory(bytes.into()),
            filename,
            mime_type,
        }
    }

    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    #[must_use]
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub const fn source(&self) -> &UploadSource {
        &self.source
    }

    /// Check what can be checked without touching the file.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut errors = ValidationError::new(UPLOAD_SUBJECT);
        let filename = self.filename.trim();
        if filename.is_empty() {
            errors.push("filename", "must not be empty");
        } else if filename.contains(['/', '\\']) {
            errors.push("filename", "must not contain path separators");
        }
        if !self.mime_type.contains('/') {
            errors.push(
                "mime_type",
                format!("'{}' is not a MIME type", self.mime_type),
            );
        }
        errors.into_result()
    }

    /// Build a fresh multipart form that streams the payload in
    /// `chunk_size` chunks.
    pub(crate) async fn to_form(&self, chunk_size: usize, max_upload_size: u64) -> Result<Form> {
        let (body, length) = match &self.source {
            UploadSource::File(path) => {
                let length = file_length(path).await?;
                check_size(length, max_upload_size)?;
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|error| Error::io("upload_attachment", error))?;
                (Body::wrap_stream(chunk_stream(file, chunk_size)), length)
            }
            UploadSource::Memory(bytes) => {
                let length = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
                check_size(length, max_upload_size)?;
                let reader = Cursor::new(Arc::clone(bytes));
                (Body::wrap_stream(chunk_stream(reader, chunk_size)), length)
            }
        };

        let part = Part::stream_with_length(body, length)
            .file_name(self.filename.clone())
            .mime_str(&self.mime_type)
            .map_err(|error| {
                ValidationError::single(UPLOAD_SUBJECT, "mime_type", error.to_string())
            })?;

        Ok(Form::new()
            .text("filename", self.filename.clone())
            .text("type", self.mime_type.clone())
            .part("file", part))
    }
}

async fn file_length(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|error| Error::io("upload_attachment", error))?;
    if !metadata.is_file() {
        return Err(ValidationError::single(
            UPLOAD_SUBJECT,
            "path",
            format!("'{}' is not a regular file", path.display()),
        )
        .into());
    }
    Ok(metadata.len())
}

fn check_size(length: u64, max_upload_size: u64) -> Result<()> {
    if length > max_upload_size {
        return Err(ValidationError::single(
            UPLOAD_SUBJECT,
            "size",
            format!("{length} bytes exceeds the {max_upload_size} byte upload limit"),
        )
        .into());
    }
    Ok(())
}

fn guess_mime_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Read `reader` in chunks of at most `chunk_size` bytes. Only the chunk
/// being yielded is held in memory.
pub fn chunk_stream<R>(
    reader: R,
    chunk_size: usize,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static
where
    R: AsyncRead + Unpin + Send + 'static,
{
    futures::stream::try_unfold(reader, move |mut reader| async move {
        let mut chunk = vec![0_u8; chunk_size];
        let mut filled = 0;
        while filled < chunk_size {
            let read = reader.read(&mut chunk[filled..]).await?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);
        Ok(Some((chunk, reader)))
    })
}
