//! `multipart/form-data` body parsing (C5 `file` parameter source).
//!
//! Parses an already-buffered [`Request`](crate::scope::Request) body with
//! `multer`, the same streaming multipart parser the teacher's dependency
//! stack already carries. Feeds [`resolver::resolve_file`](crate::resolver)
//! and friends; not exposed as its own extractor type.

use std::collections::HashMap;
use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream;

use crate::extract::UploadedFile;

/// Errors parsing a `multipart/form-data` body.
#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    #[error("content-type is not multipart/form-data")]
    NotMultipart,
    #[error("missing boundary in content-type")]
    MissingBoundary,
    #[error("multipart parse error: {0}")]
    Parse(#[from] multer::Error),
    #[error("missing required multipart field '{0}'")]
    MissingField(String),
    #[error("field '{field}' could not be parsed: {message}")]
    ParseError { field: String, message: String },
}

/// Build a typed value from an already-parsed [`MultipartFields`] set.
///
/// Implemented via `#[derive(FromMultipart)]`: each field is pulled out of
/// the shared [`MultipartFields`] map by its Rust field name (or a
/// `#[form(rename = "...")]` override), `Option<T>`/`Vec<UploadedFile>`
/// fields default to empty rather than erroring when absent.
pub trait FromMultipart: Sized {
    fn from_multipart(fields: &mut MultipartFields) -> Result<Self, MultipartError>;
}

/// All fields parsed out of one multipart body: text fields keep every
/// repeated value in submission order; file fields likewise.
#[derive(Debug, Default)]
pub struct MultipartFields {
    pub text: HashMap<String, Vec<String>>,
    pub files: HashMap<String, Vec<UploadedFile>>,
}

impl MultipartFields {
    pub fn take_text(&mut self, name: &str) -> Option<String> {
        self.text.get_mut(name).and_then(|v| (!v.is_empty()).then(|| v.remove(0)))
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.get_mut(name).and_then(|v| (!v.is_empty()).then(|| v.remove(0)))
    }

    pub fn take_files(&mut self, name: &str) -> Vec<UploadedFile> {
        self.files.remove(name).unwrap_or_default()
    }
}

/// Extract the `boundary=` parameter from a `content-type` header value.
fn boundary_from_content_type(content_type: &str) -> Result<String, MultipartError> {
    if !content_type.starts_with("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }
    multer::parse_boundary(content_type).map_err(|_| MultipartError::MissingBoundary)
}

/// Parse a complete multipart body in one shot. `body` must already be fully
/// buffered (per C4's Request invariant); `multer` is driven over a
/// single-chunk stream rather than incrementally off the wire.
pub async fn parse(content_type: &str, body: Bytes) -> Result<MultipartFields, MultipartError> {
    let boundary = boundary_from_content_type(content_type)?;
    let chunks = stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(chunks, boundary);

    let mut fields = MultipartFields::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(|m| m.to_string());

        if file_name.is_some() {
            let bytes = field.bytes().await?;
            fields.files.entry(name.clone()).or_default().push(UploadedFile {
                field_name: name,
                file_name,
                content_type,
                bytes,
            });
        } else {
            let text = field.text().await?;
            fields.text.entry(name).or_default().push(text);
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_with_one_field() -> Bytes {
        Bytes::from(
            "--X-BOUNDARY\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             hello\r\n\
             --X-BOUNDARY\r\n\
             Content-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\n\
             Content-Type: image/png\r\n\r\n\
             \x89PNG..\r\n\
             --X-BOUNDARY--\r\n"
                .to_string(),
        )
    }

    #[tokio::test]
    async fn parses_text_and_file_fields() {
        let mut fields = parse("multipart/form-data; boundary=X-BOUNDARY", body_with_one_field())
            .await
            .unwrap();
        assert_eq!(fields.take_text("title"), Some("hello".to_string()));
        let file = fields.take_file("avatar").unwrap();
        assert_eq!(file.file_name.as_deref(), Some("a.png"));
        assert_eq!(file.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn rejects_non_multipart_content_type() {
        let err = parse("application/json", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, MultipartError::NotMultipart));
    }
}
