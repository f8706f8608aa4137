//! Multipart upload handling
//!
//! Single-file multipart forms, 10 MB cap. Files land under the uploads
//! root in a per-resource subdirectory with collision-proof names; the
//! stored URL path is what the static file route serves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use multer::{Constraints, Multipart, SizeLimit};
use rand::Rng;
use tracing::warn;

use crate::types::AppError;

/// Upload size cap in bytes
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// What a given endpoint accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    ConcernImage,
    PolicyDocument,
}

impl UploadKind {
    fn subdir(&self) -> &'static str {
        match self {
            UploadKind::ConcernImage => "concerns",
            UploadKind::PolicyDocument => "policies",
        }
    }

    fn allowed_types(&self) -> &'static [&'static str] {
        match self {
            UploadKind::ConcernImage => &["jpeg", "jpg", "png"],
            UploadKind::PolicyDocument => &["jpeg", "jpg", "png", "pdf"],
        }
    }

    /// Both the extension and the declared MIME type must match
    fn allows(&self, ext: &str, mime: &str) -> bool {
        let types = self.allowed_types();
        types.contains(&ext) && types.iter().any(|t| mime.contains(t))
    }

    fn rejection_message(&self) -> &'static str {
        match self {
            UploadKind::ConcernImage => "Only image files (jpeg, jpg, png) are allowed!",
            UploadKind::PolicyDocument => "Only images and PDF files are allowed!",
        }
    }
}

/// A file written to disk by a multipart request
#[derive(Debug, Clone)]
pub struct SavedFile {
    /// Public path, e.g. "/uploads/concerns/image-...-...png"
    pub url_path: String,

    /// Location on disk
    pub absolute_path: PathBuf,
}

/// Text fields plus the optional file from one multipart form
#[derive(Debug, Default)]
pub struct ParsedForm {
    pub fields: HashMap<String, String>,
    pub file: Option<SavedFile>,
}

impl ParsedForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }
}

/// Filesystem root the uploads live under
#[derive(Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the per-resource subdirectories up front
    pub async fn ensure_dirs(&self) -> Result<(), AppError> {
        for subdir in ["concerns", "policies"] {
            tokio::fs::create_dir_all(self.root.join(subdir)).await?;
        }
        Ok(())
    }

    /// Parse a multipart body, storing at most one file.
    ///
    /// Text fields are collected as UTF-8 strings. A file part is
    /// validated against the kind's extension and MIME allow-list
    /// before anything touches the disk.
    pub async fn parse_form(
        &self,
        kind: UploadKind,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<ParsedForm, AppError> {
        let boundary = content_type
            .and_then(|ct| multer::parse_boundary(ct).ok())
            .ok_or_else(|| {
                AppError::Validation("Expected a multipart/form-data body".to_string())
            })?;

        let stream =
            futures::stream::once(async move { Ok::<Bytes, std::convert::Infallible>(body) });
        let constraints =
            Constraints::new().size_limit(SizeLimit::new().whole_stream(MAX_UPLOAD_BYTES));
        let mut multipart = Multipart::with_constraints(stream, boundary, constraints);

        let mut form = ParsedForm::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(|f| f.to_string());
            let mime = field
                .content_type()
                .map(|m| m.to_string())
                .unwrap_or_default();

            match file_name {
                Some(original) => {
                    let data = field.bytes().await.map_err(multipart_error)?;
                    let saved = self.store(kind, &name, &original, &mime, &data).await?;
                    form.file = Some(saved);
                }
                None => {
                    let value = field.text().await.map_err(multipart_error)?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    async fn store(
        &self,
        kind: UploadKind,
        field_name: &str,
        original_name: &str,
        mime: &str,
        data: &[u8],
    ) -> Result<SavedFile, AppError> {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if !kind.allows(&ext, mime) {
            return Err(AppError::Validation(kind.rejection_message().to_string()));
        }

        let file_name = unique_file_name(field_name, &ext);
        let dir = self.root.join(kind.subdir());
        tokio::fs::create_dir_all(&dir).await?;
        let absolute_path = dir.join(&file_name);
        tokio::fs::write(&absolute_path, data).await?;

        Ok(SavedFile {
            url_path: format!("/uploads/{}/{}", kind.subdir(), file_name),
            absolute_path,
        })
    }

    /// Map a public "/uploads/..." path back onto the disk, rejecting
    /// anything that escapes the root
    pub fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let rest = url_path.strip_prefix("/uploads/")?;
        if rest.is_empty() || rest.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return None;
        }
        Some(self.root.join(rest))
    }

    /// Best-effort removal of a stored file
    pub async fn remove(&self, url_path: &str) {
        let Some(path) = self.resolve(url_path) else {
            return;
        };
        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %err, "failed to remove uploaded file");
        }
    }
}

fn unique_file_name(field_name: &str, ext: &str) -> String {
    let prefix = if field_name.is_empty() {
        "file"
    } else {
        field_name
    };
    format!(
        "{}-{}-{}.{}",
        prefix,
        Utc::now().timestamp_millis(),
        rand::thread_rng().gen_range(0..1_000_000_000u32),
        ext
    )
}

fn multipart_error(err: multer::Error) -> AppError {
    match err {
        multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. } => {
            AppError::Validation("File too large. Maximum size is 10MB.".to_string())
        }
        other => AppError::Validation(format!("Malformed multipart body: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> UploadStore {
        UploadStore::new(std::env::temp_dir().join(format!(
            "civic-uploads-test-{}",
            uuid::Uuid::new_v4()
        )))
    }

    fn form_body(boundary: &str) -> Bytes {
        let body = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             Street light broken\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"image\"; filename=\"photo.png\"\r\n\
             Content-Type: image/png\r\n\r\n\
             fakepngbytes\r\n\
             --{b}--\r\n",
            b = boundary
        );
        Bytes::from(body)
    }

    #[tokio::test]
    async fn parses_fields_and_stores_file() {
        let store = temp_store();
        let content_type = "multipart/form-data; boundary=XBOUNDARY";

        let form = store
            .parse_form(
                UploadKind::ConcernImage,
                Some(content_type),
                form_body("XBOUNDARY"),
            )
            .await
            .unwrap();

        assert_eq!(form.field("title"), Some("Street light broken"));
        let saved = form.file.expect("file part stored");
        assert!(saved.url_path.starts_with("/uploads/concerns/image-"));
        assert!(saved.url_path.ends_with(".png"));
        let on_disk = tokio::fs::read(&saved.absolute_path).await.unwrap();
        assert_eq!(on_disk, b"fakepngbytes");

        tokio::fs::remove_file(&saved.absolute_path).await.ok();
    }

    #[tokio::test]
    async fn rejects_disallowed_extension() {
        let store = temp_store();
        let body = "--B\r\n\
             Content-Disposition: form-data; name=\"image\"; filename=\"run.exe\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             MZ\r\n\
             --B--\r\n";

        let err = store
            .parse_form(
                UploadKind::ConcernImage,
                Some("multipart/form-data; boundary=B"),
                Bytes::from(body),
            )
            .await
            .unwrap_err();

        match err {
            AppError::Validation(message) => {
                assert_eq!(message, "Only image files (jpeg, jpg, png) are allowed!")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_boundary_is_a_validation_error() {
        let store = temp_store();
        let err = store
            .parse_form(UploadKind::ConcernImage, None, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn pdf_allowed_only_for_policies() {
        assert!(UploadKind::PolicyDocument.allows("pdf", "application/pdf"));
        assert!(!UploadKind::ConcernImage.allows("pdf", "application/pdf"));
        assert!(UploadKind::ConcernImage.allows("png", "image/png"));
        assert!(!UploadKind::ConcernImage.allows("png", "application/octet-stream"));
    }

    #[test]
    fn resolve_rejects_traversal() {
        let store = UploadStore::new("uploads");
        assert!(store.resolve("/uploads/concerns/a.png").is_some());
        assert!(store.resolve("/uploads/../secrets.txt").is_none());
        assert!(store.resolve("/uploads/").is_none());
        assert!(store.resolve("/elsewhere/a.png").is_none());
    }
}
