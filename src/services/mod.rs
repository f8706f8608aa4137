//! Services layer
//!
//! Cross-cutting helpers the route handlers share.
//!
//! ## Services
//!
//! - **Notify**: best-effort notification delivery and role broadcasts
//! - **Uploads**: multipart parsing and upload storage
//! - **Pdf**: allocation report rendering and policy text extraction

pub mod notify;
pub mod pdf;
pub mod uploads;

pub use pdf::{extract_pdf_text, render_allocation_report, report_filename, IdeaRef, ReportMeta};
pub use uploads::{ParsedForm, SavedFile, UploadKind, UploadStore, MAX_UPLOAD_BYTES};
