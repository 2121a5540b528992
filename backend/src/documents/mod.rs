//! File uploads and document review

mod service;
mod upload;
mod validation;

pub use service::DocumentService;
pub use upload::{build_storage_key, decode_payload, sanitize_file_name, PreparedFile, UploadPipeline};
pub use validation::{validate_file, FileRejection, DOCUMENT_TYPES, MAX_DOCUMENT_SIZE_MB};
