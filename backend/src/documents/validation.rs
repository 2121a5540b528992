//! Upload checks applied before anything is stored

use thiserror::Error;

/// Content types accepted for identity and address documents
pub const DOCUMENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "application/pdf",
];

pub const MAX_DOCUMENT_SIZE_MB: u64 = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileRejection {
    #[error("Invalid file type. Allowed types: {}", .allowed.join(", "))]
    InvalidType { allowed: Vec<String> },

    #[error("File too large. Maximum size: {max_mb}MB")]
    TooLarge { max_mb: u64 },

    #[error("File content is not valid base64")]
    InvalidEncoding,

    #[error("File is empty")]
    Empty,
}

/// Checks content type and size. The content type must contain one of the
/// allowed MIME types verbatim, so `application/pdf; name=a.pdf` passes and
/// `IMAGE/PNG` does not.
pub fn validate_file(
    content_type: &str,
    size_bytes: u64,
    allowed: &[&str],
    max_mb: u64,
) -> Result<(), FileRejection> {
    if !allowed.iter().any(|t| content_type.contains(t)) {
        return Err(FileRejection::InvalidType {
            allowed: allowed.iter().map(|t| t.to_string()).collect(),
        });
    }
    if size_bytes > max_mb * 1024 * 1024 {
        return Err(FileRejection::TooLarge { max_mb });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_document_types() {
        for ct in ["image/jpeg", "image/png", "image/webp", "application/pdf"] {
            assert!(validate_file(ct, 1024, &DOCUMENT_TYPES, 10).is_ok(), "{}", ct);
        }
    }

    #[test]
    fn test_rejects_executables() {
        let err = validate_file("application/x-msdownload", 1024, &DOCUMENT_TYPES, 10).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid file type. Allowed types: image/jpeg, image/jpg, image/png, image/webp, application/pdf"
        );
    }

    #[test]
    fn test_type_must_contain_a_full_mime_type() {
        for ct in ["text/x-pdf-loader", "application/x-png-exe", "IMAGE/PNG", "pdf", ""] {
            assert!(
                matches!(
                    validate_file(ct, 10, &DOCUMENT_TYPES, 10),
                    Err(FileRejection::InvalidType { .. })
                ),
                "{}",
                ct
            );
        }
        assert!(validate_file("application/pdf; name=a.pdf", 10, &DOCUMENT_TYPES, 10).is_ok());
    }

    #[test]
    fn test_zero_bytes_is_within_limits() {
        assert!(validate_file("application/pdf", 0, &DOCUMENT_TYPES, 10).is_ok());
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let limit = 10 * 1024 * 1024;
        assert!(validate_file("application/pdf", limit, &DOCUMENT_TYPES, 10).is_ok());
        let err = validate_file("application/pdf", limit + 1, &DOCUMENT_TYPES, 10).unwrap_err();
        assert_eq!(err.to_string(), "File too large. Maximum size: 10MB");
    }
}
