//! Verification documents and stay vouchers

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Kind of customer verification document
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "document_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    #[sqlx(rename = "id")]
    #[serde(rename = "id")]
    Identity,
    AddressProof,
    Other,
}

impl DocumentType {
    /// Types every reservation must have approved before it can move on
    pub const REQUIRED: [DocumentType; 2] = [DocumentType::Identity, DocumentType::AddressProof];
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "document_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

impl DocumentStatus {
    /// Still counts towards the required set (not rejected)
    pub fn is_live(&self) -> bool {
        !matches!(self, DocumentStatus::Rejected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub customer_id: Uuid,
    pub document_type: DocumentType,
    pub file_url: String,
    pub file_key: String,
    pub status: DocumentStatus,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// True when every required type has at least one live document and all of
/// its live documents are in `accept`. Rejected rows are ignored.
pub fn required_documents_satisfied(
    documents: &[Document],
    accept: impl Fn(DocumentStatus) -> bool,
) -> bool {
    DocumentType::REQUIRED.iter().all(|required| {
        let mut live = documents
            .iter()
            .filter(|d| d.document_type == *required && d.status.is_live())
            .peekable();
        live.peek().is_some() && live.all(|d| accept(d.status))
    })
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "voucher_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    Pending,
    Sent,
    UnderReview,
    Approved,
    Rejected,
    Delivered,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Voucher {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub cotista_id: Uuid,
    pub file_url: Option<String>,
    pub file_key: Option<String>,
    pub status: VoucherStatus,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Cotista upload deadline
    pub deadline: DateTime<Utc>,
    pub overdue_flagged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin decision on a document, voucher or cotista profile
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject { reason: String },
}

impl ReviewDecision {
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            ReviewDecision::Approve => None,
            ReviewDecision::Reject { reason } => Some(reason),
        }
    }
}

// ============================================================================
// Upload DTOs
// ============================================================================

/// Base64 file payload shared by every upload endpoint
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FilePayload {
    /// Base64 content, optionally as a `data:` URL
    #[validate(length(min = 1))]
    pub file_data: String,
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    #[validate(length(min = 1, max = 255))]
    pub content_type: String,
}

/// POST /api/documents/customer
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CustomerDocumentUpload {
    pub reservation_id: Uuid,
    pub document_type: DocumentType,
    #[serde(flatten)]
    #[validate]
    pub file: FilePayload,
}

/// Documents a cotista submits with the registration
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CotistaDocumentType {
    Identity,
    AddressProof,
    OwnershipProof,
}

/// POST /api/documents/cotista
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CotistaDocumentUpload {
    pub document_type: CotistaDocumentType,
    #[serde(flatten)]
    #[validate]
    pub file: FilePayload,
}

/// POST /api/cotista/vouchers
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VoucherUpload {
    pub reservation_id: Uuid,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[serde(flatten)]
    #[validate]
    pub file: FilePayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(document_type: DocumentType, status: DocumentStatus) -> Document {
        Document {
            id: Uuid::new_v4(),
            reservation_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            document_type,
            file_url: String::new(),
            file_key: String::new(),
            status,
            rejection_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_required_documents_need_every_type() {
        let docs = vec![doc(DocumentType::Identity, DocumentStatus::Approved)];
        assert!(!required_documents_satisfied(&docs, |s| s == DocumentStatus::Approved));

        let docs = vec![
            doc(DocumentType::Identity, DocumentStatus::Approved),
            doc(DocumentType::AddressProof, DocumentStatus::UnderReview),
            doc(DocumentType::Other, DocumentStatus::Rejected),
        ];
        assert!(!required_documents_satisfied(&docs, |s| s == DocumentStatus::Approved));
        assert!(required_documents_satisfied(&docs, |s| s.is_live()));
    }

    #[test]
    fn test_every_live_required_document_must_be_approved() {
        let approved = |s| s == DocumentStatus::Approved;
        let docs = vec![
            doc(DocumentType::Identity, DocumentStatus::Approved),
            doc(DocumentType::AddressProof, DocumentStatus::Approved),
            doc(DocumentType::Identity, DocumentStatus::UnderReview),
        ];
        assert!(!required_documents_satisfied(&docs, approved));

        let docs = vec![
            doc(DocumentType::Identity, DocumentStatus::Rejected),
            doc(DocumentType::Identity, DocumentStatus::Approved),
            doc(DocumentType::AddressProof, DocumentStatus::Approved),
        ];
        assert!(required_documents_satisfied(&docs, approved));

        let docs = vec![
            doc(DocumentType::Identity, DocumentStatus::Rejected),
            doc(DocumentType::AddressProof, DocumentStatus::Approved),
        ];
        assert!(!required_documents_satisfied(&docs, approved));
    }

    #[test]
    fn test_identity_serializes_as_id() {
        let json = serde_json::to_string(&DocumentType::Identity).unwrap();
        assert_eq!(json, "\"id\"");
    }
}
