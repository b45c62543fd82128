//! crates/bookwise_core/src/indexing.rs
//!
//! Book uploads. A PDF arrives as a base64 data URI, the indexing model reads
//! it, and only a successful read adds the book to the uploader's library.

use crate::domain::{LibraryItem, NewLibraryItem};
use crate::ports::{BookIndexingService, LibraryStore, PortError, PortResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const PDF_DATA_URI_PREFIX: &str = "data:application/pdf;base64,";

/// Title used when neither the uploader, the model nor the file name offers one.
pub const UNTITLED_BOOK: &str = "Untitled book";

//=========================================================================================
// Indexing Port Payloads
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexBookRequest {
    pub book_data_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// What the indexing model reports back about a book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexBookOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl IndexBookOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Checks that `data_uri` carries a PDF and returns its base64 payload.
pub fn pdf_payload(data_uri: &str) -> PortResult<&str> {
    let payload = data_uri
        .strip_prefix(PDF_DATA_URI_PREFIX)
        .ok_or_else(|| PortError::Validation("Please upload a PDF file.".to_string()))?
        .trim();
    if payload.is_empty() {
        return Err(PortError::Validation(
            "the uploaded PDF is empty".to_string(),
        ));
    }
    Ok(payload)
}

/// Derives a title from an uploaded file's name: the last path segment without
/// its `.pdf` extension.
pub fn title_from_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();
    let stem = match base.len().checked_sub(4) {
        Some(cut) if base.is_char_boundary(cut) && base[cut..].eq_ignore_ascii_case(".pdf") => {
            &base[..cut]
        }
        _ => base,
    }
    .trim();

    if stem.is_empty() {
        UNTITLED_BOOK.to_string()
    } else {
        stem.to_string()
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

//=========================================================================================
// Upload Orchestration
//=========================================================================================

#[derive(Debug, Clone)]
pub struct BookUpload {
    pub file_name: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub book_data_uri: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub success: bool,
    pub message: String,
    /// The library entry created for the book; `None` when indexing failed.
    pub item: Option<LibraryItem>,
}

#[derive(Clone)]
pub struct BookIndexer {
    indexing: Arc<dyn BookIndexingService>,
    library: Arc<dyn LibraryStore>,
}

impl BookIndexer {
    pub fn new(indexing: Arc<dyn BookIndexingService>, library: Arc<dyn LibraryStore>) -> Self {
        Self { indexing, library }
    }

    /// Indexes an uploaded PDF and files it in `owner`'s library.
    ///
    /// A malformed upload is an error. An indexing failure is not: it comes back
    /// as an unsuccessful outcome carrying the reason, and nothing is stored.
    pub async fn upload(&self, owner: Uuid, upload: BookUpload) -> PortResult<UploadOutcome> {
        pdf_payload(&upload.book_data_uri)?;

        let request = IndexBookRequest {
            book_data_uri: upload.book_data_uri,
            model: present(upload.model),
        };
        let outcome = match self.indexing.index_book(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%owner, file = %upload.file_name, error = %e, "Book indexing failed");
                IndexBookOutcome::failed(format!("Indexing failed: {}", e))
            }
        };

        if !outcome.success {
            info!(%owner, file = %upload.file_name, "Book was not indexed: {}", outcome.message);
            return Ok(UploadOutcome {
                success: false,
                message: outcome.message,
                item: None,
            });
        }

        let title = present(upload.title)
            .or_else(|| present(outcome.title))
            .unwrap_or_else(|| title_from_file_name(&upload.file_name));
        let author = present(upload.author)
            .or_else(|| present(outcome.author))
            .unwrap_or_default();
        let item = self
            .library
            .add_item(
                owner,
                NewLibraryItem {
                    title,
                    author,
                    cover_ref: None,
                },
            )
            .await?;
        info!(%owner, item_id = %item.id, title = %item.title, "Book indexed and added to library");

        Ok(UploadOutcome {
            success: true,
            message: outcome.message,
            item: Some(item),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pdf_data_uris_are_accepted() {
        assert_eq!(
            pdf_payload("data:application/pdf;base64,JVBERi0x").unwrap(),
            "JVBERi0x"
        );
        assert!(matches!(
            pdf_payload("data:image/png;base64,iVBORw0K"),
            Err(PortError::Validation(_))
        ));
        assert!(matches!(
            pdf_payload("data:application/pdf;base64,  "),
            Err(PortError::Validation(_))
        ));
    }

    #[test]
    fn titles_come_from_the_file_stem() {
        assert_eq!(title_from_file_name("Moby Dick.pdf"), "Moby Dick");
        assert_eq!(title_from_file_name("C:\\books\\Emma.PDF"), "Emma");
        assert_eq!(title_from_file_name("notes"), "notes");
        assert_eq!(title_from_file_name(".pdf"), UNTITLED_BOOK);
    }

    #[test]
    fn outcome_reads_the_model_wire_shape() {
        let outcome: IndexBookOutcome =
            serde_json::from_str(r#"{"success":true,"message":"Indexed.","title":"Emma"}"#)
                .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.title.as_deref(), Some("Emma"));
        assert_eq!(outcome.author, None);
    }
}
