//! crates/bookwise_core/src/validation.rs
//!
//! Input checks shared by every store implementation and the chat service.

use crate::domain::NewLibraryItem;
use crate::ports::{PortError, PortResult};

/// Author recorded for library items added without one.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Trims a session or book title, rejecting blank ones.
pub fn title(raw: &str) -> PortResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PortError::Validation("title must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

pub fn library_item(item: NewLibraryItem) -> PortResult<NewLibraryItem> {
    let author = item.author.trim();
    Ok(NewLibraryItem {
        title: title(&item.title)?,
        author: if author.is_empty() {
            UNKNOWN_AUTHOR.to_string()
        } else {
            author.to_string()
        },
        cover_ref: item.cover_ref.filter(|c| !c.trim().is_empty()),
    })
}
