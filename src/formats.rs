use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One chapter from the chapter-list API, in API order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub id: String,
    pub name: String,
    /// Position in the chapter list.
    pub ordinal: usize,
}

/// Reference to one storage-held page image; manifest order is page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageManifestEntry {
    pub key: String,
}

/// A page image persisted locally, ready for document assembly.
/// `sequence` is 1-based and strictly monotonic across the whole book.
#[derive(Debug, Clone)]
pub struct AcquiredPage {
    pub chapter: ChapterRecord,
    pub sequence: u32,
    pub image_path: PathBuf,
    pub width_px: u32,
    pub height_px: u32,
}

/// One table-of-contents entry per chapter that placed at least one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub level: u8,
    pub title: String,
    /// 1-based number of the chapter's first placed page.
    pub start_page: u32,
}

/// One line of the per-run acquisition log (`manifest.jsonl`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionRecord {
    pub sequence: u32,
    pub chapter_id: String,
    pub chapter_name: String,
    pub chapter_ordinal: usize,
    pub image_path: String,
    pub width_px: u32,
    pub height_px: u32,
    pub retrieved_at: String,
}
