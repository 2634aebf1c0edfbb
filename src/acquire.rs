use std::path::Path;

use anyhow::Context as _;
use futures::StreamExt as _;
use reqwest::header;
use tokio::io::AsyncWriteExt as _;

use crate::error::ExtractError;
use crate::formats::{AcquiredPage, ChapterRecord, PageManifestEntry};

/// Output pages are sized from pixel dimensions at this fixed density,
/// never from the source image's embedded resolution metadata.
pub const EXPORT_DPI: f64 = 144.0;

const FILE_PATH_PARAM: &str = "filePath";
const FALLBACK_PAGE_NAME: &str = "page.jpg";

/// Pixel extent to document points at the fixed export density.
pub fn page_points(px: u32) -> f64 {
    f64::from(px) * 72.0 / EXPORT_DPI
}

/// Local file name for a storage key: its trailing path segment, with a
/// fixed placeholder when that segment is empty.
pub fn image_file_name(storage_key: &str) -> String {
    let name = storage_key.rsplit('/').next().unwrap_or_default();
    if name.is_empty() {
        FALLBACK_PAGE_NAME.to_owned()
    } else {
        name.to_owned()
    }
}

/// Directory-safe rendition of a chapter name. Chapter names come from an
/// external API and may carry path separators.
pub fn chapter_dir_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    if cleaned.trim().is_empty() {
        "_".to_owned()
    } else {
        cleaned
    }
}

/// Downloads one page image over the bridged session, streams it to the
/// chapter directory and reads its pixel dimensions back from the file.
/// A non-2xx status aborts the run.
pub async fn acquire_page(
    client: &reqwest::Client,
    image_api: &str,
    entry: &PageManifestEntry,
    referer: &str,
    chapter_dir: &Path,
    chapter: &ChapterRecord,
    sequence: u32,
) -> anyhow::Result<AcquiredPage> {
    let response = client
        .get(image_api)
        .query(&[(FILE_PATH_PARAM, entry.key.as_str())])
        .header(header::REFERER, referer)
        .send()
        .await
        .with_context(|| format!("GET {image_api}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ExtractError::DownloadFailed {
            status: status.as_u16(),
            key: entry.key.clone(),
        }
        .into());
    }

    tokio::fs::create_dir_all(chapter_dir)
        .await
        .with_context(|| format!("create chapter dir: {}", chapter_dir.display()))?;

    let dest = chapter_dir.join(image_file_name(&entry.key));
    let mut file = tokio::fs::File::create(&dest)
        .await
        .with_context(|| format!("create page image: {}", dest.display()))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("stream page image: {}", entry.key))?;
        file.write_all(&chunk)
            .await
            .with_context(|| format!("write page image: {}", dest.display()))?;
    }
    file.flush()
        .await
        .with_context(|| format!("flush page image: {}", dest.display()))?;

    let (width_px, height_px) = image::image_dimensions(&dest)
        .with_context(|| format!("read image dimensions: {}", dest.display()))?;

    Ok(AcquiredPage {
        chapter: chapter.clone(),
        sequence,
        image_path: dest,
        width_px,
        height_px,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_points_converts_pixels_at_the_export_density() {
        assert_eq!(page_points(1000), 500.0);
        assert_eq!(page_points(1400), 700.0);
        assert_eq!(page_points(0), 0.0);
    }

    #[test]
    fn image_file_name_takes_the_trailing_segment() {
        assert_eq!(image_file_name("/x/p1.jpg"), "p1.jpg");
        assert_eq!(image_file_name("p1.jpg"), "p1.jpg");
    }

    #[test]
    fn image_file_name_falls_back_when_the_segment_is_empty() {
        assert_eq!(image_file_name("/x/"), "page.jpg");
        assert_eq!(image_file_name(""), "page.jpg");
    }

    #[test]
    fn chapter_dir_name_replaces_reserved_characters() {
        assert_eq!(chapter_dir_name("第1章: 引言/概述"), "第1章_ 引言_概述");
        assert_eq!(chapter_dir_name("???"), "___");
        assert_eq!(chapter_dir_name("  "), "_");
    }
}
