use std::fs::{File, OpenOptions};
use std::io::{BufRead as _, BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use printpdf::{Image, ImageTransform, Mm, PdfDocument, PdfDocumentReference, PdfPageIndex, Pt};

use crate::acquire::{EXPORT_DPI, page_points};
use crate::cli::AssembleArgs;
use crate::formats::{AcquiredPage, AcquisitionRecord, ChapterRecord, TocEntry};

const PAGE_LAYER: &str = "page";

/// Builds the output document one acquired page at a time. Each page of
/// the document is sized from the image's pixel dimensions at the fixed
/// export density, so the image fills it edge to edge with its aspect
/// ratio intact. The table of contents is accumulated as pages are placed
/// and attached exactly once in [`BookAssembler::finish`].
pub struct BookAssembler {
    title: String,
    doc: Option<PdfDocumentReference>,
    placed_pages: u32,
    last_chapter: Option<usize>,
    toc: Vec<TocEntry>,
    bookmarks: Vec<(String, PdfPageIndex)>,
}

impl BookAssembler {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            doc: None,
            placed_pages: 0,
            last_chapter: None,
            toc: Vec::new(),
            bookmarks: Vec::new(),
        }
    }

    pub fn page_count(&self) -> u32 {
        self.placed_pages
    }

    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    /// Appends one document page for an acquired image. The first page a
    /// chapter places also appends that chapter's level-1 TOC entry; a
    /// chapter that never places a page gets no entry.
    pub fn append_page(&mut self, page: &AcquiredPage) -> anyhow::Result<()> {
        let width = Mm::from(Pt(page_points(page.width_px) as _));
        let height = Mm::from(Pt(page_points(page.height_px) as _));

        let (doc, page_index, layer_index) = match self.doc.take() {
            Some(doc) => {
                let (page_index, layer_index) = doc.add_page(width, height, PAGE_LAYER);
                (doc, page_index, layer_index)
            }
            None => {
                let (doc, page_index, layer_index) =
                    PdfDocument::new(self.title.clone(), width, height, PAGE_LAYER.to_owned());
                (doc, page_index, layer_index)
            }
        };

        let decoded = image::open(&page.image_path)
            .with_context(|| format!("decode page image: {}", page.image_path.display()))?
            .to_rgb8();
        let pdf_image = Image::from_dynamic_image(&image::DynamicImage::ImageRgb8(decoded));
        pdf_image.add_to_layer(
            doc.get_page(page_index).get_layer(layer_index),
            ImageTransform {
                dpi: Some(EXPORT_DPI as _),
                ..Default::default()
            },
        );
        self.doc = Some(doc);
        self.placed_pages += 1;

        if self.last_chapter != Some(page.chapter.ordinal) {
            self.last_chapter = Some(page.chapter.ordinal);
            self.toc.push(TocEntry {
                level: 1,
                title: page.chapter.name.clone(),
                start_page: self.placed_pages,
            });
            self.bookmarks.push((page.chapter.name.clone(), page_index));
        }

        Ok(())
    }

    /// Attaches the accumulated TOC as document bookmarks and serializes
    /// the document. There is no incremental flush; an abandoned assembler
    /// writes nothing.
    pub fn finish(self, out_path: &Path) -> anyhow::Result<Vec<TocEntry>> {
        let Some(doc) = self.doc else {
            anyhow::bail!("no pages were assembled; refusing to write an empty document");
        };

        for (title, page_index) in &self.bookmarks {
            doc.add_bookmark(title.clone(), *page_index);
        }

        if let Some(parent) = out_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir: {}", parent.display()))?;
        }

        let file = File::create(out_path)
            .with_context(|| format!("create document: {}", out_path.display()))?;
        let mut writer = BufWriter::new(file);
        doc.save(&mut writer)
            .with_context(|| format!("save document: {}", out_path.display()))?;
        writer
            .flush()
            .with_context(|| format!("flush document: {}", out_path.display()))?;

        Ok(self.toc)
    }
}

/// Replays an acquisition log into a fresh document without a browser.
pub fn run(args: AssembleArgs) -> anyhow::Result<()> {
    let manifest_path = PathBuf::from(&args.manifest);
    let out_path = PathBuf::from(&args.out);

    if out_path.exists() {
        anyhow::bail!("assemble output already exists: {}", out_path.display());
    }

    let records = read_acquisition_log(&manifest_path).context("read acquisition log")?;
    if records.is_empty() {
        anyhow::bail!("acquisition log is empty: {}", manifest_path.display());
    }

    let title = match &args.title {
        Some(title) => title.clone(),
        None => out_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "book".to_owned()),
    };

    let mut assembler = BookAssembler::new(title);
    for (index, record) in records.iter().enumerate() {
        let expected = index as u32 + 1;
        if record.sequence != expected {
            anyhow::bail!(
                "acquisition log is not contiguous: expected sequence {expected}, found {}",
                record.sequence
            );
        }

        let page = AcquiredPage {
            chapter: ChapterRecord {
                id: record.chapter_id.clone(),
                name: record.chapter_name.clone(),
                ordinal: record.chapter_ordinal,
            },
            sequence: record.sequence,
            image_path: PathBuf::from(&record.image_path),
            width_px: record.width_px,
            height_px: record.height_px,
        };
        assembler.append_page(&page)?;
    }

    let toc = assembler.finish(&out_path)?;
    tracing::info!(
        pages = records.len(),
        chapters = toc.len(),
        out = %out_path.display(),
        "assembled document"
    );
    Ok(())
}

fn read_acquisition_log(path: &Path) -> anyhow::Result<Vec<AcquisitionRecord>> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("open acquisition log: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.context("read acquisition log line")?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AcquisitionRecord =
            serde_json::from_str(&line).context("parse acquisition record")?;
        records.push(record);
    }
    records.sort_by_key(|record| record.sequence);
    Ok(records)
}

/// Appends one acquisition record to the log as a JSONL line.
pub fn write_acquisition_record(
    log: &mut impl std::io::Write,
    record: &AcquisitionRecord,
) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *log, record).context("serialize acquisition record")?;
    log.write_all(b"\n").context("write acquisition record newline")?;
    Ok(())
}
