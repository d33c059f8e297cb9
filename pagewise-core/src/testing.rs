//! In-memory backend for exercising sessions without a PDF library.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::{
    Availability, BackendDocument, BookmarkKey, PdfBackend, RawBookmark, RawDestination, RawLink,
};
use crate::error::{BackendError, DocumentError};
use crate::geometry::{PointF, RectF, SizeF};
use crate::source::{read_to_vec, ByteSource};
use crate::text::{Glyph, GlyphPage, TextPage};
use crate::DocumentMetadata;

const MARGIN: f64 = 72.0;
const ADVANCE: f64 = 6.0;
const LINE_HEIGHT: f64 = 14.0;
const GLYPH_HEIGHT: f64 = 10.0;

/// Bytes the fake backend accepts as a document.
pub fn fake_pdf_bytes(len: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(len.max(bytes.len()), b' ');
    bytes
}

#[derive(Debug, Clone)]
pub struct FakePage {
    size: SizeF,
    label: Option<String>,
    lines: Vec<String>,
    links: Vec<RawLink>,
}

impl FakePage {
    pub fn blank() -> Self {
        Self {
            size: SizeF::new(612.0, 792.0),
            label: None,
            lines: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Page with monospaced lines starting one inch from the top-left corner.
    pub fn with_lines(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|line| line.to_string()).collect(),
            ..Self::blank()
        }
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.size = SizeF::new(width, height);
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_link(mut self, link: RawLink) -> Self {
        self.links.push(link);
        self
    }

    /// Box of the character at `column` on `line` in the fake layout.
    pub fn glyph_box(line: usize, column: usize) -> RectF {
        RectF::new(
            MARGIN + column as f64 * ADVANCE,
            MARGIN + line as f64 * LINE_HEIGHT,
            ADVANCE,
            GLYPH_HEIGHT,
        )
    }

    fn text_page(&self) -> GlyphPage {
        let mut glyphs = Vec::new();
        for (line, text) in self.lines.iter().enumerate() {
            if line > 0 {
                let previous = self.lines[line - 1].chars().count();
                let end = Self::glyph_box(line - 1, previous);
                glyphs.push(
                    Glyph::new('\n', RectF::at(end.top_left()))
                        .with_origin(PointF::new(end.left(), end.bottom())),
                );
            }
            glyphs.extend(
                text.chars()
                    .enumerate()
                    .map(|(column, ch)| Glyph::new(ch, Self::glyph_box(line, column))),
            );
        }
        GlyphPage::new(glyphs)
    }
}

#[derive(Debug, Clone)]
struct FakeBookmark {
    key: u64,
    parent: Option<u64>,
    bookmark: RawBookmark,
}

/// Scripted document served by [`FakeBackend`].
#[derive(Debug, Clone, Default)]
pub struct FakePdf {
    pages: Vec<FakePage>,
    password: Option<String>,
    metadata: DocumentMetadata,
    bookmarks: Vec<FakeBookmark>,
    child_overrides: HashMap<u64, u64>,
    unavailable: HashSet<usize>,
    corrupt: HashSet<usize>,
    page_offsets: HashMap<usize, u64>,
    header_len: Option<u64>,
}

impl FakePdf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: FakePage) -> Self {
        self.pages.push(page);
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.metadata.title = Some(title.to_string());
        self
    }

    /// Appends an outline entry as the last child of `parent`.
    pub fn bookmark(
        mut self,
        key: u64,
        parent: Option<u64>,
        title: &str,
        destination: Option<RawDestination>,
    ) -> Self {
        self.bookmarks.push(FakeBookmark {
            key,
            parent,
            bookmark: RawBookmark {
                title: title.to_string(),
                destination,
            },
        });
        self
    }

    /// Makes `child` the first child of `parent`, allowing cyclic outlines.
    pub fn link_bookmark_child(mut self, parent: u64, child: u64) -> Self {
        self.child_overrides.insert(parent, child);
        self
    }

    /// Page that never reports its data as available.
    pub fn unavailable_page(mut self, page: usize) -> Self {
        self.unavailable.insert(page);
        self
    }

    pub fn corrupt_page(mut self, page: usize) -> Self {
        self.corrupt.insert(page);
        self
    }

    /// Page whose objects end at byte `end` of the file.
    pub fn page_at_offset(mut self, page: usize, end: u64) -> Self {
        self.page_offsets.insert(page, end);
        self
    }

    /// Opens once the first `header_len` bytes arrived instead of the whole
    /// file.
    pub fn linearized(mut self, header_len: u64) -> Self {
        self.header_len = Some(header_len);
        self
    }
}

pub struct FakeBackend {
    pdf: Arc<FakePdf>,
    init_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(pdf: FakePdf) -> Arc<Self> {
        Arc::new(Self {
            pdf: Arc::new(pdf),
            init_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
        })
    }

    pub fn shared(pdf: FakePdf) -> Arc<dyn PdfBackend> {
        Self::new(pdf)
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

impl PdfBackend for FakeBackend {
    fn init_library(&self) {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy_library(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_document_available(&self, source: &dyn ByteSource) -> Availability {
        let needed = self
            .pdf
            .header_len
            .map_or(source.len(), |header| header.min(source.len()));
        if source.is_data_available(0, needed) {
            Availability::Available
        } else {
            Availability::NotYetAvailable
        }
    }

    fn open(
        &self,
        source: Arc<dyn ByteSource>,
        password: Option<&str>,
    ) -> Result<Box<dyn BackendDocument>, DocumentError> {
        let header = if self.pdf.header_len.is_some() {
            let mut header = [0u8; 4];
            let read = source
                .read_at(0, &mut header)
                .map_err(|err| BackendError::from(err).document_error())?;
            header[..read].to_vec()
        } else {
            read_to_vec(source.as_ref()).map_err(|err| BackendError::from(err).document_error())?
        };
        if !header.starts_with(b"%PDF") {
            return Err(DocumentError::InvalidFileFormat);
        }
        if let Some(expected) = &self.pdf.password {
            if password != Some(expected.as_str()) {
                return Err(DocumentError::IncorrectPassword);
            }
        }
        Ok(Box::new(FakeDocument {
            pdf: Arc::clone(&self.pdf),
            source,
        }))
    }
}

struct FakeDocument {
    pdf: Arc<FakePdf>,
    source: Arc<dyn ByteSource>,
}

impl FakeDocument {
    fn position(&self, key: BookmarkKey) -> Option<usize> {
        self.pdf.bookmarks.iter().position(|entry| entry.key == key.0)
    }
}

impl BackendDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.pdf.pages.len()
    }

    fn page_size(&self, page: usize) -> Option<SizeF> {
        self.pdf.pages.get(page).map(|page| page.size)
    }

    fn is_page_available(&self, page: usize) -> Availability {
        if self.pdf.corrupt.contains(&page) {
            return Availability::DataError;
        }
        if self.pdf.unavailable.contains(&page) {
            return Availability::NotYetAvailable;
        }
        match self.pdf.page_offsets.get(&page) {
            Some(&end) if !self.source.is_data_available(0, end) => Availability::NotYetAvailable,
            _ => Availability::Available,
        }
    }

    fn page_label(&self, page: usize) -> Option<String> {
        self.pdf.pages.get(page)?.label.clone()
    }

    fn metadata(&self) -> DocumentMetadata {
        self.pdf.metadata.clone()
    }

    fn load_text_page(&self, page: usize) -> Result<Box<dyn TextPage>, BackendError> {
        let page_data = self.pdf.pages.get(page).ok_or(BackendError::Page(page))?;
        Ok(Box::new(page_data.text_page()))
    }

    fn first_bookmark(&self, parent: Option<BookmarkKey>) -> Option<BookmarkKey> {
        if let Some(child) = parent.and_then(|key| self.pdf.child_overrides.get(&key.0)) {
            return Some(BookmarkKey(*child));
        }
        let parent = parent.map(|key| key.0);
        self.pdf
            .bookmarks
            .iter()
            .find(|entry| entry.parent == parent)
            .map(|entry| BookmarkKey(entry.key))
    }

    fn next_bookmark(&self, sibling: BookmarkKey) -> Option<BookmarkKey> {
        let at = self.position(sibling)?;
        let parent = self.pdf.bookmarks[at].parent;
        self.pdf.bookmarks[at + 1..]
            .iter()
            .find(|entry| entry.parent == parent)
            .map(|entry| BookmarkKey(entry.key))
    }

    fn bookmark(&self, key: BookmarkKey) -> Option<RawBookmark> {
        self.position(key)
            .map(|at| self.pdf.bookmarks[at].bookmark.clone())
    }

    fn link_annotations(&self, page: usize) -> Result<Vec<RawLink>, BackendError> {
        Ok(self
            .pdf
            .pages
            .get(page)
            .map(|page| page.links.clone())
            .unwrap_or_default())
    }
}
