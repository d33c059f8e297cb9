use tracing::warn;

use crate::backend;
use crate::geometry::SizeF;
use crate::{Document, Status};

/// Per-page facts of a ready document: size, completeness and labels.
#[derive(Clone)]
pub struct PageCatalog {
    document: Document,
}

impl PageCatalog {
    pub(crate) fn new(document: &Document) -> Self {
        Self {
            document: document.clone(),
        }
    }

    fn in_range(&self, page: usize) -> bool {
        self.document.status() == Status::Ready && page < self.document.page_count()
    }

    /// Whether every object of `page` has arrived. A document only turns
    /// Ready after the completeness sweep, so this is true for every page of
    /// a ready document and false otherwise.
    pub fn check_page_complete(&self, page: usize) -> bool {
        let _guard = backend::lock();
        self.in_range(page) && self.document.is_load_complete()
    }

    /// Page size in points; empty when the page is out of range or not
    /// loaded yet.
    pub fn point_size(&self, page: usize) -> SizeF {
        let _guard = backend::lock();
        if !self.check_page_complete(page) {
            return SizeF::default();
        }
        if let Some(size) = self.document.page_entry(page).and_then(|entry| entry.size) {
            return size;
        }
        let Some(size) = self.document.with_handle(|handle| handle.page_size(page)).flatten()
        else {
            warn!(page, "backend could not report page size");
            return SizeF::default();
        };
        self.document
            .update_page_entry(page, |entry| entry.size = Some(size));
        size
    }

    /// Display label of `page`; the 1-based page number when the document
    /// defines none. Empty when the page is out of range.
    pub fn page_label(&self, page: usize) -> String {
        let _guard = backend::lock();
        if !self.in_range(page) {
            return String::new();
        }
        if let Some(label) = self.document.page_entry(page).and_then(|entry| entry.label) {
            return label;
        }
        let label = self
            .document
            .with_handle(|handle| handle.page_label(page))
            .flatten()
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| (page + 1).to_string());
        self.document
            .update_page_entry(page, |entry| entry.label = Some(label.clone()));
        label
    }

    /// Widest page width and tallest page height over the whole document.
    /// Empty until the document is ready.
    pub fn max_page_size(&self) -> SizeF {
        let _guard = backend::lock();
        let page_count = if self.document.status() == Status::Ready {
            self.document.page_count()
        } else {
            0
        };
        (0..page_count)
            .map(|page| self.point_size(page))
            .fold(SizeF::default(), |max, size| {
                SizeF::new(max.width.max(size.width), max.height.max(size.height))
            })
    }

    pub fn max_page_width(&self) -> f64 {
        self.max_page_size().width
    }

    pub fn max_page_height(&self) -> f64 {
        self.max_page_size().height
    }

    /// Vertical offset of the top of `page` in a continuous layout where
    /// pages sit in rows of `facing_pages`, each row as tall as its tallest
    /// page and followed by `spacing` points. Only complete rows above the
    /// page count; a `facing_pages` of 0 lays out one page per row.
    pub fn height_sum_before_page(&self, page: usize, spacing: f64, facing_pages: usize) -> f64 {
        let _guard = backend::lock();
        let per_row = facing_pages.max(1);
        let mut sum = 0.0;
        let mut row_start = 0;
        while row_start + per_row <= page {
            let row_height = (row_start..row_start + per_row)
                .map(|page| self.point_size(page).height)
                .fold(0.0, f64::max);
            sum += row_height + spacing;
            row_start += per_row;
        }
        sum
    }

    /// First page whose label equals `label` exactly.
    pub fn page_index_for_label(&self, label: &str) -> Option<usize> {
        let _guard = backend::lock();
        (0..self.document.page_count()).find(|&page| self.page_label(page) == label)
    }
}
