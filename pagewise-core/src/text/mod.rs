//! Per-page text access: hit-testing, ranges, search and link inference.

mod glyphs;
mod locator;
mod weblinks;

use serde::Serialize;

use crate::geometry::{PointF, RectF};

pub use glyphs::{Glyph, GlyphPage};
pub use locator::{Selection, TextLocator, TextPosition};
pub use weblinks::{extract_web_links, WebLink};

/// Case folding shared by page search and match re-location: one character
/// in, one character out, so match lengths stay in glyph units.
pub(crate) fn fold_case(ch: char) -> char {
    ch.to_lowercase().next().unwrap_or(ch)
}

/// A run of characters on one page, as indices into the page text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextRange {
    pub start: usize,
    pub count: usize,
}

impl TextRange {
    pub const fn new(start: usize, count: usize) -> Self {
        Self { start, count }
    }

    /// Exclusive end index.
    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

/// Text layer of a loaded page. Geometry is in page points, top-left origin.
pub trait TextPage {
    fn char_count(&self) -> usize;

    /// Character whose box contains `point`, else the nearest character whose
    /// box grown by `tolerance` contains it.
    fn char_index_at(&self, point: PointF, tolerance: f64) -> Option<usize>;

    fn char_origin(&self, index: usize) -> Option<PointF>;

    fn char_box(&self, index: usize) -> Option<RectF>;

    fn text(&self, start: usize, count: usize) -> String;

    /// Line-level rectangles covering the range.
    fn rects(&self, start: usize, count: usize) -> Vec<RectF>;

    /// Case-insensitive, non-overlapping matches in reading order.
    fn find(&self, query: &str) -> Vec<TextRange>;

    /// URLs written as plain text on the page.
    fn web_links(&self) -> Vec<WebLink> {
        extract_web_links(&self.text(0, self.char_count()))
    }
}
