use serde::Serialize;

use super::TextPage;
use crate::geometry::{bounding_rect, PointF, RectF};
use crate::Document;

/// Caret position produced by hit-testing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextPosition {
    /// Index of the character the caret sits before.
    pub char_index: usize,
    pub position: PointF,
    pub height: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Selection {
    pub text: String,
    pub bounds: Vec<RectF>,
    pub bounding_rect: RectF,
    pub start_index: usize,
    /// Exclusive.
    pub end_index: usize,
}

impl Selection {
    pub fn is_valid(&self) -> bool {
        !self.bounds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.start_index == self.end_index
    }
}

/// Maps page coordinates to characters and character ranges to geometry.
#[derive(Clone)]
pub struct TextLocator {
    document: Document,
    tolerance: f64,
}

impl TextLocator {
    pub fn new(document: &Document) -> Self {
        Self {
            document: document.clone(),
            tolerance: document.config().hit_tolerance,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn hit_test(&self, page: usize, point: PointF) -> Option<TextPosition> {
        self.document
            .with_text_page(page, |text| hit_test(text, point, self.tolerance))
            .flatten()
    }

    pub fn selection_between(&self, page: usize, start: PointF, end: PointF) -> Option<Selection> {
        self.document
            .with_text_page(page, |text| selection_between(text, start, end, self.tolerance))
            .flatten()
    }

    /// Up to `max_len` characters starting at `start`.
    pub fn selection_from_index(
        &self,
        page: usize,
        start: usize,
        max_len: usize,
    ) -> Option<Selection> {
        self.document
            .with_text_page(page, |text| {
                let count = text.char_count();
                if start >= count {
                    return None;
                }
                Some(selection(text, start, max_len.min(count - start)))
            })
            .flatten()
    }

    pub fn all_text(&self, page: usize) -> Option<Selection> {
        self.document
            .with_text_page(page, |text| selection(text, 0, text.char_count()))
    }
}

/// The caret moves past the hit character when the point is closer to the
/// character's right edge than to its origin.
fn hit_test(text: &dyn TextPage, point: PointF, tolerance: f64) -> Option<TextPosition> {
    let mut index = text.char_index_at(point, tolerance)?;
    let mut position = text.char_origin(index)?;
    let char_box = text.char_box(index)?;
    if (char_box.right() - point.x).abs() < (position.x - point.x).abs() {
        position.x = char_box.right();
        index += 1;
    }
    Some(TextPosition {
        char_index: index,
        position,
        height: char_box.height,
    })
}

fn selection_between(
    text: &dyn TextPage,
    start: PointF,
    end: PointF,
    tolerance: f64,
) -> Option<Selection> {
    let start_index = text.char_index_at(start, tolerance)?;
    let end_index = text.char_index_at(end, tolerance)?;
    let (first, (mut last, last_point)) = if start_index <= end_index {
        (start_index, (end_index, end))
    } else {
        (end_index, (start_index, start))
    };

    if let Some(last_box) = text.char_box(last) {
        if (last_box.right() - last_point.x).abs() < (last_box.left() - last_point.x).abs() {
            last += 1;
        }
    }
    if last <= first {
        return None;
    }
    Some(selection(text, first, last - first))
}

fn selection(text: &dyn TextPage, start: usize, count: usize) -> Selection {
    let bounds = text.rects(start, count);
    let bounding_rect = bounding_rect(&bounds)
        .unwrap_or_else(|| RectF::at(text.char_origin(start).unwrap_or_default()));
    Selection {
        text: text.text(start, count),
        bounds,
        bounding_rect,
        start_index: start,
        end_index: start + count,
    }
}
