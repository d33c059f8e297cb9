use serde::Serialize;

use crate::geometry::{PointF, RectF};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Target {
    Page(usize),
    Url(String),
}

/// A place to navigate to: a page location, a highlighted region, or an
/// external URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Destination {
    pub target: Target,
    pub location: PointF,
    /// Magnification; `0.0` means "keep the current zoom".
    pub zoom: f64,
    pub rectangles: Vec<RectF>,
    pub context_before: String,
    pub context_after: String,
}

impl Destination {
    pub fn page(page: usize, location: PointF, zoom: f64) -> Self {
        Self {
            target: Target::Page(page),
            location,
            zoom,
            rectangles: Vec::new(),
            context_before: String::new(),
            context_after: String::new(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            target: Target::Url(url.into()),
            location: PointF::default(),
            zoom: 0.0,
            rectangles: Vec::new(),
            context_before: String::new(),
            context_after: String::new(),
        }
    }

    /// A region on `page`, located at the top-left of its first rectangle.
    pub fn region(page: usize, rectangles: Vec<RectF>) -> Self {
        let location = rectangles
            .first()
            .map(RectF::top_left)
            .unwrap_or_default();
        Self {
            rectangles,
            ..Self::page(page, location, 0.0)
        }
    }

    pub fn with_context(mut self, before: String, after: String) -> Self {
        self.context_before = before;
        self.context_after = after;
        self
    }

    pub fn page_index(&self) -> Option<usize> {
        match self.target {
            Target::Page(page) => Some(page),
            Target::Url(_) => None,
        }
    }

    pub fn url_str(&self) -> Option<&str> {
        match &self.target {
            Target::Url(url) => Some(url),
            Target::Page(_) => None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.target, Target::Url(_))
    }

    /// Same page, location and zoom; rectangles and context are ignored.
    pub fn same_place(&self, other: &Destination) -> bool {
        self.target == other.target && self.location == other.location && self.zoom == other.zoom
    }
}

impl Default for Destination {
    fn default() -> Self {
        Self::page(0, PointF::default(), 1.0)
    }
}

/// Value returned by the tagged field accessors of the list and tree models.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldValue {
    Text(String),
    Int(usize),
    Real(f64),
    Point(PointF),
    Rect(RectF),
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_is_located_at_first_rectangle() {
        let dest = Destination::region(
            2,
            vec![
                RectF::new(10.0, 20.0, 5.0, 5.0),
                RectF::new(1.0, 40.0, 5.0, 5.0),
            ],
        );
        assert_eq!(dest.page_index(), Some(2));
        assert_eq!(dest.location, PointF::new(10.0, 20.0));
        assert_eq!(dest.zoom, 0.0);
    }

    #[test]
    fn external_destination_has_no_page() {
        let dest = Destination::url("https://example.com");
        assert!(dest.is_external());
        assert_eq!(dest.page_index(), None);
        assert_eq!(dest.url_str(), Some("https://example.com"));
    }
}
