use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{BackendDocument, BookmarkKey, RawDestination};
use crate::destination::{Destination, FieldValue};
use crate::events::EventQueue;
use crate::geometry::PointF;
use crate::{Document, Status};

/// Nesting beyond this is treated as a malformed outline.
pub const MAX_OUTLINE_DEPTH: usize = 64;
pub const MAX_OUTLINE_NODES: usize = 100_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutlineNode {
    pub title: String,
    /// Zero for top-level entries.
    pub level: usize,
    pub page: Option<usize>,
    pub location: PointF,
    pub zoom: f64,
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn destination(&self) -> Option<Destination> {
        self.page
            .map(|page| Destination::page(page, self.location, self.zoom))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutlineField {
    Title,
    Level,
    Page,
    Location,
    Zoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutlineEvent {
    Reset,
}

/// The document's bookmark tree, rebuilt whenever a document becomes ready
/// and emptied when it goes away.
pub struct OutlineTree {
    document: Document,
    built_epoch: Option<u64>,
    roots: Vec<OutlineNode>,
    events: EventQueue<OutlineEvent>,
}

impl OutlineTree {
    pub fn new(document: &Document) -> Self {
        let mut tree = Self {
            document: document.clone(),
            built_epoch: None,
            roots: Vec::new(),
            events: EventQueue::new(),
        };
        tree.refresh();
        tree
    }

    pub fn events(&self) -> EventQueue<OutlineEvent> {
        self.events.clone()
    }

    /// Brings the tree in line with the document. Returns whether it changed.
    pub fn refresh(&mut self) -> bool {
        let epoch = self.document.epoch();
        if self.document.status() != Status::Ready {
            self.built_epoch = None;
            if self.roots.is_empty() {
                return false;
            }
            self.roots.clear();
            self.events.push(OutlineEvent::Reset);
            return true;
        }
        if self.built_epoch == Some(epoch) {
            return false;
        }
        self.built_epoch = Some(epoch);
        self.roots = self
            .document
            .with_handle(|handle| build_outline(handle))
            .unwrap_or_default();
        debug!(entries = self.roots.len(), "outline rebuilt");
        self.events.push(OutlineEvent::Reset);
        true
    }

    pub fn roots(&mut self) -> &[OutlineNode] {
        self.refresh();
        &self.roots
    }

    /// Node at `path`, a list of child indices starting from the roots.
    pub fn node(&mut self, path: &[usize]) -> Option<&OutlineNode> {
        self.refresh();
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.roots.get(*first)?, |node, &index| node.children.get(index))
    }

    /// Children under `path`; the empty path counts top-level entries.
    pub fn row_count(&mut self, path: &[usize]) -> usize {
        if path.is_empty() {
            return self.roots().len();
        }
        self.node(path).map_or(0, |node| node.children.len())
    }

    pub fn field(&mut self, path: &[usize], field: OutlineField) -> FieldValue {
        let Some(node) = self.node(path) else {
            return FieldValue::Missing;
        };
        match field {
            OutlineField::Title => FieldValue::Text(node.title.clone()),
            OutlineField::Level => FieldValue::Int(node.level),
            OutlineField::Page => node.page.map_or(FieldValue::Missing, FieldValue::Int),
            OutlineField::Location => FieldValue::Point(node.location),
            OutlineField::Zoom => FieldValue::Real(node.zoom),
        }
    }

    /// Every node in depth-first order.
    pub fn flatten(&mut self) -> Vec<&OutlineNode> {
        fn walk<'a>(nodes: &'a [OutlineNode], out: &mut Vec<&'a OutlineNode>) {
            for node in nodes {
                out.push(node);
                walk(&node.children, out);
            }
        }
        self.refresh();
        let mut out = Vec::new();
        walk(&self.roots, &mut out);
        out
    }
}

struct Walk<'a> {
    handle: &'a dyn BackendDocument,
    visited: HashSet<BookmarkKey>,
    budget: usize,
}

fn build_outline(handle: &dyn BackendDocument) -> Vec<OutlineNode> {
    let mut walk = Walk {
        handle,
        visited: HashSet::new(),
        budget: MAX_OUTLINE_NODES,
    };
    walk.children(None, 0)
}

impl Walk<'_> {
    fn children(&mut self, parent: Option<BookmarkKey>, level: usize) -> Vec<OutlineNode> {
        let mut nodes = Vec::new();
        if level >= MAX_OUTLINE_DEPTH {
            warn!(level, "outline nested too deeply; truncating");
            return nodes;
        }
        let mut next = self.handle.first_bookmark(parent);
        while let Some(key) = next {
            if !self.visited.insert(key) {
                warn!(?key, "outline entry reached twice; stopping at the cycle");
                break;
            }
            if self.budget == 0 {
                warn!("outline too large; truncating");
                break;
            }
            self.budget -= 1;

            let bookmark = self.handle.bookmark(key).unwrap_or_default();
            let (location, zoom) = bookmark
                .destination
                .as_ref()
                .map(resolve_view)
                .unwrap_or((PointF::default(), 0.0));
            nodes.push(OutlineNode {
                title: bookmark.title,
                level,
                page: bookmark.destination.and_then(|dest| dest.page),
                location,
                zoom,
                children: self.children(Some(key), level + 1),
            });
            next = self.handle.next_bookmark(key);
        }
        nodes
    }
}

/// Location and zoom hints of a destination. A location needs both
/// coordinates; a missing zoom is `0`.
pub(crate) fn resolve_view(dest: &RawDestination) -> (PointF, f64) {
    let location = match (dest.x, dest.y) {
        (Some(x), Some(y)) => PointF::new(x, y),
        _ => PointF::default(),
    };
    (location, dest.zoom.unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_pdf_bytes, FakeBackend, FakePage, FakePdf};
    use crate::Source;

    fn with_outline(pdf: FakePdf) -> Document {
        let document = Document::new(FakeBackend::shared(pdf));
        document.load(Source::from_bytes(fake_pdf_bytes(64)));
        document
    }

    fn chapters() -> FakePdf {
        FakePdf::new()
            .page(FakePage::blank())
            .page(FakePage::blank())
            .page(FakePage::blank())
            .bookmark(1, None, "Intro", Some(RawDestination::page(0)))
            .bookmark(
                2,
                None,
                "Chapter",
                Some(RawDestination {
                    page: Some(1),
                    x: Some(72.0),
                    y: Some(100.0),
                    zoom: Some(1.5),
                }),
            )
            .bookmark(3, Some(2), "Section", Some(RawDestination::page(2)))
            .bookmark(4, Some(2), "Dangling", None)
    }

    #[test]
    fn builds_nested_tree_with_levels() {
        let document = with_outline(chapters());
        let mut tree = OutlineTree::new(&document);

        assert_eq!(tree.row_count(&[]), 2);
        assert_eq!(tree.row_count(&[1]), 2);
        assert_eq!(tree.field(&[1, 0], OutlineField::Title), FieldValue::Text("Section".into()));
        assert_eq!(tree.field(&[1, 0], OutlineField::Level), FieldValue::Int(1));
        assert_eq!(
            tree.field(&[1], OutlineField::Location),
            FieldValue::Point(PointF::new(72.0, 100.0))
        );
        assert_eq!(tree.field(&[1], OutlineField::Zoom), FieldValue::Real(1.5));
        assert_eq!(tree.field(&[1, 1], OutlineField::Page), FieldValue::Missing);
        assert_eq!(tree.field(&[0], OutlineField::Zoom), FieldValue::Real(0.0));
        assert_eq!(tree.field(&[5], OutlineField::Title), FieldValue::Missing);

        let titles: Vec<_> = tree.flatten().iter().map(|node| node.title.clone()).collect();
        assert_eq!(titles, ["Intro", "Chapter", "Section", "Dangling"]);
    }

    #[test]
    fn cyclic_outline_terminates() {
        let pdf = chapters().bookmark(5, Some(3), "Loop", None).link_bookmark_child(5, 2);
        let document = with_outline(pdf);
        let mut tree = OutlineTree::new(&document);
        assert_eq!(tree.flatten().len(), 5);
    }

    #[test]
    fn clears_on_close_and_rebuilds_on_load() {
        let document = with_outline(chapters());
        let mut tree = OutlineTree::new(&document);
        let events = tree.events();
        events.drain();

        document.close();
        assert!(tree.roots().is_empty());
        assert_eq!(events.drain(), vec![OutlineEvent::Reset]);

        document.load(Source::from_bytes(fake_pdf_bytes(64)));
        assert_eq!(tree.roots().len(), 2);
        assert!(!tree.refresh());
    }
}
