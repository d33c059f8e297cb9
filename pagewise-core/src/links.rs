use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::backend::{RawLink, RawLinkAction};
use crate::destination::{Destination, FieldValue, Target};
use crate::events::EventQueue;
use crate::geometry::{PointF, RectF};
use crate::outline::resolve_view;
use crate::text::TextRange;
use crate::{Document, Status};

/// A clickable area on a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub rect: RectF,
    pub destination: Destination,
    /// Characters the link was recognized in, for links found in page text.
    pub text_range: Option<TextRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkField {
    Rect,
    Url,
    Page,
    Location,
    Zoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkEvent {
    Reset,
}

/// Links of one page: link annotations first, then URLs found in the text.
pub struct LinkTable {
    document: Document,
    page: usize,
    built: Option<(u64, usize)>,
    links: Vec<Link>,
    events: EventQueue<LinkEvent>,
}

impl LinkTable {
    pub fn new(document: &Document) -> Self {
        Self {
            document: document.clone(),
            page: 0,
            built: None,
            links: Vec::new(),
            events: EventQueue::new(),
        }
    }

    pub fn events(&self) -> EventQueue<LinkEvent> {
        self.events.clone()
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn set_page(&mut self, page: usize) {
        if page == self.page {
            return;
        }
        self.page = page;
        self.refresh();
    }

    /// Rebuilds the table if the page or the document changed since the last
    /// build. Returns whether it did.
    pub fn refresh(&mut self) -> bool {
        let key = (self.document.epoch(), self.page);
        if self.built == Some(key) {
            return false;
        }
        self.built = Some(key);
        self.links = if self.document.status() == Status::Ready {
            collect_links(&self.document, self.page)
        } else {
            Vec::new()
        };
        debug!(page = self.page, links = self.links.len(), "link table rebuilt");
        self.events.push(LinkEvent::Reset);
        true
    }

    pub fn links(&mut self) -> &[Link] {
        self.refresh();
        &self.links
    }

    pub fn row_count(&mut self) -> usize {
        self.links().len()
    }

    /// Topmost link whose rectangle contains `point`.
    pub fn link_at(&mut self, point: PointF) -> Option<&Link> {
        self.links().iter().rev().find(|link| link.rect.contains(point))
    }

    pub fn field(&mut self, row: usize, field: LinkField) -> FieldValue {
        let Some(link) = self.links().get(row) else {
            return FieldValue::Missing;
        };
        let dest = &link.destination;
        match (field, &dest.target) {
            (LinkField::Rect, _) => FieldValue::Rect(link.rect),
            (LinkField::Url, Target::Url(url)) => FieldValue::Text(url.clone()),
            (LinkField::Page, Target::Page(page)) => FieldValue::Int(*page),
            (LinkField::Location, Target::Page(_)) => FieldValue::Point(dest.location),
            (LinkField::Zoom, Target::Page(_)) => FieldValue::Real(dest.zoom),
            _ => FieldValue::Missing,
        }
    }
}

fn collect_links(document: &Document, page: usize) -> Vec<Link> {
    let page_count = document.page_count();
    let annotations = document
        .with_handle(|handle| handle.link_annotations(page))
        .unwrap_or_else(|| Ok(Vec::new()))
        .unwrap_or_else(|err| {
            warn!(?err, page, "failed to read link annotations");
            Vec::new()
        });

    let mut links: Vec<Link> = annotations
        .into_iter()
        .filter_map(|raw| annotation_link(raw, page_count))
        .collect();

    let web_links = document
        .with_text_page(page, |text| {
            text.web_links()
                .into_iter()
                .flat_map(|web| {
                    text.rects(web.range.start, web.range.count)
                        .into_iter()
                        .map(move |rect| Link {
                            rect,
                            destination: Destination::url(web.url.clone()),
                            text_range: Some(web.range),
                        })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    links.extend(web_links);
    links
}

fn annotation_link(raw: RawLink, page_count: usize) -> Option<Link> {
    let Some(rect) = raw.rect else {
        warn!("skipping link with invalid bounding box");
        return None;
    };
    let destination = match raw.action {
        RawLinkAction::GoTo(dest) => {
            let Some(page) = dest.page.filter(|&page| page < page_count) else {
                warn!(?rect, page = ?dest.page, "skipping link with invalid page number");
                return None;
            };
            let (location, zoom) = resolve_view(&dest);
            Destination::page(page, location, zoom)
        }
        RawLinkAction::Uri(uri) => {
            if uri.is_empty() {
                warn!(?rect, "skipping link with empty URI");
                return None;
            }
            Destination::url(uri)
        }
        RawLinkAction::Launch(path) => {
            if path.is_empty() {
                warn!(?rect, "skipping link with empty file path");
                return None;
            }
            Destination::url(file_url(&path))
        }
    };
    Some(Link {
        rect,
        destination,
        text_range: None,
    })
}

fn file_url(path: &str) -> String {
    Url::from_file_path(Path::new(path))
        .map(String::from)
        .unwrap_or_else(|_| format!("file:{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RawDestination;
    use crate::testing::{fake_pdf_bytes, FakeBackend, FakePage, FakePdf};
    use crate::Source;

    fn linked_document() -> Document {
        let area = Some(RectF::new(72.0, 72.0, 100.0, 12.0));
        let page = FakePage::with_lines(&["Docs at https://docs.rs today"])
            .with_link(RawLink {
                rect: area,
                action: RawLinkAction::GoTo(RawDestination {
                    page: Some(1),
                    x: Some(10.0),
                    y: Some(20.0),
                    zoom: None,
                }),
            })
            .with_link(RawLink {
                rect: area,
                action: RawLinkAction::Uri(String::new()),
            })
            .with_link(RawLink {
                rect: None,
                action: RawLinkAction::Uri("https://lost.example".into()),
            })
            .with_link(RawLink {
                rect: area,
                action: RawLinkAction::GoTo(RawDestination::page(40)),
            })
            .with_link(RawLink {
                rect: area,
                action: RawLinkAction::Launch("/tmp/other file.pdf".into()),
            });
        let pdf = FakePdf::new().page(page).page(FakePage::blank());
        let document = Document::new(FakeBackend::shared(pdf));
        document.load(Source::from_bytes(fake_pdf_bytes(64)));
        document
    }

    #[test]
    fn merges_annotations_and_text_links() {
        let document = linked_document();
        let mut table = LinkTable::new(&document);

        assert_eq!(table.row_count(), 3);
        assert_eq!(table.field(0, LinkField::Page), FieldValue::Int(1));
        assert_eq!(
            table.field(0, LinkField::Location),
            FieldValue::Point(PointF::new(10.0, 20.0))
        );
        assert_eq!(table.field(0, LinkField::Url), FieldValue::Missing);
        assert_eq!(
            table.field(1, LinkField::Url),
            FieldValue::Text("file:///tmp/other%20file.pdf".into())
        );
        assert_eq!(
            table.field(2, LinkField::Url),
            FieldValue::Text("https://docs.rs".into())
        );
        assert_eq!(table.links()[2].text_range, Some(TextRange::new(8, 15)));
        assert_eq!(table.field(2, LinkField::Page), FieldValue::Missing);
    }

    #[test]
    fn switching_pages_rebuilds() {
        let document = linked_document();
        let mut table = LinkTable::new(&document);
        assert_eq!(table.row_count(), 3);
        let events = table.events();
        events.drain();

        table.set_page(1);
        assert_eq!(table.row_count(), 0);
        assert_eq!(events.drain(), vec![LinkEvent::Reset]);
        table.set_page(1);
        assert!(events.is_empty());
    }

    #[test]
    fn closed_document_has_no_links() {
        let document = linked_document();
        let mut table = LinkTable::new(&document);
        document.close();
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.field(0, LinkField::Rect), FieldValue::Missing);
    }

    #[test]
    fn hit_test_finds_text_link() {
        let document = linked_document();
        let mut table = LinkTable::new(&document);
        let rect = table.links()[2].rect;
        let found = table
            .link_at(PointF::new(rect.left() + 1.0, rect.center_y()))
            .unwrap();
        assert_eq!(found.destination.url_str(), Some("https://docs.rs"));
    }
}
