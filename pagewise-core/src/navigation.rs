use serde::Serialize;

use crate::destination::{Destination, Target};
use crate::events::EventQueue;
use crate::geometry::PointF;
use crate::{Document, Status};

const ZOOM_EPSILON: f64 = 1e-9;

fn same_zoom(a: f64, b: f64) -> bool {
    (a - b).abs() < ZOOM_EPSILON
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NavigationEvent {
    Jumped(Destination),
    CurrentPageChanged(Option<usize>),
    CurrentLocationChanged(PointF),
    CurrentZoomChanged(f64),
    BackAvailableChanged(bool),
    ForwardAvailableChanged(bool),
}

/// Browser-style back/forward history of viewing positions.
///
/// There is always a current entry; a fresh history starts at page 0 with
/// zoom 1.
pub struct NavigationHistory {
    entries: Vec<Destination>,
    current: usize,
    events: EventQueue<NavigationEvent>,
}

impl NavigationHistory {
    pub fn new() -> Self {
        Self {
            entries: vec![Destination::default()],
            current: 0,
            events: EventQueue::new(),
        }
    }

    pub fn events(&self) -> EventQueue<NavigationEvent> {
        self.events.clone()
    }

    pub fn current(&self) -> &Destination {
        &self.entries[self.current]
    }

    pub fn current_page(&self) -> Option<usize> {
        self.current().page_index()
    }

    pub fn current_location(&self) -> PointF {
        self.current().location
    }

    pub fn current_zoom(&self) -> f64 {
        self.current().zoom
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn back_available(&self) -> bool {
        self.current > 0
    }

    pub fn forward_available(&self) -> bool {
        self.current + 1 < self.entries.len()
    }

    /// Drops all history and returns to the initial entry.
    pub fn clear(&mut self) {
        let previous = self.current().clone();
        let availability = self.availability();
        self.entries = vec![Destination::default()];
        self.current = 0;
        let current = self.current().clone();
        self.emit_position_changes(&previous, &current);
        self.emit_availability_changes(availability);
    }

    /// Records `destination` after the current entry, discarding any forward
    /// history. Zoom `0` keeps the current zoom. Jumping to the current
    /// entry does nothing.
    pub fn jump(&mut self, mut destination: Destination) {
        if same_zoom(destination.zoom, 0.0) {
            destination.zoom = self.current_zoom();
        }
        if destination.same_place(self.current()) {
            return;
        }
        let previous = self.current().clone();
        let availability = self.availability();

        self.entries.truncate(self.current + 1);
        self.entries.push(destination);
        self.current = self.entries.len() - 1;

        let current = self.current().clone();
        self.emit_position_changes(&previous, &current);
        self.emit_availability_changes(availability);
        self.events.push(NavigationEvent::Jumped(current));
    }

    pub fn jump_to(&mut self, page: usize, location: PointF, zoom: f64) {
        self.jump(Destination::page(page, location, zoom));
    }

    /// Rewrites the current entry in place, as when the user scrolls or zooms
    /// without following a link.
    pub fn update(&mut self, page: usize, location: PointF, zoom: f64) {
        let previous = self.current().clone();
        if previous.page_index() == Some(page)
            && previous.location == location
            && same_zoom(previous.zoom, zoom)
        {
            return;
        }
        let entry = &mut self.entries[self.current];
        entry.target = Target::Page(page);
        entry.location = location;
        entry.zoom = zoom;

        let current = self.current().clone();
        self.emit_position_changes(&previous, &current);
    }

    pub fn back(&mut self) {
        if self.back_available() {
            self.replay(self.current - 1);
        }
    }

    pub fn forward(&mut self) {
        if self.forward_available() {
            self.replay(self.current + 1);
        }
    }

    /// Moves to an existing entry without touching the stored history.
    fn replay(&mut self, index: usize) {
        let previous = self.current().clone();
        let availability = self.availability();
        self.current = index;

        let current = self.current().clone();
        self.events.push(NavigationEvent::Jumped(current.clone()));
        self.emit_position_changes(&previous, &current);
        self.emit_availability_changes(availability);
    }

    fn availability(&self) -> (bool, bool) {
        (self.back_available(), self.forward_available())
    }

    fn emit_position_changes(&self, previous: &Destination, current: &Destination) {
        if !same_zoom(previous.zoom, current.zoom) {
            self.events
                .push(NavigationEvent::CurrentZoomChanged(current.zoom));
        }
        if previous.page_index() != current.page_index() {
            self.events
                .push(NavigationEvent::CurrentPageChanged(current.page_index()));
        }
        if previous.location != current.location {
            self.events
                .push(NavigationEvent::CurrentLocationChanged(current.location));
        }
    }

    fn emit_availability_changes(&self, (back, forward): (bool, bool)) {
        if back != self.back_available() {
            self.events
                .push(NavigationEvent::BackAvailableChanged(self.back_available()));
        }
        if forward != self.forward_available() {
            self.events
                .push(NavigationEvent::ForwardAvailableChanged(self.forward_available()));
        }
    }
}

impl Default for NavigationHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PageNavigationEvent {
    CurrentPageChanged(usize),
    PageCountChanged(usize),
    CanGoToPreviousPageChanged(bool),
    CanGoToNextPageChanged(bool),
}

/// Linear previous/next page stepping over a document.
///
/// Returns to the first page whenever the document is reloaded or closed.
pub struct PageNavigation {
    document: Document,
    epoch: Option<u64>,
    page_count: usize,
    current_page: usize,
    can_go_previous: bool,
    can_go_next: bool,
    events: EventQueue<PageNavigationEvent>,
}

impl PageNavigation {
    pub fn new(document: &Document) -> Self {
        let mut navigation = Self {
            document: document.clone(),
            epoch: None,
            page_count: 0,
            current_page: 0,
            can_go_previous: false,
            can_go_next: false,
            events: EventQueue::new(),
        };
        navigation.sync();
        navigation
    }

    pub fn events(&self) -> EventQueue<PageNavigationEvent> {
        self.events.clone()
    }

    pub fn current_page(&mut self) -> usize {
        self.sync();
        self.current_page
    }

    pub fn page_count(&mut self) -> usize {
        self.sync();
        self.page_count
    }

    pub fn can_go_to_previous_page(&mut self) -> bool {
        self.sync();
        self.can_go_previous
    }

    pub fn can_go_to_next_page(&mut self) -> bool {
        self.sync();
        self.can_go_next
    }

    /// Pages outside the document are ignored.
    pub fn go_to_page(&mut self, page: usize) {
        self.sync();
        if page >= self.page_count || page == self.current_page {
            return;
        }
        self.set_current_page(page);
    }

    pub fn go_to_previous_page(&mut self) {
        if self.can_go_to_previous_page() {
            self.go_to_page(self.current_page - 1);
        }
    }

    pub fn go_to_next_page(&mut self) {
        if self.can_go_to_next_page() {
            self.go_to_page(self.current_page + 1);
        }
    }

    fn sync(&mut self) {
        let epoch = self.document.epoch();
        if self.epoch == Some(epoch) {
            return;
        }
        self.epoch = Some(epoch);

        let page_count = if self.document.status() == Status::Ready {
            self.document.page_count()
        } else {
            0
        };
        if page_count != self.page_count {
            self.page_count = page_count;
            self.events
                .push(PageNavigationEvent::PageCountChanged(page_count));
        }
        if self.current_page != 0 {
            self.set_current_page(0);
        } else {
            self.update_availability();
        }
    }

    fn set_current_page(&mut self, page: usize) {
        self.current_page = page;
        self.events
            .push(PageNavigationEvent::CurrentPageChanged(page));
        self.update_availability();
    }

    fn update_availability(&mut self) {
        let can_go_previous = self.current_page > 0;
        if can_go_previous != self.can_go_previous {
            self.can_go_previous = can_go_previous;
            self.events
                .push(PageNavigationEvent::CanGoToPreviousPageChanged(can_go_previous));
        }
        let can_go_next = self.current_page + 1 < self.page_count;
        if can_go_next != self.can_go_next {
            self.can_go_next = can_go_next;
            self.events
                .push(PageNavigationEvent::CanGoToNextPageChanged(can_go_next));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_pdf_bytes, FakeBackend, FakePage, FakePdf};
    use crate::geometry::RectF;
    use crate::Source;

    fn at(page: usize) -> Destination {
        Destination::page(page, PointF::new(0.0, 10.0 * page as f64), 1.0)
    }

    #[test]
    fn starts_at_first_page_without_history() {
        let history = NavigationHistory::new();
        assert_eq!(history.current_page(), Some(0));
        assert_eq!(history.current_zoom(), 1.0);
        assert!(!history.back_available());
        assert!(!history.forward_available());
    }

    #[test]
    fn back_then_forward_returns_to_the_same_entry() {
        let mut history = NavigationHistory::new();
        history.jump(at(3));
        history.jump(at(7));
        let before = history.current().clone();

        history.back();
        assert_eq!(history.current_page(), Some(3));
        assert!(history.forward_available());
        history.forward();
        assert_eq!(*history.current(), before);
        assert!(!history.forward_available());
    }

    #[test]
    fn jump_discards_forward_history() {
        let mut history = NavigationHistory::new();
        history.jump(at(1));
        history.jump(at(2));
        history.back();
        history.back();
        assert!(!history.back_available());

        history.jump(at(5));
        assert!(!history.forward_available());
        assert_eq!(history.len(), 2);
        history.back();
        assert_eq!(history.current_page(), Some(0));
    }

    #[test]
    fn jump_to_current_entry_is_a_no_op() {
        let mut history = NavigationHistory::new();
        let events = history.events();
        history.jump_to(0, PointF::default(), 1.0);
        assert!(events.is_empty());
        assert_eq!(history.len(), 1);

        history.jump_to(0, PointF::default(), 0.0);
        assert!(events.is_empty());
    }

    #[test]
    fn search_hit_at_the_current_place_adds_no_entry() {
        let mut history = NavigationHistory::new();
        history.jump(at(3));
        let events = history.events();
        events.drain();

        let hit = Destination::region(3, vec![RectF::new(0.0, 30.0, 12.0, 8.0)])
            .with_context("the ".into(), " sat".into());
        history.jump(hit);
        assert!(events.is_empty());
        assert_eq!(history.len(), 2);
        assert!(history.current().rectangles.is_empty());
    }

    #[test]
    fn zero_zoom_keeps_current_zoom() {
        let mut history = NavigationHistory::new();
        history.update(0, PointF::default(), 2.5);
        history.jump_to(4, PointF::new(10.0, 20.0), 0.0);
        assert_eq!(history.current_zoom(), 2.5);
    }

    #[test]
    fn jump_emits_changes_then_availability_then_jumped() {
        let mut history = NavigationHistory::new();
        let events = history.events();
        history.jump_to(2, PointF::new(5.0, 5.0), 1.5);

        assert_eq!(
            events.drain(),
            vec![
                NavigationEvent::CurrentZoomChanged(1.5),
                NavigationEvent::CurrentPageChanged(Some(2)),
                NavigationEvent::CurrentLocationChanged(PointF::new(5.0, 5.0)),
                NavigationEvent::BackAvailableChanged(true),
                NavigationEvent::Jumped(Destination::page(2, PointF::new(5.0, 5.0), 1.5)),
            ]
        );
    }

    #[test]
    fn update_never_changes_availability() {
        let mut history = NavigationHistory::new();
        history.jump(at(1));
        history.jump(at(2));
        history.back();
        let events = history.events();
        events.drain();

        history.update(9, PointF::new(1.0, 1.0), 3.0);
        assert_eq!(history.len(), 3);
        assert!(history.back_available());
        assert!(history.forward_available());
        assert!(events.drain().iter().all(|event| !matches!(
            event,
            NavigationEvent::BackAvailableChanged(_) | NavigationEvent::ForwardAvailableChanged(_)
        )));
    }

    #[test]
    fn external_destination_has_no_current_page() {
        let mut history = NavigationHistory::new();
        history.jump(Destination::url("https://example.com"));
        assert_eq!(history.current_page(), None);
        history.clear();
        assert_eq!(history.current_page(), Some(0));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn page_navigation_steps_within_bounds() {
        let pdf = FakePdf::new()
            .page(FakePage::blank())
            .page(FakePage::blank())
            .page(FakePage::blank());
        let document = Document::new(FakeBackend::shared(pdf));
        let mut pages = PageNavigation::new(&document);
        assert_eq!(pages.page_count(), 0);
        assert!(!pages.can_go_to_next_page());

        document.load(Source::from_bytes(fake_pdf_bytes(64)));
        assert_eq!(pages.page_count(), 3);
        pages.go_to_next_page();
        pages.go_to_next_page();
        pages.go_to_next_page();
        assert_eq!(pages.current_page(), 2);
        assert!(!pages.can_go_to_next_page());
        assert!(pages.can_go_to_previous_page());

        pages.go_to_page(17);
        assert_eq!(pages.current_page(), 2);

        document.load(Source::from_bytes(fake_pdf_bytes(64)));
        assert_eq!(pages.current_page(), 0);
        assert!(!pages.can_go_to_previous_page());
    }
}
