use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::destination::{Destination, FieldValue};
use crate::events::EventQueue;
use crate::text::{fold_case, TextPage, TextRange};
use crate::{Document, Status};

const LINE_BREAK_MARKER: char = '\u{23CE}';
/// Leading context may shrink by dropped carriage returns, so the match is
/// first looked for slightly before its nominal offset.
const CONTEXT_SLACK: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchField {
    Page,
    IndexOnPage,
    Location,
    ContextBefore,
    ContextAfter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SearchEvent {
    /// Every previously reported row is gone.
    Reset,
    QueryChanged(String),
    RowsInserted { first: usize, last: usize },
    SweepFinished { rows: usize },
}

/// Incremental full-document text search.
///
/// Pages are searched one per [`SearchIndex::tick`]; lookups for a specific
/// page or row search whatever they need synchronously.
pub struct SearchIndex {
    document: Document,
    query: String,
    /// `None` for pages not searched yet.
    pages: Vec<Option<Vec<Destination>>>,
    row_count: usize,
    next_page: usize,
    sweeping: bool,
    epoch: u64,
    context_chars: usize,
    events: EventQueue<SearchEvent>,
}

impl SearchIndex {
    pub fn new(document: &Document) -> Self {
        let mut index = Self {
            document: document.clone(),
            query: String::new(),
            pages: Vec::new(),
            row_count: 0,
            next_page: 0,
            sweeping: false,
            epoch: document.epoch(),
            context_chars: document.config().search_context_chars,
            events: EventQueue::new(),
        };
        index.clear_results();
        index
    }

    pub fn events(&self) -> EventQueue<SearchEvent> {
        self.events.clone()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn tick_interval(&self) -> Duration {
        self.document.config().search_tick_interval
    }

    /// Whether ticks still have pages to search. A stale index reports the
    /// sweep it restarts with on its next tick.
    pub fn is_sweeping(&self) -> bool {
        if self.is_stale() {
            !self.query.is_empty() && self.ready_page_count() > 0
        } else {
            self.sweeping
        }
    }

    #[instrument(skip_all)]
    pub fn set_query(&mut self, query: impl Into<String>) {
        let query = query.into();
        if query == self.query {
            return;
        }
        self.query = query;
        self.epoch = self.document.epoch();
        self.clear_results();
        self.events.push(SearchEvent::Reset);
        self.events.push(SearchEvent::QueryChanged(self.query.clone()));
    }

    pub fn row_count(&self) -> usize {
        if self.is_stale() {
            0
        } else {
            self.row_count
        }
    }

    /// Searches the next unsearched page. Returns whether more ticks are
    /// needed.
    pub fn tick(&mut self) -> bool {
        self.sync();
        if !self.sweeping {
            return false;
        }
        while self.next_page < self.pages.len() && self.pages[self.next_page].is_some() {
            self.next_page += 1;
        }
        if self.next_page < self.pages.len() {
            let page = self.next_page;
            self.next_page += 1;
            self.search_page(page);
        }
        if self.next_page >= self.pages.len() {
            self.sweeping = false;
            debug!(query = %self.query, rows = self.row_count, "search sweep finished");
            self.events.push(SearchEvent::SweepFinished {
                rows: self.row_count,
            });
        }
        self.sweeping
    }

    /// Results on `page`, searching it now if the sweep has not reached it.
    pub fn results_on_page(&mut self, page: usize) -> &[Destination] {
        self.sync();
        self.search_page(page);
        self.pages
            .get(page)
            .and_then(|results| results.as_deref())
            .unwrap_or(&[])
    }

    /// Page and index-on-page of overall result `row`, searching every page up
    /// to it as needed.
    pub fn page_and_index_for_result(&mut self, row: usize) -> Option<(usize, usize)> {
        self.sync();
        let mut before = 0;
        for page in 0..self.pages.len() {
            self.search_page(page);
            let here = self.pages[page].as_ref().map_or(0, Vec::len);
            if row < before + here {
                return Some((page, row - before));
            }
            before += here;
        }
        None
    }

    pub fn result_at(&mut self, row: usize) -> Option<&Destination> {
        let (page, index) = self.page_and_index_for_result(row)?;
        self.pages[page].as_ref()?.get(index)
    }

    pub fn field(&mut self, row: usize, field: SearchField) -> FieldValue {
        let Some((page, index)) = self.page_and_index_for_result(row) else {
            return FieldValue::Missing;
        };
        let Some(result) = self.pages[page].as_ref().and_then(|results| results.get(index)) else {
            return FieldValue::Missing;
        };
        match field {
            SearchField::Page => FieldValue::Int(page),
            SearchField::IndexOnPage => FieldValue::Int(index),
            SearchField::Location => FieldValue::Point(result.location),
            SearchField::ContextBefore => FieldValue::Text(result.context_before.clone()),
            SearchField::ContextAfter => FieldValue::Text(result.context_after.clone()),
        }
    }

    /// Context with the match emphasized, for list views.
    pub fn display_text(&mut self, row: usize) -> Option<String> {
        let query = self.query.clone();
        let result = self.result_at(row)?;
        Some(format!(
            "{}<b>{}</b>{}",
            result.context_before, query, result.context_after
        ))
    }

    fn is_stale(&self) -> bool {
        self.document.epoch() != self.epoch
    }

    fn sync(&mut self) {
        if !self.is_stale() {
            return;
        }
        self.epoch = self.document.epoch();
        self.clear_results();
        self.events.push(SearchEvent::Reset);
    }

    fn ready_page_count(&self) -> usize {
        if self.document.status() == Status::Ready {
            self.document.page_count()
        } else {
            0
        }
    }

    fn clear_results(&mut self) {
        let page_count = self.ready_page_count();
        self.pages = vec![None; page_count];
        self.row_count = 0;
        self.next_page = 0;
        self.sweeping = !self.query.is_empty() && page_count > 0;
    }

    fn search_page(&mut self, page: usize) {
        if page >= self.pages.len() || self.pages[page].is_some() || self.query.is_empty() {
            return;
        }
        let started = Instant::now();
        let query = self.query.clone();
        let context_chars = self.context_chars;
        let results = self
            .document
            .with_text_page(page, |text| find_matches(text, page, &query, context_chars));
        if self.is_stale() {
            return;
        }
        let results = results.unwrap_or_else(|| {
            warn!(page, "page text unavailable; treating page as having no matches");
            Vec::new()
        });

        let found = results.len();
        let first = self.rows_before(page);
        self.pages[page] = Some(results);
        if found > 0 {
            self.row_count += found;
            self.events.push(SearchEvent::RowsInserted {
                first,
                last: first + found - 1,
            });
        }
        debug!(
            query = %self.query,
            page,
            found,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "searched page"
        );
    }

    fn rows_before(&self, page: usize) -> usize {
        self.pages[..page].iter().flatten().map(Vec::len).sum()
    }
}

fn find_matches(
    text: &dyn TextPage,
    page: usize,
    query: &str,
    context_chars: usize,
) -> Vec<Destination> {
    text.find(query)
        .into_iter()
        .filter_map(|range| {
            let rects = text.rects(range.start, range.count);
            if rects.is_empty() {
                return None;
            }
            let (before, after) = context_around(text, range, query, context_chars);
            Some(Destination::region(page, rects).with_context(before, after))
        })
        .collect()
}

/// Splits the text around a match into leading and trailing context.
fn context_around(
    text: &dyn TextPage,
    range: TextRange,
    query: &str,
    context_chars: usize,
) -> (String, String) {
    let char_count = text.char_count();
    if char_count == 0 {
        return (String::new(), String::new());
    }
    let start = range.start.saturating_sub(context_chars);
    let end = range
        .end()
        .saturating_sub(1)
        .saturating_add(context_chars)
        .min(char_count - 1);
    let context: Vec<char> = text
        .text(start, end + 1 - start)
        .chars()
        .filter(|&ch| ch != '\r')
        .map(|ch| if ch == '\n' { LINE_BREAK_MARKER } else { ch })
        .collect();

    let needle: Vec<char> = query.chars().map(fold_case).collect();
    let expected = (range.start - start).saturating_sub(CONTEXT_SLACK);
    let found = position_folded(&context, &needle, expected)
        .or_else(|| position_folded(&context, &needle, 0));
    match found {
        Some(at) => (
            context[..at].iter().collect(),
            context[at + needle.len()..].iter().collect(),
        ),
        None => {
            warn!(query, "search match not found again in its own context");
            (context.iter().collect(), String::new())
        }
    }
}

fn position_folded(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&at| {
        haystack[at..at + needle.len()]
            .iter()
            .zip(needle)
            .all(|(&hay, &want)| fold_case(hay) == want)
    })
}
