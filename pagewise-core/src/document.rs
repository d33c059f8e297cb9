use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{self, Availability, BackendDocument, LibraryLease, PdfBackend};
use crate::catalog::PageCatalog;
use crate::config::EngineConfig;
use crate::error::DocumentError;
use crate::events::EventQueue;
use crate::geometry::SizeF;
use crate::source::{ByteSource, Source, StreamBuffer};
use crate::text::TextPage;
use crate::{DocumentId, DocumentMetadata};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Status {
    #[default]
    Null,
    Loading,
    Ready,
    Unloading,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DocumentEvent {
    StatusChanged(Status),
    PageCountChanged(usize),
    PasswordChanged,
    /// The document is encrypted and the stored password did not open it.
    PasswordRequired,
    MetadataChanged,
}

/// One loaded PDF and the state shared by every model built on it.
///
/// Clones refer to the same session. All backend work happens under the
/// process-wide backend lock.
#[derive(Clone)]
pub struct Document {
    inner: Arc<Inner>,
}

struct Inner {
    id: DocumentId,
    config: EngineConfig,
    state: Mutex<SessionState>,
    events: EventQueue<DocumentEvent>,
    // Declared last: the handle in `state` must close before the library.
    lease: LibraryLease,
}

#[derive(Default)]
struct SessionState {
    status: Status,
    last_error: Option<DocumentError>,
    password: String,
    page_count: usize,
    load_complete: bool,
    source: Option<LoadSource>,
    handle: Option<Arc<dyn BackendDocument>>,
    sweep_cursor: usize,
    epoch: u64,
    pages: HashMap<usize, PageEntry>,
    metadata: DocumentMetadata,
}

enum LoadSource {
    RandomAccess,
    Streaming {
        buffer: Arc<StreamBuffer>,
        finished: bool,
    },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PageEntry {
    pub(crate) size: Option<SizeF>,
    pub(crate) label: Option<String>,
}

impl Document {
    pub fn new(backend: Arc<dyn PdfBackend>) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: Arc<dyn PdfBackend>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                config,
                state: Mutex::new(SessionState::default()),
                events: EventQueue::new(),
                lease: LibraryLease::acquire(backend),
            }),
        }
    }

    pub fn id(&self) -> DocumentId {
        self.inner.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn events(&self) -> EventQueue<DocumentEvent> {
        self.inner.events.clone()
    }

    pub fn status(&self) -> Status {
        self.inner.state.lock().status
    }

    pub fn last_error(&self) -> Option<DocumentError> {
        self.inner.state.lock().last_error
    }

    /// Number of pages; zero unless the document is ready.
    pub fn page_count(&self) -> usize {
        self.inner.state.lock().page_count
    }

    pub fn password(&self) -> String {
        self.inner.state.lock().password.clone()
    }

    pub fn is_load_complete(&self) -> bool {
        self.inner.state.lock().load_complete
    }

    pub fn metadata(&self) -> DocumentMetadata {
        self.inner.state.lock().metadata.clone()
    }

    pub fn pages(&self) -> PageCatalog {
        PageCatalog::new(self)
    }

    /// Changes on every transition to ready and on every close; models use it
    /// to notice that their cached results belong to an older document.
    pub(crate) fn epoch(&self) -> u64 {
        self.inner.state.lock().epoch
    }

    /// Stores the password for the next load. Does not reload.
    pub fn set_password(&self, password: impl Into<String>) {
        let password = password.into();
        let mut state = self.inner.state.lock();
        if state.password == password {
            return;
        }
        state.password = password;
        drop(state);
        self.inner.events.push(DocumentEvent::PasswordChanged);
    }

    #[instrument(skip(self, source), fields(document = %self.inner.id))]
    pub fn load(&self, source: Source) {
        let _guard = backend::lock();
        if self.status() == Status::Ready {
            self.close();
        } else {
            self.discard_handle();
        }
        self.inner.state.lock().last_error = None;
        self.set_status(Status::Loading);

        match source {
            Source::RandomAccess(source) => {
                info!(bytes = source.len(), "loading document");
                self.inner.state.lock().source = Some(LoadSource::RandomAccess);
                self.try_open(source, false);
            }
            Source::Streaming(stream) => {
                if stream.content_length.is_none() && !stream.network_reply {
                    warn!("sequential source without a known size cannot be loaded");
                    self.fail(DocumentError::Unknown);
                    return;
                }
                info!(content_length = ?stream.content_length, "loading streamed document");
                let buffer = Arc::new(StreamBuffer::new());
                if let Some(total) = stream.content_length {
                    buffer.set_total(total);
                }
                self.inner.state.lock().source = Some(LoadSource::Streaming {
                    buffer,
                    finished: false,
                });
            }
        }
    }

    /// Appends bytes received from a streaming source.
    pub fn feed(&self, chunk: &[u8]) {
        let _guard = backend::lock();
        let Some(buffer) = self.stream_buffer() else {
            warn!(len = chunk.len(), "data fed to a document that is not streaming");
            return;
        };
        buffer.append(chunk);
        debug!(buffered = buffer.buffered(), total = ?buffer.total(), "stream data received");
        self.advance_stream();
    }

    /// Announces the total size of a streaming source once it becomes known.
    pub fn set_content_length(&self, total: u64) {
        let _guard = backend::lock();
        let Some(buffer) = self.stream_buffer() else {
            return;
        };
        if buffer.total().is_none() {
            buffer.set_total(total);
            self.advance_stream();
        }
    }

    /// Marks the end of a streaming source.
    pub fn finish_stream(&self) {
        let _guard = backend::lock();
        {
            let mut state = self.inner.state.lock();
            match state.source.as_mut() {
                Some(LoadSource::Streaming { finished, .. }) => *finished = true,
                _ => return,
            }
        }
        self.advance_stream();
    }

    #[instrument(skip(self), fields(document = %self.inner.id))]
    pub fn close(&self) {
        let _guard = backend::lock();
        let status = self.status();
        if status == Status::Null && self.inner.state.lock().handle.is_none() {
            self.clear_password();
            return;
        }
        self.set_status(Status::Unloading);
        self.discard_handle();

        let previous = std::mem::take(&mut self.inner.state.lock().page_count);
        if previous != 0 {
            self.inner.events.push(DocumentEvent::PageCountChanged(0));
        }
        self.clear_password();
        self.set_status(Status::Null);
        debug!("document closed");
    }

    /// Runs `f` against the open handle under the backend lock. `None` when no
    /// document is open.
    pub(crate) fn with_handle<R>(&self, f: impl FnOnce(&dyn BackendDocument) -> R) -> Option<R> {
        let _guard = backend::lock();
        let handle = self.inner.state.lock().handle.clone()?;
        Some(f(handle.as_ref()))
    }

    /// Loads the text layer of `page` and runs `f` on it. `None` when the page
    /// is not usable yet or its text cannot be loaded.
    pub(crate) fn with_text_page<R>(
        &self,
        page: usize,
        f: impl FnOnce(&dyn TextPage) -> R,
    ) -> Option<R> {
        let _guard = backend::lock();
        if !self.pages().check_page_complete(page) {
            return None;
        }
        self.with_handle(|handle| match handle.load_text_page(page) {
            Ok(text) => Some(f(text.as_ref())),
            Err(err) => {
                warn!(?err, page, "failed to load page text");
                None
            }
        })
        .flatten()
    }

    pub(crate) fn page_entry(&self, page: usize) -> Option<PageEntry> {
        self.inner.state.lock().pages.get(&page).cloned()
    }

    pub(crate) fn update_page_entry(&self, page: usize, update: impl FnOnce(&mut PageEntry)) {
        update(self.inner.state.lock().pages.entry(page).or_default());
    }

    /// Calls `check` for random-access sources until data shows up or the
    /// configured timeout passes. Streaming sources are checked once.
    pub(crate) fn wait_for_data(&self, mut check: impl FnMut() -> Availability) -> Availability {
        if self.is_streaming() {
            return check();
        }
        let started = Instant::now();
        loop {
            let availability = check();
            if availability != Availability::NotYetAvailable
                || started.elapsed() >= self.inner.config.availability_timeout
            {
                return availability;
            }
            thread::sleep(self.inner.config.availability_poll_interval);
        }
    }

    fn is_streaming(&self) -> bool {
        matches!(
            self.inner.state.lock().source,
            Some(LoadSource::Streaming { .. })
        )
    }

    fn stream_buffer(&self) -> Option<Arc<StreamBuffer>> {
        match &self.inner.state.lock().source {
            Some(LoadSource::Streaming { buffer, .. }) => Some(Arc::clone(buffer)),
            _ => None,
        }
    }

    fn advance_stream(&self) {
        if self.status() != Status::Loading {
            return;
        }
        let (buffer, finished) = match &self.inner.state.lock().source {
            Some(LoadSource::Streaming { buffer, finished }) => (Arc::clone(buffer), *finished),
            _ => return,
        };
        if buffer.total().is_none() {
            if !finished {
                return;
            }
            buffer.set_total(buffer.buffered());
        }

        if self.inner.state.lock().handle.is_none() {
            self.try_open(buffer, true);
        } else {
            self.sweep();
        }

        if finished && self.status() == Status::Loading {
            warn!("stream ended before the document was complete");
            self.fail(DocumentError::InvalidFileFormat);
        }
    }

    fn try_open(&self, source: Arc<dyn ByteSource>, streaming: bool) {
        let backend = Arc::clone(self.inner.lease.backend());
        match self.wait_for_data(|| backend.is_document_available(source.as_ref())) {
            Availability::Available => {}
            Availability::NotYetAvailable if streaming => {
                debug!("document header not yet available");
                return;
            }
            Availability::NotYetAvailable => {
                warn!("document data did not become available in time");
                self.fail(DocumentError::DataNotYetAvailable);
                return;
            }
            Availability::DataError => {
                warn!("backend rejected document data");
                self.fail(DocumentError::InvalidFileFormat);
                return;
            }
        }

        let password = {
            let state = self.inner.state.lock();
            (!state.password.is_empty()).then(|| state.password.clone())
        };
        match backend.open(source, password.as_deref()) {
            Ok(handle) => {
                {
                    let mut state = self.inner.state.lock();
                    state.handle = Some(Arc::from(handle));
                    state.sweep_cursor = 0;
                }
                self.sweep();
            }
            Err(err) => {
                warn!(%err, "failed to open document");
                {
                    let mut state = self.inner.state.lock();
                    state.handle = None;
                    state.last_error = Some(err);
                }
                if err == DocumentError::IncorrectPassword {
                    self.inner.events.push(DocumentEvent::PasswordRequired);
                }
                self.set_status(Status::Error);
            }
        }
    }

    /// Checks every page for completeness, resuming where the previous sweep
    /// stopped. A streaming sweep suspends until more data arrives.
    fn sweep(&self) {
        let Some(handle) = self.inner.state.lock().handle.clone() else {
            return;
        };
        let page_count = handle.page_count();
        loop {
            let cursor = {
                let state = self.inner.state.lock();
                match &state.handle {
                    Some(current) if Arc::ptr_eq(current, &handle) => state.sweep_cursor,
                    _ => return,
                }
            };
            if cursor >= page_count {
                break;
            }
            match self.wait_for_data(|| handle.is_page_available(cursor)) {
                Availability::Available => {
                    self.inner.state.lock().sweep_cursor += 1;
                }
                Availability::NotYetAvailable if self.is_streaming() => {
                    debug!(page = cursor, "waiting for page data");
                    return;
                }
                Availability::NotYetAvailable => {
                    warn!(page = cursor, "page data did not become available in time");
                    self.fail(DocumentError::DataNotYetAvailable);
                    return;
                }
                Availability::DataError => {
                    warn!(page = cursor, "backend reported corrupt page data");
                    self.fail(DocumentError::InvalidFileFormat);
                    return;
                }
            }
        }

        let metadata = handle.metadata();
        {
            let mut state = self.inner.state.lock();
            state.load_complete = true;
            state.page_count = page_count;
            state.metadata = metadata;
            state.epoch += 1;
        }
        info!(pages = page_count, "document ready");
        self.set_status(Status::Ready);
        if page_count != 0 {
            self.inner
                .events
                .push(DocumentEvent::PageCountChanged(page_count));
        }
        self.inner.events.push(DocumentEvent::MetadataChanged);
    }

    fn fail(&self, err: DocumentError) {
        {
            let mut state = self.inner.state.lock();
            state.handle = None;
            state.load_complete = false;
            state.last_error = Some(err);
        }
        self.set_status(Status::Error);
    }

    /// Drops the handle and everything derived from it without notifying.
    fn discard_handle(&self) {
        let mut state = self.inner.state.lock();
        let had_document = state.handle.is_some() || state.load_complete;
        state.handle = None;
        state.source = None;
        state.load_complete = false;
        state.sweep_cursor = 0;
        state.pages.clear();
        state.metadata = DocumentMetadata::default();
        if had_document {
            state.epoch += 1;
        }
    }

    fn clear_password(&self) {
        let mut state = self.inner.state.lock();
        if state.password.is_empty() {
            return;
        }
        state.password.clear();
        drop(state);
        self.inner.events.push(DocumentEvent::PasswordChanged);
    }

    fn set_status(&self, status: Status) {
        let mut state = self.inner.state.lock();
        if state.status == status {
            return;
        }
        state.status = status;
        drop(state);
        debug!(?status, "document status changed");
        self.inner.events.push(DocumentEvent::StatusChanged(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StreamInfo;
    use crate::testing::{fake_pdf_bytes, FakeBackend, FakePage, FakePdf};
    use std::time::Duration;

    fn three_pages() -> FakePdf {
        FakePdf::new()
            .page(FakePage::blank())
            .page(FakePage::blank())
            .page(FakePage::blank())
    }

    fn statuses(events: &[DocumentEvent]) -> Vec<Status> {
        events
            .iter()
            .filter_map(|event| match event {
                DocumentEvent::StatusChanged(status) => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn load_then_close_walks_the_status_sequence() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        let events = document.events();

        document.load(Source::from_bytes(fake_pdf_bytes(128)));
        assert_eq!(document.status(), Status::Ready);
        assert_eq!(document.page_count(), 3);
        assert!(document.is_load_complete());

        let drained = events.drain();
        assert_eq!(statuses(&drained), vec![Status::Loading, Status::Ready]);
        let ready_at = drained
            .iter()
            .position(|e| *e == DocumentEvent::StatusChanged(Status::Ready))
            .unwrap();
        let count_at = drained
            .iter()
            .position(|e| *e == DocumentEvent::PageCountChanged(3))
            .unwrap();
        assert!(count_at > ready_at);

        document.close();
        let drained = events.drain();
        assert_eq!(statuses(&drained), vec![Status::Unloading, Status::Null]);
        assert!(drained.contains(&DocumentEvent::PageCountChanged(0)));
        assert_eq!(document.page_count(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        document.load(Source::from_bytes(fake_pdf_bytes(128)));
        document.close();
        let events = document.events();
        events.drain();

        document.close();
        assert!(events.is_empty());
        assert_eq!(document.status(), Status::Null);
    }

    #[test]
    fn reload_closes_previous_document_first() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        document.load(Source::from_bytes(fake_pdf_bytes(128)));
        let epoch = document.epoch();
        let events = document.events();
        events.drain();

        document.load(Source::from_bytes(fake_pdf_bytes(128)));
        assert_eq!(
            statuses(&events.drain()),
            vec![Status::Unloading, Status::Null, Status::Loading, Status::Ready]
        );
        assert!(document.epoch() > epoch);
    }

    #[test]
    fn garbage_bytes_fail_with_invalid_format() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        document.load(Source::from_bytes(&b"not a pdf"[..]));
        assert_eq!(document.status(), Status::Error);
        assert_eq!(document.last_error(), Some(DocumentError::InvalidFileFormat));
        assert_eq!(document.page_count(), 0);
    }

    #[test]
    fn wrong_password_requests_a_new_one_and_retry_succeeds() {
        let backend = FakeBackend::shared(three_pages().with_password("secret"));
        let document = Document::new(backend);
        let events = document.events();

        document.set_password("wrong");
        document.load(Source::from_bytes(fake_pdf_bytes(128)));
        assert_eq!(document.status(), Status::Error);
        assert_eq!(document.last_error(), Some(DocumentError::IncorrectPassword));
        let drained = events.drain();
        assert_eq!(
            drained
                .iter()
                .filter(|e| **e == DocumentEvent::PasswordRequired)
                .count(),
            1
        );

        document.set_password("secret");
        assert_eq!(events.drain(), vec![DocumentEvent::PasswordChanged]);
        assert_eq!(document.status(), Status::Error);

        document.load(Source::from_bytes(fake_pdf_bytes(128)));
        assert_eq!(document.status(), Status::Ready);
        assert_eq!(document.last_error(), None);
        assert_eq!(document.page_count(), 3);
    }

    #[test]
    fn setting_the_same_password_is_silent() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        document.set_password("pw");
        let events = document.events();
        events.drain();
        document.set_password("pw");
        assert!(events.is_empty());
    }

    #[test]
    fn close_clears_password() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        document.set_password("pw");
        document.load(Source::from_bytes(fake_pdf_bytes(128)));
        document.close();
        assert_eq!(document.password(), "");
    }

    #[test]
    fn stream_becomes_ready_only_after_last_chunk() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        let bytes = fake_pdf_bytes(10_000);

        document.load(Source::Streaming(StreamInfo::with_length(10_000)));
        assert_eq!(document.status(), Status::Loading);

        document.feed(&bytes[..5_000]);
        assert_eq!(document.status(), Status::Loading);
        assert_eq!(document.page_count(), 0);

        document.feed(&bytes[5_000..]);
        assert_eq!(document.status(), Status::Ready);
        assert_eq!(document.page_count(), 3);
    }

    #[test]
    fn stream_learns_its_length_late() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        let bytes = fake_pdf_bytes(2_000);

        document.load(Source::Streaming(StreamInfo::network_reply()));
        document.feed(&bytes);
        assert_eq!(document.status(), Status::Loading);

        document.set_content_length(2_000);
        assert_eq!(document.status(), Status::Ready);
    }

    #[test]
    fn stream_without_length_hint_fails_immediately() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        document.load(Source::Streaming(StreamInfo::default()));
        assert_eq!(document.status(), Status::Error);
        assert_eq!(document.last_error(), Some(DocumentError::Unknown));
    }

    #[test]
    fn truncated_stream_is_invalid() {
        let document = Document::new(FakeBackend::shared(three_pages()));
        let bytes = fake_pdf_bytes(4_000);

        document.load(Source::Streaming(StreamInfo::with_length(4_000)));
        document.feed(&bytes[..1_000]);
        document.finish_stream();
        assert_eq!(document.status(), Status::Error);
        assert_eq!(document.last_error(), Some(DocumentError::InvalidFileFormat));
    }

    #[test]
    fn streamed_sweep_suspends_until_page_data_arrives() {
        let pdf = three_pages().linearized(512).page_at_offset(2, 3_000);
        let document = Document::new(FakeBackend::shared(pdf));
        let bytes = fake_pdf_bytes(4_000);

        document.load(Source::Streaming(StreamInfo::with_length(4_000)));
        document.feed(&bytes[..1_000]);
        assert_eq!(document.status(), Status::Loading);
        assert!(!document.is_load_complete());

        document.feed(&bytes[1_000..]);
        assert_eq!(document.status(), Status::Ready);
        assert_eq!(document.page_count(), 3);
    }

    #[test]
    fn random_access_page_never_available_times_out() {
        let pdf = three_pages().unavailable_page(1);
        let config = EngineConfig {
            availability_timeout: Duration::from_millis(20),
            availability_poll_interval: Duration::from_millis(1),
            ..EngineConfig::default()
        };
        let document = Document::with_config(FakeBackend::shared(pdf), config);

        document.load(Source::from_bytes(fake_pdf_bytes(128)));
        assert_eq!(document.status(), Status::Error);
        assert_eq!(document.last_error(), Some(DocumentError::DataNotYetAvailable));
    }

    #[test]
    fn corrupt_page_fails_the_load() {
        let pdf = three_pages().corrupt_page(2);
        let document = Document::new(FakeBackend::shared(pdf));
        document.load(Source::from_bytes(fake_pdf_bytes(128)));
        assert_eq!(document.last_error(), Some(DocumentError::InvalidFileFormat));
    }

    #[test]
    fn library_stays_initialized_while_sessions_live() {
        let backend = FakeBackend::new(three_pages());
        let shared: Arc<dyn PdfBackend> = backend.clone();

        let _guard = backend::lock();
        let before = backend::library_users();
        let first = Document::new(Arc::clone(&shared));
        let second = Document::new(Arc::clone(&shared));
        assert_eq!(backend::library_users(), before + 2);

        drop(first);
        assert_eq!(backend::library_users(), before + 1);
        drop(second);
        assert_eq!(backend::library_users(), before);
        if before == 0 {
            assert_eq!(backend.init_calls(), 1);
            assert_eq!(backend.destroy_calls(), 1);
        }
    }
}
