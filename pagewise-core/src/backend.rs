//! Contract with the external PDF library and the lock that serializes it.
//!
//! The library keeps global state and is not safe to call concurrently, even
//! across unrelated documents. Every call goes through [`lock`], a single
//! process-wide reentrant mutex; reentrancy lets a locked operation (the
//! completeness sweep, for example) call other locked operations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde::Serialize;
use tracing::debug;

use crate::error::{BackendError, DocumentError};
use crate::geometry::{RectF, SizeF};
use crate::source::ByteSource;
use crate::text::TextPage;
use crate::DocumentMetadata;

static BACKEND_LOCK: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));
static LIBRARY_USERS: AtomicUsize = AtomicUsize::new(0);

pub type BackendGuard = ReentrantMutexGuard<'static, ()>;

pub fn lock() -> BackendGuard {
    BACKEND_LOCK.lock()
}

/// Number of live sessions keeping the library initialized.
pub fn library_users() -> usize {
    LIBRARY_USERS.load(Ordering::SeqCst)
}

/// Backend answer to "is this data usable yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Availability {
    Available,
    NotYetAvailable,
    DataError,
}

/// Opaque identity of an outline entry, stable for the lifetime of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookmarkKey(pub u64);

/// Destination as reported by the backend, in page points with the origin at
/// the top-left corner. Missing hints stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDestination {
    pub page: Option<usize>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub zoom: Option<f64>,
}

impl RawDestination {
    pub fn page(page: usize) -> Self {
        Self {
            page: Some(page),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBookmark {
    pub title: String,
    pub destination: Option<RawDestination>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawLinkAction {
    GoTo(RawDestination),
    Uri(String),
    /// Launch or remote go-to; carries the referenced file path.
    Launch(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawLink {
    /// `None` when the annotation has no usable bounding box.
    pub rect: Option<RectF>,
    pub action: RawLinkAction,
}

pub trait PdfBackend: Send + Sync {
    /// Called under the backend lock when the first session starts.
    fn init_library(&self) {}

    /// Called under the backend lock after the last session is dropped.
    fn destroy_library(&self) {}

    fn is_document_available(&self, source: &dyn ByteSource) -> Availability {
        if source.is_data_available(0, source.len()) {
            Availability::Available
        } else {
            Availability::NotYetAvailable
        }
    }

    fn open(
        &self,
        source: Arc<dyn ByteSource>,
        password: Option<&str>,
    ) -> Result<Box<dyn BackendDocument>, DocumentError>;
}

/// An open document handle. Only [`crate::Document`] owns one.
pub trait BackendDocument: Send + Sync {
    fn page_count(&self) -> usize;

    fn page_size(&self, page: usize) -> Option<SizeF>;

    fn is_page_available(&self, _page: usize) -> Availability {
        Availability::Available
    }

    fn page_label(&self, _page: usize) -> Option<String> {
        None
    }

    fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata::default()
    }

    fn load_text_page(&self, page: usize) -> Result<Box<dyn TextPage>, BackendError>;

    /// First child of `parent`, or the first top-level entry for `None`.
    fn first_bookmark(&self, _parent: Option<BookmarkKey>) -> Option<BookmarkKey> {
        None
    }

    fn next_bookmark(&self, _sibling: BookmarkKey) -> Option<BookmarkKey> {
        None
    }

    fn bookmark(&self, _key: BookmarkKey) -> Option<RawBookmark> {
        None
    }

    fn link_annotations(&self, _page: usize) -> Result<Vec<RawLink>, BackendError> {
        Ok(Vec::new())
    }
}

/// Keeps the backend library initialized while at least one session lives.
pub(crate) struct LibraryLease {
    backend: Arc<dyn PdfBackend>,
}

impl LibraryLease {
    pub(crate) fn acquire(backend: Arc<dyn PdfBackend>) -> Self {
        let _guard = lock();
        if LIBRARY_USERS.fetch_add(1, Ordering::SeqCst) == 0 {
            debug!("initializing pdf backend library");
            backend.init_library();
        }
        Self { backend }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn PdfBackend> {
        &self.backend
    }
}

impl Drop for LibraryLease {
    fn drop(&mut self) {
        let _guard = lock();
        if LIBRARY_USERS.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("releasing pdf backend library");
            self.backend.destroy_library();
        }
    }
}
