use std::convert::TryFrom;
use std::env;
use std::ffi::OsString;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use pagewise_core::backend::{
    BackendDocument, BookmarkKey, PdfBackend, RawBookmark, RawDestination, RawLink, RawLinkAction,
};
use pagewise_core::source::{read_to_vec, ByteSource};
use pagewise_core::text::{Glyph, GlyphPage, TextPage};
use pagewise_core::{BackendError, DocumentError, DocumentMetadata, RectF, SizeF};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

mod outline;

use outline::{OutlineArena, OutlineCursor};

/// Directory searched for the pdfium library before the usual places.
pub const LIBRARY_DIR_ENV: &str = "PAGEWISE_PDFIUM_DIR";

/// [`PdfBackend`] over the pdfium library.
///
/// The library is bound on construction so a missing or broken library is
/// reported before any document is opened.
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
    pdfium: Mutex<Option<Arc<Pdfium>>>,
}

impl PdfiumBackend {
    pub fn new(library_path: Option<PathBuf>) -> Result<Self> {
        let pdfium = bind_pdfium(library_path.as_deref())?;
        Ok(Self {
            library_path,
            pdfium: Mutex::new(Some(Arc::new(pdfium))),
        })
    }

    fn pdfium(&self) -> Result<Arc<Pdfium>, DocumentError> {
        let mut guard = self.pdfium.lock();
        if let Some(pdfium) = guard.as_ref() {
            return Ok(Arc::clone(pdfium));
        }
        let pdfium = bind_pdfium(self.library_path.as_deref()).map_err(|err| {
            warn!(%err, "failed to bind pdfium");
            DocumentError::Unknown
        })?;
        let pdfium = Arc::new(pdfium);
        *guard = Some(Arc::clone(&pdfium));
        Ok(pdfium)
    }
}

impl PdfBackend for PdfiumBackend {
    fn init_library(&self) {
        if let Err(err) = self.pdfium() {
            warn!(%err, "pdfium unavailable");
        }
    }

    fn destroy_library(&self) {
        // Open documents keep their own reference to the bindings.
        self.pdfium.lock().take();
    }

    #[instrument(skip(self, source, password), fields(bytes = source.len()))]
    fn open(
        &self,
        source: Arc<dyn ByteSource>,
        password: Option<&str>,
    ) -> Result<Box<dyn BackendDocument>, DocumentError> {
        let pdfium = self.pdfium()?;
        let bytes =
            read_to_vec(source.as_ref()).map_err(|err| BackendError::from(err).document_error())?;
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, password)
            .map_err(|err| {
                debug!(?err, "pdfium refused document");
                document_error(&err)
            })?;
        // SAFETY: the PdfDocument borrows the bindings owned by `pdfium`. The Arc is moved into
        // the same PdfiumDocument, whose `document` field is declared before `pdfium` and so is
        // dropped first. The Arc's allocation does not move, keeping the borrow valid for as long
        // as the document lives.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(Box::new(PdfiumDocument {
            document: Mutex::new(document),
            outline: Mutex::new(None),
            pdfium,
        }))
    }
}

struct PdfiumDocument {
    document: Mutex<PdfDocument<'static>>,
    outline: Mutex<Option<Arc<OutlineArena>>>,
    pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn with_page<R, F>(&self, page: usize, f: F) -> Result<R, BackendError>
    where
        F: FnOnce(&PdfDocument<'static>, &PdfPage<'_>) -> Result<R, PdfiumError>,
    {
        let index: PdfPageIndex = page.try_into().map_err(|_| BackendError::Page(page))?;
        let document = self.document.lock();
        let pdf_page = document.pages().get(index).map_err(|err| {
            warn!(?err, page, "failed to load page");
            BackendError::Page(page)
        })?;
        f(&*document, &pdf_page).map_err(|err| BackendError::Text {
            page,
            reason: err.to_string(),
        })
    }

    /// The bookmark tree, read from pdfium on first use.
    fn outline(&self) -> Arc<OutlineArena> {
        let mut slot = self.outline.lock();
        if let Some(arena) = slot.as_ref() {
            return Arc::clone(arena);
        }
        let arena = {
            let document = self.document.lock();
            let root = document.bookmarks().root().map(|bookmark| BookmarkCursor {
                bookmark,
                document: &*document,
            });
            Arc::new(OutlineArena::build(root))
        };
        debug!(entries = arena.len(), "outline read");
        *slot = Some(Arc::clone(&arena));
        arena
    }
}

struct BookmarkCursor<'a, 'd> {
    bookmark: PdfBookmark<'a>,
    document: &'d PdfDocument<'static>,
}

impl OutlineCursor for BookmarkCursor<'_, '_> {
    fn entry_title(&self) -> String {
        self.bookmark.title().unwrap_or_default()
    }

    fn entry_destination(&self) -> Option<RawDestination> {
        self.bookmark
            .destination()
            .map(|destination| raw_destination(self.document, &destination))
    }

    fn first_child_entry(&self) -> Option<Self> {
        self.bookmark.first_child().map(|bookmark| Self {
            bookmark,
            document: self.document,
        })
    }

    fn next_sibling_entry(&self) -> Option<Self> {
        self.bookmark.next_sibling().map(|bookmark| Self {
            bookmark,
            document: self.document,
        })
    }
}

impl BackendDocument for PdfiumDocument {
    fn page_count(&self) -> usize {
        usize::try_from(self.document.lock().pages().len()).unwrap_or_default()
    }

    fn page_size(&self, page: usize) -> Option<SizeF> {
        self.with_page(page, |_, pdf_page| {
            Ok(SizeF::new(
                f64::from(pdf_page.width().value),
                f64::from(pdf_page.height().value),
            ))
        })
        .ok()
    }

    fn page_label(&self, page: usize) -> Option<String> {
        self.with_page(page, |_, pdf_page| Ok(pdf_page.label().map(|label| label.to_string())))
            .ok()
            .flatten()
    }

    fn metadata(&self) -> DocumentMetadata {
        let document = self.document.lock();
        let metadata = document.metadata();
        let tag = |tag_type| metadata.get(tag_type).map(|t| t.value().to_owned());

        DocumentMetadata {
            title: tag(PdfDocumentMetadataTagType::Title),
            author: tag(PdfDocumentMetadataTagType::Author),
            subject: tag(PdfDocumentMetadataTagType::Subject),
            keywords: tag(PdfDocumentMetadataTagType::Keywords)
                .map(|raw| DocumentMetadata::parse_keywords(&raw))
                .unwrap_or_default(),
            creator: tag(PdfDocumentMetadataTagType::Creator),
            producer: tag(PdfDocumentMetadataTagType::Producer),
            creation_date: tag(PdfDocumentMetadataTagType::CreationDate),
            modification_date: tag(PdfDocumentMetadataTagType::ModificationDate),
        }
    }

    fn load_text_page(&self, page: usize) -> Result<Box<dyn TextPage>, BackendError> {
        let glyphs = self.with_page(page, |_, pdf_page| {
            let page_height = f64::from(pdf_page.height().value);
            let text = pdf_page.text()?;
            let chars = text.chars();
            let glyphs = chars
                .iter()
                .filter_map(|text_char| {
                    let ch = text_char.unicode_char()?;
                    let bounds = text_char
                        .loose_bounds()
                        .map(|rect| to_page_space(&rect, page_height))
                        .unwrap_or_default();
                    Some(Glyph::new(ch, bounds))
                })
                .collect::<Vec<_>>();
            Ok(glyphs)
        })?;
        Ok(Box::new(GlyphPage::new(glyphs)))
    }

    fn first_bookmark(&self, parent: Option<BookmarkKey>) -> Option<BookmarkKey> {
        self.outline().first_child(parent)
    }

    fn next_bookmark(&self, sibling: BookmarkKey) -> Option<BookmarkKey> {
        self.outline().next_sibling(sibling)
    }

    fn bookmark(&self, key: BookmarkKey) -> Option<RawBookmark> {
        self.outline().bookmark(key)
    }

    fn link_annotations(&self, page: usize) -> Result<Vec<RawLink>, BackendError> {
        self.with_page(page, |document, pdf_page| {
            let page_height = f64::from(pdf_page.height().value);
            let mut raw_links = Vec::new();
            let links = pdf_page.links();
            for link in links.iter() {
                let rect = match link.rect() {
                    Ok(rect) => Some(to_page_space(&rect, page_height)),
                    Err(err) => {
                        debug!(?err, page, "link has no rectangle");
                        None
                    }
                };
                let Some(action) = link_action(document, &link) else {
                    debug!(page, "skipping link with unsupported action");
                    continue;
                };
                raw_links.push(RawLink { rect, action });
            }
            Ok(raw_links)
        })
    }
}

fn link_action(document: &PdfDocument<'_>, link: &PdfLink<'_>) -> Option<RawLinkAction> {
    if let Some(action) = link.action() {
        match action.action_type() {
            PdfActionType::GoToDestinationInSameDocument => {
                if let Some(local) = action.as_local_destination_action() {
                    if let Ok(destination) = local.destination() {
                        return Some(RawLinkAction::GoTo(raw_destination(document, &destination)));
                    }
                }
            }
            PdfActionType::Uri => {
                if let Some(uri_action) = action.as_uri_action() {
                    if let Ok(uri) = uri_action.uri() {
                        return Some(RawLinkAction::Uri(uri));
                    }
                }
            }
            // the bindings expose no file path for these
            PdfActionType::Launch | PdfActionType::GoToDestinationInRemoteDocument => {
                debug!(action = ?action.action_type(), "link targets another file");
                return None;
            }
            _ => {}
        }
    }

    link.destination()
        .map(|destination| RawLinkAction::GoTo(raw_destination(document, &destination)))
}

fn raw_destination(document: &PdfDocument<'_>, destination: &PdfDestination<'_>) -> RawDestination {
    let Some(page) = destination
        .page_index()
        .ok()
        .and_then(|index| usize::try_from(index).ok())
    else {
        return RawDestination::default();
    };
    match destination.view_settings() {
        Ok(PdfDestinationViewSettings::SpecificCoordinatesAndZoom(x, y, zoom)) => view_from_hints(
            page,
            x.map(|x| f64::from(x.value)),
            y.map(|y| f64::from(y.value)),
            zoom.map(f64::from),
            page_height(document, page),
        ),
        _ => RawDestination::page(page),
    }
}

/// Destination from pdfium's location hints. `y` is flipped to a top-left
/// origin, which needs the target page's height; a zoom of 0 means "keep the
/// current zoom" and is dropped.
fn view_from_hints(
    page: usize,
    x: Option<f64>,
    y: Option<f64>,
    zoom: Option<f64>,
    page_height: Option<f64>,
) -> RawDestination {
    RawDestination {
        page: Some(page),
        x,
        y: y.zip(page_height).map(|(y, height)| height - y),
        zoom: zoom.filter(|zoom| *zoom > 0.0),
    }
}

fn page_height(document: &PdfDocument<'_>, page: usize) -> Option<f64> {
    let index: PdfPageIndex = page.try_into().ok()?;
    let pdf_page = document.pages().get(index).ok()?;
    Some(f64::from(pdf_page.height().value))
}

/// Converts a rectangle from PDF user space (origin bottom-left) to page
/// space (origin top-left).
fn to_page_space(rect: &PdfRect, page_height: f64) -> RectF {
    flip_edges(
        f64::from(rect.left().value),
        f64::from(rect.top().value),
        f64::from(rect.right().value),
        f64::from(rect.bottom().value),
        page_height,
    )
}

fn flip_edges(left: f64, top: f64, right: f64, bottom: f64, page_height: f64) -> RectF {
    RectF::from_edges(left, page_height - top, right, page_height - bottom)
}

fn document_error(err: &PdfiumError) -> DocumentError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(internal) => match internal {
            PdfiumInternalError::FileError => DocumentError::FileNotFound,
            PdfiumInternalError::FormatError => DocumentError::InvalidFileFormat,
            PdfiumInternalError::PasswordError => DocumentError::IncorrectPassword,
            PdfiumInternalError::SecurityError => DocumentError::UnsupportedSecurityScheme,
            _ => DocumentError::Unknown,
        },
        _ => DocumentError::Unknown,
    }
}

fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium> {
    match library_path {
        Some(path) => bind_pdfium_at(path),
        None => bind_pdfium_default(),
    }
}

fn bind_pdfium_at(path: &Path) -> Result<Pdfium> {
    let library = if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    };
    Pdfium::bind_to_library(&library)
        .map(Pdfium::new)
        .map_err(|err| anyhow!("failed to load pdfium from {}: {}", library.display(), err))
}

/// Tries each candidate directory in turn, then the system library.
fn bind_pdfium_default() -> Result<Pdfium> {
    let exe_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let candidates = library_search_dirs(env::var_os(LIBRARY_DIR_ENV), exe_dir);

    let mut failures = Vec::new();
    for dir in &candidates {
        let library = Pdfium::pdfium_platform_library_name_at_path(dir);
        if !library.exists() {
            continue;
        }
        match Pdfium::bind_to_library(&library) {
            Ok(bindings) => {
                debug!(library = %library.display(), "bound pdfium");
                return Ok(Pdfium::new(bindings));
            }
            Err(err) => failures.push(format!("{}: {}", library.display(), err)),
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|err| {
            failures.push(format!("system library: {err}"));
            anyhow!(
                "no usable pdfium library (looked in {}); set pdfium_library_path or {}: {}",
                display_dirs(&candidates),
                LIBRARY_DIR_ENV,
                failures.join("; ")
            )
        })
}

/// Directories searched for the platform pdfium library, in order:
/// `$PAGEWISE_PDFIUM_DIR`, the executable's directory and the working
/// directory. Duplicates are dropped.
fn library_search_dirs(env_dir: Option<OsString>, exe_dir: Option<PathBuf>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    let candidates = env_dir
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .into_iter()
        .chain(exe_dir)
        .chain(Some(PathBuf::from(".")));
    for dir in candidates {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

fn display_dirs(dirs: &[PathBuf]) -> String {
    dirs.iter()
        .map(|dir| dir.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
