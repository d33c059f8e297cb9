use std::env;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod backend;
mod catalog;
pub mod config;
mod destination;
mod document;
pub mod error;
mod events;
pub mod geometry;
mod links;
mod navigation;
mod outline;
mod search;
pub mod source;
pub mod text;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use backend::{Availability, BackendDocument, PdfBackend};
pub use catalog::PageCatalog;
pub use config::EngineConfig;
pub use destination::{Destination, FieldValue, Target};
pub use document::{Document, DocumentEvent, Status};
pub use error::{BackendError, DocumentError};
pub use events::EventQueue;
pub use geometry::{PointF, RectF, SizeF};
pub use links::{Link, LinkEvent, LinkField, LinkTable};
pub use navigation::{NavigationEvent, NavigationHistory, PageNavigation, PageNavigationEvent};
pub use outline::{OutlineEvent, OutlineField, OutlineNode, OutlineTree, MAX_OUTLINE_DEPTH, MAX_OUTLINE_NODES};
pub use search::{SearchEvent, SearchField, SearchIndex};
pub use source::{ByteSource, FileSource, MemorySource, Source, StreamInfo};
pub use text::{Selection, TextLocator, TextPosition, TextRange};

pub type DocumentId = Uuid;

const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x3d0f6c4e_2a8b_5d71_9e43_6b1c0a7f5e29);

/// Stable identifier for the file at `path`, independent of how the path was
/// spelled. Existing files are identified by their canonical path, so links
/// resolve; paths that do not exist yet are made absolute against the working
/// directory and normalized without touching the filesystem.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path.canonicalize().unwrap_or_else(|_| {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        normalize_lexically(&absolute)
    });
    Uuid::new_v5(&DOCUMENT_NAMESPACE, resolved.to_string_lossy().as_bytes())
}

/// Drops `.` components and folds `..` into the preceding component.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                None | Some(Component::ParentDir) => normalized.push(component),
                Some(_) => {
                    normalized.pop();
                }
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// Information dictionary of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
}

impl DocumentMetadata {
    /// Splits a raw comma-separated keyword entry.
    pub fn parse_keywords(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|keyword| !keyword.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn document_id_ignores_path_spelling() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("paper.pdf");
        std::fs::write(&file, testing::fake_pdf_bytes(16)).unwrap();
        let dotted = dir.path().join(".").join("paper.pdf");

        assert_eq!(document_id_for_path(&file), document_id_for_path(&dotted));
        assert_ne!(
            document_id_for_path(&file),
            document_id_for_path(&dir.path().join("other.pdf"))
        );
    }

    #[test]
    fn missing_files_are_identified_by_their_normalized_path() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("drafts").join("paper.pdf");
        let winding = dir
            .path()
            .join("drafts")
            .join(".")
            .join("old")
            .join("..")
            .join("paper.pdf");
        assert_eq!(document_id_for_path(&plain), document_id_for_path(&winding));
    }

    #[test]
    fn lexical_normalization_keeps_leading_parent_components() {
        assert_eq!(
            normalize_lexically(Path::new("../a/./b/../c.pdf")),
            PathBuf::from("../a/c.pdf")
        );
        assert_eq!(normalize_lexically(Path::new("../../c.pdf")), PathBuf::from("../../c.pdf"));
        assert_eq!(normalize_lexically(Path::new("/x/../y")), PathBuf::from("/y"));
    }

    #[test]
    fn keywords_are_trimmed_and_non_empty() {
        assert_eq!(
            DocumentMetadata::parse_keywords(" pdf, viewer ,,rust"),
            vec!["pdf", "viewer", "rust"]
        );
    }

    #[test]
    fn metadata_is_exposed_once_ready() {
        use testing::{FakeBackend, FakePage, FakePdf};

        let pdf = FakePdf::new().page(FakePage::blank()).with_title("Manual");
        let document = Document::new(FakeBackend::shared(pdf));
        assert_eq!(document.metadata(), DocumentMetadata::default());

        document.load(Source::from_bytes(testing::fake_pdf_bytes(32)));
        assert_eq!(document.metadata().title.as_deref(), Some("Manual"));
        assert!(document.events().drain().contains(&DocumentEvent::MetadataChanged));

        document.close();
        assert_eq!(document.metadata().title, None);
    }
}
