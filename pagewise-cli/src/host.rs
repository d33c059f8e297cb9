use std::path::Path;

use anyhow::{anyhow, Context, Result};
use pagewise_core::{Document, DocumentError, PointF, SearchIndex, Source, Status, StreamInfo};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub page: usize,
    pub index_on_page: usize,
    pub location: PointF,
    pub context_before: String,
    pub context_after: String,
}

/// Loads `path` as a sequential source, feeding it `chunk_size` bytes at a
/// time.
pub async fn stream_file(document: &Document, path: &Path, chunk_size: usize) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {:?}", path))?;
    let length = file.metadata().await?.len();
    stream_into(document, file, Some(length), chunk_size).await
}

pub async fn stream_into<R>(
    document: &Document,
    mut reader: R,
    length: Option<u64>,
    chunk_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let info = match length {
        Some(length) => StreamInfo::with_length(length),
        None => StreamInfo::network_reply(),
    };
    document.load(Source::Streaming(info));

    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut fed = 0u64;
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        document.feed(&buf[..read]);
        fed += read as u64;
        if document.status() == Status::Error {
            break;
        }
        tokio::task::yield_now().await;
    }
    document.finish_stream();
    info!(bytes = fed, status = ?document.status(), "stream finished");
    Ok(())
}

pub fn ensure_ready(document: &Document) -> Result<()> {
    match document.status() {
        Status::Ready => Ok(()),
        status => Err(match document.last_error() {
            Some(DocumentError::IncorrectPassword) => {
                anyhow!("document is password protected; pass the right --password")
            }
            Some(err) => anyhow::Error::new(err).context("failed to open document"),
            None => anyhow!("document did not load (status {:?})", status),
        }),
    }
}

/// Sweeps the whole document for `query`, one page per tick.
pub async fn run_search(document: &Document, query: &str) -> Vec<SearchHit> {
    let mut index = SearchIndex::new(document);
    index.set_query(query);
    let events = index.events();

    let mut ticker = time::interval(index.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while index.is_sweeping() {
        ticker.tick().await;
        index.tick();
        for event in events.drain() {
            debug!(?event, "search progress");
        }
    }

    (0..index.row_count())
        .filter_map(|row| {
            let (page, index_on_page) = index.page_and_index_for_result(row)?;
            let result = index.result_at(row)?;
            Some(SearchHit {
                page,
                index_on_page,
                location: result.location,
                context_before: result.context_before.clone(),
                context_after: result.context_after.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewise_core::testing::{fake_pdf_bytes, FakeBackend, FakePage, FakePdf};

    fn pdf() -> FakePdf {
        FakePdf::new()
            .page(FakePage::with_lines(&["a cat sat"]))
            .page(FakePage::blank())
            .page(FakePage::with_lines(&["cat", "concat"]))
    }

    #[tokio::test]
    async fn streamed_file_becomes_ready() {
        let document = Document::new(FakeBackend::shared(pdf()));
        let bytes = fake_pdf_bytes(10_000);

        stream_into(&document, bytes.as_slice(), Some(10_000), 4096)
            .await
            .unwrap();

        assert_eq!(document.status(), Status::Ready);
        assert!(document.is_load_complete());
        ensure_ready(&document).unwrap();
    }

    #[tokio::test]
    async fn unknown_length_waits_for_end_of_stream() {
        let document = Document::new(FakeBackend::shared(pdf()));
        let bytes = fake_pdf_bytes(3_000);

        stream_into(&document, bytes.as_slice(), None, 1024)
            .await
            .unwrap();

        assert_eq!(document.status(), Status::Ready);
        assert_eq!(document.page_count(), 3);
    }

    #[tokio::test]
    async fn wrong_password_is_reported() {
        let document = Document::new(FakeBackend::shared(pdf().with_password("secret")));
        document.load(Source::from_bytes(fake_pdf_bytes(64)));

        let err = ensure_ready(&document).unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[tokio::test]
    async fn search_sweeps_every_page() {
        let document = Document::new(FakeBackend::shared(pdf()));
        document.load(Source::from_bytes(fake_pdf_bytes(64)));

        let hits = run_search(&document, "cat").await;

        let positions: Vec<_> = hits.iter().map(|hit| (hit.page, hit.index_on_page)).collect();
        assert_eq!(positions, [(0, 0), (2, 0), (2, 1)]);
        assert_eq!(hits[0].context_before, "a ");
    }
}
