use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use directories::ProjectDirs;
use pagewise_core::{
    document_id_for_path, Document, EngineConfig, LinkTable, OutlineNode, OutlineTree,
    PageNavigation, PointF, Selection, Source, TextLocator,
};
use pagewise_pdfium::PdfiumBackend;
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

mod host;

/// Filter directives for the log file, e.g. `PAGEWISE_LOG=pagewise_core=debug`.
const LOG_ENV: &str = "PAGEWISE_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "pagewise",
    version,
    about = "Inspect PDF documents: metadata, page labels, outline, links, text and search"
)]
struct Args {
    /// Path to the PDF file
    file: PathBuf,

    /// Password for encrypted documents
    #[arg(long)]
    password: Option<String>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Load the file as a sequential stream, fed in chunks of this many bytes
    #[arg(long, value_name = "BYTES")]
    stream: Option<usize>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Echo more of the log on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Document identity, page count and metadata
    Info,
    /// Label and size of every page
    Labels,
    /// Bookmark tree
    Outline,
    /// Links on a page
    Links {
        /// Page index (0-based)
        #[arg(short, long, default_value_t = 0)]
        page: usize,
    },
    /// Text of a page, or of the span between two points on it
    Text {
        /// Page index (0-based)
        #[arg(short, long, default_value_t = 0)]
        page: usize,
        /// Selection start as X,Y in points from the top-left corner
        #[arg(long, value_parser = parse_point, requires = "to")]
        from: Option<PointF>,
        /// Selection end as X,Y
        #[arg(long, value_parser = parse_point)]
        to: Option<PointF>,
    },
    /// Search every page for a string, ignoring case
    Search { query: String },
    /// Resolve a page label to its page
    Goto { label: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = EngineConfig::project_dirs()
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs, args.verbose)?;

    let config = match args.config.clone().or_else(EngineConfig::default_path) {
        Some(path) => EngineConfig::load_or_default(&path)?,
        None => EngineConfig::default(),
    };
    let backend = Arc::new(PdfiumBackend::new(config.pdfium_library_path.clone())?);
    let document = Document::with_config(backend, config);
    if let Some(password) = &args.password {
        document.set_password(password.clone());
    }

    match args.stream {
        Some(chunk_size) => host::stream_file(&document, &args.file, chunk_size).await?,
        None => document.load(
            Source::from_file(&args.file)
                .with_context(|| format!("failed to open {:?}", args.file))?,
        ),
    }
    host::ensure_ready(&document)?;

    let printer = Printer { json: args.json };
    match args.command {
        Command::Info => print_info(&printer, &document, &args.file)?,
        Command::Labels => print_labels(&printer, &document)?,
        Command::Outline => print_outline(&printer, &document)?,
        Command::Links { page } => print_links(&printer, &document, page)?,
        Command::Text { page, from, to } => print_text(&printer, &document, page, from, to)?,
        Command::Search { query } => {
            let hits = host::run_search(&document, &query).await;
            printer.emit(&hits, || {
                if hits.is_empty() {
                    println!("no matches for {:?}", query);
                }
                for hit in &hits {
                    println!(
                        "p{} #{}: {}[{}]{}",
                        hit.page + 1,
                        hit.index_on_page + 1,
                        hit.context_before,
                        query,
                        hit.context_after
                    );
                }
            })?;
        }
        Command::Goto { label } => {
            let page = document
                .pages()
                .page_index_for_label(&label)
                .ok_or_else(|| anyhow!("no page is labelled {:?}", label))?;
            let mut navigation = PageNavigation::new(&document);
            navigation.go_to_page(page);
            let current = navigation.current_page();
            let count = navigation.page_count();
            printer.emit(&current, || println!("page {}/{}", current + 1, count))?;
        }
    }

    document.close();
    Ok(())
}

struct Printer {
    json: bool,
}

impl Printer {
    fn emit<T: Serialize + ?Sized>(&self, value: &T, text: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text();
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct InfoReport {
    id: String,
    path: PathBuf,
    page_count: usize,
    load_complete: bool,
    metadata: pagewise_core::DocumentMetadata,
}

fn print_info(printer: &Printer, document: &Document, path: &Path) -> Result<()> {
    let report = InfoReport {
        id: document_id_for_path(path).to_string(),
        path: path.to_path_buf(),
        page_count: document.page_count(),
        load_complete: document.is_load_complete(),
        metadata: document.metadata(),
    };
    printer.emit(&report, || {
        println!("id:        {}", report.id);
        println!("pages:     {}", report.page_count);
        let meta = &report.metadata;
        for (name, value) in [
            ("title", &meta.title),
            ("author", &meta.author),
            ("subject", &meta.subject),
            ("creator", &meta.creator),
            ("producer", &meta.producer),
            ("created", &meta.creation_date),
            ("modified", &meta.modification_date),
        ] {
            if let Some(value) = value {
                println!("{:<10} {}", format!("{name}:"), value);
            }
        }
        if !meta.keywords.is_empty() {
            println!("keywords:  {}", meta.keywords.join(", "));
        }
    })
}

#[derive(Serialize)]
struct PageRow {
    page: usize,
    label: String,
    width: f64,
    height: f64,
}

fn print_labels(printer: &Printer, document: &Document) -> Result<()> {
    let catalog = document.pages();
    let rows: Vec<PageRow> = (0..document.page_count())
        .map(|page| {
            let size = catalog.point_size(page);
            PageRow {
                page,
                label: catalog.page_label(page),
                width: size.width,
                height: size.height,
            }
        })
        .collect();
    printer.emit(&rows, || {
        for row in &rows {
            println!(
                "{:>5}  {:<8} {:.0}x{:.0} pt",
                row.page, row.label, row.width, row.height
            );
        }
    })
}

fn print_outline(printer: &Printer, document: &Document) -> Result<()> {
    let mut tree = OutlineTree::new(document);
    let catalog = document.pages();
    printer.emit(tree.roots(), || {})?;
    if !printer.json {
        let nodes = tree.flatten();
        if nodes.is_empty() {
            println!("no outline");
        }
        for node in nodes {
            println!("{}", format_outline_line(node, |page| catalog.page_label(page)));
        }
    }
    Ok(())
}

fn format_outline_line(node: &OutlineNode, label: impl Fn(usize) -> String) -> String {
    let indent = "  ".repeat(node.level.min(8));
    match node.page {
        Some(page) => format!("{indent}{} (p{})", node.title, label(page)),
        None => format!("{indent}{}", node.title),
    }
}

fn print_links(printer: &Printer, document: &Document, page: usize) -> Result<()> {
    let mut table = LinkTable::new(document);
    table.set_page(page);
    let links = table.links();
    printer.emit(links, || {
        if links.is_empty() {
            println!("no links on page {}", page);
        }
        for link in links {
            let rect = link.rect;
            let target = match (link.destination.url_str(), link.destination.page_index()) {
                (Some(url), _) => url.to_string(),
                (None, Some(page)) => format!("page {}", page + 1),
                (None, None) => String::from("?"),
            };
            println!(
                "[{:.0},{:.0} {:.0}x{:.0}] -> {}",
                rect.left(),
                rect.top(),
                rect.width,
                rect.height,
                target
            );
        }
    })
}

fn print_text(
    printer: &Printer,
    document: &Document,
    page: usize,
    from: Option<PointF>,
    to: Option<PointF>,
) -> Result<()> {
    let locator = TextLocator::new(document);
    let selection: Option<Selection> = match (from, to) {
        (Some(start), Some(end)) => locator.selection_between(page, start, end),
        _ => locator.all_text(page),
    };
    let selection = selection.ok_or_else(|| anyhow!("no text selected on page {}", page))?;
    printer.emit(&selection, || println!("{}", selection.text))
}

fn parse_point(raw: &str) -> Result<PointF, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got {:?}", raw))?;
    let coordinate = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|err| format!("invalid coordinate {:?}: {}", value, err))
    };
    Ok(PointF::new(coordinate(x)?, coordinate(y)?))
}

/// Logs to a daily file under the data directory, filtered by
/// `PAGEWISE_LOG`, and echoes warnings (more with `-v`) on stderr.
fn init_logging(project_dirs: &ProjectDirs, verbose: u8) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "pagewise.log"));
    let file_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(file_filter);
    // stdout carries command output
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(console_level(verbose));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

fn console_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_parse_with_spaces() {
        assert_eq!(parse_point("72, 90.5"), Ok(PointF::new(72.0, 90.5)));
        assert!(parse_point("72").is_err());
        assert!(parse_point("a,b").is_err());
    }

    #[test]
    fn outline_lines_indent_by_level() {
        let node = OutlineNode {
            title: "Section".into(),
            level: 1,
            page: Some(2),
            ..OutlineNode::default()
        };
        assert_eq!(format_outline_line(&node, |page| format!("{}", page + 1)), "  Section (p3)");

        let heading = OutlineNode {
            title: "Appendix".into(),
            ..OutlineNode::default()
        };
        assert_eq!(format_outline_line(&heading, |_| String::new()), "Appendix");
    }

    #[test]
    fn verbosity_flags_raise_the_console_level() {
        let args = Args::try_parse_from(["pagewise", "paper.pdf", "info"]).unwrap();
        assert_eq!(console_level(args.verbose), LevelFilter::WARN);

        let args = Args::try_parse_from(["pagewise", "paper.pdf", "search", "cat", "-vv"]).unwrap();
        assert_eq!(console_level(args.verbose), LevelFilter::DEBUG);
        assert_eq!(console_level(7), LevelFilter::TRACE);
    }
}
