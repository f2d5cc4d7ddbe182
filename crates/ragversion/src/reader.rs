//! Content readers: turn a file on disk into the text that gets hashed,
//! versioned and chunked.
//!
//! Readers are looked up by lowercase extension in a [`ReaderRegistry`];
//! anything unregistered goes through the plain-text reader. Text is
//! normalized before it leaves a reader (BOM stripped, CRLF folded to LF) so
//! the same logical content always hashes the same.
//!
//! | Extension | Reader | Writable |
//! |---|---|---|
//! | `txt` and unknown | [`TextReader`] | yes |
//! | `md`, `markdown` | [`MarkdownReader`] | yes |
//! | `pdf` | [`PdfReader`] | no |
//! | `docx` | [`DocxReader`] | no |

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use ragversion_core::{Error, Result};

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("{0} documents are read-only and cannot be written back")]
    ReadOnly(&'static str),
}

/// Text read from disk plus the on-disk size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadContent {
    pub text: String,
    pub size: u64,
}

#[async_trait]
pub trait ContentReader: Send + Sync {
    fn name(&self) -> &'static str;

    async fn read(&self, path: &Path) -> Result<ReadContent>;

    /// Write `text` back to `path`. Extraction-only formats refuse.
    async fn write(&self, path: &Path, text: &str) -> Result<()> {
        let _ = (path, text);
        Err(Error::other(ExtractError::ReadOnly(self.name())))
    }
}

/// Strip a UTF-8 BOM and fold CRLF line endings to LF.
pub fn normalize_text(text: &str) -> String {
    text.strip_prefix('\u{feff}')
        .unwrap_or(text)
        .replace("\r\n", "\n")
}

/// Decode bytes as UTF-8, falling back to Latin-1 (every byte is a code point).
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// Lowercase extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::parsing(path, e))
}

async fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
    }
    tokio::fs::write(path, text)
        .await
        .map_err(|e| Error::io(path, e))
}

pub struct TextReader;

#[async_trait]
impl ContentReader for TextReader {
    fn name(&self) -> &'static str {
        "text"
    }

    async fn read(&self, path: &Path) -> Result<ReadContent> {
        let bytes = read_bytes(path).await?;
        let size = bytes.len() as u64;
        Ok(ReadContent {
            text: normalize_text(&decode_text(bytes)),
            size,
        })
    }

    async fn write(&self, path: &Path, text: &str) -> Result<()> {
        write_text(path, text).await
    }
}

/// Markdown is versioned as source text; rendering is left to consumers.
pub struct MarkdownReader;

#[async_trait]
impl ContentReader for MarkdownReader {
    fn name(&self) -> &'static str {
        "markdown"
    }

    async fn read(&self, path: &Path) -> Result<ReadContent> {
        let bytes = read_bytes(path).await?;
        let size = bytes.len() as u64;
        let text = String::from_utf8(bytes).map_err(|e| Error::parsing(path, e))?;
        Ok(ReadContent {
            text: normalize_text(&text),
            size,
        })
    }

    async fn write(&self, path: &Path, text: &str) -> Result<()> {
        write_text(path, text).await
    }
}

pub struct PdfReader;

#[async_trait]
impl ContentReader for PdfReader {
    fn name(&self) -> &'static str {
        "pdf"
    }

    async fn read(&self, path: &Path) -> Result<ReadContent> {
        let bytes = read_bytes(path).await?;
        let size = bytes.len() as u64;
        let text = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        })
        .await
        .map_err(Error::other)?
        .map_err(|e| Error::parsing(path, e))?;
        Ok(ReadContent {
            text: normalize_text(&text),
            size,
        })
    }
}

pub struct DocxReader;

#[async_trait]
impl ContentReader for DocxReader {
    fn name(&self) -> &'static str {
        "docx"
    }

    async fn read(&self, path: &Path) -> Result<ReadContent> {
        let bytes = read_bytes(path).await?;
        let size = bytes.len() as u64;
        let text = tokio::task::spawn_blocking(move || extract_docx(&bytes))
            .await
            .map_err(Error::other)?
            .map_err(|e| Error::parsing(path, e))?;
        Ok(ReadContent {
            text: normalize_text(&text),
            size,
        })
    }
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraph_text(&xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn extract_paragraph_text(xml: &[u8]) -> std::result::Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Extension-keyed reader lookup with a plain-text fallback.
#[derive(Clone)]
pub struct ReaderRegistry {
    readers: HashMap<String, Arc<dyn ContentReader>>,
    fallback: Arc<dyn ContentReader>,
}

impl ReaderRegistry {
    /// A registry with only the text fallback.
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
            fallback: Arc::new(TextReader),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let markdown: Arc<dyn ContentReader> = Arc::new(MarkdownReader);
        registry.register("txt", Arc::new(TextReader));
        registry.register("md", markdown.clone());
        registry.register("markdown", markdown);
        registry.register("pdf", Arc::new(PdfReader));
        registry.register("docx", Arc::new(DocxReader));
        registry
    }

    /// Register (or replace) the reader for an extension, with or without the dot.
    pub fn register(&mut self, extension: &str, reader: Arc<dyn ContentReader>) {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();
        self.readers.insert(key, reader);
    }

    pub fn for_path(&self, path: &Path) -> Arc<dyn ContentReader> {
        extension_of(path)
            .and_then(|ext| self.readers.get(&ext).cloned())
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub async fn read(&self, path: &Path) -> Result<ReadContent> {
        self.for_path(path).read(path).await
    }

    pub async fn write(&self, path: &Path, text: &str) -> Result<()> {
        self.for_path(path).write(path, text).await
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
