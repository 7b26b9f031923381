//! Document download and text extraction.
//!
//! Content type is resolved exactly once at this boundary: the rest of the
//! pipeline only ever sees extracted text. Tables found in page text are
//! re-serialized into a delimited, line-oriented form so chunking and
//! prompts can distinguish tabular data from prose.
//!
//! No caching happens here; that is the engine's responsibility.

use async_trait::async_trait;
use std::io::Read;
use std::time::Duration;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{FetchError, ParseError, Result};

/// Markers wrapping serialized tables in extracted text.
pub const TABLE_START: &str = "--- TABLE START ---";
pub const TABLE_END: &str = "--- TABLE END ---";

/// Recognized document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

/// Document content, resolved once at the fetch boundary.
#[derive(Debug)]
pub enum DocumentContent {
    RawBytes { kind: DocumentKind, bytes: Vec<u8> },
    ExtractedText(String),
}

/// Source of document text for the engine.
///
/// The engine depends on this trait rather than on the HTTP fetcher so
/// tests can substitute a counting or canned source.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Download and extract the plain text of the document at `url`.
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// HTTP(S) document fetcher backed by `reqwest`.
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpDocumentFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>> {
        tracing::info!(url = %url, "Downloading document");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        timeout_secs: self.config.timeout_secs,
                    }
                } else {
                    FetchError::Connection {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            }
            .into());
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(FetchError::TooLarge {
                size: len as usize,
                limit: self.config.max_bytes,
            }
            .into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        timeout_secs: self.config.timeout_secs,
                    }
                } else {
                    FetchError::Connection {
                        message: e.to_string(),
                    }
                }
            })?
            .to_vec();

        if bytes.len() > self.config.max_bytes {
            return Err(FetchError::TooLarge {
                size: bytes.len(),
                limit: self.config.max_bytes,
            }
            .into());
        }

        Ok(bytes)
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let bytes = self.download(url).await?;
        let kind = detect_kind(url.path(), &bytes)?;
        let content = DocumentContent::RawBytes { kind, bytes };
        let text = resolve_text(content).await?;
        tracing::info!(url = %url, chars = text.len(), "Extracted document text");
        Ok(text)
    }
}

/// Resolve raw content into extracted, normalized text.
pub async fn resolve_text(content: DocumentContent) -> Result<String> {
    let raw = match content {
        DocumentContent::ExtractedText(text) => text,
        DocumentContent::RawBytes {
            kind: DocumentKind::Pdf,
            bytes,
        } => {
            // PDF parsing is CPU-heavy and the parser has been known to
            // panic on malformed files; isolate it on a blocking thread.
            tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
                .await
                .map_err(|_| ParseError::Pdf {
                    message: "PDF parser panicked".to_string(),
                })??
        }
        DocumentContent::RawBytes {
            kind: DocumentKind::Docx,
            bytes,
        } => extract_docx_text(&bytes)?,
    };

    let text = normalize_whitespace(&serialize_tables(&raw));
    if text.is_empty() {
        return Err(ParseError::EmptyDocument.into());
    }
    Ok(text)
}

/// Identify the document format from the URL path and the leading bytes.
///
/// The extension is the declared type; the magic bytes must agree with it.
/// With no recognized extension, the magic bytes alone decide.
pub fn detect_kind(path: &str, bytes: &[u8]) -> std::result::Result<DocumentKind, ParseError> {
    let lower = path.to_lowercase();
    let looks_pdf = bytes
        .windows(5)
        .take(1024)
        .any(|w| w == b"%PDF-");
    let looks_docx = bytes.starts_with(b"PK\x03\x04");

    if lower.ends_with(".pdf") {
        if looks_pdf {
            return Ok(DocumentKind::Pdf);
        }
        return Err(ParseError::UnsupportedType {
            detected: "declared .pdf without PDF signature".to_string(),
        });
    }
    if lower.ends_with(".docx") {
        if looks_docx {
            return Ok(DocumentKind::Docx);
        }
        return Err(ParseError::UnsupportedType {
            detected: "declared .docx without ZIP signature".to_string(),
        });
    }
    if looks_pdf {
        return Ok(DocumentKind::Pdf);
    }
    if looks_docx {
        return Ok(DocumentKind::Docx);
    }
    let extension = lower.rsplit('.').next().unwrap_or("").to_string();
    Err(ParseError::UnsupportedType {
        detected: if extension.is_empty() || extension.contains('/') {
            "unknown".to_string()
        } else {
            format!(".{extension}")
        },
    })
}

/// Extract page text from PDF bytes.
///
/// `pdf-extract` handles font encodings better, so it runs first; `lopdf`
/// is more tolerant of malformed files and serves as the fallback. Both
/// failing is fatal for the request; no partial text is returned.
pub fn extract_pdf_text(bytes: &[u8]) -> std::result::Result<String, ParseError> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => Ok(text),
        Err(primary) => {
            tracing::warn!(error = %primary, "pdf-extract failed; trying lopdf fallback");
            extract_pdf_text_via_lopdf(bytes).map_err(|_| ParseError::Pdf {
                message: primary.to_string(),
            })
        }
    }
}

/// Low-level text extraction via content-stream operators.
fn extract_pdf_text_via_lopdf(bytes: &[u8]) -> std::result::Result<String, ParseError> {
    use lopdf::{Document, Object};

    let doc = Document::load_mem(bytes).map_err(|e| ParseError::Pdf {
        message: format!("Failed to load PDF: {e}"),
    })?;

    let mut all_text = String::new();
    for (_page_num, page_id) in doc.get_pages() {
        let Ok(content) = doc.get_page_content(page_id) else {
            continue;
        };
        let operations = lopdf::content::Content::decode(&content)
            .map(|c| c.operations)
            .unwrap_or_default();

        for op in operations {
            match op.operator.as_str() {
                // Tj: show text string
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = op.operands.first() {
                        all_text.push_str(&decode_pdf_string(bytes));
                    }
                }
                // TJ: show text array (with kerning)
                "TJ" => {
                    if let Some(Object::Array(arr)) = op.operands.first() {
                        for item in arr {
                            if let Object::String(bytes, _) = item {
                                all_text.push_str(&decode_pdf_string(bytes));
                            }
                        }
                    }
                }
                // Text positioning that indicates a new line
                "Td" | "TD" | "T*" | "'" | "\"" => {
                    if !all_text.ends_with('\n') && !all_text.ends_with(' ') {
                        all_text.push(' ');
                    }
                }
                "ET" => {
                    if !all_text.ends_with('\n') {
                        all_text.push('\n');
                    }
                }
                _ => {}
            }
        }
        all_text.push('\n');
    }

    if all_text.trim().is_empty() {
        return Err(ParseError::Pdf {
            message: "No text operators found".to_string(),
        });
    }
    Ok(all_text)
}

/// UTF-8 first, Latin-1 fallback.
fn decode_pdf_string(bytes: &[u8]) -> String {
    String::from_utf8(bytes.to_vec())
        .unwrap_or_else(|_| bytes.iter().map(|&b| b as char).collect())
}

/// Extract paragraph text from DOCX bytes (`word/document.xml`).
pub fn extract_docx_text(bytes: &[u8]) -> std::result::Result<String, ParseError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor).map_err(|e| ParseError::Docx {
        message: format!("Invalid DOCX archive: {e}"),
    })?;

    let mut doc_xml = archive
        .by_name("word/document.xml")
        .map_err(|_| ParseError::Docx {
            message: "No document.xml found in DOCX".to_string(),
        })?;

    let mut xml = String::new();
    doc_xml
        .read_to_string(&mut xml)
        .map_err(|e| ParseError::Docx {
            message: format!("Failed to read document.xml: {e}"),
        })?;

    Ok(extract_plaintext_from_docx_xml(&xml))
}

/// Pull visible text out of DOCX XML, inserting a newline per paragraph.
fn extract_plaintext_from_docx_xml(xml: &str) -> String {
    let mut result = String::new();
    let mut in_text = false;
    let mut chars = xml.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '<' {
            let mut tag = String::new();
            for tc in chars.by_ref() {
                if tc == '>' {
                    break;
                }
                tag.push(tc);
            }

            if (tag.starts_with("w:t ") || tag == "w:t") && !tag.ends_with('/') {
                in_text = true;
            } else if tag == "/w:t" {
                in_text = false;
            } else if (tag.starts_with("w:p ") || tag == "w:p")
                && !tag.ends_with('/')
                && !result.is_empty()
                && !result.ends_with('\n')
            {
                result.push('\n');
            }
        } else if in_text {
            result.push(c);
        }
    }

    result
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

/// Re-serialize columnar line runs as delimited table blocks.
///
/// A line counts as tabular when it splits into three or more cells on
/// runs of two-plus spaces (or already uses pipe separators). Two or more
/// consecutive tabular lines become a marked table block with
/// pipe-separated rows.
pub fn serialize_tables(text: &str) -> String {
    let cell_split = regex::Regex::new(r" {2,}|\t+").expect("static regex");

    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    // (original line, pipe-joined row) for the current columnar run.
    let mut table_rows: Vec<(String, String)> = Vec::new();

    let flush = |rows: &mut Vec<(String, String)>, out: &mut Vec<String>| {
        if rows.len() >= 2 {
            out.push(String::new());
            out.push(TABLE_START.to_string());
            out.extend(rows.drain(..).map(|(_, joined)| joined));
            out.push(TABLE_END.to_string());
            out.push(String::new());
        } else {
            // A lone columnar line is probably not a table; keep it as-is.
            out.extend(rows.drain(..).map(|(original, _)| original));
        }
    };

    for line in lines {
        let trimmed = line.trim();
        let cells: Vec<&str> = if trimmed.contains('|') {
            trimmed
                .split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect()
        } else {
            cell_split
                .split(trimmed)
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect()
        };

        if cells.len() >= 3 {
            table_rows.push((line.to_string(), cells.join(" | ")));
        } else {
            flush(&mut table_rows, &mut out);
            out.push(line.to_string());
        }
    }
    flush(&mut table_rows, &mut out);

    out.join("\n")
}

/// Collapse horizontal whitespace runs and excess blank lines.
///
/// Paragraph breaks (double newlines) are preserved so the chunker's
/// boundary preference stays meaningful.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
        } else {
            if !out.is_empty() {
                out.push('\n');
            }
            blank_run = 0;
            out.push_str(&collapsed);
        }
    }
    out.trim().to_string()
}
