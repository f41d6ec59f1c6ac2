//! Dispatches a file path to a format-specific text extractor.
//!
//! Every extractor is best-effort: a corrupt or unreadable document is
//! logged and skipped rather than aborting the caller's indexing run.

mod pptx;

use std::fmt;
use std::fs;
use std::path::Path;

pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["txt", "md", "rst", "pdf", "docx", "pptx", "xlsx"];

#[derive(Debug)]
pub enum ParseError {
    Io(std::io::Error),
    Other(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Extracts plain text from `path` based on its extension. Returns `None`
/// (after logging) if the extension is unsupported or extraction fails.
#[must_use]
pub fn parse_file(path: &Path) -> Option<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)?;

    let result = match ext.as_str() {
        "txt" | "md" | "rst" => parse_plain_text(path),
        "pdf" => parse_pdf(path),
        "docx" => parse_docx(path),
        "pptx" => pptx::extract(path),
        "xlsx" => parse_xlsx(path),
        other => {
            log::warn!("unsupported extension .{other} for {}", path.display());
            return None;
        }
    };

    match result {
        Ok(text) => Some(text),
        Err(err) => {
            log::warn!("failed to parse {}: {err}", path.display());
            None
        }
    }
}

fn parse_plain_text(path: &Path) -> Result<String, ParseError> {
    let bytes = fs::read(path).map_err(ParseError::Io)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn parse_pdf(path: &Path) -> Result<String, ParseError> {
    pdf_extract::extract_text(path).map_err(|e| ParseError::Other(e.to_string()))
}

fn parse_docx(path: &Path) -> Result<String, ParseError> {
    let bytes = fs::read(path).map_err(ParseError::Io)?;
    let docx = docx_rs::read_docx(&bytes).map_err(|e| ParseError::Other(e.to_string()))?;

    let mut paragraphs = Vec::new();
    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            let mut text = String::new();
            for pchild in &paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = pchild {
                    for rchild in &run.children {
                        if let docx_rs::RunChild::Text(t) = rchild {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                paragraphs.push(trimmed.to_string());
            }
        }
    }

    Ok(paragraphs.join("\n"))
}

fn parse_xlsx(path: &Path) -> Result<String, ParseError> {
    use calamine::{open_workbook, Reader, Xlsx};

    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|e| ParseError::Other(e.to_string()))?;

    let mut rows_out = Vec::new();
    let sheet_names = workbook.sheet_names().to_vec();
    for sheet_name in sheet_names {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ParseError::Other(e.to_string()))?;
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(calamine::Data::to_string)
                .filter(|s| !s.is_empty())
                .collect();
            if !cells.is_empty() {
                rows_out.push(cells.join(" "));
            }
        }
    }

    Ok(rows_out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn parses_plain_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "hello world").unwrap();

        let text = parse_file(&path).unwrap();
        assert_eq!(text.trim(), "hello world");
    }

    #[test]
    fn parses_markdown_as_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readme.md");
        fs::write(&path, "# Title\n\nbody").unwrap();

        let text = parse_file(&path).unwrap();
        assert!(text.contains("# Title"));
    }

    #[test]
    fn unsupported_extension_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.zip");
        fs::write(&path, b"not really a zip").unwrap();

        assert!(parse_file(&path).is_none());
    }

    #[test]
    fn missing_extension_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_extension");
        fs::write(&path, b"data").unwrap();

        assert!(parse_file(&path).is_none());
    }

    #[test]
    fn corrupt_document_returns_none_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"not a real pdf").unwrap();

        assert!(parse_file(&path).is_none());
    }
}
