//! Minimal OOXML slide-text extraction.
//!
//! A `.pptx` file is a zip archive of `ppt/slides/slideN.xml` parts. No
//! turnkey extraction crate covers this format, so slides are walked
//! directly: each `<a:t>` run inside a slide part holds one span of text.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

pub fn extract(path: &Path) -> Result<String, super::ParseError> {
    let file = File::open(path).map_err(super::ParseError::Io)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| super::ParseError::Other(e.to_string()))?;

    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    slide_names.sort_by_key(|name| slide_sort_key(name));

    let mut paragraphs = Vec::new();
    for name in slide_names {
        let mut entry = archive
            .by_name(&name)
            .map_err(|e| super::ParseError::Other(e.to_string()))?;
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(super::ParseError::Io)?;
        paragraphs.extend(extract_text_runs(&xml)?);
    }

    Ok(paragraphs.join("\n"))
}

/// Slides sort numerically by the digits in their filename so text comes
/// out in presentation order, not zip-entry order.
fn slide_sort_key(name: &str) -> u32 {
    name.trim_start_matches("ppt/slides/slide")
        .trim_end_matches(".xml")
        .parse()
        .unwrap_or(0)
}

/// Collects `<a:t>` runs, joining runs within the same `<a:p>` paragraph
/// and trimming/skipping paragraphs that end up empty.
fn extract_text_runs(xml: &str) -> Result<Vec<String>, super::ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| super::ParseError::Other(e.to_string()))?
        {
            Event::Start(ref e) if e.local_name().as_ref() == b"p" => {
                current.clear();
            }
            Event::End(ref e) if e.local_name().as_ref() == b"p" => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
                current.clear();
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"t" => {
                in_text_run = true;
            }
            Event::End(ref e) if e.local_name().as_ref() == b"t" => {
                in_text_run = false;
            }
            Event::Text(text) if in_text_run => {
                let decoded = text
                    .unescape()
                    .map_err(|e| super::ParseError::Other(e.to_string()))?;
                current.push_str(&decoded);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
