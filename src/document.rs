use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use quick_xml::Reader;
use quick_xml::events::Event;

const SUPPORTED_EXTENSIONS: &[&str] = &["docx", "txt", "md"];

/// Normalized document text: one entry per non-blank paragraph, whitespace
/// collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    lines: Vec<String>,
}

impl Document {
    pub fn from_paragraphs<I, S>(paragraphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines = paragraphs
            .into_iter()
            .map(|paragraph| collapse_whitespace(paragraph.as_ref()))
            .filter(|line| !line.is_empty())
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Reads `.docx` or plain text. Unreadable input yields an empty document.
pub fn read_document(path: &Path) -> Document {
    match read_paragraphs(path) {
        Ok(paragraphs) => {
            let document = Document::from_paragraphs(paragraphs);
            tracing::info!(
                path = %path.display(),
                lines = document.lines().len(),
                "document loaded"
            );
            document
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %format!("{err:#}"),
                "cannot read document; treating it as empty"
            );
            Document::default()
        }
    }
}

/// A directory resolves to its first supported file in name order.
pub fn resolve_input(path: &Path) -> PathBuf {
    if !path.is_dir() {
        return path.to_path_buf();
    }

    let mut candidates = match fs::read_dir(path) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|candidate| candidate.is_file() && is_supported(candidate))
            .collect::<Vec<_>>(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot list input directory");
            Vec::new()
        }
    };
    candidates.sort();

    match candidates.into_iter().next() {
        Some(found) => {
            tracing::info!(dir = %path.display(), input = %found.display(), "picked input file");
            found
        }
        None => {
            tracing::warn!(dir = %path.display(), "no .docx/.txt/.md file in input directory");
            path.to_path_buf()
        }
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn read_paragraphs(path: &Path) -> anyhow::Result<Vec<String>> {
    let is_docx = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"));
    if is_docx {
        let xml = read_docx_xml(path)?;
        return docx_paragraphs(&xml);
    }

    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(text.lines().map(str::to_owned).collect())
}

fn read_docx_xml(path: &Path) -> anyhow::Result<String> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("open zip {}", path.display()))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .context("find word/document.xml")?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .context("read word/document.xml")?;
    Ok(xml)
}

/// Walks WordprocessingML: text comes from `<w:t>` runs, a paragraph ends at
/// `</w:p>`. Tabs and breaks only count inside a run; `<w:tab>` under
/// `<w:tabs>` is a tab-stop definition.
fn docx_paragraphs(xml: &str) -> anyhow::Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_run = false;
    let mut in_text = false;

    loop {
        match reader
            .read_event()
            .with_context(|| format!("parse word/document.xml at {}", reader.buffer_position()))?
        {
            Event::Start(tag) => match tag.name().as_ref() {
                b"w:r" => in_run = true,
                b"w:t" => in_text = in_run,
                _ => {}
            },
            Event::End(tag) => match tag.name().as_ref() {
                b"w:r" => in_run = false,
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Empty(tag) => match tag.name().as_ref() {
                b"w:tab" | b"w:br" | b"w:cr" if in_run => current.push(' '),
                b"w:p" => paragraphs.push(String::new()),
                _ => {}
            },
            Event::Text(text) if in_text => {
                current.push_str(&text.unescape().context("unescape run text")?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs)
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}
