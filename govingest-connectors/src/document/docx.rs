//! DOCX reading: `word/document.xml` from the zip container, walked with
//! quick-xml. Top-level tables become [`TextTable`]s; paragraphs outside
//! tables form the document text. Nested tables are folded into the text of
//! their enclosing cell.

use govingest_core::error::ParseError;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};

use super::TextTable;

const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Default)]
pub(crate) struct DocxContent {
    pub tables: Vec<TextTable>,
    pub paragraphs: Vec<String>,
}

impl DocxContent {
    pub(crate) fn text(&self) -> String {
        self.paragraphs.join("\n")
    }
}

fn doc_error(e: impl std::fmt::Display) -> ParseError {
    ParseError::Document {
        message: format!("docx: {e}"),
    }
}

pub(crate) fn read_docx(bytes: &[u8]) -> Result<DocxContent, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(doc_error)?;
    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)
        .map_err(doc_error)?
        .read_to_string(&mut xml)
        .map_err(doc_error)?;
    parse_document_xml(&xml)
}

pub(crate) fn parse_document_xml(xml: &str) -> Result<DocxContent, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut content = DocxContent::default();

    let mut table_depth = 0usize;
    let mut table: Vec<Vec<String>> = Vec::new();
    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<String> = None;
    let mut paragraph = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(doc_error)? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        table.clear();
                    }
                }
                b"w:tr" if table_depth == 1 => row = Some(Vec::new()),
                b"w:tc" if table_depth == 1 => cell = Some(String::new()),
                b"w:p" => paragraph.clear(),
                b"w:t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => paragraph.push('\t'),
                b"w:br" | b"w:cr" => paragraph.push('\n'),
                b"w:p" => {
                    paragraph.clear();
                    end_paragraph(&mut paragraph, cell.as_mut(), table_depth, &mut content);
                }
                _ => {}
            },
            Event::Text(t) if in_text => {
                paragraph.push_str(&t.unescape().map_err(doc_error)?);
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => end_paragraph(&mut paragraph, cell.as_mut(), table_depth, &mut content),
                b"w:tc" if table_depth == 1 => {
                    if let (Some(text), Some(cells)) = (cell.take(), row.as_mut()) {
                        cells.push(text.trim().to_string());
                    }
                }
                b"w:tr" if table_depth == 1 => {
                    if let Some(cells) = row.take() {
                        table.push(cells);
                    }
                }
                b"w:tbl" => {
                    if table_depth == 1 {
                        if let Some(parsed) = TextTable::from_rows(std::mem::take(&mut table)) {
                            content.tables.push(parsed);
                        }
                    }
                    table_depth = table_depth.saturating_sub(1);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(content)
}

fn end_paragraph(
    paragraph: &mut String,
    cell: Option<&mut String>,
    table_depth: usize,
    content: &mut DocxContent,
) {
    let text = std::mem::take(paragraph);
    match cell {
        Some(cell) => {
            if !cell.is_empty() {
                cell.push('\n');
            }
            cell.push_str(&text);
        }
        None if table_depth == 0 => content.paragraphs.push(text),
        None => {}
    }
}
