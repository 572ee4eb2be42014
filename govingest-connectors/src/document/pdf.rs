//! PDF text and table extraction.
//!
//! PDFs carry no table structure, so tables are recovered from the text
//! layer: a run of at least two consecutive lines that split into the same
//! number (two or more) of columns is treated as a table whose first line is
//! the header. Columns are separated by tabs, pipes, or runs of two or more
//! spaces.

use govingest_core::error::ParseError;

use super::TextTable;

/// Text of each page.
pub(crate) fn page_texts(bytes: &[u8]) -> Result<Vec<String>, ParseError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ParseError::Document {
        message: format!("pdf: {e}"),
    })
}

/// Full text of the document.
pub(crate) fn full_text(bytes: &[u8]) -> Result<String, ParseError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ParseError::Document {
        message: format!("pdf: {e}"),
    })
}

/// Tables found on any page, in page order.
pub(crate) fn extract_tables(bytes: &[u8]) -> Result<Vec<TextTable>, ParseError> {
    Ok(detect_tables(&page_texts(bytes)?))
}

pub(crate) fn detect_tables(pages: &[String]) -> Vec<TextTable> {
    let mut tables = Vec::new();
    for page in pages {
        let mut block: Vec<Vec<String>> = Vec::new();
        for line in page.lines() {
            match split_columns(line) {
                Some(cells) if block.first().is_none_or(|first| first.len() == cells.len()) => {
                    block.push(cells);
                }
                Some(cells) => {
                    flush(&mut block, &mut tables);
                    block.push(cells);
                }
                None => flush(&mut block, &mut tables),
            }
        }
        flush(&mut block, &mut tables);
    }
    tables
}

fn flush(block: &mut Vec<Vec<String>>, tables: &mut Vec<TextTable>) {
    let rows = std::mem::take(block);
    if rows.len() >= 2 {
        if let Some(table) = TextTable::from_rows(rows) {
            tables.push(table);
        }
    }
}

/// Split a line into two or more cells, or `None` if it reads as prose.
fn split_columns(line: &str) -> Option<Vec<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let cells: Vec<String> = if line.contains('\t') {
        line.split('\t').map(|c| c.trim().to_string()).collect()
    } else if line.contains('|') {
        line.trim_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect()
    } else {
        split_on_wide_gaps(line)
    };
    let cells: Vec<String> = cells.into_iter().filter(|c| !c.is_empty()).collect();
    (cells.len() >= 2).then_some(cells)
}

fn split_on_wide_gaps(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut spaces = 0usize;
    for ch in line.chars() {
        if ch == ' ' {
            spaces += 1;
            continue;
        }
        if spaces >= 2 {
            cells.push(std::mem::take(&mut current));
        } else if spaces == 1 {
            current.push(' ');
        }
        spaces = 0;
        current.push(ch);
    }
    if !current.is_empty() {
        cells.push(current);
    }
    cells
}
