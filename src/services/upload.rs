//! Turn an uploaded spreadsheet into the CNPJ list of a batch.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::collections::HashSet;
use std::io::Cursor;

use crate::models::batch::InvalidRow;
use crate::models::cnpj;

/// Header names recognised as the identifier column (after trim + lowercase).
const CNPJ_HEADERS: &[&str] = &[
    "cnpj",
    "cnpj_matriz",
    "documento",
    "doc",
    "cpf_cnpj",
    "cnpj/cpf",
    "inscricao",
];

/// Identifiers extracted from an upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedUpload {
    /// Valid 14-digit CNPJs, deduplicated, in first-seen order.
    pub cnpjs: Vec<String>,
    /// Rows whose identifier did not normalise to 14 digits.
    pub invalid_rows: Vec<InvalidRow>,
    /// Header of the column the identifiers came from, if one was found.
    pub column: Option<String>,
}

impl ParsedUpload {
    pub fn is_empty(&self) -> bool {
        self.cnpjs.is_empty() && self.invalid_rows.is_empty()
    }
}

struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Parse a CSV, XLSX or XLS upload, choosing the format by file extension.
pub fn parse_upload(file_name: &str, content: &[u8]) -> Result<ParsedUpload, UploadError> {
    if content.is_empty() {
        return Err(UploadError::Empty);
    }

    let name = file_name.trim().to_lowercase();
    let table = if name.ends_with(".csv") {
        read_csv(content)?
    } else if name.ends_with(".xlsx") || name.ends_with(".xls") {
        read_workbook(content)?
    } else {
        return Err(UploadError::UnsupportedFormat(file_name.to_string()));
    };

    if table.headers.is_empty() {
        return Err(UploadError::NoColumns);
    }

    Ok(extract(&table))
}

fn extract(table: &Table) -> ParsedUpload {
    let column = find_column_by_header(&table.headers).or_else(|| find_column_by_content(table));

    let mut parsed = ParsedUpload {
        column: column.map(|c| table.headers[c].clone()),
        ..ParsedUpload::default()
    };
    let mut seen = HashSet::new();

    for row in &table.rows {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let raw = match column {
            Some(c) => row.get(c).cloned().unwrap_or_default(),
            None => first_cnpj_in_row(row).unwrap_or_default(),
        };

        let digits = cnpj::normalize(&raw);
        if cnpj::is_valid(&digits) {
            if seen.insert(digits.clone()) {
                parsed.cnpjs.push(digits);
            }
        } else {
            parsed.invalid_rows.push(InvalidRow { raw });
        }
    }

    parsed
}

fn find_column_by_header(headers: &[String]) -> Option<usize> {
    headers
        .iter()
        .position(|h| CNPJ_HEADERS.contains(&h.as_str()))
        .or_else(|| headers.iter().position(|h| h.contains("cnpj")))
        .or_else(|| (headers.len() == 1).then_some(0))
}

/// The column holding the most valid CNPJs, if any holds one.
fn find_column_by_content(table: &Table) -> Option<usize> {
    (0..table.headers.len())
        .map(|c| {
            let score = table
                .rows
                .iter()
                .filter_map(|row| row.get(c))
                .filter(|cell| cnpj::is_valid(&cnpj::normalize(cell)))
                .count();
            (c, score)
        })
        .filter(|(_, score)| *score > 0)
        .fold(None, |best: Option<(usize, usize)>, (c, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((c, score)),
        })
        .map(|(c, _)| c)
}

/// First CNPJ anywhere in the row: a whole cell, or a 14-digit run inside one.
fn first_cnpj_in_row(row: &[String]) -> Option<String> {
    row.iter().find_map(|cell| {
        let digits = cnpj::normalize(cell);
        if cnpj::is_valid(&digits) {
            return Some(digits);
        }
        cell.split(|c: char| !c.is_ascii_digit())
            .find(|token| cnpj::is_valid(token))
            .map(str::to_string)
    })
}

fn read_csv(content: &[u8]) -> Result<Table, UploadError> {
    let text = decode_text(content);
    let first_line = text.lines().next().unwrap_or_default();
    let delimiter = if first_line.matches(';').count() > first_line.matches(',').count() {
        b';'
    } else {
        b','
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let headers = match records.next() {
        Some(record) => record?.iter().map(normalize_header).collect(),
        None => return Err(UploadError::NoColumns),
    };

    let mut rows = Vec::new();
    for record in records {
        rows.push(record?.iter().map(|s| s.trim().to_string()).collect());
    }

    Ok(Table { headers, rows })
}

fn read_workbook(content: &[u8]) -> Result<Table, UploadError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(content.to_vec()))
        .map_err(|e| UploadError::Workbook(e.to_string()))?;

    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| UploadError::Workbook(e.to_string()))?;

        let mut rows = range.rows();
        let Some(header_row) = rows.next() else { continue };
        let headers: Vec<String> = header_row.iter().map(|c| normalize_header(&cell_text(c))).collect();
        if headers.iter().all(|h| h.is_empty()) {
            continue;
        }

        let rows = rows.map(|r| r.iter().map(cell_text).collect()).collect();
        return Ok(Table { headers, rows });
    }

    Err(UploadError::NoColumns)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        // Numeric CNPJ cells come back as floats.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e16 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// UTF-8 (BOM stripped) with a Latin-1 fallback.
fn decode_text(content: &[u8]) -> String {
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    match std::str::from_utf8(content) {
        Ok(s) => s.to_string(),
        Err(_) => content.iter().map(|&b| b as char).collect(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Arquivo vazio.")]
    Empty,

    #[error("Envie um arquivo CSV, XLSX ou XLS (recebido: {0}).")]
    UnsupportedFormat(String),

    #[error("Arquivo sem colunas reconhecíveis.")]
    NoColumns,

    #[error("Não consegui ler o CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Não consegui ler a planilha: {0}")]
    Workbook(String),
}
