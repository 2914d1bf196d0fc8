use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::{Map, Value};
use thiserror::Error;

/// A parsed spreadsheet row: header cell -> trimmed string value.
pub type RawRow = Map<String, Value>;

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("unsupported file type '{0}'; expected .csv, .xlsx or .xls")]
    UnsupportedExtension(String),

    #[error("spreadsheet has no header row")]
    MissingHeader,

    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to open workbook: {0}")]
    Workbook(#[from] calamine::Error),
}

/// Parse an uploaded spreadsheet fully in memory. The first row is the
/// header; every following row becomes a map keyed by the header cells.
/// Nothing is written to disk and the bytes are dropped with the request.
pub fn parse(filename: &str, bytes: &[u8]) -> Result<Vec<RawRow>, SpreadsheetError> {
    let lower = filename.to_lowercase();
    if lower.ends_with(".csv") {
        parse_csv(bytes)
    } else if lower.ends_with(".xlsx") || lower.ends_with(".xls") || lower.ends_with(".xlsm") {
        parse_workbook(bytes)
    } else {
        Err(SpreadsheetError::UnsupportedExtension(
            extension_of(filename).to_string(),
        ))
    }
}

fn extension_of(filename: &str) -> &str {
    filename.rsplit('.').next().unwrap_or(filename)
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRow>, SpreadsheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(SpreadsheetError::MissingHeader);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Map::new();
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let cell = record.get(i).unwrap_or("").trim();
            row.insert(header.clone(), Value::String(cell.to_string()));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_workbook(bytes: &[u8]) -> Result<Vec<RawRow>, SpreadsheetError> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor)?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SpreadsheetError::MissingHeader)??;

    let mut row_iter = range.rows();
    let headers: Vec<String> = row_iter
        .next()
        .ok_or(SpreadsheetError::MissingHeader)?
        .iter()
        .map(|cell| cell_to_string(cell).trim().to_string())
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(SpreadsheetError::MissingHeader);
    }

    let mut rows = Vec::new();
    for cells in row_iter {
        let mut row = Map::new();
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let cell = cells.get(i).map(cell_to_string).unwrap_or_default();
            row.insert(header.clone(), Value::String(cell.trim().to_string()));
        }
        // Trailing fully-empty rows are padding, not data
        if row.values().any(|v| v.as_str().is_some_and(|s| !s.is_empty())) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Render a workbook cell as the string the validators see. Integral floats
/// lose the ".0" suffix so numeric codes match their CSV form.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_csv_with_trimmed_headers_and_cells() {
        let bytes = b"Subject Code , Section Name,Student Code\nMATH101, A1 ,1001\ncs102,B2,1002\n";
        let rows = parse("enrollments.csv", bytes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Subject Code"], "MATH101");
        assert_eq!(rows[0]["Section Name"], "A1");
        assert_eq!(rows[1]["Student Code"], "1002");
    }

    #[test]
    fn short_csv_records_read_as_empty_cells() {
        let bytes = b"a,b,c\n1,2\n";
        let rows = parse("x.csv", bytes).unwrap();
        assert_eq!(rows[0]["c"], "");
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = parse("notes.pdf", b"whatever").unwrap_err();
        assert!(matches!(err, SpreadsheetError::UnsupportedExtension(_)));
    }

    #[test]
    fn rejects_empty_csv() {
        let err = parse("empty.csv", b"").unwrap_err();
        assert!(matches!(err, SpreadsheetError::MissingHeader));
    }

    #[test]
    fn integral_floats_render_without_decimal_point() {
        assert_eq!(cell_to_string(&Data::Float(1001.0)), "1001");
        assert_eq!(cell_to_string(&Data::Float(2.5)), "2.5");
    }
}
