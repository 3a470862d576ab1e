//! CSV metadata table parsing.
//!
//! The archive answers `ct=csv` queries with a header row followed by one
//! row per file. An empty body, or a header with no rows, is a valid empty
//! result.

use crate::metadata::{FieldValue, MetadataRecord, normalize_field_name};

/// Parses a CSV metadata table into records, preserving row order.
///
/// # Errors
///
/// Returns the parser message when a row cannot be read or its width does
/// not match the header.
pub fn parse_table(body: &[u8]) -> Result<Vec<MetadataRecord>, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(normalize_field_name)
        .collect();
    if headers.iter().any(String::is_empty) {
        return Err("table header has an empty column name".to_string());
    }

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|e| format!("row {}: {e}", index + 1))?;
        let record: MetadataRecord = headers
            .iter()
            .zip(row.iter())
            .map(|(name, cell)| (name.clone(), FieldValue::from_cell(cell)))
            .collect();
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows_in_order() {
        let body = b"field,ccdid,qid,filtercode,filefracday,ra.deg\n\
612,9,2,zr,20171105123456,10.5\n\
613,10,1,zg,20171105123999,\n";
        let rows = parse_table(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_i64("field"), Some(612));
        assert_eq!(rows[0].get_text("filtercode").as_deref(), Some("zr"));
        assert_eq!(rows[0].get_f64("ra-deg"), Some(10.5));
        assert_eq!(rows[1].get_i64("field"), Some(613));
        assert!(rows[1].get("ra-deg").is_none());
    }

    #[test]
    fn test_header_only_is_empty() {
        assert!(parse_table(b"field,ccdid,qid\n").unwrap().is_empty());
        assert!(parse_table(b"").unwrap().is_empty());
        assert!(parse_table(b"\n  \n").unwrap().is_empty());
    }

    #[test]
    fn test_ragged_row_is_rejected() {
        let err = parse_table(b"a,b\n1,2\n3\n").unwrap_err();
        assert!(err.contains("row 2"), "unexpected message: {err}");
    }
}
