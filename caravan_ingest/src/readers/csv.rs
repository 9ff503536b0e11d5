use std::io::Read;

use caravan_document::Document;

use crate::error::{ParseSnafu, Result};
use crate::readers::{RecordReader, parse_delimited_record, require_fields};

/// Record reader for comma-separated input.
///
/// Quoting follows the RFC-4180 rules: double-quote escapes and embedded
/// newlines inside quoted fields are accepted, rows may carry a variable
/// number of fields, and leading whitespace on a token is not data.
pub struct CsvReader<R: Read> {
    fields: Vec<String>,
    records: csv::Reader<R>,
    record: csv::StringRecord,
    num_processed: u64,
}

impl<R: Read> CsvReader<R> {
    /// Returns a reader extracting the given fields from `input`.
    pub fn new(fields: Vec<String>, input: R) -> Self {
        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input);
        Self {
            fields,
            records,
            record: csv::StringRecord::new(),
            num_processed: 0,
        }
    }
}

impl<R: Read + Send> RecordReader for CsvReader<R> {
    fn read_document(&mut self) -> Result<Option<Document>> {
        self.num_processed += 1;
        let more = self.records.read_record(&mut self.record).map_err(|error| {
            ParseSnafu {
                record: self.num_processed,
                message: error.to_string(),
            }
            .build()
        })?;
        if !more {
            return Ok(None);
        }
        let tokens: Vec<&str> = self.record.iter().map(|token| token.trim_start()).collect();
        parse_delimited_record(&self.fields, &tokens, self.num_processed).map(Some)
    }

    fn set_header(&mut self, has_header_line: bool) -> Result<()> {
        if has_header_line {
            self.fields = self.read_headers_from_source()?;
            return Ok(());
        }
        require_fields(&self.fields)
    }

    fn read_headers_from_source(&mut self) -> Result<Vec<String>> {
        self.num_processed += 1;
        let mut record = csv::StringRecord::new();
        let more = self.records.read_record(&mut record).map_err(|error| {
            ParseSnafu {
                record: self.num_processed,
                message: error.to_string(),
            }
            .build()
        })?;
        if !more {
            return ParseSnafu {
                record: self.num_processed,
                message: "input ended before the header line",
            }
            .fail();
        }
        Ok(record.iter().map(|header| header.trim().to_string()).collect())
    }

    fn headers(&self) -> &[String] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use caravan_document::{Value, doc};

    use super::*;
    use crate::error::IngestError;

    fn reader(fields: &[&str], input: &str) -> CsvReader<std::io::Cursor<Vec<u8>>> {
        CsvReader::new(
            fields.iter().map(|f| f.to_string()).collect(),
            std::io::Cursor::new(input.as_bytes().to_vec()),
        )
    }

    #[test]
    fn test_reads_typed_rows_until_eof() {
        let mut csv = reader(&["a", "b", "c"], "1,2.5,x\n4, y,z\n");

        assert_eq!(
            csv.read_document().unwrap(),
            Some(doc! {"a" => 1i64, "b" => 2.5, "c" => "x"})
        );
        assert_eq!(
            csv.read_document().unwrap(),
            Some(doc! {"a" => 4i64, "b" => "y", "c" => "z"})
        );
        assert_eq!(csv.read_document().unwrap(), None);
    }

    #[test]
    fn test_quoted_fields_may_contain_separators_and_newlines() {
        let mut csv = reader(&["a", "b"], "\"x,\"\"y\"\"\",\"line\nbreak\"\n");

        assert_eq!(
            csv.read_document().unwrap(),
            Some(doc! {"a" => "x,\"y\"", "b" => "line\nbreak"})
        );
    }

    #[test]
    fn test_header_line_overrides_configured_fields() {
        let mut csv = reader(&["ignored"], "a, b ,c\n1,2,3\n");
        csv.set_header(true).unwrap();

        assert_eq!(csv.headers(), ["a", "b", "c"]);
        assert_eq!(
            csv.read_document().unwrap(),
            Some(doc! {"a" => 1i64, "b" => 2i64, "c" => 3i64})
        );
    }

    #[test]
    fn test_missing_fields_without_header_is_an_error() {
        let mut csv = reader(&[], "1,2\n");
        assert!(matches!(
            csv.set_header(false).unwrap_err(),
            IngestError::BadOption { .. }
        ));
    }

    #[test]
    fn test_variable_field_counts_are_tolerated() {
        let mut csv = reader(&["a", "b"], "1\n2,3,4\n");

        assert_eq!(csv.read_document().unwrap(), Some(doc! {"a" => 1i64}));
        assert_eq!(
            csv.read_document().unwrap(),
            Some(doc! {"a" => 2i64, "b" => 3i64, "field2" => 4i64})
        );
    }

    #[test]
    fn test_row_round_trips_modulo_numeric_promotion() {
        let mut csv = reader(&["a", "b", "c"], "5,hello,1.5\n");
        let document = csv.read_document().unwrap().unwrap();

        let rendered: Vec<String> = document
            .iter()
            .map(|(_, value)| match value {
                Value::Int64(v) => v.to_string(),
                Value::Double(v) => v.to_string(),
                Value::String(v) => v.clone(),
                other => panic!("unexpected value {other:?}"),
            })
            .collect();
        assert_eq!(rendered.join(","), "5,hello,1.5");
    }

    #[test]
    fn test_blank_tokens_stay_empty_strings() {
        let mut csv = reader(&["a", "b"], "1,\n");
        assert_eq!(
            csv.read_document().unwrap(),
            Some(doc! {"a" => 1i64, "b" => Value::String(String::new())})
        );
    }
}
