//! Record readers turn an input byte stream into a lazy sequence of
//! documents. Each variant knows one source format; the pipeline only
//! sees the [`RecordReader`] capability surface.

use caravan_document::{Document, Value};

use crate::error::{BadOptionSnafu, DuplicateSnafu, Result};

mod binary;
mod csv;
mod json;
mod tsv;

pub use binary::BinaryDocReader;
pub use csv::CsvReader;
pub use json::JsonReader;
pub use tsv::TsvReader;

/// How an input source is converted to documents.
pub trait RecordReader: Send {
    /// Reads the next logical document. `Ok(None)` is the end of the
    /// stream and is distinct from a parse error.
    fn read_document(&mut self) -> Result<Option<Document>>;

    /// Configures header fields for delimited inputs. With
    /// `has_header_line`, one record is consumed from the source and
    /// overrides any preconfigured field list; without it the configured
    /// list must be non-empty. Formats that carry their own structure
    /// accept either setting unchanged.
    fn set_header(&mut self, has_header_line: bool) -> Result<()> {
        let _ = has_header_line;
        Ok(())
    }

    /// Reads one record from the source and returns it as header fields.
    fn read_headers_from_source(&mut self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// The current header fields, empty for self-describing formats.
    fn headers(&self) -> &[String] {
        &[]
    }
}

impl RecordReader for Box<dyn RecordReader> {
    fn read_document(&mut self) -> Result<Option<Document>> {
        (**self).read_document()
    }

    fn set_header(&mut self, has_header_line: bool) -> Result<()> {
        (**self).set_header(has_header_line)
    }

    fn read_headers_from_source(&mut self) -> Result<Vec<String>> {
        (**self).read_headers_from_source()
    }

    fn headers(&self) -> &[String] {
        (**self).headers()
    }
}

/// Validates a delimited reader's preconfigured field list when no header
/// line will be consumed.
fn require_fields(fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return BadOptionSnafu {
            message: "delimited input needs field names from --fields, --fieldFile, or --headerline",
        }
        .fail();
    }
    Ok(())
}

/// Maps one row of tokens onto the declared fields.
///
/// Dotted field names extend nested sub-documents. Surplus tokens get
/// synthesized `fieldN` keys; a collision between a synthesized key and a
/// declared field is fatal for the record.
fn parse_delimited_record(fields: &[String], tokens: &[&str], record: u64) -> Result<Document> {
    let mut document = Document::new();
    for (index, token) in tokens.iter().enumerate() {
        let value = promote_token(token);
        match fields.get(index) {
            Some(field) if field.contains('.') => document.set_path(field, value),
            Some(field) => {
                document.insert(field.clone(), value);
            }
            None => {
                let key = format!("field{index}");
                if fields.iter().any(|field| *field == key) {
                    return DuplicateSnafu {
                        key,
                        column: index + 1,
                        record,
                    }
                    .fail();
                }
                document.insert(key, value);
            }
        }
    }
    Ok(document)
}

/// Best-effort token typing: prefer int64, then double, else string.
fn promote_token(token: &str) -> Value {
    if let Ok(value) = token.parse::<i64>() {
        return Value::Int64(value);
    }
    if let Ok(value) = token.parse::<f64>() {
        return Value::Double(value);
    }
    Value::String(token.to_string())
}
