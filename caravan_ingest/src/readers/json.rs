use std::io::{self, BufReader, Read};

use caravan_document::{Document, document_from_json};
use serde::Deserialize;

use crate::error::{ParseSnafu, Result};
use crate::readers::RecordReader;

/// Record reader for JSON input.
///
/// Stream mode reads concatenated top-level objects; array mode expects
/// one enclosing `[` ... `]` with comma separators. The two modes reject
/// each other's framing so a mis-set flag fails on the first record
/// instead of producing garbage.
pub struct JsonReader<R: Read> {
    input: PeekReader<BufReader<R>>,
    array_mode: bool,
    started: bool,
    done: bool,
    num_processed: u64,
}

impl<R: Read> JsonReader<R> {
    pub fn new(array_mode: bool, input: R) -> Self {
        Self {
            input: PeekReader::new(BufReader::new(input)),
            array_mode,
            started: false,
            done: false,
            num_processed: 0,
        }
    }

    fn parse_error(&self, message: impl Into<String>) -> crate::error::IngestError {
        ParseSnafu {
            record: self.num_processed,
            message: message.into(),
        }
        .build()
    }

    fn io_error(&self, error: io::Error) -> crate::error::IngestError {
        self.parse_error(error.to_string())
    }

    /// Consumes the array separator before a document: `,` continues,
    /// `]` ends the array (and must end the input).
    fn read_array_separator(&mut self) -> Result<bool> {
        let byte = self
            .skip_whitespace()
            .map_err(|error| self.io_error(error))?;
        match byte {
            None => Err(self.parse_error("unexpected end of input inside a JSON array")),
            Some(b',') => {
                self.input.consume_peeked();
                Ok(true)
            }
            Some(b']') => {
                self.input.consume_peeked();
                self.expect_end_of_input()?;
                self.done = true;
                Ok(false)
            }
            Some(other) => Err(self.parse_error(format!(
                "expected ',' or ']' between array documents, found {:?}",
                char::from(other)
            ))),
        }
    }

    /// Consumes the opening `[`, handling an immediately empty array.
    fn read_array_start(&mut self) -> Result<bool> {
        match self.skip_whitespace().map_err(|error| self.io_error(error))? {
            Some(b'[') => {
                self.input.consume_peeked();
            }
            Some(other) => {
                return Err(self.parse_error(format!(
                    "expected '[' to open a JSON array, found {:?}",
                    char::from(other)
                )));
            }
            None => return Err(self.parse_error("expected '[' to open a JSON array, found EOF")),
        }
        self.started = true;

        if self.skip_whitespace().map_err(|error| self.io_error(error))? == Some(b']') {
            self.input.consume_peeked();
            self.expect_end_of_input()?;
            self.done = true;
            return Ok(false);
        }
        Ok(true)
    }

    fn expect_end_of_input(&mut self) -> Result<()> {
        match self.skip_whitespace().map_err(|error| self.io_error(error))? {
            None => Ok(()),
            Some(byte) => Err(self.parse_error(format!(
                "trailing character {:?} after the closing ']'",
                char::from(byte)
            ))),
        }
    }

    fn skip_whitespace(&mut self) -> io::Result<Option<u8>> {
        loop {
            match self.input.peek()? {
                Some(byte) if byte.is_ascii_whitespace() => self.input.consume_peeked(),
                other => return Ok(other),
            }
        }
    }

    fn parse_one_document(&mut self) -> Result<Document> {
        let mut deserializer = serde_json::Deserializer::from_reader(&mut self.input);
        let value = serde_json::Value::deserialize(&mut deserializer)
            .map_err(|error| {
                ParseSnafu {
                    record: self.num_processed,
                    message: error.to_string(),
                }
                .build()
            })?;
        document_from_json(value).map_err(|error| {
            ParseSnafu {
                record: self.num_processed,
                message: error.to_string(),
            }
            .build()
        })
    }
}

impl<R: Read + Send> RecordReader for JsonReader<R> {
    fn read_document(&mut self) -> Result<Option<Document>> {
        if self.done {
            return Ok(None);
        }
        self.num_processed += 1;

        if self.array_mode {
            let has_document = if self.started {
                self.read_array_separator()?
            } else {
                self.read_array_start()?
            };
            if !has_document {
                return Ok(None);
            }
            return self.parse_one_document().map(Some);
        }

        let next = self
            .skip_whitespace()
            .map_err(|error| self.io_error(error))?;
        match next {
            None => {
                self.done = true;
                Ok(None)
            }
            Some(b'[') if !self.started => {
                Err(self.parse_error("input is a JSON array; use the array-mode reader"))
            }
            Some(_) => {
                self.started = true;
                self.parse_one_document().map(Some)
            }
        }
    }
}

/// A byte source with one byte of lookahead.
///
/// The peeked byte stays part of the stream, so the JSON deserializer can
/// pick up exactly where the framing scan stopped.
struct PeekReader<R> {
    inner: R,
    peeked: Option<u8>,
}

impl<R: Read> PeekReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            peeked: None,
        }
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        if self.peeked.is_none() {
            let mut byte = [0u8; 1];
            loop {
                match self.inner.read(&mut byte) {
                    Ok(0) => return Ok(None),
                    Ok(_) => {
                        self.peeked = Some(byte[0]);
                        break;
                    }
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => return Err(error),
                }
            }
        }
        Ok(self.peeked)
    }

    fn consume_peeked(&mut self) {
        self.peeked = None;
    }
}

impl<R: Read> Read for PeekReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(byte) = self.peeked.take() {
            buf[0] = byte;
            return Ok(1);
        }
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use caravan_document::doc;

    use super::*;

    fn reader(array_mode: bool, input: &str) -> JsonReader<std::io::Cursor<Vec<u8>>> {
        JsonReader::new(array_mode, std::io::Cursor::new(input.as_bytes().to_vec()))
    }

    #[test]
    fn test_array_input_yields_documents_then_eof() {
        let mut json = reader(
            true,
            r#"[{"a":1.2,"b":"a","c":0.4},{"a":2.4,"b":"string","c":52.9}]"#,
        );

        assert_eq!(
            json.read_document().unwrap(),
            Some(doc! {"a" => 1.2, "b" => "a", "c" => 0.4})
        );
        assert_eq!(
            json.read_document().unwrap(),
            Some(doc! {"a" => 2.4, "b" => "string", "c" => 52.9})
        );
        assert_eq!(json.read_document().unwrap(), None);
        assert_eq!(json.read_document().unwrap(), None);
    }

    #[test]
    fn test_plain_document_in_array_mode_is_an_error() {
        let mut json = reader(true, r#"{"a": "ae"}"#);
        assert!(json.read_document().is_err());
    }

    #[test]
    fn test_unterminated_array_is_an_error() {
        let mut json = reader(true, r#"[{"a": "ae"}"#);
        assert!(json.read_document().unwrap().is_some());
        assert!(json.read_document().is_err());
    }

    #[test]
    fn test_empty_array_is_eof() {
        let mut json = reader(true, "[]");
        assert_eq!(json.read_document().unwrap(), None);
    }

    #[test]
    fn test_trailing_bytes_after_closing_bracket_error() {
        let mut json = reader(true, "[]a");
        assert!(json.read_document().is_err());

        let mut json = reader(true, r#"[{"a":3}]x"#);
        assert!(json.read_document().unwrap().is_some());
        assert!(json.read_document().is_err());
    }

    #[test]
    fn test_bad_separator_between_documents_errors() {
        let mut json = reader(true, r#"[{"a":3}x{"b":4}]"#);
        assert!(json.read_document().unwrap().is_some());
        assert!(json.read_document().is_err());

        let mut json = reader(true, r#"[{"a":3},,{"b":4}]"#);
        assert!(json.read_document().unwrap().is_some());
        assert!(json.read_document().is_err());
    }

    #[test]
    fn test_stream_mode_reads_concatenated_documents() {
        let mut json = reader(false, r#"{"a": "ae"}{"b": "dc"}"#);

        assert_eq!(json.read_document().unwrap(), Some(doc! {"a" => "ae"}));
        assert_eq!(json.read_document().unwrap(), Some(doc! {"b" => "dc"}));
        assert_eq!(json.read_document().unwrap(), None);
    }

    #[test]
    fn test_stream_mode_handles_whitespace_and_numbers() {
        let mut json = reader(false, "{\"a\": \"ae\", \"b\": 2.0}\n {\"c\": 3}\n");

        assert_eq!(
            json.read_document().unwrap(),
            Some(doc! {"a" => "ae", "b" => 2.0})
        );
        assert_eq!(json.read_document().unwrap(), Some(doc! {"c" => 3i64}));
        assert_eq!(json.read_document().unwrap(), None);
    }

    #[test]
    fn test_array_in_stream_mode_is_an_error() {
        let mut json = reader(false, r#"[{"a": "ae"}]"#);
        assert!(json.read_document().is_err());
    }

    #[test]
    fn test_empty_stream_is_eof() {
        let mut json = reader(false, "  \n ");
        assert_eq!(json.read_document().unwrap(), None);
    }
}
