use std::io::{BufRead, BufReader, Read};

use caravan_document::Document;

use crate::error::{ParseSnafu, Result};
use crate::readers::{RecordReader, parse_delimited_record, require_fields};

const TOKEN_SEPARATOR: char = '\t';

/// Record reader for tab-separated input.
///
/// One line is one record; tokens are split on a single tab and the
/// trailing `\r\n` is stripped. There is no quoting.
pub struct TsvReader<R: Read> {
    fields: Vec<String>,
    input: BufReader<R>,
    line: String,
    num_processed: u64,
}

impl<R: Read> TsvReader<R> {
    /// Returns a reader extracting the given fields from `input`.
    pub fn new(fields: Vec<String>, input: R) -> Self {
        Self {
            fields,
            input: BufReader::new(input),
            line: String::new(),
            num_processed: 0,
        }
    }

    /// Reads the next line into the scratch buffer; false means EOF.
    fn fill_line(&mut self) -> Result<bool> {
        self.line.clear();
        let read = self.input.read_line(&mut self.line).map_err(|error| {
            ParseSnafu {
                record: self.num_processed,
                message: error.to_string(),
            }
            .build()
        })?;
        Ok(read != 0)
    }
}

impl<R: Read + Send> RecordReader for TsvReader<R> {
    fn read_document(&mut self) -> Result<Option<Document>> {
        self.num_processed += 1;
        if !self.fill_line()? {
            return Ok(None);
        }
        let line = self.line.trim_end_matches(['\r', '\n']);
        let tokens: Vec<&str> = line.split(TOKEN_SEPARATOR).collect();
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
        if !self.fill_line()? {
            return ParseSnafu {
                record: self.num_processed,
                message: "input ended before the header line",
            }
            .fail();
        }
        Ok(self
            .line
            .trim_end_matches(['\r', '\n'])
            .split(TOKEN_SEPARATOR)
            .map(|header| header.trim().to_string())
            .collect())
    }

    fn headers(&self) -> &[String] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use caravan_document::doc;

    use super::*;

    fn reader(fields: &[&str], input: &str) -> TsvReader<std::io::Cursor<Vec<u8>>> {
        TsvReader::new(
            fields.iter().map(|f| f.to_string()).collect(),
            std::io::Cursor::new(input.as_bytes().to_vec()),
        )
    }

    #[test]
    fn test_reads_tab_separated_rows() {
        let mut tsv = reader(&["a", "b"], "1\tx\r\n2.5\ty z\n");

        assert_eq!(
            tsv.read_document().unwrap(),
            Some(doc! {"a" => 1i64, "b" => "x"})
        );
        assert_eq!(
            tsv.read_document().unwrap(),
            Some(doc! {"a" => 2.5, "b" => "y z"})
        );
        assert_eq!(tsv.read_document().unwrap(), None);
    }

    #[test]
    fn test_last_line_without_newline_is_a_record() {
        let mut tsv = reader(&["a"], "1\n2");

        assert_eq!(tsv.read_document().unwrap(), Some(doc! {"a" => 1i64}));
        assert_eq!(tsv.read_document().unwrap(), Some(doc! {"a" => 2i64}));
        assert_eq!(tsv.read_document().unwrap(), None);
    }

    #[test]
    fn test_header_line_sets_fields() {
        let mut tsv = reader(&[], "a\tb\n1\t2\n");
        tsv.set_header(true).unwrap();

        assert_eq!(tsv.headers(), ["a", "b"]);
        assert_eq!(
            tsv.read_document().unwrap(),
            Some(doc! {"a" => 1i64, "b" => 2i64})
        );
    }

    #[test]
    fn test_surplus_tokens_use_synthesized_keys() {
        let mut tsv = reader(&["a"], "1\t2\n");
        assert_eq!(
            tsv.read_document().unwrap(),
            Some(doc! {"a" => 1i64, "field1" => 2i64})
        );
    }
}
