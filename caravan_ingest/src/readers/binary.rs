use std::io::{self, Read};

use caravan_document::{Document, MAX_DOCUMENT_SIZE, wire};
use snafu::ResultExt;

use crate::error::{InvalidDocumentSnafu, IoSnafu, ParseSnafu, Result, TruncatedSnafu};
use crate::readers::RecordReader;

/// Record reader for the length-prefixed binary document stream.
///
/// The four-byte little-endian prefix counts the whole document,
/// including the prefix itself and the trailing NUL; the body is read
/// verbatim. End of stream in the middle of a length or body is reported
/// as truncated input, not EOF.
pub struct BinaryDocReader<R: Read> {
    input: R,
    objcheck: bool,
    num_processed: u64,
}

impl<R: Read> BinaryDocReader<R> {
    pub fn new(objcheck: bool, input: R) -> Self {
        Self {
            input,
            objcheck,
            num_processed: 0,
        }
    }
}

impl<R: Read + Send> RecordReader for BinaryDocReader<R> {
    fn read_document(&mut self) -> Result<Option<Document>> {
        self.num_processed += 1;

        let mut prefix = [0u8; 4];
        match read_full(&mut self.input, &mut prefix).context(IoSnafu)? {
            0 => return Ok(None),
            4 => {}
            short => {
                return TruncatedSnafu {
                    expected: 4usize,
                    actual: short,
                }
                .fail();
            }
        }

        let declared = i32::from_le_bytes(prefix);
        if declared < 5 || declared as usize > MAX_DOCUMENT_SIZE {
            return ParseSnafu {
                record: self.num_processed,
                message: format!("invalid document length {declared}"),
            }
            .fail();
        }

        let declared = declared as usize;
        let mut body = vec![0u8; declared];
        body[..4].copy_from_slice(&prefix);
        let read = read_full(&mut self.input, &mut body[4..]).context(IoSnafu)?;
        if read != declared - 4 {
            return TruncatedSnafu {
                expected: declared,
                actual: 4 + read,
            }
            .fail();
        }

        if self.objcheck {
            wire::validate(&body).context(InvalidDocumentSnafu)?;
        }
        let document = wire::decode(&body).context(InvalidDocumentSnafu)?;
        Ok(Some(document))
    }
}

/// Reads until `buf` is full or the stream ends, returning the bytes read.
fn read_full(input: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}
