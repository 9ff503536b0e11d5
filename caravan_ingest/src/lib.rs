pub mod bulk;
pub mod error;
pub mod pipeline;
pub mod readers;

pub use bulk::{BufferedBulkWriter, MAX_MESSAGE_SIZE};
pub use error::{IngestError, Result};
pub use pipeline::{IngestOptions, IngestPipeline};
pub use readers::{BinaryDocReader, CsvReader, JsonReader, RecordReader, TsvReader};
