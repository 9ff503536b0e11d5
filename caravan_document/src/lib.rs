pub mod error;
pub mod json;
pub mod value;
pub mod wire;

pub use error::{DocumentError, Result};
pub use json::{document_from_json, document_to_json};
pub use value::{Document, Value};
pub use wire::{MAX_DOCUMENT_SIZE, decode, encode, encoded_size, validate};
