// ASTM E1394 wire protocol implementation

pub mod constants;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod record;

// Re-exports
pub use encoding::WireEncoding;
pub use error::{ProtocolError, Result, ValidationError};
pub use frame::{Frame, ParsedFrame};
pub use message::{decode, decode_with_metadata, encode, DecodingResult, MessageType};
pub use record::FieldValue;
