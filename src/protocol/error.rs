use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Invalid checksum: expected {expected}, calculated {calculated}")]
    InvalidChecksum {
        expected: String,
        calculated: String,
        frame: Vec<u8>,
    },

    #[error("Invalid frame format: {0}")]
    InvalidFrameFormat(String),

    #[error("Invalid record format: {0}")]
    InvalidRecordFormat(String),

    #[error("Message of {0} bytes exceeds the 64000 byte limit")]
    MessageTooLarge(usize),

    #[error("Non-contiguous frame sequence: expected {expected}, got {actual}")]
    SequenceGap { expected: u8, actual: u8 },

    #[error("Session not accepted by peer after {attempts} attempts")]
    NotAccepted { attempts: u32 },

    #[error("Transfer rejected by receiver after {attempts} attempts")]
    Rejected { attempts: u32 },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A field or codec input failed validation against its constraints.
///
/// Carries the offending field name and 1-based ASTM position when the
/// failure came out of a record schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: Option<String>,
    pub position: Option<usize>,
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            field: None,
            position: None,
            reason: reason.into(),
        }
    }

    pub fn for_field(
        field: impl Into<String>,
        position: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            position: Some(position),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error")?;
        match (&self.field, self.position) {
            (Some(field), Some(pos)) => write!(f, " in field '{}' (position {})", field, pos)?,
            (Some(field), None) => write!(f, " in field '{}'", field)?,
            _ => {}
        }
        write!(f, ": {}", self.reason)
    }
}

impl std::error::Error for ValidationError {}

pub type Result<T> = std::result::Result<T, ProtocolError>;
