use crate::protocol::error::ValidationError;

/// Character encoding used for record payloads on the wire.
///
/// Control bytes are always ASCII; this only governs how field text is
/// mapped to and from bytes. Latin-1 is the ASTM default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireEncoding {
    #[default]
    Latin1,
    Utf8,
    Ascii,
}

impl WireEncoding {
    /// Resolve a profile `encoding` label. Unknown labels are rejected so a
    /// misconfigured profile fails at load time, not mid-transfer.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "latin-1" | "latin1" | "iso-8859-1" => Some(WireEncoding::Latin1),
            "utf-8" | "utf8" => Some(WireEncoding::Utf8),
            "ascii" | "us-ascii" => Some(WireEncoding::Ascii),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WireEncoding::Latin1 => "latin-1",
            WireEncoding::Utf8 => "utf-8",
            WireEncoding::Ascii => "ascii",
        }
    }

    /// Decode payload bytes into text. In non-strict mode undecodable bytes
    /// are replaced rather than rejected.
    pub fn decode(&self, data: &[u8], strict: bool) -> Result<String, ValidationError> {
        match self {
            // Latin-1 maps every byte to the code point of the same value
            WireEncoding::Latin1 => Ok(data.iter().map(|&b| b as char).collect()),
            WireEncoding::Utf8 => match std::str::from_utf8(data) {
                Ok(text) => Ok(text.to_string()),
                Err(e) if strict => Err(ValidationError::new(format!(
                    "invalid UTF-8 payload: {}",
                    e
                ))),
                Err(_) => Ok(String::from_utf8_lossy(data).into_owned()),
            },
            WireEncoding::Ascii => {
                if data.is_ascii() {
                    Ok(data.iter().map(|&b| b as char).collect())
                } else if strict {
                    Err(ValidationError::new("non-ASCII byte in ASCII payload"))
                } else {
                    Ok(data
                        .iter()
                        .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                        .collect())
                }
            }
        }
    }

    /// Encode text into payload bytes. Characters outside the target
    /// repertoire are a validation failure.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, ValidationError> {
        match self {
            WireEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    let cp = c as u32;
                    if cp <= 0xFF {
                        Ok(cp as u8)
                    } else {
                        Err(ValidationError::new(format!(
                            "character '{}' is not representable in latin-1",
                            c
                        )))
                    }
                })
                .collect(),
            WireEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            WireEncoding::Ascii => {
                if text.is_ascii() {
                    Ok(text.as_bytes().to_vec())
                } else {
                    Err(ValidationError::new("text is not representable in ASCII"))
                }
            }
        }
    }
}
