use log::warn;

use crate::protocol::constants::{CR, MAX_MESSAGE_SIZE, MIN_CHUNK_SIZE, RECORD_DELIMITER, STX};
use crate::protocol::encoding::WireEncoding;
use crate::protocol::error::{ProtocolError, Result, ValidationError};
use crate::protocol::frame::{is_chunked, Frame, ParsedFrame};
use crate::protocol::record::{decode_record, encode_record, FieldValue};

/// Classification of what a blob of bytes turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// STX-framed message terminated by ETX
    Complete,
    /// STX-framed chunk terminated by ETB
    Chunked,
    /// A bare frame: sequence digit and records, no STX/checksum trailer
    FrameOnly,
    /// Record content only, no framing at all
    RecordOnly,
}

/// Decode output plus the framing metadata some integrations need.
#[derive(Debug, Clone)]
pub struct DecodingResult {
    pub data: Vec<Vec<FieldValue>>,
    pub message_type: MessageType,
    pub sequence_number: Option<u8>,
    pub checksum: Option<String>,
    pub checksum_valid: bool,
    pub warnings: Vec<String>,
}

/// Splits a message body on the record separator, dropping empty slots.
pub fn split_records(body: &[u8]) -> Vec<&[u8]> {
    body.split(|&b| b == RECORD_DELIMITER)
        .filter(|r| !r.is_empty())
        .collect()
}

/// Encodes records into one message body: each record followed by CR.
pub fn encode_body(
    records: &[Vec<FieldValue>],
    encoding: WireEncoding,
) -> std::result::Result<Vec<u8>, ValidationError> {
    let mut body = Vec::new();
    for record in records {
        body.extend_from_slice(&encode_record(record, encoding)?);
        body.push(CR);
    }
    Ok(body)
}

/// Splits a message body into frames of at most `chunk_size` wire bytes.
///
/// Non-final frames are ETB-terminated; the final frame carries the body
/// tail (ending in its record-separator CR) and ETX. Always yields at least
/// one frame.
pub fn split_body(body: &[u8], chunk_size: usize, start_seq: u8) -> Result<Vec<Vec<u8>>> {
    if chunk_size < MIN_CHUNK_SIZE {
        return Err(ValidationError::new(format!(
            "chunk size {} is below the {} byte frame minimum",
            chunk_size, MIN_CHUNK_SIZE
        ))
        .into());
    }

    // Seven bytes of every chunk are framing overhead; at the minimum size
    // each frame still carries one body byte
    let group = (chunk_size - MIN_CHUNK_SIZE).max(1);
    let groups: Vec<&[u8]> = if body.is_empty() {
        vec![&[][..]]
    } else {
        body.chunks(group).collect()
    };

    let last = groups.len() - 1;
    Ok(groups
        .iter()
        .enumerate()
        .map(|(k, chunk)| {
            let seq = ((start_seq as usize + k) % 8) as u8;
            Frame::new(seq, chunk.to_vec(), k == last).encode()
        })
        .collect())
}

/// Joins a chunk sequence back into one message body.
///
/// Sequences must be contiguous modulo 8 from the first frame's declared
/// number; only the final frame may be ETX-terminated.
pub fn join(frames: &[ParsedFrame]) -> Result<Vec<u8>> {
    if frames.is_empty() {
        return Err(ValidationError::new("no frames to join").into());
    }

    let mut body = Vec::new();
    let mut expected = frames[0].sequence;
    let last = frames.len() - 1;

    for (i, frame) in frames.iter().enumerate() {
        if frame.sequence != expected {
            return Err(ProtocolError::SequenceGap {
                expected,
                actual: frame.sequence,
            });
        }
        if frame.is_last != (i == last) {
            return Err(ProtocolError::InvalidFrameFormat(format!(
                "frame {} has the wrong terminator for its position",
                frame.sequence
            )));
        }
        body.extend_from_slice(&frame.body);
        expected = (expected + 1) % 8;
    }

    Ok(body)
}

/// Encodes records into framed wire messages.
///
/// Produces a single logical message; when `chunk_size` is given and the
/// message exceeds it, the message is split into ETB chunks. An empty record
/// list is a `ValidationError` in strict mode and yields no frames otherwise.
pub fn encode(
    records: &[Vec<FieldValue>],
    encoding: WireEncoding,
    chunk_size: Option<usize>,
    start_seq: u8,
    strict: bool,
) -> Result<Vec<Vec<u8>>> {
    if records.is_empty() {
        if strict {
            return Err(ValidationError::new("no records provided for encoding").into());
        }
        warn!("No records provided, returning no frames");
        return Ok(Vec::new());
    }

    let body = encode_body(records, encoding)?;
    let framed_len = body.len() + MIN_CHUNK_SIZE;
    if framed_len > MAX_MESSAGE_SIZE {
        if strict {
            return Err(ProtocolError::MessageTooLarge(framed_len));
        }
        warn!("Encoding oversize message of {} bytes", framed_len);
    }

    match chunk_size {
        Some(size) if framed_len > size => split_body(&body, size, start_seq),
        _ => Ok(vec![Frame::new(start_seq, body, true).encode()]),
    }
}

/// Decodes a message, frame, or bare record into positional record lists.
///
/// Strict mode surfaces the first protocol or checksum violation. Non-strict
/// mode falls back to a best-effort recovery pass that never fails.
pub fn decode(
    data: &[u8],
    encoding: WireEncoding,
    strict: bool,
) -> Result<Vec<Vec<FieldValue>>> {
    decode_with_metadata(data, encoding, strict).map(|result| result.data)
}

/// `decode`, plus framing metadata and any recovery warnings.
pub fn decode_with_metadata(
    data: &[u8],
    encoding: WireEncoding,
    strict: bool,
) -> Result<DecodingResult> {
    if data.is_empty() {
        return Err(ValidationError::new("no data to decode").into());
    }

    let attempt = decode_classified(data, encoding, strict);
    match attempt {
        Ok(result) => Ok(result),
        Err(e) if strict => Err(e),
        Err(e) => {
            warn!("Decode failed ({}), attempting recovery", e);
            Ok(recovery_decode(data, encoding, e))
        }
    }
}

fn decode_classified(
    data: &[u8],
    encoding: WireEncoding,
    strict: bool,
) -> Result<DecodingResult> {
    if data[0] == STX {
        let message_type = if is_chunked(data) {
            MessageType::Chunked
        } else {
            MessageType::Complete
        };

        let frame = Frame::parse(data, strict)?;
        let mut warnings = Vec::new();
        if message_type == MessageType::Chunked {
            warnings.push("chunked frame decoded alone; remaining chunks not seen".to_string());
        }
        if !frame.checksum_ok {
            warnings.push("checksum mismatch on decoded frame".to_string());
        }

        return Ok(DecodingResult {
            data: decode_records(&frame.body, encoding, strict)?,
            message_type,
            sequence_number: Some(frame.sequence),
            checksum: Some(frame.checksum.clone()),
            checksum_valid: frame.checksum_ok,
            warnings,
        });
    }

    if data[0].is_ascii_digit() {
        // A frame stripped of its STX envelope: sequence digit then records
        let sequence = data[0] - b'0';
        if sequence > 7 && strict {
            return Err(ProtocolError::InvalidFrameFormat(format!(
                "sequence number {} out of range 0-7",
                sequence
            )));
        }
        return Ok(DecodingResult {
            data: decode_records(&data[1..], encoding, strict)?,
            message_type: MessageType::FrameOnly,
            sequence_number: Some(sequence % 8),
            checksum: None,
            checksum_valid: true,
            warnings: Vec::new(),
        });
    }

    Ok(DecodingResult {
        data: decode_records(data, encoding, strict)?,
        message_type: MessageType::RecordOnly,
        sequence_number: None,
        checksum: None,
        checksum_valid: true,
        warnings: Vec::new(),
    })
}

/// Decodes every CR-separated record in a message body.
pub fn decode_records(
    body: &[u8],
    encoding: WireEncoding,
    strict: bool,
) -> Result<Vec<Vec<FieldValue>>> {
    split_records(body)
        .into_iter()
        .map(|record| decode_record(record, encoding, strict))
        .collect()
}

/// Best-effort salvage of malformed input: realign on STX when present,
/// otherwise split on record separators and field-split whatever remains.
fn recovery_decode(data: &[u8], encoding: WireEncoding, cause: ProtocolError) -> DecodingResult {
    let mut warnings = vec![format!("recovery decode after: {}", cause)];

    let realigned = match data.iter().position(|&b| b == STX) {
        Some(pos) if pos > 0 => {
            warnings.push(format!("discarded {} bytes before STX", pos));
            &data[pos..]
        }
        _ => data,
    };

    // Strip framing bytes we cannot trust and decode record-by-record,
    // falling back to raw text fields when a record refuses to parse
    let mut records = Vec::new();
    for chunk in realigned.split(|&b| b == RECORD_DELIMITER) {
        let cleaned: Vec<u8> = chunk
            .iter()
            .copied()
            .filter(|&b| !b.is_ascii_control())
            .collect();
        if cleaned.is_empty() {
            continue;
        }
        match decode_record(&cleaned, encoding, false) {
            Ok(fields) if !fields.is_empty() => records.push(fields),
            _ => {
                let text = encoding.decode(&cleaned, false).unwrap_or_default();
                records.push(
                    text.split('|')
                        .map(|f| {
                            if f.is_empty() {
                                FieldValue::Null
                            } else {
                                FieldValue::Text(f.to_string())
                            }
                        })
                        .collect(),
                );
            }
        }
    }
    warnings.push(format!("recovered {} records from malformed data", records.len()));

    DecodingResult {
        data: records,
        message_type: MessageType::RecordOnly,
        sequence_number: None,
        checksum: None,
        checksum_valid: false,
        warnings,
    }
}
