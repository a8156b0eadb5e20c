use crate::protocol::constants::{
    COMMENT_RECORD, COMPONENT_DELIMITER, ESCAPE_DELIMITER, FIELD_DELIMITER, HEADER_RECORD,
    REPEAT_DELIMITER,
};
use crate::protocol::encoding::WireEncoding;
use crate::protocol::error::{Result, ValidationError};

/// A decoded ASTM field.
///
/// Fields nest at most two deep on the wire: a field may be a list of
/// repeats (`\`), each repeat a list of components (`^`), and components are
/// atomic text. Empty cells decode to `Null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    Component(Vec<FieldValue>),
    Repeat(Vec<FieldValue>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Builds a component from optional parts, mapping `None` to `Null`.
    pub fn component<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        FieldValue::Component(
            parts
                .into_iter()
                .map(|p| match p {
                    Some(s) => FieldValue::Text(s.into()),
                    None => FieldValue::Null,
                })
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// Returns the record-type letter of a positional field list.
pub fn record_type(fields: &[FieldValue]) -> Option<char> {
    fields.first().and_then(|f| f.as_text()).and_then(|t| t.chars().next())
}

fn escape_for(byte: u8) -> Option<&'static [u8]> {
    match byte {
        FIELD_DELIMITER => Some(b"\\F\\"),
        COMPONENT_DELIMITER => Some(b"\\S\\"),
        REPEAT_DELIMITER => Some(b"\\R\\"),
        ESCAPE_DELIMITER => Some(b"\\E\\"),
        _ => None,
    }
}

fn escaped_literal(letter: u8) -> Option<u8> {
    match letter {
        b'F' => Some(FIELD_DELIMITER),
        b'S' => Some(COMPONENT_DELIMITER),
        b'R' => Some(REPEAT_DELIMITER),
        b'E' => Some(ESCAPE_DELIMITER),
        _ => None,
    }
}

/// Escapes the four separator bytes in a single left-to-right pass.
fn escape_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        match escape_for(b) {
            Some(seq) => out.extend_from_slice(seq),
            None => out.push(b),
        }
    }
    out
}

/// Resolves `\F\ \S\ \R\ \E\` escapes without any separator splitting.
/// Used for fields that are literal by protocol rule (comment text).
fn unescape_literal(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == REPEAT_DELIMITER && i + 2 < data.len() && data[i + 2] == REPEAT_DELIMITER {
            if let Some(literal) = escaped_literal(data[i + 1]) {
                out.push(literal);
                i += 3;
                continue;
            }
        }
        out.push(data[i]);
        i += 1;
    }
    out
}

/// One scan over a field cell: resolves escapes and splits repeats and
/// components in the same pass, so an escaped separator can never be
/// mistaken for a structural one.
fn scan_field(cell: &[u8]) -> Vec<Vec<Vec<u8>>> {
    let mut repeats: Vec<Vec<Vec<u8>>> = Vec::new();
    let mut components: Vec<Vec<u8>> = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    let mut i = 0;
    while i < cell.len() {
        let b = cell[i];
        if b == REPEAT_DELIMITER {
            // Escape sequences share the repeat byte as their bracket, so
            // check for `\X\` before treating this as a separator
            if i + 2 < cell.len() && cell[i + 2] == REPEAT_DELIMITER {
                if let Some(literal) = escaped_literal(cell[i + 1]) {
                    current.push(literal);
                    i += 3;
                    continue;
                }
            }
            components.push(std::mem::take(&mut current));
            repeats.push(std::mem::take(&mut components));
            i += 1;
        } else if b == COMPONENT_DELIMITER {
            components.push(std::mem::take(&mut current));
            i += 1;
        } else {
            current.push(b);
            i += 1;
        }
    }
    components.push(current);
    repeats.push(components);
    repeats
}

fn component_value(
    parts: Vec<Vec<u8>>,
    encoding: WireEncoding,
    strict: bool,
) -> Result<FieldValue> {
    if parts.len() == 1 {
        let text = &parts[0];
        return Ok(if text.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::Text(encoding.decode(text, strict)?)
        });
    }
    let items = parts
        .into_iter()
        .map(|p| {
            Ok(if p.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(encoding.decode(&p, strict)?)
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FieldValue::Component(items))
}

fn decode_field(cell: &[u8], encoding: WireEncoding, strict: bool) -> Result<FieldValue> {
    let mut repeats = scan_field(cell);
    if repeats.len() == 1 {
        let parts = repeats.pop().unwrap_or_default();
        return component_value(parts, encoding, strict);
    }
    let items = repeats
        .into_iter()
        .map(|r| component_value(r, encoding, strict))
        .collect::<Result<Vec<_>>>()?;
    Ok(FieldValue::Repeat(items))
}

/// Decode a single record (no trailing CR) into its positional field list.
///
/// Context-aware per the standard: the header record's delimiter field is
/// kept literal (it declares the delimiters), and the comment record's text
/// field is literal with escapes honoured.
pub fn decode_record(
    record: &[u8],
    encoding: WireEncoding,
    strict: bool,
) -> Result<Vec<FieldValue>> {
    if record.is_empty() {
        if strict {
            return Err(ValidationError::new("empty record").into());
        }
        return Ok(Vec::new());
    }

    let cells: Vec<&[u8]> = record.split(|&b| b == FIELD_DELIMITER).collect();
    let type_cell = cells[0];
    let record_type = (type_cell.len() == 1).then(|| type_cell[0] as char);

    let mut fields = Vec::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        if cell.is_empty() {
            fields.push(FieldValue::Null);
            continue;
        }

        let value = if record_type == Some(HEADER_RECORD) && i == 1 {
            // The delimiter declaration is the one field that must never be
            // unescaped or split
            FieldValue::Text(encoding.decode(cell, strict)?)
        } else if record_type == Some(COMMENT_RECORD) && i == 3 {
            FieldValue::Text(encoding.decode(&unescape_literal(cell), strict)?)
        } else {
            decode_field(cell, encoding, strict)?
        };
        fields.push(value);
    }

    Ok(fields)
}

fn encode_component_items(
    items: &[FieldValue],
    encoding: WireEncoding,
) -> std::result::Result<Vec<u8>, ValidationError> {
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(COMPONENT_DELIMITER);
        }
        match item {
            FieldValue::Null => {}
            FieldValue::Text(text) => out.extend_from_slice(&escape_bytes(&encoding.encode(text)?)),
            _ => {
                return Err(ValidationError::new(
                    "components nest at most one level on the wire",
                ))
            }
        }
    }
    Ok(out)
}

fn encode_field(
    field: &FieldValue,
    encoding: WireEncoding,
) -> std::result::Result<Vec<u8>, ValidationError> {
    match field {
        FieldValue::Null => Ok(Vec::new()),
        FieldValue::Text(text) => Ok(escape_bytes(&encoding.encode(text)?)),
        FieldValue::Component(items) => encode_component_items(items, encoding),
        FieldValue::Repeat(repeats) => {
            let mut out = Vec::new();
            for (i, repeat) in repeats.iter().enumerate() {
                if i > 0 {
                    out.push(REPEAT_DELIMITER);
                }
                match repeat {
                    FieldValue::Component(items) => {
                        out.extend_from_slice(&encode_component_items(items, encoding)?)
                    }
                    FieldValue::Text(text) => {
                        out.extend_from_slice(&escape_bytes(&encoding.encode(text)?))
                    }
                    FieldValue::Null => {}
                    FieldValue::Repeat(_) => {
                        return Err(ValidationError::new("repeats cannot nest"))
                    }
                }
            }
            Ok(out)
        }
    }
}

/// Encode a positional field list back into record bytes (no trailing CR).
pub fn encode_record(
    fields: &[FieldValue],
    encoding: WireEncoding,
) -> std::result::Result<Vec<u8>, ValidationError> {
    let is_header = record_type(fields) == Some(HEADER_RECORD);

    let mut out = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(FIELD_DELIMITER);
        }
        if is_header && i == 1 {
            // Emit the delimiter declaration verbatim
            if let FieldValue::Text(text) = field {
                out.extend_from_slice(&encoding.encode(text)?);
                continue;
            }
        }
        out.extend_from_slice(&encode_field(field, encoding)?);
    }
    Ok(out)
}
