use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A device profile failed structural validation at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    pub key: Option<String>,
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            key: None,
            message: message.into(),
        }
    }

    pub fn for_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Configuration error")?;
        if let Some(key) = &self.key {
            write!(f, " for '{}'", key)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ConfigurationError {}

/// The value type a profile assigns to one ASTM field position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Constant,
    String,
    Integer,
    Decimal,
    Enum,
    Datetime,
    Component,
    Ignored,
}

/// One field definition inside a record schema.
///
/// `position` is the 1-based ASTM cell position; when omitted it defaults to
/// the field's place in the list. The type-specific keys (`values`, `format`,
/// `fields`) are validated against `kind` at load time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,
}

/// An ordered record schema: the field list for one record-type letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RecordConfig {
    pub fields: Vec<FieldSpec>,
}

/// Components may nest once below a field; anything deeper has no wire
/// representation.
const MAX_COMPONENT_DEPTH: usize = 2;

impl RecordConfig {
    /// Structural validation of the whole field list.
    pub fn validate(&self, record_type: &str) -> Result<(), ConfigurationError> {
        if self.fields.is_empty() {
            return Err(ConfigurationError::for_key(
                record_type,
                "record schema has no fields",
            ));
        }

        let mut seen_positions = Vec::new();
        for (index, field) in self.fields.iter().enumerate() {
            let position = field.resolved_position(index);
            if position == 0 {
                return Err(ConfigurationError::for_key(
                    &field.name,
                    "field positions are 1-based",
                ));
            }
            if seen_positions.contains(&position) {
                return Err(ConfigurationError::for_key(
                    &field.name,
                    format!("duplicate field position {}", position),
                ));
            }
            seen_positions.push(position);

            field.validate(1)?;
        }
        Ok(())
    }
}

impl FieldSpec {
    /// The 1-based cell position, defaulting to the field's list index.
    pub fn resolved_position(&self, index: usize) -> usize {
        self.position.unwrap_or(index + 1)
    }

    fn validate(&self, depth: usize) -> Result<(), ConfigurationError> {
        match self.kind {
            FieldKind::Constant => {
                let default = self.default.as_ref().ok_or_else(|| {
                    ConfigurationError::for_key(&self.name, "constant field needs a default value")
                })?;
                if let Some(max) = self.max_length {
                    if default.chars().count() > max {
                        return Err(ConfigurationError::for_key(
                            &self.name,
                            format!(
                                "default value '{}' exceeds max_length {}",
                                default, max
                            ),
                        ));
                    }
                }
            }
            FieldKind::String => {
                if let (Some(default), Some(max)) = (&self.default, self.max_length) {
                    if default.chars().count() > max {
                        return Err(ConfigurationError::for_key(
                            &self.name,
                            format!("default value exceeds max_length {}", max),
                        ));
                    }
                }
            }
            FieldKind::Enum => {
                let values = self.values.as_ref().filter(|v| !v.is_empty()).ok_or_else(|| {
                    ConfigurationError::for_key(&self.name, "enum field needs a non-empty values list")
                })?;
                if let Some(max) = self.max_length {
                    for value in values {
                        if value.chars().count() > max {
                            return Err(ConfigurationError::for_key(
                                &self.name,
                                format!("enum value '{}' exceeds max_length {}", value, max),
                            ));
                        }
                    }
                }
                if let Some(default) = &self.default {
                    if !values.contains(default) {
                        return Err(ConfigurationError::for_key(
                            &self.name,
                            format!("default '{}' is not among the enum values", default),
                        ));
                    }
                }
            }
            FieldKind::Datetime => {
                let format = self.format.as_ref().ok_or_else(|| {
                    ConfigurationError::for_key(&self.name, "datetime field needs a format")
                })?;
                let rendered = rendered_datetime_length(format).ok_or_else(|| {
                    ConfigurationError::for_key(
                        &self.name,
                        format!("invalid datetime format '{}'", format),
                    )
                })?;
                if let Some(default) = &self.default {
                    let parses = NaiveDateTime::parse_from_str(default, format).is_ok()
                        || NaiveDate::parse_from_str(default, format).is_ok();
                    if !parses {
                        return Err(ConfigurationError::for_key(
                            &self.name,
                            format!("default '{}' does not match format '{}'", default, format),
                        ));
                    }
                }
                if let Some(max) = self.max_length {
                    if rendered != max {
                        return Err(ConfigurationError::for_key(
                            &self.name,
                            format!(
                                "max_length {} does not match the {} characters rendered by '{}'",
                                max, rendered, format
                            ),
                        ));
                    }
                }
            }
            FieldKind::Component => {
                let fields = self.fields.as_ref().filter(|f| !f.is_empty()).ok_or_else(|| {
                    ConfigurationError::for_key(
                        &self.name,
                        "component field needs a non-empty nested field list",
                    )
                })?;
                if depth >= MAX_COMPONENT_DEPTH {
                    return Err(ConfigurationError::for_key(
                        &self.name,
                        "components nest at most two levels",
                    ));
                }
                for (index, sub) in fields.iter().enumerate() {
                    if sub.resolved_position(index) == 0 {
                        return Err(ConfigurationError::for_key(
                            &sub.name,
                            "component positions are 1-based",
                        ));
                    }
                    sub.validate(depth + 1)?;
                }
            }
            FieldKind::Integer | FieldKind::Decimal | FieldKind::Ignored => {}
        }
        Ok(())
    }
}

/// The number of characters a strftime-style format renders to, or `None`
/// when the format itself is invalid. Used to cross-check `max_length`.
fn rendered_datetime_length(format: &str) -> Option<usize> {
    for item in StrftimeItems::new(format) {
        if matches!(item, Item::Error) {
            return None;
        }
    }
    let reference = NaiveDate::from_ymd_opt(2000, 1, 1)?.and_hms_opt(0, 0, 0)?;
    Some(reference.format(format).to_string().chars().count())
}
