use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::debug;
use rust_decimal::Decimal;

use crate::profile::schema::{ConfigurationError, FieldKind, FieldSpec, RecordConfig};
use crate::protocol::error::ValidationError;
use crate::protocol::record::FieldValue;

/// A typed, validated value inside a record instance.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    /// Elements of a repeated field, in wire order
    List(Vec<RecordValue>),
    /// A nested component record
    Composite(AstmRecord),
}

impl RecordValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RecordValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RecordValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The rendered length used for `max_length` checks.
    fn rendered_len(&self) -> usize {
        match self {
            RecordValue::Null => 0,
            RecordValue::Text(s) => s.chars().count(),
            RecordValue::Integer(i) => i.to_string().len(),
            RecordValue::Decimal(d) => d.to_string().len(),
            RecordValue::DateTime(_) | RecordValue::List(_) | RecordValue::Composite(_) => 0,
        }
    }
}

/// A runtime record instance produced by a [`RecordClass`].
///
/// Equality ignores the audit stamps, so a round-tripped record compares
/// equal to its origin.
#[derive(Debug, Clone)]
pub struct AstmRecord {
    record_type: String,
    values: BTreeMap<String, RecordValue>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    source: Option<String>,
}

impl AstmRecord {
    fn new(record_type: &str) -> Self {
        let now = Utc::now();
        Self {
            record_type: record_type.to_string(),
            values: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            source: None,
        }
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn get(&self, name: &str) -> Option<&RecordValue> {
        self.values.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Audit tag naming where this record came from (peer address, device).
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }
}

impl PartialEq for AstmRecord {
    fn eq(&self, other: &Self) -> bool {
        self.record_type == other.record_type && self.values == other.values
    }
}

#[derive(Debug)]
enum CompiledKind {
    Constant,
    Text,
    Integer,
    Decimal,
    Enum(Vec<String>),
    DateTime(String),
    Component(Arc<RecordClass>),
    Ignored,
}

#[derive(Debug)]
struct CompiledField {
    name: String,
    /// 1-based ASTM cell position
    position: usize,
    kind: CompiledKind,
    required: bool,
    repeated: bool,
    max_length: Option<usize>,
    default: Option<String>,
}

/// A compiled record schema: the validators and position maps for one
/// record type, built once from the profile and shared for the life of the
/// process.
#[derive(Debug)]
pub struct RecordClass {
    record_type: String,
    fields: Vec<CompiledField>,
    by_name: HashMap<String, usize>,
    by_position: HashMap<usize, usize>,
    required: Vec<String>,
    max_position: usize,
    is_component: bool,
}

fn class_cache() -> &'static Mutex<HashMap<u64, Arc<RecordClass>>> {
    static CACHE: OnceLock<Mutex<HashMap<u64, Arc<RecordClass>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cache_key(record_type: &str, config: &RecordConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    record_type.hash(&mut hasher);
    config.hash(&mut hasher);
    hasher.finish()
}

impl RecordClass {
    /// Compile (or fetch from the process-wide cache) the class for one
    /// record type. The cache is keyed by a hash of the field list, so
    /// profiles sharing a schema share the compiled class.
    pub fn compile(
        record_type: &str,
        config: &RecordConfig,
    ) -> Result<Arc<Self>, ConfigurationError> {
        let key = cache_key(record_type, config);
        if let Some(class) = class_cache().lock().expect("class cache poisoned").get(&key) {
            return Ok(Arc::clone(class));
        }

        config.validate(record_type)?;
        let class = Arc::new(Self::compile_fields(record_type, &config.fields, false)?);
        class_cache()
            .lock()
            .expect("class cache poisoned")
            .insert(key, Arc::clone(&class));
        debug!(
            "Compiled record class '{}' with {} fields",
            record_type,
            class.fields.len()
        );
        Ok(class)
    }

    fn compile_fields(
        record_type: &str,
        specs: &[FieldSpec],
        is_component: bool,
    ) -> Result<Self, ConfigurationError> {
        let mut fields = Vec::with_capacity(specs.len());
        let mut by_name = HashMap::new();
        let mut by_position = HashMap::new();
        let mut required = Vec::new();
        let mut max_position = 0;

        for (index, spec) in specs.iter().enumerate() {
            let position = spec.resolved_position(index);
            let kind = match spec.kind {
                FieldKind::Constant => CompiledKind::Constant,
                FieldKind::String => CompiledKind::Text,
                FieldKind::Integer => CompiledKind::Integer,
                FieldKind::Decimal => CompiledKind::Decimal,
                FieldKind::Enum => CompiledKind::Enum(
                    spec.values.clone().unwrap_or_default(),
                ),
                FieldKind::Datetime => CompiledKind::DateTime(
                    spec.format.clone().unwrap_or_default(),
                ),
                FieldKind::Component => {
                    let nested = spec.fields.as_deref().unwrap_or_default();
                    CompiledKind::Component(Arc::new(Self::compile_fields(
                        &spec.name, nested, true,
                    )?))
                }
                FieldKind::Ignored => CompiledKind::Ignored,
            };

            if spec.required {
                required.push(spec.name.clone());
            }
            max_position = max_position.max(position);
            by_name.insert(spec.name.clone(), fields.len());
            by_position.insert(position, fields.len());
            fields.push(CompiledField {
                name: spec.name.clone(),
                position,
                kind,
                required: spec.required,
                repeated: spec.repeated,
                max_length: spec.max_length,
                default: spec.default.clone(),
            });
        }

        Ok(Self {
            record_type: record_type.to_string(),
            fields,
            by_name,
            by_position,
            required,
            max_position,
            is_component,
        })
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required
    }

    /// 1-based position of a named field.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).map(|&i| self.fields[i].position)
    }

    /// Field name at a 1-based position.
    pub fn name_at(&self, position: usize) -> Option<&str> {
        self.by_position
            .get(&position)
            .map(|&i| self.fields[i].name.as_str())
    }

    /// A fresh record instance with declared defaults applied.
    pub fn new_record(&self) -> AstmRecord {
        let mut record = AstmRecord::new(&self.record_type);
        for field in &self.fields {
            if let Some(default) = &field.default {
                if let Ok(value) = self.coerce_scalar(field, default) {
                    record.values.insert(field.name.clone(), value);
                }
            }
        }
        record
    }

    /// Validate and set one named field, bumping the record's update stamp.
    pub fn set_field(
        &self,
        record: &mut AstmRecord,
        name: &str,
        value: RecordValue,
    ) -> Result<(), ValidationError> {
        let index = *self.by_name.get(name).ok_or_else(|| {
            ValidationError::new(format!(
                "record type '{}' has no field '{}'",
                self.record_type, name
            ))
        })?;
        let field = &self.fields[index];
        self.validate_value(field, &value)?;
        record.values.insert(name.to_string(), value);
        record.updated_at = Utc::now();
        Ok(())
    }

    /// Build a typed record from the positional field list the codec
    /// produced. Unknown trailing positions are ignored; validation errors
    /// are collected and the first one is returned.
    pub fn parse_positional(&self, values: &[FieldValue]) -> Result<AstmRecord, ValidationError> {
        let mut record = self.new_record();
        let mut errors: Vec<ValidationError> = Vec::new();

        for (index, value) in values.iter().enumerate() {
            let position = index + 1;
            if !self.is_component && position == 1 && !self.by_position.contains_key(&1) {
                // Top-level index 0 is the record-type letter; only consume
                // it when the schema declares position 1 explicitly
                continue;
            }
            let field = match self.by_position.get(&position) {
                Some(&i) => &self.fields[i],
                None => continue,
            };
            if matches!(field.kind, CompiledKind::Ignored) {
                continue;
            }
            if value.is_null() {
                continue;
            }

            match self.coerce(field, value) {
                Ok(typed) => {
                    record.values.insert(field.name.clone(), typed);
                }
                Err(e) => errors.push(e),
            }
        }

        // Field validators run over the fully assembled record
        for field in &self.fields {
            let value = record.values.get(&field.name).unwrap_or(&RecordValue::Null);
            if let Err(e) = self.validate_value(field, value) {
                errors.push(e);
            }
        }

        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(record),
        }
    }

    /// Produce the positional field list for the encoder: index 0 is the
    /// record-type letter, each named field lands at its declared position.
    pub fn to_positional(&self, record: &AstmRecord) -> Vec<FieldValue> {
        let len = self.max_position.max(1);
        let mut cells = vec![FieldValue::Null; len];
        if !self.is_component {
            cells[0] = FieldValue::Text(self.record_type.clone());
        }

        for field in &self.fields {
            let Some(value) = record.values.get(&field.name) else {
                continue;
            };
            let cell = self.serialize_value(field, value);
            if field.position >= 1 && field.position <= len {
                cells[field.position - 1] = cell;
            }
        }
        cells
    }

    fn serialize_value(&self, field: &CompiledField, value: &RecordValue) -> FieldValue {
        match value {
            RecordValue::Null => FieldValue::Null,
            RecordValue::Text(s) => FieldValue::Text(s.clone()),
            RecordValue::Integer(i) => FieldValue::Text(i.to_string()),
            RecordValue::Decimal(d) => FieldValue::Text(d.to_string()),
            RecordValue::DateTime(dt) => {
                let format = match &field.kind {
                    CompiledKind::DateTime(format) => format.as_str(),
                    _ => "%Y%m%d%H%M%S",
                };
                FieldValue::Text(dt.format(format).to_string())
            }
            RecordValue::List(items) => {
                if items.is_empty() {
                    return FieldValue::Null;
                }
                FieldValue::Repeat(
                    items
                        .iter()
                        .map(|item| self.serialize_value(field, item))
                        .collect(),
                )
            }
            RecordValue::Composite(nested) => match &field.kind {
                CompiledKind::Component(class) => {
                    FieldValue::Component(class.to_positional(nested))
                }
                _ => FieldValue::Null,
            },
        }
    }

    fn coerce(&self, field: &CompiledField, value: &FieldValue) -> Result<RecordValue, ValidationError> {
        if field.repeated {
            let items = match value {
                FieldValue::Repeat(items) => items.iter().collect::<Vec<_>>(),
                single => vec![single],
            };
            let coerced = items
                .into_iter()
                .map(|item| self.coerce_single(field, item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(RecordValue::List(coerced));
        }
        self.coerce_single(field, value)
    }

    fn coerce_single(
        &self,
        field: &CompiledField,
        value: &FieldValue,
    ) -> Result<RecordValue, ValidationError> {
        match (&field.kind, value) {
            (_, FieldValue::Null) => Ok(RecordValue::Null),
            (CompiledKind::Component(class), FieldValue::Component(items)) => {
                Ok(RecordValue::Composite(class.parse_positional(items)?))
            }
            (CompiledKind::Component(class), FieldValue::Text(_)) => {
                // A bare value fills the component's first position
                Ok(RecordValue::Composite(
                    class.parse_positional(std::slice::from_ref(value))?,
                ))
            }
            (_, FieldValue::Text(text)) => self.coerce_scalar(field, text),
            (_, FieldValue::Component(_)) | (_, FieldValue::Repeat(_)) => {
                Err(ValidationError::for_field(
                    &field.name,
                    field.position,
                    "unexpected component structure for a scalar field",
                ))
            }
        }
    }

    fn coerce_scalar(
        &self,
        field: &CompiledField,
        text: &str,
    ) -> Result<RecordValue, ValidationError> {
        match &field.kind {
            CompiledKind::Integer => text.parse::<i64>().map(RecordValue::Integer).map_err(|_| {
                ValidationError::for_field(
                    &field.name,
                    field.position,
                    format!("'{}' is not an integer", text),
                )
            }),
            CompiledKind::Decimal => text
                .parse::<Decimal>()
                .map(RecordValue::Decimal)
                .map_err(|_| {
                    ValidationError::for_field(
                        &field.name,
                        field.position,
                        format!("'{}' is not a decimal number", text),
                    )
                }),
            CompiledKind::DateTime(format) => parse_datetime(text, format)
                .map(RecordValue::DateTime)
                .ok_or_else(|| {
                    ValidationError::for_field(
                        &field.name,
                        field.position,
                        format!("'{}' does not match datetime format '{}'", text, format),
                    )
                }),
            CompiledKind::Component(class) => Ok(RecordValue::Composite(
                class.parse_positional(&[FieldValue::Text(text.to_string())])?,
            )),
            _ => Ok(RecordValue::Text(text.to_string())),
        }
    }

    fn validate_value(
        &self,
        field: &CompiledField,
        value: &RecordValue,
    ) -> Result<(), ValidationError> {
        if value.is_null() {
            if field.required {
                return Err(ValidationError::for_field(
                    &field.name,
                    field.position,
                    "required field is missing",
                ));
            }
            return Ok(());
        }

        if let RecordValue::List(items) = value {
            for item in items {
                self.validate_value(field, item)?;
            }
            return Ok(());
        }

        match &field.kind {
            CompiledKind::Constant => {
                let expected = field.default.as_deref().unwrap_or_default();
                if value.as_text() != Some(expected) {
                    return Err(ValidationError::for_field(
                        &field.name,
                        field.position,
                        format!("constant field must be '{}'", expected),
                    ));
                }
            }
            CompiledKind::Enum(values) => {
                let text = value.as_text().unwrap_or_default();
                if !values.iter().any(|v| v == text) {
                    return Err(ValidationError::for_field(
                        &field.name,
                        field.position,
                        format!("'{}' is not one of {:?}", text, values),
                    ));
                }
            }
            CompiledKind::Integer => {
                if let (Some(max), RecordValue::Integer(i)) = (field.max_length, value) {
                    let digits = i.unsigned_abs().to_string().len();
                    if digits > max {
                        return Err(ValidationError::for_field(
                            &field.name,
                            field.position,
                            format!("{} has more than {} digits", i, max),
                        ));
                    }
                }
            }
            CompiledKind::Component(class) => {
                if let RecordValue::Composite(nested) = value {
                    if nested.record_type != class.record_type {
                        return Err(ValidationError::for_field(
                            &field.name,
                            field.position,
                            "component value built from a different schema",
                        ));
                    }
                }
            }
            _ => {}
        }

        if let Some(max) = field.max_length {
            if !matches!(field.kind, CompiledKind::DateTime(_) | CompiledKind::Integer) {
                let len = value.rendered_len();
                if len > max {
                    return Err(ValidationError::for_field(
                        &field.name,
                        field.position,
                        format!("value of length {} exceeds max_length {}", len, max),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Parse an ASTM timestamp, tolerating a date-only value for formats that
/// carry no time part.
fn parse_datetime(text: &str, format: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
        return Some(dt);
    }
    NaiveDate::parse_from_str(text, format)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encoding::WireEncoding;
    use crate::protocol::record::decode_record;

    fn spec(name: &str, position: usize, kind: FieldKind) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            position: Some(position),
            kind,
            required: false,
            repeated: false,
            max_length: None,
            default: None,
            values: None,
            format: None,
            fields: None,
        }
    }

    fn result_config() -> RecordConfig {
        RecordConfig {
            fields: vec![
                FieldSpec {
                    default: Some("R".to_string()),
                    max_length: Some(1),
                    ..spec("type", 1, FieldKind::Constant)
                },
                FieldSpec {
                    required: true,
                    ..spec("sequence", 2, FieldKind::Integer)
                },
                FieldSpec {
                    fields: Some(vec![
                        spec("part1", 1, FieldKind::String),
                        spec("part2", 2, FieldKind::String),
                        spec("part3", 3, FieldKind::String),
                        FieldSpec {
                            required: true,
                            ..spec("test_name", 4, FieldKind::String)
                        },
                    ]),
                    ..spec("test_id", 3, FieldKind::Component)
                },
                spec("value", 4, FieldKind::Decimal),
                spec("units", 5, FieldKind::String),
                FieldSpec {
                    values: Some(vec!["F".to_string(), "P".to_string(), "C".to_string()]),
                    ..spec("status", 9, FieldKind::Enum)
                },
                FieldSpec {
                    format: Some("%Y%m%d%H%M%S".to_string()),
                    max_length: Some(14),
                    ..spec("completed_at", 13, FieldKind::Datetime)
                },
            ],
        }
    }

    fn decode(raw: &[u8]) -> Vec<FieldValue> {
        decode_record(raw, WireEncoding::Latin1, true).unwrap()
    }

    #[test]
    fn test_parse_typed_result_record() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        let values = decode(b"R|1|^^^TSH|4.27|mIU/L||||F||||20250701083000");
        let record = class.parse_positional(&values).unwrap();

        assert_eq!(record.record_type(), "R");
        assert_eq!(record.get("sequence"), Some(&RecordValue::Integer(1)));
        assert_eq!(
            record.get("value"),
            Some(&RecordValue::Decimal("4.27".parse().unwrap()))
        );
        assert_eq!(record.get("status"), Some(&RecordValue::Text("F".to_string())));

        match record.get("test_id") {
            Some(RecordValue::Composite(nested)) => {
                assert_eq!(
                    nested.get("test_name"),
                    Some(&RecordValue::Text("TSH".to_string()))
                );
            }
            other => panic!("expected composite test id, got {:?}", other),
        }

        match record.get("completed_at") {
            Some(RecordValue::DateTime(dt)) => {
                assert_eq!(dt.format("%Y%m%d%H%M%S").to_string(), "20250701083000");
            }
            other => panic!("expected datetime, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_parse_serialize_parse() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        let values = decode(b"R|1|^^^TT4 II|112.5|nmol/L||||F||||20250701083000");
        let record = class.parse_positional(&values).unwrap();

        let serialized = class.to_positional(&record);
        let reparsed = class.parse_positional(&serialized).unwrap();
        assert_eq!(record, reparsed);
    }

    #[test]
    fn test_decimal_precision_survives() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        let values = decode(b"R|1|^^^FERR|123456789.123456789|ng/mL");
        let record = class.parse_positional(&values).unwrap();

        let serialized = class.to_positional(&record);
        assert_eq!(serialized[3], FieldValue::text("123456789.123456789"));
    }

    #[test]
    fn test_required_field_missing_names_field_and_position() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        let err = class.parse_positional(&decode(b"R")).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("sequence"));
        assert_eq!(err.position, Some(2));
    }

    #[test]
    fn test_enum_rejects_unknown_value() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        let err = class
            .parse_positional(&decode(b"R|1|^^^TSH|4.2|mIU/L||||X"))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("status"));
    }

    #[test]
    fn test_integer_digit_budget() {
        let config = RecordConfig {
            fields: vec![FieldSpec {
                max_length: Some(3),
                ..spec("sequence", 2, FieldKind::Integer)
            }],
        };
        let class = RecordClass::compile("Rq", &config).unwrap();
        assert!(class.parse_positional(&decode(b"Q|999")).is_ok());
        let err = class.parse_positional(&decode(b"Q|1000")).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("sequence"));
    }

    #[test]
    fn test_datetime_rejects_malformed_value() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        let err = class
            .parse_positional(&decode(b"R|1|^^^TSH|4.2|||||F||||2025-07-01"))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("completed_at"));
    }

    #[test]
    fn test_constant_type_cell_is_validated() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        let err = class.parse_positional(&decode(b"Z|1")).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("type"));
    }

    #[test]
    fn test_repeated_component_field() {
        let config = RecordConfig {
            fields: vec![
                FieldSpec {
                    default: Some("O".to_string()),
                    ..spec("type", 1, FieldKind::Constant)
                },
                spec("sequence", 2, FieldKind::Integer),
                spec("sample_id", 3, FieldKind::String),
                FieldSpec {
                    repeated: true,
                    fields: Some(vec![
                        spec("p1", 1, FieldKind::String),
                        spec("p2", 2, FieldKind::String),
                        spec("p3", 3, FieldKind::String),
                        spec("test_name", 4, FieldKind::String),
                    ]),
                    ..spec("tests", 5, FieldKind::Component)
                },
            ],
        };
        let class = RecordClass::compile("O", &config).unwrap();

        let values = decode(br"O|1|25059232||^^^TT3 II\^^^TT4 II\^^^TSH II");
        let record = class.parse_positional(&values).unwrap();

        match record.get("tests") {
            Some(RecordValue::List(items)) => {
                assert_eq!(items.len(), 3);
                match &items[2] {
                    RecordValue::Composite(nested) => assert_eq!(
                        nested.get("test_name"),
                        Some(&RecordValue::Text("TSH II".to_string()))
                    ),
                    other => panic!("expected composite, got {:?}", other),
                }
            }
            other => panic!("expected list, got {:?}", other),
        }

        let serialized = class.to_positional(&record);
        assert_eq!(
            serialized[4],
            FieldValue::Repeat(vec![
                FieldValue::component([None, None, None, Some("TT3 II")]),
                FieldValue::component([None, None, None, Some("TT4 II")]),
                FieldValue::component([None, None, None, Some("TSH II")]),
            ])
        );
    }

    #[test]
    fn test_set_field_validates_and_bumps_updated_at() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        let mut record = class.new_record();
        let before = record.updated_at();

        class
            .set_field(&mut record, "sequence", RecordValue::Integer(2))
            .unwrap();
        assert!(record.updated_at() >= before);
        assert_eq!(record.get("sequence"), Some(&RecordValue::Integer(2)));

        let err = class
            .set_field(&mut record, "status", RecordValue::Text("Z".to_string()))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("status"));
    }

    #[test]
    fn test_compiled_classes_are_cached() {
        let first = RecordClass::compile("R", &result_config()).unwrap();
        let second = RecordClass::compile("R", &result_config()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_position_name_maps_are_bidirectional() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        assert_eq!(class.position_of("completed_at"), Some(13));
        assert_eq!(class.name_at(13), Some("completed_at"));
        assert_eq!(class.name_at(99), None);
    }

    #[test]
    fn test_unknown_positions_are_ignored() {
        let class = RecordClass::compile("R", &result_config()).unwrap();
        // Field positions 6-8 and trailing extras are not in the schema
        let record = class
            .parse_positional(&decode(b"R|7|^^^TSH|4.2|mIU/L|x|y|z|F|future|fields"))
            .unwrap();
        assert_eq!(record.get("sequence"), Some(&RecordValue::Integer(7)));
    }
}
