// Device profiles: the declarative schema a specific analyzer speaks

pub mod factory;
pub mod schema;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::protocol::encoding::WireEncoding;

pub use factory::{AstmRecord, RecordClass, RecordValue};
pub use schema::{ConfigurationError, FieldKind, FieldSpec, RecordConfig};

/// Transport a device is reached over. The core is transport-agnostic and
/// treats this section as pass-through configuration for whoever opens the
/// byte stream; only `encoding` and `chunk_size` are read here.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    pub mode: TransportMode,
    #[serde(default = "TransportConfig::default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Keys the core does not interpret, kept for external collaborators
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TransportConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Tcp,
    Udp,
    Serial,
}

/// The root device profile: identity, transport, and per-record schemas.
///
/// Profiles are loaded once at startup, validated, and then frozen; the
/// compiled record classes are shared across every connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceProfile {
    pub device: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "DeviceProfile::default_encoding")]
    pub encoding: String,
    pub transport: TransportConfig,
    #[serde(default)]
    pub records: BTreeMap<String, RecordConfig>,
}

impl DeviceProfile {
    fn default_encoding() -> String {
        "latin-1".to_string()
    }

    /// Parse a profile from its JSON form (file readers live outside the
    /// core; they hand over this in-memory shape).
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let profile: DeviceProfile = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::new(format!("malformed profile: {}", e)))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Structural validation of the whole profile.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.device.trim().is_empty() {
            return Err(ConfigurationError::for_key("device", "device name is required"));
        }
        self.wire_encoding()?;

        for (letter, config) in &self.records {
            let mut chars = letter.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => {}
                _ => {
                    return Err(ConfigurationError::for_key(
                        letter,
                        "record keys must be a single type letter",
                    ))
                }
            }
            config.validate(letter)?;
        }
        Ok(())
    }

    /// The encoding used on the wire: the transport setting wins over the
    /// profile-level default.
    pub fn wire_encoding(&self) -> Result<WireEncoding, ConfigurationError> {
        let label = self.transport.encoding.as_deref().unwrap_or(&self.encoding);
        WireEncoding::from_label(label).ok_or_else(|| {
            ConfigurationError::for_key("encoding", format!("unsupported encoding '{}'", label))
        })
    }

    /// Chunk size for outbound messages, when the device wants one.
    pub fn chunk_size(&self) -> Option<usize> {
        self.transport.chunk_size
    }

    /// Compile every record schema into its runtime class. Called once at
    /// startup; schemas that fail to compile are reported and skipped so one
    /// bad record type does not take the whole device down.
    pub fn generate_record_models(&self) -> Result<RecordRegistry, ConfigurationError> {
        let mut classes = HashMap::new();
        for (letter, config) in &self.records {
            let Some(type_letter) = letter.chars().next().map(|c| c.to_ascii_uppercase()) else {
                continue;
            };
            match RecordClass::compile(letter, config) {
                Ok(class) => {
                    classes.insert(type_letter, class);
                }
                Err(e) => {
                    warn!(
                        "Record type '{}' unavailable, schema failed to compile: {}",
                        letter, e
                    );
                }
            }
        }
        info!(
            "Generated {} record models for device '{}'",
            classes.len(),
            self.device
        );
        Ok(RecordRegistry { classes })
    }
}

/// The compiled record classes of one profile, keyed by type letter.
#[derive(Debug, Clone, Default)]
pub struct RecordRegistry {
    classes: HashMap<char, Arc<RecordClass>>,
}

impl RecordRegistry {
    pub fn get(&self, record_type: char) -> Option<&Arc<RecordClass>> {
        self.classes.get(&record_type.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn record_types(&self) -> impl Iterator<Item = char> + '_ {
        self.classes.keys().copied()
    }
}
