//! ASTM E1394 data-link and record toolkit for clinical laboratory
//! analyzers.
//!
//! The crate covers the three layers a host or analyzer needs to exchange
//! results and orders over a reliable byte stream:
//!
//! - the framed, checksummed wire codec (`protocol`): frames, records with
//!   component/repeat/escape sub-delimiters, and chunked message assembly,
//! - the ENQ/ACK/NAK/EOT link state machines (`protocol::link`), pure logic
//!   driven by thin I/O loops,
//! - the profile-driven record engine (`profile`): declarative per-device
//!   schemas compiled into typed, validated record classes.
//!
//! `Server` runs the receiver role over incoming TCP connections and
//! dispatches decoded records to registered handlers; `Client` pushes record
//! sets in the sender role. Both are transport-agnostic above the
//! `transport::ByteStream` seam.

// Module declarations
pub mod client;
pub mod dispatch;
pub mod profile;
pub mod protocol;
pub mod records;
pub mod server;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use dispatch::{
    ConnectionContext, DecodedRecord, EventHub, HandlerRegistry, RecordHandler, ServerEvent,
};
pub use profile::{AstmRecord, DeviceProfile, RecordClass, RecordRegistry, RecordValue};
pub use protocol::{FieldValue, ProtocolError, ValidationError, WireEncoding};
pub use server::{Server, ServerConfig};
