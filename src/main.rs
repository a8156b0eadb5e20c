use anyhow::{Context, Result};
use log::info;

use astmlink::protocol::constants::{
    COMMENT_RECORD, HEADER_RECORD, MANUFACTURER_RECORD, ORDER_RECORD, PATIENT_RECORD,
    REQUEST_RECORD, RESULT_RECORD, SCIENTIFIC_RECORD, TERMINATOR_RECORD,
};
use astmlink::{
    ConnectionContext, DecodedRecord, DeviceProfile, EventHub, HandlerRegistry, Server,
    ServerConfig, ServerEvent,
};

/// Demo LIS receiver: accepts analyzer connections and logs every decoded
/// record. Usage: `astmlink-server [profile.json] [port]`.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let profile = match args.next() {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read profile {}", path))?;
            Some(DeviceProfile::from_json(&json)?)
        }
        None => None,
    };

    let mut config = ServerConfig::default();
    if let Some(profile) = &profile {
        config.port = profile.transport.port;
    }
    if let Some(port) = args.next() {
        config.port = port.parse().context("port must be a number")?;
    }

    let log_record = |record: &DecodedRecord, ctx: &ConnectionContext| {
        info!(
            "[{}] {} record: {:?}",
            ctx.peer, record.record_type, record.raw
        );
        Ok(())
    };
    let mut handlers = HandlerRegistry::new();
    for letter in [
        HEADER_RECORD,
        PATIENT_RECORD,
        ORDER_RECORD,
        RESULT_RECORD,
        COMMENT_RECORD,
        SCIENTIFIC_RECORD,
        MANUFACTURER_RECORD,
        REQUEST_RECORD,
        TERMINATOR_RECORD,
    ] {
        handlers = handlers.on_fn(letter, log_record);
    }

    let events = EventHub::new().subscribe("*", |event: &ServerEvent| {
        info!("event: {}", event.name());
    });

    let server = Server::new(handlers, events, profile.as_ref(), config)?;
    server.serve_forever().await?;
    Ok(())
}
