//! The receiving host: accepts analyzer connections and runs the receiver
//! half of the link protocol over each.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use uuid::Uuid;

use crate::dispatch::{ConnectionContext, DecodedRecord, EventHub, HandlerRegistry, ServerEvent};
use crate::profile::{ConfigurationError, DeviceProfile, RecordRegistry};
use crate::protocol::constants::{ACK, HANDLER_TIMEOUT_MS, NAK, READ_TIMEOUT_MS};
use crate::protocol::encoding::WireEncoding;
use crate::protocol::error::ProtocolError;
use crate::protocol::link::{ReceiverAction, ReceiverSession};
use crate::protocol::record::{record_type, FieldValue};
use crate::transport::{read_some, write_all, ByteStream};

/// Server tuning knobs with the defaults analyzers expect.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for each read from a connection
    pub read_timeout: Duration,
    /// Deadline for each write to a connection
    pub write_timeout: Duration,
    /// Deadline for a single record handler invocation
    pub handler_timeout: Duration,
    /// Connections beyond this are accepted and immediately closed
    pub max_connections: usize,
    /// Strict record decoding for delivered messages
    pub strict: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 15200,
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(5000),
            handler_timeout: Duration::from_millis(HANDLER_TIMEOUT_MS),
            max_connections: 100,
            strict: false,
        }
    }
}

/// State shared by every connection: all of it read-only after startup.
pub(crate) struct Shared {
    config: ServerConfig,
    handlers: HandlerRegistry,
    events: EventHub,
    registry: RecordRegistry,
    encoding: WireEncoding,
    device: String,
}

/// ASTM receiving server.
pub struct Server {
    shared: Arc<Shared>,
    is_running: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    connections: Arc<Mutex<JoinSet<()>>>,
}

impl Server {
    /// Build a server from handlers, observers and an optional device
    /// profile. The profile's record models are compiled here, before any
    /// connection is accepted.
    pub fn new(
        handlers: HandlerRegistry,
        events: EventHub,
        profile: Option<&DeviceProfile>,
        config: ServerConfig,
    ) -> Result<Self, ConfigurationError> {
        let (registry, encoding, device) = match profile {
            Some(profile) => {
                profile.validate()?;
                (
                    profile.generate_record_models()?,
                    profile.wire_encoding()?,
                    profile.device.clone(),
                )
            }
            None => (RecordRegistry::default(), WireEncoding::default(), String::new()),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                handlers,
                events,
                registry,
                encoding,
                device,
            }),
            is_running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            connections: Arc::new(Mutex::new(JoinSet::new())),
        })
    }

    /// Accept and serve connections until `close` is called.
    pub async fn serve_forever(&self) -> Result<(), ProtocolError> {
        let bind_addr = format!("{}:{}", self.shared.config.host, self.shared.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            error!("Failed to bind to {}: {}", bind_addr, e);
            ProtocolError::IoError(e)
        })?;
        info!("ASTM server listening on {}", bind_addr);

        self.is_running.store(true, Ordering::SeqCst);
        while self.is_running.load(Ordering::SeqCst) {
            // Accept with a short timeout so shutdown is noticed promptly
            let accepted = match timeout(Duration::from_secs(1), listener.accept()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    error!("Accept error: {}", e);
                    continue;
                }
                Err(_) => continue,
            };

            let (mut stream, addr) = accepted;
            if self.active.load(Ordering::SeqCst) >= self.shared.config.max_connections {
                warn!(
                    "[{}] Connection limit of {} reached, closing",
                    addr, self.shared.config.max_connections
                );
                let _ = stream.shutdown().await;
                continue;
            }

            let shared = Arc::clone(&self.shared);
            let active = Arc::clone(&self.active);
            active.fetch_add(1, Ordering::SeqCst);
            self.connections.lock().await.spawn(async move {
                handle_connection(shared, stream, addr.to_string()).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        Ok(())
    }

    /// Serve for a bounded duration, then shut down. Useful for tests.
    pub async fn serve_for(&self, duration: Duration) -> Result<(), ProtocolError> {
        let _ = timeout(duration, self.serve_forever()).await;
        self.close().await;
        Ok(())
    }

    /// Stop accepting, cancel outstanding connections, and wait briefly for
    /// their cleanup.
    pub async fn close(&self) {
        info!("Shutting down ASTM server");
        self.is_running.store(false, Ordering::SeqCst);

        let mut connections = self.connections.lock().await;
        connections.abort_all();
        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if timeout(Duration::from_secs(2), drain).await.is_err() {
            warn!("Connection cleanup exceeded the shutdown window");
        }
        info!("Server shutdown complete");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Drive the receiver state machine over one connection until the peer
/// closes, a deadline expires, or the stream fails.
pub(crate) async fn handle_connection<S: ByteStream>(
    shared: Arc<Shared>,
    mut stream: S,
    peer: String,
) {
    let ctx = ConnectionContext {
        connection_id: Uuid::new_v4(),
        peer: peer.clone(),
        device: shared.device.clone(),
    };
    info!("[{}] Connection established", peer);
    shared
        .events
        .emit(&ServerEvent::ConnectionEstablished { peer: peer.clone() });

    let mut session = ReceiverSession::new(shared.encoding, shared.config.strict);
    let mut buffer = [0u8; 1024];

    loop {
        let n = match read_some(&mut stream, &mut buffer, shared.config.read_timeout).await {
            Ok(0) => {
                info!("[{}] Connection closed by peer", peer);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                let reason = match &e {
                    ProtocolError::Timeout(_) => "timeout".to_string(),
                    other => other.to_string(),
                };
                warn!("[{}] Connection failed: {}", peer, reason);
                shared.events.emit(&ServerEvent::ConnectionFailed {
                    peer: peer.clone(),
                    reason,
                });
                break;
            }
        };

        let actions = session.on_bytes(&buffer[..n]);
        let mut write_failed = false;
        for action in actions {
            let result = match action {
                ReceiverAction::Reply(byte) => {
                    write_all(&mut stream, &[byte], shared.config.write_timeout).await
                }
                ReceiverAction::Deliver(records) => {
                    debug!("[{}] Message delivered with {} records", peer, records.len());
                    let accepted = process_records(&shared, &ctx, records).await;
                    let reply = if accepted { ACK } else { NAK };
                    write_all(&mut stream, &[reply], shared.config.write_timeout).await
                }
            };
            if let Err(e) = result {
                warn!("[{}] Write failed: {}", peer, e);
                shared.events.emit(&ServerEvent::ConnectionFailed {
                    peer: peer.clone(),
                    reason: e.to_string(),
                });
                write_failed = true;
                break;
            }
        }
        if write_failed {
            break;
        }
    }

    // Drop any partial message before the transport goes away
    session.reset();
    info!("[{}] Connection handler completed", peer);
}

/// Dispatch every record of a delivered message in order. Returns whether
/// the message should be acknowledged.
async fn process_records(
    shared: &Shared,
    ctx: &ConnectionContext,
    records: Vec<Vec<FieldValue>>,
) -> bool {
    let mut accepted = true;

    for raw in records {
        let letter = match record_type(&raw) {
            Some(letter) => letter,
            None => {
                warn!("[{}] Record without a type letter, rejecting message", ctx.peer);
                accepted = false;
                continue;
            }
        };

        let typed = match shared.registry.get(letter) {
            Some(class) => match class.parse_positional(&raw) {
                Ok(typed) => Some(typed),
                Err(e) => {
                    // Validation failures surface to observers and NAK the
                    // message; they are never silently swallowed
                    warn!("[{}] Validation failed for '{}' record: {}", ctx.peer, letter, e);
                    shared.events.emit(&ServerEvent::RecordValidationFailed {
                        record_type: letter,
                        raw: raw.clone(),
                        error: e.to_string(),
                    });
                    accepted = false;
                    continue;
                }
            },
            None => None,
        };

        let mut record = DecodedRecord {
            record_type: letter,
            raw,
            typed,
        };
        if let Some(typed) = record.typed.as_mut() {
            typed.set_source(&ctx.peer);
        }

        match timeout(
            shared.config.handler_timeout,
            shared.handlers.dispatch(&record, ctx),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // A handler error is the host application's problem; the
                // protocol exchange continues
                error!("[{}] Handler error for '{}' record: {}", ctx.peer, letter, e);
            }
            Err(_) => {
                warn!(
                    "[{}] Handler for '{}' record exceeded {:?}",
                    ctx.peer, letter, shared.config.handler_timeout
                );
            }
        }

        shared
            .events
            .emit(&ServerEvent::RecordProcessed { record });
    }

    accepted
}
