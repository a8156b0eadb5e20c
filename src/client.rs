//! The sending driver: pushes record sets to a host over the sender half of
//! the link protocol.

use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::protocol::constants::{CONNECT_TIMEOUT_MS, MAX_RETRIES, READ_TIMEOUT_MS};
use crate::protocol::encoding::WireEncoding;
use crate::protocol::error::{ProtocolError, Result};
use crate::protocol::link::{SenderAction, SenderSession};
use crate::protocol::message::encode;
use crate::protocol::record::FieldValue;
use crate::transport::{read_some, write_all, ByteStream};

/// Client tuning knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Deadline for each acknowledgement read
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub encoding: WireEncoding,
    /// Split messages larger than this into ETB chunks
    pub chunk_size: Option<usize>,
    /// Reuse the connection across `send_records` calls
    pub keepalive: bool,
    pub max_retries: u32,
    /// Encode each record as its own logical message instead of one message
    /// per call; some analyzers only accept this framing
    pub message_per_record: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 15200,
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(5000),
            encoding: WireEncoding::default(),
            chunk_size: None,
            keepalive: false,
            max_retries: MAX_RETRIES,
            message_per_record: false,
        }
    }
}

/// ASTM sending client.
pub struct Client {
    config: ClientConfig,
    stream: Option<TcpStream>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the transport, bounded by the connect deadline.
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.config.host, self.config.port);
        debug!("Connecting to {}", addr);

        match timeout(self.config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                info!("Connected to {}", addr);
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Failed to connect to {}: {}", addr, e);
                Err(ProtocolError::IoError(e))
            }
            Err(_) => {
                error!(
                    "Connection to {} timed out after {:?}",
                    addr, self.config.connect_timeout
                );
                Err(ProtocolError::Timeout(self.config.connect_timeout))
            }
        }
    }

    /// Send every record, returning `true` only when every frame was
    /// acknowledged and the session terminated with EOT. Never hangs: all
    /// reads and writes carry deadlines.
    pub async fn send_records(&mut self, records: &[Vec<FieldValue>]) -> bool {
        match self.try_send_records(records).await {
            Ok(()) => true,
            Err(e) => {
                error!("Send failed: {}", e);
                false
            }
        }
    }

    /// Like `send_records`, but surfaces the failure cause (`NotAccepted`,
    /// `Rejected`, `Timeout`) to callers that want to raise it.
    pub async fn try_send_records(&mut self, records: &[Vec<FieldValue>]) -> Result<()> {
        if records.is_empty() {
            debug!("No records to send");
            return Ok(());
        }

        self.connect().await?;
        let messages = self.build_messages(records)?;
        let session = SenderSession::with_retries(messages, self.config.max_retries);

        let stream = self
            .stream
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;
        let result = drive_sender(
            stream,
            session,
            self.config.read_timeout,
            self.config.write_timeout,
        )
        .await;

        if result.is_err() || !self.config.keepalive {
            self.close().await;
        }
        result
    }

    fn build_messages(&self, records: &[Vec<FieldValue>]) -> Result<Vec<Vec<Vec<u8>>>> {
        if self.config.message_per_record {
            records
                .iter()
                .map(|record| {
                    encode(
                        std::slice::from_ref(record),
                        self.config.encoding,
                        self.config.chunk_size,
                        1,
                        true,
                    )
                })
                .collect()
        } else {
            Ok(vec![encode(
                records,
                self.config.encoding,
                self.config.chunk_size,
                1,
                true,
            )?])
        }
    }

    /// Close the transport, waiting at most a second for the shutdown.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = timeout(Duration::from_secs(1), stream.shutdown()).await;
            debug!("Connection closed");
        }
    }
}

/// Run a sender session over a byte stream until it finishes or aborts.
pub(crate) async fn drive_sender<S: ByteStream>(
    stream: &mut S,
    mut session: SenderSession,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<()> {
    let mut pending = session.start();

    loop {
        for action in pending {
            match action {
                SenderAction::Write(bytes) => {
                    write_all(stream, &bytes, write_timeout).await?;
                }
                SenderAction::Finished => {
                    info!("Transfer complete");
                    return Ok(());
                }
                SenderAction::Abort(failure) => {
                    warn!("Transfer aborted: {:?}", failure);
                    return Err(failure.into());
                }
            }
        }

        let mut byte = [0u8; 1];
        pending = match read_some(stream, &mut byte, read_timeout).await {
            Ok(0) => return Err(ProtocolError::ConnectionClosed),
            Ok(_) => session.on_byte(byte[0]),
            Err(ProtocolError::Timeout(after)) => session.on_timeout(after),
            Err(e) => return Err(e),
        };
    }
}
