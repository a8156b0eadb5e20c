//! Transport abstraction: the core runs over any reliable byte stream.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::protocol::error::{ProtocolError, Result};

/// Anything the link layer can run over: a TCP stream, a TLS session, a
/// serial port wrapper, or an in-memory duplex in tests.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Read some bytes with a deadline. Returns `Ok(0)` on a clean peer close.
pub async fn read_some<S>(stream: &mut S, buf: &mut [u8], deadline: Duration) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    match timeout(deadline, stream.read(buf)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ProtocolError::Timeout(deadline)),
    }
}

/// Write and flush all bytes within a deadline.
pub async fn write_all<S>(stream: &mut S, data: &[u8], deadline: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    match timeout(deadline, async {
        stream.write_all(data).await?;
        stream.flush().await
    })
    .await
    {
        Ok(result) => Ok(result?),
        Err(_) => Err(ProtocolError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_all(&mut a, b"ping", Duration::from_secs(1)).await.unwrap();

        let mut buf = [0u8; 8];
        let n = read_some(&mut b, &mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn test_read_deadline_expires() {
        let (mut a, _b) = tokio::io::duplex(64);
        let mut buf = [0u8; 8];
        let result = read_some(&mut a, &mut buf, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ProtocolError::Timeout(_))));
    }
}
