pub mod acl;
pub mod crypt;
pub mod governor;
pub mod throttle;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte-stream connection as seen by the session controller.
#[async_trait]
pub trait Transport: Send {
    /// Reads whatever is available into `buf`, waiting at most `deadline`.
    ///
    /// Returns `Ok(0)` on orderly close and `ErrorKind::TimedOut` when the
    /// deadline passes first.
    async fn read(&mut self, buf: &mut [u8], deadline: Duration) -> io::Result<usize>;

    async fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    fn remote_address(&self) -> SocketAddr;

    async fn close(&mut self) -> io::Result<()>;
}

/// [`Transport`] over any tokio stream.
pub struct StreamTransport<S> {
    stream: S,
    peer: SocketAddr,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8], deadline: Duration) -> io::Result<usize> {
        match tokio::time::timeout(deadline, self.stream.read(buf)).await {
            Ok(r) => r,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded")),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }

    fn remote_address(&self) -> SocketAddr {
        self.peer
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
