//! Byte-stream plumbing underneath the protocol layer
//!
//! Defines the listening endpoint, the raw connection handle it yields, and the
//! transports that session code builds on top of a connection.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;

use crate::errors::TransportError;

pub mod buffered;
pub mod tcp;

pub use buffered::{BufferedTransport, BufferedTransportFactory};
pub use tcp::{TcpConnection, TcpEndpoint};

/// Raw client handle produced by a [`Listener`].
///
/// I/O goes through shared references so the input and output transports of a
/// session can each hold a clone of the same connection.
#[async_trait]
pub trait RawStream: Send + Sync {
    /// Reads into `buf`, returning 0 once the peer has closed its side.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Marks the stream closed. Later reads and writes fail with `NotOpen`.
    fn shutdown(&self) -> Result<(), TransportError>;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

pub type Connection = Arc<dyn RawStream>;

#[async_trait]
pub trait Listener: Send {
    async fn listen(&mut self) -> Result<(), TransportError>;

    /// Waits for the next client.
    async fn accept(&mut self) -> Result<Connection, TransportError>;
}

#[async_trait]
pub trait Transport: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.read(&mut buf[filled..]).await?;
            if read == 0 {
                return Err(TransportError::end_of_file(format!(
                    "expected {} bytes, got {filled}",
                    buf.len()
                )));
            }
            filled += read;
        }
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    async fn flush(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

pub trait TransportFactory: Send + Sync {
    fn get_transport(&self, connection: Connection) -> Box<dyn Transport>;
}
