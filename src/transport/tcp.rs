use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::errors::{TransportError, TransportErrorKind};

use super::{Connection, Listener, RawStream};

/// TCP listening endpoint. Binding happens in `listen`, not at construction.
#[derive(Debug)]
pub struct TcpEndpoint {
    bind_addr: SocketAddr,
    listener: Option<TcpListener>,
}

impl TcpEndpoint {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            listener: None,
        }
    }

    /// Bound address once listening; resolves port 0 to the assigned port.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .as_ref()
            .ok_or_else(|| TransportError::not_open("endpoint is not listening"))?
            .local_addr()
            .map_err(TransportError::from)
    }
}

#[async_trait]
impl Listener for TcpEndpoint {
    async fn listen(&mut self) -> Result<(), TransportError> {
        if self.listener.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.bind_addr).await.map_err(|err| {
            TransportError::new(
                TransportErrorKind::NotOpen,
                format!("failed to bind {}: {err}", self.bind_addr),
            )
        })?;
        info!(bind_addr = %self.bind_addr, "endpoint listening");
        self.listener = Some(listener);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Connection, TransportError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| TransportError::not_open("accept called before listen"))?;

        let (stream, peer) = listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = %err, "failed to set TCP_NODELAY");
        }
        Ok(Arc::new(TcpConnection::new(stream, peer)))
    }
}

/// Accepted TCP client. The socket is released when the last handle drops.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
    closed: AtomicBool,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::not_open("connection is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RawStream for TcpConnection {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            self.ensure_open()?;
            self.stream.readable().await?;
            match self.stream.try_read(buf) {
                Ok(read) => return Ok(read),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        loop {
            self.ensure_open()?;
            self.stream.writable().await?;
            match self.stream.try_write(buf) {
                Ok(written) => return Ok(written),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn shutdown(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}
