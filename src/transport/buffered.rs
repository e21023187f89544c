use async_trait::async_trait;
use bytes::{Buf, BytesMut};

use crate::errors::TransportError;

use super::{Connection, Transport, TransportFactory};

pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Transport that batches writes until `flush` and reads the stream in chunks.
pub struct BufferedTransport {
    connection: Connection,
    read_buf: BytesMut,
    write_buf: BytesMut,
    buffer_size: usize,
    open: bool,
}

impl BufferedTransport {
    pub fn new(connection: Connection, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            connection,
            read_buf: BytesMut::with_capacity(buffer_size),
            write_buf: BytesMut::with_capacity(buffer_size),
            buffer_size,
            open: true,
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::not_open("buffered transport is closed"))
        }
    }

    async fn fill(&mut self) -> Result<usize, TransportError> {
        self.read_buf.resize(self.buffer_size, 0);
        let read = match self.connection.read(&mut self.read_buf[..]).await {
            Ok(read) => read,
            Err(err) => {
                self.read_buf.clear();
                return Err(err);
            }
        };
        self.read_buf.truncate(read);
        Ok(read)
    }
}

#[async_trait]
impl Transport for BufferedTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        if self.read_buf.is_empty() {
            // Large reads skip the buffer entirely.
            if buf.len() >= self.buffer_size {
                return self.connection.read(buf).await;
            }
            if self.fill().await? == 0 {
                return Ok(0);
            }
        }

        let count = buf.len().min(self.read_buf.len());
        buf[..count].copy_from_slice(&self.read_buf[..count]);
        self.read_buf.advance(count);
        Ok(count)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.write_buf.extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        while !self.write_buf.is_empty() {
            let written = self.connection.write(&self.write_buf[..]).await?;
            if written == 0 {
                self.write_buf.clear();
                return Err(TransportError::end_of_file("peer stopped accepting writes"));
            }
            self.write_buf.advance(written);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.read_buf.clear();
        self.write_buf.clear();
        self.connection.shutdown()
    }
}

#[derive(Debug, Clone)]
pub struct BufferedTransportFactory {
    buffer_size: usize,
}

impl BufferedTransportFactory {
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self { buffer_size }
    }
}

impl Default for BufferedTransportFactory {
    fn default() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }
}

impl TransportFactory for BufferedTransportFactory {
    fn get_transport(&self, connection: Connection) -> Box<dyn Transport> {
        Box::new(BufferedTransport::new(connection, self.buffer_size))
    }
}
