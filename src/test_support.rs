//! Scripted in-memory collaborators for unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tracing::{subscriber::DefaultGuard, Event, Level, Subscriber};
use tracing_subscriber::{
    layer::{Context, SubscriberExt},
    Layer,
};

use crate::{
    errors::{ProcessError, TransportError, TransportErrorKind},
    processor::Processor,
    protocol::Protocol,
    transport::{
        BufferedTransportFactory, Connection, Listener, RawStream, Transport, TransportFactory,
    },
};

/// Raw stream that replays canned read chunks and records writes.
#[derive(Default)]
pub struct ScriptedStream {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    written: Mutex<Vec<u8>>,
    read_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    fail_shutdown: bool,
}

impl ScriptedStream {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: Mutex::new(chunks.into()),
            ..Self::default()
        }
    }

    pub fn with_failing_shutdown(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            fail_shutdown: true,
            ..Self::new(chunks)
        }
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().expect("written lock").clone()
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RawStream for ScriptedStream {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let mut chunks = self.chunks.lock().expect("chunks lock");
        let Some(mut chunk) = chunks.pop_front() else {
            return Ok(0);
        };

        let count = buf.len().min(chunk.len());
        buf[..count].copy_from_slice(&chunk[..count]);
        if count < chunk.len() {
            chunk.drain(..count);
            chunks.push_front(chunk);
        }
        Ok(count)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.written
            .lock()
            .expect("written lock")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn shutdown(&self) -> Result<(), TransportError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown {
            return Err(TransportError::new(
                TransportErrorKind::Unknown,
                "shutdown failed",
            ));
        }
        Ok(())
    }
}

/// One session driven by [`CommandProcessor`]: each byte is one request.
pub fn command_stream(commands: &[u8]) -> Arc<ScriptedStream> {
    Arc::new(ScriptedStream::new(vec![commands.to_vec()]))
}

/// Listener fed from a channel; pends forever once the feed is dropped.
pub struct ChannelListener {
    feed: mpsc::UnboundedReceiver<Result<Connection, TransportError>>,
    pub listen_calls: Arc<AtomicUsize>,
    pub accept_calls: Arc<AtomicUsize>,
}

pub type ListenerFeed = mpsc::UnboundedSender<Result<Connection, TransportError>>;

impl ChannelListener {
    pub fn new() -> (Self, ListenerFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Self {
            feed: rx,
            listen_calls: Arc::new(AtomicUsize::new(0)),
            accept_calls: Arc::new(AtomicUsize::new(0)),
        };
        (listener, tx)
    }
}

#[async_trait]
impl Listener for ChannelListener {
    async fn listen(&mut self) -> Result<(), TransportError> {
        self.listen_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Connection, TransportError> {
        self.accept_calls.fetch_add(1, Ordering::SeqCst);
        match self.feed.recv().await {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }
}

pub struct FailingListener;

#[async_trait]
impl Listener for FailingListener {
    async fn listen(&mut self) -> Result<(), TransportError> {
        Err(TransportError::new(
            TransportErrorKind::AlreadyOpen,
            "address in use",
        ))
    }

    async fn accept(&mut self) -> Result<Connection, TransportError> {
        Err(TransportError::not_open("never listening"))
    }
}

/// Processor that reads one command byte per cycle.
///
/// `f` faults, `p` panics, `s` stalls until [`CommandProcessor::release`];
/// any other byte succeeds and is appended to the log. The end of the
/// stream surfaces as a transport error from the protocol.
#[derive(Default)]
pub struct CommandProcessor {
    log: Mutex<Vec<u8>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    stalled: AtomicUsize,
    release: Notify,
}

impl CommandProcessor {
    pub fn log(&self) -> Vec<u8> {
        self.log.lock().expect("log lock").clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn stalled(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.release.notify_waiters();
    }
}

#[async_trait]
impl Processor for CommandProcessor {
    async fn process(
        &self,
        input: &mut dyn Protocol,
        _output: &mut dyn Protocol,
    ) -> Result<(), ProcessError> {
        let command = input.read_byte().await? as u8;

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let outcome = match command {
            b'f' => Err(ProcessError::application("scripted fault")),
            b'p' => panic!("scripted panic"),
            b's' => {
                let released = self.release.notified();
                self.stalled.fetch_add(1, Ordering::SeqCst);
                released.await;
                Ok(())
            }
            other => {
                self.log.lock().expect("log lock").push(other);
                Ok(())
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Buffered transports that count `close` calls, optionally panicking in it.
#[derive(Default)]
pub struct CountingTransportFactory {
    inner: BufferedTransportFactory,
    closes: Arc<AtomicUsize>,
    panic_on_close: bool,
}

impl CountingTransportFactory {
    pub fn panicking_on_close() -> Self {
        Self {
            panic_on_close: true,
            ..Self::default()
        }
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl TransportFactory for CountingTransportFactory {
    fn get_transport(&self, connection: Connection) -> Box<dyn Transport> {
        Box::new(CountingTransport {
            inner: self.inner.get_transport(connection),
            closes: Arc::clone(&self.closes),
            panic_on_close: self.panic_on_close,
        })
    }
}

struct CountingTransport {
    inner: Box<dyn Transport>,
    closes: Arc<AtomicUsize>,
    panic_on_close: bool,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.inner.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.inner.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_close {
            panic!("scripted close panic");
        }
        self.inner.close().await
    }
}

/// Counts ERROR-level events seen by the thread's default subscriber.
#[derive(Clone, Default)]
pub struct ErrorEvents {
    count: Arc<AtomicUsize>,
}

impl ErrorEvents {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ErrorEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Installs an [`ErrorEvents`] layer for the current thread.
///
/// Only events emitted on this thread are seen, so callers use the
/// current-thread test runtime.
pub fn capture_error_events() -> (ErrorEvents, DefaultGuard) {
    let events = ErrorEvents::default();
    let guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));
    (events, guard)
}
