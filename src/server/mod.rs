//! Accept loops and session dispatch
//!
//! Both server variants share [`ServerContext`] and [`session::run_session`];
//! they differ only in whether a session runs inline ([`SimpleServer`]) or on
//! its own task ([`ThreadedServer`]).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::{
    errors::ServerError,
    processor::Processor,
    protocol::{BinaryProtocolFactory, ProtocolFactory},
    transport::{BufferedTransportFactory, Connection, Listener, TransportFactory},
};

pub mod session;
pub mod shutdown;
pub mod simple;
pub mod threaded;

pub use session::{run_session, SessionOutcome};
pub use shutdown::{shutdown_channel, trigger_on_ctrl_c, ShutdownSignal, ShutdownTrigger};
pub use simple::SimpleServer;
pub use threaded::ThreadedServer;

/// Read-only configuration shared by the accept loop and every session.
#[derive(Clone)]
pub struct ServerContext {
    pub processor: Arc<dyn Processor>,
    pub input_transport_factory: Arc<dyn TransportFactory>,
    pub output_transport_factory: Arc<dyn TransportFactory>,
    pub input_protocol_factory: Arc<dyn ProtocolFactory>,
    pub output_protocol_factory: Arc<dyn ProtocolFactory>,
}

#[async_trait]
pub trait Server: Send {
    /// Listens, then accepts and serves connections forever.
    ///
    /// Returns only with [`ServerError::Listen`] when the endpoint cannot be
    /// opened, or [`ServerError::Cancelled`] once the shutdown signal fires.
    async fn serve(&mut self) -> Result<(), ServerError>;

    fn context(&self) -> &ServerContext;
}

/// Collects a processor, an endpoint and optional factories.
///
/// Nothing is opened or spawned until `serve` is called on the built server.
pub struct ServerBuilder {
    processor: Arc<dyn Processor>,
    listener: Box<dyn Listener>,
    input_transport_factory: Option<Arc<dyn TransportFactory>>,
    output_transport_factory: Option<Arc<dyn TransportFactory>>,
    input_protocol_factory: Option<Arc<dyn ProtocolFactory>>,
    output_protocol_factory: Option<Arc<dyn ProtocolFactory>>,
    shutdown: ShutdownSignal,
    detached: bool,
}

impl ServerBuilder {
    pub fn new(processor: Arc<dyn Processor>, listener: impl Listener + 'static) -> Self {
        Self {
            processor,
            listener: Box::new(listener),
            input_transport_factory: None,
            output_transport_factory: None,
            input_protocol_factory: None,
            output_protocol_factory: None,
            shutdown: ShutdownSignal::never(),
            detached: true,
        }
    }

    pub fn input_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.input_transport_factory = Some(factory);
        self
    }

    pub fn output_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.output_transport_factory = Some(factory);
        self
    }

    pub fn input_protocol_factory(mut self, factory: Arc<dyn ProtocolFactory>) -> Self {
        self.input_protocol_factory = Some(factory);
        self
    }

    pub fn output_protocol_factory(mut self, factory: Arc<dyn ProtocolFactory>) -> Self {
        self.output_protocol_factory = Some(factory);
        self
    }

    pub fn shutdown_signal(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = signal;
        self
    }

    /// Whether threaded sessions are spawned without being tracked.
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    /// Resolves defaults: buffered transport and binary protocol on input,
    /// and the input factory itself wherever no output factory was given.
    pub fn context(&self) -> ServerContext {
        let input_transport_factory = self
            .input_transport_factory
            .clone()
            .unwrap_or_else(|| Arc::new(BufferedTransportFactory::default()));
        let input_protocol_factory = self
            .input_protocol_factory
            .clone()
            .unwrap_or_else(|| Arc::new(BinaryProtocolFactory::default()));

        ServerContext {
            processor: Arc::clone(&self.processor),
            output_transport_factory: self
                .output_transport_factory
                .clone()
                .unwrap_or_else(|| Arc::clone(&input_transport_factory)),
            output_protocol_factory: self
                .output_protocol_factory
                .clone()
                .unwrap_or_else(|| Arc::clone(&input_protocol_factory)),
            input_transport_factory,
            input_protocol_factory,
        }
    }

    pub fn build_simple(self) -> SimpleServer {
        let context = self.context();
        SimpleServer::new(context, self.listener, self.shutdown)
    }

    pub fn build_threaded(self) -> ThreadedServer {
        let context = self.context();
        ThreadedServer::new(context, self.listener, self.shutdown, self.detached)
    }
}

async fn start_listening(listener: &mut dyn Listener) -> Result<(), ServerError> {
    listener.listen().await.map_err(|err| {
        error!(error = %err, "failed to start listening");
        ServerError::Listen(err)
    })
}

/// Waits for the next connection or cancellation.
///
/// Accept failures are logged and reported as `Ok(None)` so the caller keeps
/// looping; cancellation wins over a ready connection.
async fn next_connection(
    listener: &mut dyn Listener,
    shutdown: &mut ShutdownSignal,
) -> Result<Option<Connection>, ServerError> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(ServerError::Cancelled),
        accepted = listener.accept() => match accepted {
            Ok(connection) => Ok(Some(connection)),
            Err(err) => {
                error!(error = %err, "failed to accept connection");
                Ok(None)
            }
        },
    }
}
