use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod logging;
pub mod processor;
pub mod protocol;
pub mod server;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{ProcessError, ProtocolError, ServerError, TransportError, TransportErrorKind};
pub use processor::{MethodRouter, PingHandler, Processor};
pub use server::{
    run_session, shutdown_channel, Server, ServerBuilder, ServerContext, SessionOutcome,
    ShutdownSignal, ShutdownTrigger, SimpleServer, ThreadedServer,
};

/// Router served by the bundled binary.
pub fn default_router() -> MethodRouter {
    MethodRouter::new().route("ping", Arc::new(PingHandler))
}
