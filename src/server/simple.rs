use async_trait::async_trait;
use tracing::{info, Instrument};

use crate::{errors::ServerError, transport::Listener};

use super::{
    next_connection, run_session, session::session_span, start_listening, Server, ServerContext,
    ShutdownSignal,
};

/// Serves one connection at a time on the accept loop's own task.
///
/// A client that never disconnects keeps every other client waiting.
pub struct SimpleServer {
    context: ServerContext,
    listener: Box<dyn Listener>,
    shutdown: ShutdownSignal,
}

impl SimpleServer {
    pub fn new(
        context: ServerContext,
        listener: Box<dyn Listener>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            context,
            listener,
            shutdown,
        }
    }
}

#[async_trait]
impl Server for SimpleServer {
    async fn serve(&mut self) -> Result<(), ServerError> {
        start_listening(self.listener.as_mut()).await?;
        info!(mode = "simple", "server accepting connections");

        loop {
            let Some(connection) =
                next_connection(self.listener.as_mut(), &mut self.shutdown).await?
            else {
                continue;
            };

            let span = session_span(&connection);
            run_session(&self.context, connection).instrument(span).await;
        }
    }

    fn context(&self) -> &ServerContext {
        &self.context
    }
}
