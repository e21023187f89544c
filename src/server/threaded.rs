use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

use crate::{
    errors::ServerError,
    transport::{Connection, Listener},
};

use super::{
    next_connection, run_session, session::session_span, start_listening, Server, ServerContext,
    SessionOutcome, ShutdownSignal,
};

/// Runs every accepted connection on its own tokio task.
///
/// The number of concurrent sessions is unbounded.
pub struct ThreadedServer {
    context: ServerContext,
    listener: Box<dyn Listener>,
    shutdown: ShutdownSignal,
    detached: bool,
    sessions: Vec<JoinHandle<SessionOutcome>>,
}

impl ThreadedServer {
    pub fn new(
        context: ServerContext,
        listener: Box<dyn Listener>,
        shutdown: ShutdownSignal,
        detached: bool,
    ) -> Self {
        Self {
            context,
            listener,
            shutdown,
            detached,
            sessions: Vec::new(),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Tracked sessions still running. Always 0 when detached.
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Waits for every tracked session, typically after `serve` was cancelled.
    ///
    /// Sessions whose task failed are logged and left out of the result.
    pub async fn wait_for_sessions(&mut self) -> Vec<SessionOutcome> {
        let mut outcomes = Vec::with_capacity(self.sessions.len());
        for handle in self.sessions.drain(..) {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(error = %err, "session task failed"),
            }
        }
        outcomes
    }
}

/// Starts a session task. The handle is returned only for tracked sessions.
pub fn spawn_session(
    context: ServerContext,
    connection: Connection,
    detached: bool,
) -> Option<JoinHandle<SessionOutcome>> {
    let span = session_span(&connection);
    let handle = tokio::spawn(
        async move { run_session(&context, connection).await }.instrument(span),
    );
    (!detached).then_some(handle)
}

#[async_trait]
impl Server for ThreadedServer {
    async fn serve(&mut self) -> Result<(), ServerError> {
        start_listening(self.listener.as_mut()).await?;
        info!(mode = "threaded", detached = self.detached, "server accepting connections");

        loop {
            let Some(connection) =
                next_connection(self.listener.as_mut(), &mut self.shutdown).await?
            else {
                continue;
            };

            if let Some(handle) = spawn_session(self.context.clone(), connection, self.detached) {
                self.sessions.retain(|tracked| !tracked.is_finished());
                self.sessions.push(handle);
            }
        }
    }

    fn context(&self) -> &ServerContext {
        &self.context
    }
}
