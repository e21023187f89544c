use std::{any::Any, panic::AssertUnwindSafe};

use futures::FutureExt;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::{
    errors::ProcessError,
    processor::Processor,
    protocol::Protocol,
    transport::{Connection, Transport},
};

use super::ServerContext;

/// How a session's request loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The peer closed or exhausted the connection.
    Exhausted { cycles: u64 },
    /// Processing failed; the fault has been logged.
    Faulted { cycles: u64 },
}

impl SessionOutcome {
    pub fn cycles(&self) -> u64 {
        match self {
            Self::Exhausted { cycles } | Self::Faulted { cycles } => *cycles,
        }
    }
}

pub fn session_span(connection: &Connection) -> Span {
    match connection.peer_addr() {
        Some(peer) => info_span!("session", %peer),
        None => info_span!("session", peer = "unknown"),
    }
}

/// Serves one accepted connection until it is exhausted or faults.
///
/// Both transports are closed exactly once before returning, whatever the
/// outcome. Faults, including panics raised by the factories, the processor or
/// a transport's `close`, are logged here and never propagate to the caller.
/// If the session future is dropped before the transports are closed, or
/// teardown itself panics, the raw connection is shut down instead.
pub async fn run_session(context: &ServerContext, connection: Connection) -> SessionOutcome {
    let mut release = ReleaseOnDrop::new(connection.clone());
    let mut cycles = 0;
    let served = AssertUnwindSafe(serve_connection(context, connection, &mut cycles))
        .catch_unwind()
        .await;

    let outcome = match served {
        Ok(outcome) => {
            release.disarm();
            outcome
        }
        Err(payload) => {
            let err = ProcessError::Panicked(panic_message(payload.as_ref()));
            error!(cycles, error = %err, "session setup or teardown fault");
            SessionOutcome::Faulted { cycles }
        }
    };

    info!(cycles = outcome.cycles(), outcome = ?outcome, "session closed");
    outcome
}

async fn serve_connection(
    context: &ServerContext,
    connection: Connection,
    cycles: &mut u64,
) -> SessionOutcome {
    let input_transport = context
        .input_transport_factory
        .get_transport(connection.clone());
    let output_transport = context.output_transport_factory.get_transport(connection);
    let mut input = context.input_protocol_factory.get_protocol(input_transport);
    let mut output = context.output_protocol_factory.get_protocol(output_transport);

    let processed = AssertUnwindSafe(process_until_done(
        context.processor.as_ref(),
        input.as_mut(),
        output.as_mut(),
        &mut *cycles,
    ))
    .catch_unwind()
    .await;

    let outcome = match processed {
        Ok(outcome) => outcome,
        Err(payload) => {
            let err = ProcessError::Panicked(panic_message(payload.as_ref()));
            error!(cycles = *cycles, error = %err, "session fault");
            SessionOutcome::Faulted { cycles: *cycles }
        }
    };

    close_transport(input.transport(), "input").await;
    close_transport(output.transport(), "output").await;
    outcome
}

async fn process_until_done(
    processor: &dyn Processor,
    input: &mut dyn Protocol,
    output: &mut dyn Protocol,
    cycles: &mut u64,
) -> SessionOutcome {
    loop {
        match processor.process(input, output).await {
            Ok(()) => *cycles += 1,
            Err(err) if err.is_end_of_stream() => {
                debug!(cycles = *cycles, reason = %err, "connection exhausted");
                return SessionOutcome::Exhausted { cycles: *cycles };
            }
            Err(err) => {
                error!(cycles = *cycles, error = %err, details = ?err, "session fault");
                return SessionOutcome::Faulted { cycles: *cycles };
            }
        }
    }
}

/// Shuts the raw connection down unless disarmed after a clean close.
struct ReleaseOnDrop {
    connection: Option<Connection>,
}

impl ReleaseOnDrop {
    fn new(connection: Connection) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    fn disarm(&mut self) {
        self.connection = None;
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        warn!("session ended before its transports were closed");
        if let Err(err) = connection.shutdown() {
            warn!(error = %err, "failed to release connection");
        }
    }
}

async fn close_transport(transport: &mut dyn Transport, direction: &'static str) {
    if let Err(err) = transport.close().await {
        warn!(direction, error = %err, "failed to close transport");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
