use std::sync::Arc;

use rpc_serve::{
    config::{Config, ServerMode},
    default_router, logging,
    server::{shutdown_channel, trigger_on_ctrl_c},
    transport::TcpEndpoint,
    Server, ServerBuilder, ServerError,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;
    let (trigger, signal) = shutdown_channel();
    trigger_on_ctrl_c(trigger);

    let builder = ServerBuilder::new(Arc::new(default_router()), TcpEndpoint::new(bind_socket))
        .shutdown_signal(signal)
        .detached(config.detached_sessions);

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        mode = ?config.mode,
        "server starting"
    );

    match config.mode {
        ServerMode::Simple => {
            let mut server = builder.build_simple();
            stopped(server.serve().await)?;
        }
        ServerMode::Threaded => {
            let mut server = builder.build_threaded();
            stopped(server.serve().await)?;
            if !server.is_detached() {
                info!(
                    active_sessions = server.active_sessions(),
                    "waiting for sessions to finish"
                );
                server.wait_for_sessions().await;
            }
        }
    }

    info!("server stopped");
    Ok(())
}

fn stopped(result: Result<(), ServerError>) -> Result<(), ServerError> {
    match result {
        Ok(()) | Err(ServerError::Cancelled) => Ok(()),
        Err(err) => Err(err),
    }
}
