use std::{future, sync::Arc};

use tokio::sync::watch;
use tracing::{info, warn};

/// Fires the paired [`ShutdownSignal`]s. Triggering twice is harmless.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation observed by the accept loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (
        ShutdownTrigger { tx: Arc::new(tx) },
        ShutdownSignal { rx: Some(rx) },
    )
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once triggered. Pends forever if every trigger was dropped
    /// without firing.
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return future::pending().await;
        };

        let trigger_dropped = rx.wait_for(|triggered| *triggered).await.is_err();
        if trigger_dropped {
            future::pending::<()>().await;
        }
    }
}

/// Fires `trigger` on the first Ctrl-C delivered to the process.
pub fn trigger_on_ctrl_c(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping accept loop");
                trigger.trigger();
            }
            Err(err) => warn!(error = %err, "failed to install Ctrl-C handler"),
        }
    });
}
