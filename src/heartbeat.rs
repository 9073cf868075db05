//! Background heartbeat — periodic liveness tick into the trace stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::trace::Tracer;

/// Spawn the heartbeat loop. Runs until the shutdown channel fires; a
/// failing tick is reported as an error event and never kills the loop.
pub fn start(
    tracer: Arc<Tracer>,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs, "heartbeat started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {
                    tracer.heartbeat("tick", None).await;
                }
                _ = shutdown.recv() => {
                    info!("heartbeat stopped");
                    break;
                }
            }
        }
    })
}
