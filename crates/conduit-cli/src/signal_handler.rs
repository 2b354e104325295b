//! SIGINT/SIGTERM handling
//!
//! The first signal cancels the shared token so every task can shut down in
//! order; a second one exits immediately.

use futures::stream::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status used when a second signal forces termination
const FORCED_EXIT_CODE: i32 = 130;

/// Cancels a token on termination signals until dropped
pub struct SignalHandler {
    handle: signal_hook_tokio::Handle,
    task: JoinHandle<()>,
}

impl SignalHandler {
    pub fn install(token: CancellationToken) -> std::io::Result<Self> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let handle = signals.handle();

        let task = tokio::spawn(async move {
            while let Some(signal) = signals.next().await {
                let name = if signal == SIGINT { "SIGINT" } else { "SIGTERM" };
                if token.is_cancelled() {
                    warn!("Received {} during shutdown, exiting", name);
                    std::process::exit(FORCED_EXIT_CODE);
                }
                info!("Received {}, shutting down", name);
                token.cancel();
            }
        });

        Ok(Self { handle, task })
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.handle.close();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_install_and_drop() {
        let token = CancellationToken::new();
        let handler = SignalHandler::install(token.clone()).unwrap();
        drop(handler);
        assert!(!token.is_cancelled());
    }
}
