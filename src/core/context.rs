//! I/O servicing context
//!
//! One current-thread tokio runtime driven by one dedicated OS thread. Every
//! read and write continuation of the connections owned by a server or client
//! runs on that thread; other threads only spawn onto it through the handle.

use crate::error::{NetworkError, Result};
use std::thread::JoinHandle;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

pub(crate) struct IoContext {
    handle: Handle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl IoContext {
    /// Build the runtime and start the servicing thread
    pub(crate) fn start(name: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NetworkError::invalid_state(format!("Failed to build runtime: {}", e)))?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                // Dropping the runtime cancels every outstanding task, which
                // drops their socket halves.
                drop(runtime);
                tracing::debug!("I/O context stopped");
            })?;

        Ok(Self {
            handle,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Stop the runtime and join the servicing thread. Idempotent.
    ///
    /// Must not be called from the servicing thread itself.
    pub(crate) fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("I/O thread panicked");
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.stop();
    }
}
