pub mod outline;
pub mod style;

use tokio::sync::watch;

use crate::api::ApiError;
use crate::sse::StreamError;

/// Lifecycle of one streaming ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("a generation is already running")]
    AlreadyRunning,
    #[error("generation cancelled")]
    Cancelled,
    #[error("generation failed: {0}")]
    Stream(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transport(#[from] StreamError),
}

/// Create a cancellation pair for one ingestion run.
pub fn cancel_channel() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested. If the handle is dropped
    /// without cancelling, this stays pending so the run proceeds.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
