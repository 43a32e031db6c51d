//! Sending half of a server-streaming response.

use tokio::sync::mpsc;
use tonic::Status;

use super::SyncError;

/// Wraps the channel behind a `ReceiverStream` handed to tonic.
#[derive(Debug)]
pub struct Outbound<T> {
    tx: mpsc::Sender<Result<T, Status>>,
}

impl<T> Clone for Outbound<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Outbound<T> {
    pub fn new(tx: mpsc::Sender<Result<T, Status>>) -> Self {
        Self { tx }
    }

    /// Creates an outbound handle and the receiver tonic will drain.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Result<T, Status>>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    /// Waits for buffer space and sends. Fails once the client is gone.
    pub async fn send(&self, message: T) -> Result<(), SyncError> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| SyncError::ClientGone)
    }

    /// Sends without waiting. Used by the live broadcast.
    pub fn try_send(&self, message: T) -> Result<(), mpsc::error::TrySendError<Result<T, Status>>> {
        self.tx.try_send(Ok(message))
    }

    /// Terminates the stream with an error status.
    pub async fn fail(&self, status: Status) {
        // A closed channel means nobody is left to tell.
        let _ = self.tx.send(Err(status)).await;
    }

    /// Resolves when the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
