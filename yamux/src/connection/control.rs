use crate::connection::{stream::Stream, ControlCommand};
use crate::error::ConnectionError;
use futures::channel::{mpsc, oneshot};
use futures::SinkExt;

/// A cloneable handle to a yamux session, used to open and accept
/// streams and to initiate a graceful shutdown.
#[derive(Clone)]
pub struct Control {
    sender: mpsc::Sender<ControlCommand>,
}

impl Control {
    pub(crate) fn new(sender: mpsc::Sender<ControlCommand>) -> Self {
        Control { sender }
    }

    /// Opens a new outbound stream.
    pub async fn open_stream(&mut self) -> Result<Stream, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::OpenStream(tx))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Waits for the remote to open a stream.
    pub async fn accept_stream(&mut self) -> Result<Stream, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::AcceptStream(tx))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Closes the session gracefully: a GoAway frame is sent and every
    /// open stream observes end-of-stream.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(ControlCommand::CloseConnection(tx)).await.is_err() {
            // Already closed.
            return Ok(());
        }
        // A dropped reply also means the connection wound down.
        let _ = rx.await;
        Ok(())
    }
}
