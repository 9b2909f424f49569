//! Transport task: exclusive owner of the WebSocket stream.
//!
//! The state machine never touches the socket. Each connection attempt
//! spawns one task that reports [`TransportEvent`]s on its own channel and
//! accepts [`TransportCommand`]s; tearing a transport down aborts the task
//! and drops both channels, so events from a dead transport can never leak
//! into a later connection attempt.

use futures_util::{SinkExt, StreamExt};
use pulse_proto::{PING, PONG};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// Capacity of the transport event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Raw transport events, already stripped of the keepalive token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The WebSocket handshake completed.
    Opened,
    /// The connection closed or failed (connect failure included).
    Closed,
    /// A keepalive pong token arrived.
    PongReceived,
    /// An application text frame arrived.
    MessageReceived(String),
}

/// Commands accepted by the transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Send an application text frame.
    SendText(String),
    /// Send the keepalive ping token.
    SendPing,
}

/// Handle to one spawned transport task.
pub struct TransportHandle {
    cmd_tx: mpsc::UnboundedSender<TransportCommand>,
    task: tokio::task::JoinHandle<()>,
}

impl TransportHandle {
    /// Spawns a transport task connecting to `url`. Returns the handle and
    /// the event channel for this connection attempt.
    pub fn spawn(url: String) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let task = tokio::spawn(run(url, cmd_rx, event_tx));
        (Self { cmd_tx, task }, event_rx)
    }

    /// Queues a command for the transport. Dropped if the task has exited;
    /// the machine learns about that through the `Closed` event instead.
    pub fn send(&self, cmd: TransportCommand) {
        let _ = self.cmd_tx.send(cmd);
    }

    /// Tears the transport down.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn run(
    url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<TransportCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    let mut ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            tracing::debug!(%url, "connect failed: {}", e);
            let _ = event_tx.send(TransportEvent::Closed).await;
            return;
        }
    };

    if event_tx.send(TransportEvent::Opened).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let event = if text.as_str() == PONG {
                            TransportEvent::PongReceived
                        } else {
                            TransportEvent::MessageReceived(text.to_string())
                        };
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // Driver dropped the handle; nothing left to do.
                    return;
                };
                let text = match cmd {
                    TransportCommand::SendText(text) => text,
                    TransportCommand::SendPing => PING.to_string(),
                };
                if ws.send(Message::Text(text.into())).await.is_err() {
                    let _ = event_tx.send(TransportEvent::Closed).await;
                    return;
                }
            }
        }
    }
}
