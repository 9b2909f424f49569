//! Send/receive actor wrapping the connection state machine.
//!
//! [`SocketActor::start`] spawns a single driver task that funnels
//! transport events, application commands, the keepalive interval, and the
//! reconnect timer through one sequential queue — no two transitions ever
//! run concurrently. The handle queues sends (dropped unless the connection
//! is open) and exposes the current [`State`] through a watch channel; the
//! returned receiver yields decoded inbound envelopes.

use crate::machine::{transition, Action, Event, State};
use crate::transport::{TransportCommand, TransportEvent, TransportHandle};
use pulse_proto::{Envelope, EventKind, ProtoError};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Default reconnect delay after a connection error.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Default keepalive ping interval.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(60_000);

/// Default capacity of the inbound message channel.
const DEFAULT_MESSAGE_CHANNEL_CAPACITY: usize = 256;

/// Errors returned by the actor handle.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Encoding an outbound envelope failed.
    #[error("client protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// The actor task has stopped.
    #[error("socket actor is stopped")]
    Stopped,
}

/// Configuration for a [`SocketActor`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the realtime server.
    pub url: String,
    /// Delay before reopening a transport after a connection error.
    pub retry_delay: Duration,
    /// Keepalive ping interval; a ping unanswered for one full interval
    /// marks the connection dead.
    pub ping_interval: Duration,
    /// Capacity of the inbound message channel. When the consumer cannot
    /// keep up, messages are dropped with a warning.
    pub message_channel_capacity: usize,
}

impl ClientConfig {
    /// Creates a configuration with the standard timings (3 s retry,
    /// 60 s keepalive).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
            ping_interval: DEFAULT_PING_INTERVAL,
            message_channel_capacity: DEFAULT_MESSAGE_CHANNEL_CAPACITY,
        }
    }

    /// Overrides the reconnect delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Overrides the keepalive interval.
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Overrides the inbound channel capacity. Values below 1 are clamped.
    #[must_use]
    pub fn with_message_channel_capacity(mut self, capacity: usize) -> Self {
        self.message_channel_capacity = capacity.max(1);
        self
    }
}

enum Command {
    Send(String),
    Stop,
}

/// Handle to the connection actor.
pub struct SocketActor {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<State>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SocketActor {
    /// Starts the actor and returns the handle plus the inbound message
    /// receiver. The first transport is opened immediately.
    #[must_use = "the message receiver must be consumed"]
    pub fn start(config: ClientConfig) -> (Self, mpsc::Receiver<Envelope>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::channel(config.message_channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(State::Connecting);

        let task = tokio::spawn(drive(config, cmd_rx, msg_tx, state_tx));

        (
            Self {
                cmd_tx,
                state_rx,
                task: Some(task),
            },
            msg_rx,
        )
    }

    /// Encodes and queues an envelope for sending.
    ///
    /// The frame is forwarded to the transport only while the connection is
    /// open; outside `Open` it is silently dropped by the machine.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Stopped`] if the actor task has exited.
    pub fn send(&self, kind: EventKind, payload: Value) -> Result<(), ClientError> {
        let frame = Envelope::new(kind, payload).encode()?;
        self.cmd_tx
            .send(Command::Send(frame))
            .map_err(|_| ClientError::Stopped)
    }

    /// Like [`send`](Self::send) with the conventional empty payload.
    pub fn send_empty(&self, kind: EventKind) -> Result<(), ClientError> {
        let frame = Envelope::empty(kind).encode()?;
        self.cmd_tx
            .send(Command::Send(frame))
            .map_err(|_| ClientError::Stopped)
    }

    /// Current connection state.
    pub fn state(&self) -> State {
        *self.state_rx.borrow()
    }

    /// A watch receiver tracking connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state_rx.clone()
    }

    /// Stops the actor: tears down the transport and clears all timers.
    pub async fn stop(mut self) {
        let _ = self.cmd_tx.send(Command::Stop);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn recv_transport(rx: &mut Option<mpsc::Receiver<TransportEvent>>) -> TransportEvent {
    match rx {
        // A dropped sender means the transport task is gone.
        Some(rx) => rx.recv().await.unwrap_or(TransportEvent::Closed),
        None => std::future::pending().await,
    }
}

async fn wait_retry(retry_at: Option<Instant>) {
    match retry_at {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Driver loop: one sequential event queue feeding the pure machine.
async fn drive(
    config: ClientConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    msg_tx: mpsc::Sender<Envelope>,
    state_tx: watch::Sender<State>,
) {
    let mut state = State::Connecting;

    // Entry action of the initial `Connecting` state.
    let (handle, rx) = TransportHandle::spawn(config.url.clone());
    let mut transport = Some(handle);
    let mut transport_rx = Some(rx);

    let mut retry_at: Option<Instant> = None;

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(frame)) => Event::SendRequested(frame),
                Some(Command::Stop) | None => break,
            },
            ev = recv_transport(&mut transport_rx) => match ev {
                TransportEvent::Opened => Event::TransportOpened,
                TransportEvent::Closed => Event::TransportClosed,
                TransportEvent::PongReceived => Event::PongReceived,
                TransportEvent::MessageReceived(text) => Event::MessageReceived(text),
            },
            _ = ping.tick(), if state.is_open() => Event::PingTimerFired,
            () = wait_retry(retry_at) => {
                retry_at = None;
                Event::RetryTimerFired
            }
        };

        let was_open = state.is_open();
        let (next, actions) = transition(state, event);
        state = next;

        // Entering `Open` restarts the keepalive cycle.
        if state.is_open() && !was_open {
            ping.reset();
        }

        let _ = state_tx.send(state);

        for action in actions {
            match action {
                Action::OpenTransport => {
                    let (handle, rx) = TransportHandle::spawn(config.url.clone());
                    if let Some(old) = transport.replace(handle) {
                        old.shutdown();
                    }
                    transport_rx = Some(rx);
                }
                Action::CloseTransport => {
                    if let Some(old) = transport.take() {
                        old.shutdown();
                    }
                    transport_rx = None;
                }
                Action::ScheduleRetry => {
                    retry_at = Some(Instant::now() + config.retry_delay);
                }
                Action::SendPing => {
                    if let Some(handle) = &transport {
                        handle.send(TransportCommand::SendPing);
                    }
                }
                Action::Forward(frame) => {
                    if let Some(handle) = &transport {
                        handle.send(TransportCommand::SendText(frame));
                    }
                }
                Action::Emit(frame) => match Envelope::decode(&frame) {
                    Ok(envelope) => {
                        if let Err(e) = msg_tx.try_send(envelope) {
                            tracing::warn!("dropping inbound message for slow consumer: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("skipping undecodable inbound frame: {}", e);
                    }
                },
            }
        }
    }

    // Stop: tear down the live transport; pending timers die with the task.
    if let Some(handle) = transport.take() {
        handle.shutdown();
    }
}
