//! Connection lifecycle state machine.
//!
//! The machine itself is pure: [`transition`] maps a (state, event) pair to
//! the next state plus the actions the driver must execute. All I/O — the
//! transport, the keepalive interval, the retry timer — lives in the driver
//! ([`crate::actor`]) and the transport task ([`crate::transport`]).
//!
//! Lifecycle: `Connecting` → `Open` on transport open, with a ping/pong
//! keepalive cycle inside `Open`; any close, or a missed pong, drops to
//! `ConnectionError`, which tears the transport down and retries after a
//! fixed delay.

/// Keepalive phase while the connection is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keepalive {
    /// The last ping was answered (or none has been sent yet).
    PongReceived,
    /// A ping is in flight; the next timer fire without a pong means the
    /// connection is dead.
    PingSent,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// A transport is being opened.
    Connecting,
    /// The transport is open and exchanging frames.
    Open(Keepalive),
    /// The transport failed; a reconnect is scheduled.
    ConnectionError,
}

impl State {
    /// Whether application sends are currently allowed.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open(_))
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The transport finished its handshake.
    TransportOpened,
    /// The transport closed, cleanly or not.
    TransportClosed,
    /// A keepalive pong token arrived.
    PongReceived,
    /// An application text frame arrived.
    MessageReceived(String),
    /// The keepalive interval fired.
    PingTimerFired,
    /// The reconnect delay elapsed.
    RetryTimerFired,
    /// The application asked to send an encoded frame.
    SendRequested(String),
}

/// Effects the driver must execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a fresh transport (and discard any reference to the old one).
    OpenTransport,
    /// Tear down the live transport.
    CloseTransport,
    /// Arm the one-shot reconnect timer.
    ScheduleRetry,
    /// Send the keepalive ping token over the transport.
    SendPing,
    /// Forward an encoded frame to the transport.
    Forward(String),
    /// Surface a received frame to the application.
    Emit(String),
}

fn fail() -> (State, Vec<Action>) {
    (
        State::ConnectionError,
        vec![Action::CloseTransport, Action::ScheduleRetry],
    )
}

/// Applies one event to the machine.
///
/// Unlisted (state, event) pairs are ignored: the state is returned
/// unchanged with no actions. In particular a send request outside `Open`
/// is silently dropped.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        (State::Connecting, Event::TransportOpened) => {
            (State::Open(Keepalive::PongReceived), Vec::new())
        }
        (State::Connecting, Event::TransportClosed) => fail(),

        (State::ConnectionError, Event::RetryTimerFired) => {
            (State::Connecting, vec![Action::OpenTransport])
        }

        (State::Open(_), Event::TransportClosed) => fail(),
        (State::Open(Keepalive::PongReceived), Event::PingTimerFired) => {
            (State::Open(Keepalive::PingSent), vec![Action::SendPing])
        }
        // No pong within a full keepalive interval: the connection is dead.
        (State::Open(Keepalive::PingSent), Event::PingTimerFired) => fail(),
        (State::Open(Keepalive::PingSent), Event::PongReceived) => {
            (State::Open(Keepalive::PongReceived), Vec::new())
        }

        (state @ State::Open(_), Event::SendRequested(frame)) => {
            (state, vec![Action::Forward(frame)])
        }
        (state, Event::SendRequested(_)) => (state, Vec::new()),

        (state, Event::MessageReceived(frame)) => (state, vec![Action::Emit(frame)]),

        (state, _) => (state, Vec::new()),
    }
}
