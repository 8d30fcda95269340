//! Connection, channel and consumer state machines.
//!
//! The machines are pure: they map `(state, event)` to the next state and
//! the side effects the owner must perform. Nothing here touches a socket.

use std::fmt;

/// Lifecycle of a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; a reconnect may be scheduled
    Disconnected,
    /// Dialling and negotiating
    Connecting,
    /// Negotiated and usable
    Open,
    /// Close requested, waiting for the broker
    Closing,
    /// Terminal
    Closed,
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Caller asked to connect
    ConnectRequested,
    /// Socket connected and handshake completed
    Opened,
    /// Socket or handshake failed
    DialFailed,
    /// Open connection went away unexpectedly
    Lost,
    /// Caller asked to close
    CloseRequested,
    /// Broker acknowledged the close
    CloseCompleted,
    /// Reconnect delay elapsed
    RetryElapsed,
}

/// Side effects requested by a connection transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Start a new dial and handshake
    Dial,
    /// Fire `RetryElapsed` after the reconnect delay
    ScheduleReconnect,
    /// Send connection.close on the current link
    SendClose,
    /// Drop the current link and its I/O task
    Release,
}

/// Result of feeding an event to a state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S: 'static, A: 'static> {
    /// State after the event
    pub next: S,
    /// Actions to perform, in order
    pub actions: &'static [A],
    /// Whether the event was valid in the previous state
    pub accepted: bool,
}

impl ConnectionState {
    /// Apply an event. Events that make no sense in the current state
    /// leave it unchanged and are reported as not accepted.
    #[must_use]
    pub fn on(self, event: ConnectionEvent) -> Transition<Self, ConnectionAction> {
        use ConnectionAction::{Dial, Release, ScheduleReconnect, SendClose};
        use ConnectionEvent as E;
        use ConnectionState as S;

        let (next, actions): (Self, &'static [ConnectionAction]) = match (self, event) {
            (S::Disconnected, E::ConnectRequested | E::RetryElapsed) => (S::Connecting, &[Dial]),
            (S::Disconnected, E::CloseRequested) => (S::Closed, &[Release]),
            (S::Connecting, E::Opened) => (S::Open, &[]),
            (S::Connecting, E::DialFailed) => (S::Disconnected, &[ScheduleReconnect]),
            (S::Connecting, E::CloseRequested) => (S::Closing, &[]),
            (S::Open, E::Lost) => (S::Disconnected, &[Release, ScheduleReconnect]),
            (S::Open, E::CloseRequested) => (S::Closing, &[SendClose]),
            (S::Closing, E::Opened) => (S::Closing, &[SendClose]),
            (S::Closing, E::DialFailed | E::Lost | E::CloseCompleted) => (S::Closed, &[Release]),
            (state, _) => {
                return Transition {
                    next: state,
                    actions: &[],
                    accepted: false,
                }
            }
        };
        Transition {
            next,
            actions,
            accepted: true,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not open
    Closed,
    /// channel.open sent
    Opening,
    /// Usable
    Open,
    /// channel.close sent
    Closing,
}

/// Inputs to the channel state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// channel.open sent
    Open,
    /// channel.open-ok received
    OpenOk,
    /// channel.close sent
    Close,
    /// channel.close-ok received
    CloseOk,
    /// Broker closed the channel
    ClosedByBroker,
    /// Connection went away
    ConnectionLost,
}

impl ChannelState {
    /// Apply an event, or `None` if it is invalid in this state.
    #[must_use]
    pub fn on(self, event: ChannelEvent) -> Option<Self> {
        use ChannelEvent as E;
        use ChannelState as S;

        match (self, event) {
            (_, E::ClosedByBroker | E::ConnectionLost) => Some(S::Closed),
            (S::Closed, E::Open) => Some(S::Opening),
            (S::Opening, E::OpenOk) => Some(S::Open),
            (S::Opening | S::Open, E::Close) => Some(S::Closing),
            (S::Closing, E::CloseOk) => Some(S::Closed),
            _ => None,
        }
    }
}

/// Lifecycle of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// basic.consume not yet confirmed
    Idle,
    /// Receiving deliveries
    Consuming,
    /// basic.cancel sent
    Cancelling,
    /// Terminal
    Stopped,
}

/// Inputs to the consumer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerEvent {
    /// basic.consume-ok received
    ConsumeOk,
    /// basic.cancel sent
    Cancel,
    /// basic.cancel-ok received
    CancelOk,
    /// Broker cancelled the consumer
    CancelledByBroker,
    /// Channel or connection went away
    ConnectionLost,
}

impl ConsumerState {
    /// Apply an event, or `None` if it is invalid in this state.
    #[must_use]
    pub fn on(self, event: ConsumerEvent) -> Option<Self> {
        use ConsumerEvent as E;
        use ConsumerState as S;

        match (self, event) {
            (S::Idle, E::ConsumeOk) => Some(S::Consuming),
            (S::Idle, E::Cancel) => Some(S::Stopped),
            (S::Consuming, E::Cancel) => Some(S::Cancelling),
            (S::Cancelling, E::CancelOk) => Some(S::Stopped),
            (S::Idle | S::Consuming | S::Cancelling, E::CancelledByBroker | E::ConnectionLost) => {
                Some(S::Stopped)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionAction::*;
    use ConnectionEvent as E;
    use ConnectionState as S;

    fn step(state: S, event: E) -> (S, Vec<ConnectionAction>) {
        let t = state.on(event);
        assert!(t.accepted, "{state} should accept {event:?}");
        (t.next, t.actions.to_vec())
    }

    #[test]
    fn connect_then_lose_then_reconnect() {
        assert_eq!(step(S::Disconnected, E::ConnectRequested), (S::Connecting, vec![Dial]));
        assert_eq!(step(S::Connecting, E::Opened), (S::Open, vec![]));
        assert_eq!(
            step(S::Open, E::Lost),
            (S::Disconnected, vec![Release, ScheduleReconnect])
        );
        assert_eq!(step(S::Disconnected, E::RetryElapsed), (S::Connecting, vec![Dial]));
        assert_eq!(
            step(S::Connecting, E::DialFailed),
            (S::Disconnected, vec![ScheduleReconnect])
        );
    }

    #[test]
    fn close_paths() {
        assert_eq!(step(S::Open, E::CloseRequested), (S::Closing, vec![SendClose]));
        assert_eq!(step(S::Closing, E::CloseCompleted), (S::Closed, vec![Release]));
        assert_eq!(step(S::Closing, E::Lost), (S::Closed, vec![Release]));
        assert_eq!(step(S::Disconnected, E::CloseRequested), (S::Closed, vec![Release]));

        // close while a dial is in flight: finish the dial, then close it
        assert_eq!(step(S::Connecting, E::CloseRequested), (S::Closing, vec![]));
        assert_eq!(step(S::Closing, E::Opened), (S::Closing, vec![SendClose]));
        assert_eq!(step(S::Closing, E::DialFailed), (S::Closed, vec![Release]));
    }

    #[test]
    fn invalid_events_are_ignored() {
        for (state, event) in [
            (S::Open, E::Opened),
            (S::Open, E::RetryElapsed),
            (S::Disconnected, E::Lost),
            (S::Closed, E::RetryElapsed),
            (S::Closed, E::ConnectRequested),
            (S::Connecting, E::CloseCompleted),
        ] {
            let t = state.on(event);
            assert!(!t.accepted);
            assert_eq!(t.next, state);
            assert!(t.actions.is_empty());
        }
    }

    #[test]
    fn channel_lifecycle() {
        use ChannelEvent as C;
        let open = ChannelState::Closed
            .on(C::Open)
            .and_then(|s| s.on(C::OpenOk))
            .unwrap();
        assert_eq!(open, ChannelState::Open);
        assert_eq!(
            open.on(C::Close).and_then(|s| s.on(C::CloseOk)),
            Some(ChannelState::Closed)
        );
        assert_eq!(open.on(C::ClosedByBroker), Some(ChannelState::Closed));
        assert_eq!(ChannelState::Opening.on(C::ConnectionLost), Some(ChannelState::Closed));
        assert_eq!(ChannelState::Closed.on(C::OpenOk), None);
        assert_eq!(open.on(C::Open), None);
    }

    #[test]
    fn consumer_lifecycle() {
        use ConsumerEvent as C;
        let consuming = ConsumerState::Idle.on(C::ConsumeOk).unwrap();
        assert_eq!(consuming, ConsumerState::Consuming);
        assert_eq!(
            consuming.on(C::Cancel).and_then(|s| s.on(C::CancelOk)),
            Some(ConsumerState::Stopped)
        );
        assert_eq!(consuming.on(C::CancelledByBroker), Some(ConsumerState::Stopped));
        assert_eq!(
            ConsumerState::Cancelling.on(C::ConnectionLost),
            Some(ConsumerState::Stopped)
        );
        assert_eq!(ConsumerState::Stopped.on(C::ConsumeOk), None);
        assert_eq!(consuming.on(C::CancelOk), None);
    }
}
