//! Connection lifecycle event monitoring.
//!
//! Transient transport conditions (retries, accept hiccups,
//! disconnects) are reported here rather than surfaced as errors to
//! the application.

use std::fmt;
use std::time::Duration;

use crate::endpoint::Endpoint;

/// Transport lifecycle events.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection to a peer was established.
    Connected(Endpoint),

    /// A connection was lost.
    Disconnected(Endpoint),

    /// An endpoint was bound and is accepting connections.
    Listening(Endpoint),

    /// An incoming connection was accepted.
    Accepted(Endpoint),

    /// A transient accept failure; accepting resumes.
    AcceptFailed {
        endpoint: Endpoint,
        reason: String,
    },

    /// A connection attempt failed; a retry is scheduled.
    ConnectRetried {
        endpoint: Endpoint,
        delay: Duration,
    },

    /// A connection attempt failed and no retry will follow.
    ConnectFailed {
        endpoint: Endpoint,
        reason: String,
    },
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(ep) => write!(f, "Connected to {ep}"),
            Self::Disconnected(ep) => write!(f, "Disconnected from {ep}"),
            Self::Listening(ep) => write!(f, "Listening on {ep}"),
            Self::Accepted(ep) => write!(f, "Accepted connection on {ep}"),
            Self::AcceptFailed { endpoint, reason } => {
                write!(f, "Accept failed on {endpoint}: {reason}")
            }
            Self::ConnectRetried { endpoint, delay } => {
                write!(f, "Retrying {endpoint} in {delay:?}")
            }
            Self::ConnectFailed { endpoint, reason } => {
                write!(f, "Connect failed for {endpoint}: {reason}")
            }
        }
    }
}

/// Receiving side of a monitoring channel.
pub type TransportMonitor = flume::Receiver<TransportEvent>;

/// Sending side, held by connectors, listeners, and sessions.
pub type TransportEventSender = flume::Sender<TransportEvent>;

/// Create a monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (TransportEventSender, TransportMonitor) {
    flume::unbounded()
}

/// Emit an event, ignoring a dropped receiver.
pub fn emit(sender: &Option<TransportEventSender>, event: TransportEvent) {
    if let Some(sender) = sender {
        let _ = sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn event_display() {
        let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let event = TransportEvent::Connected(Endpoint::Tcp(addr));
        assert_eq!(event.to_string(), "Connected to tcp://127.0.0.1:5555");
    }

    #[test]
    fn monitor_channel() {
        let (sender, receiver) = create_monitor();
        let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        sender
            .send(TransportEvent::Listening(Endpoint::Tcp(addr)))
            .unwrap();

        assert!(matches!(
            receiver.recv().unwrap(),
            TransportEvent::Listening(_)
        ));
    }

    #[test]
    fn emit_tolerates_dropped_receiver() {
        let (sender, receiver) = create_monitor();
        drop(receiver);
        let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        emit(
            &Some(sender),
            TransportEvent::Disconnected(Endpoint::Tcp(addr)),
        );
        emit(&None, TransportEvent::Connected(Endpoint::Inproc("x".into())));
    }
}
