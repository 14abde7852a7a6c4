//! Command mailboxes for thread-affined transport objects.
//!
//! Sockets, sessions, and connectors are each driven by exactly one
//! task; everything another thread wants from them arrives as a
//! [`Command`] through their mailbox. Commands that carry a [`Pipe`]
//! transfer its ownership outright, which is what makes the
//! no-locks-per-object model sound.

use keelson_core::pipe::Pipe;

/// Work delivered to a transport object's owning task.
#[derive(Debug)]
pub enum Command {
    /// Attach a newly created pipe endpoint (ownership transfer).
    AttachPipe(Pipe),
    /// A registered timer fired.
    TimerExpired(u64),
    /// Begin cooperative teardown.
    Stop,
}

/// Receiving half of a mailbox.
pub type Mailbox = flume::Receiver<Command>;

/// Sending half, freely cloneable across threads.
pub type MailboxSender = flume::Sender<Command>;

/// Create a mailbox pair.
#[must_use]
pub fn mailbox() -> (MailboxSender, Mailbox) {
    flume::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_core::pipe::pipe_pair;

    #[test]
    fn commands_transfer_pipe_ownership() {
        let (tx, rx) = mailbox();
        let (pipe, _peer) = pipe_pair(0, 0);
        let id = pipe.id();

        tx.send(Command::AttachPipe(pipe)).unwrap();
        tx.send(Command::TimerExpired(3)).unwrap();
        tx.send(Command::Stop).unwrap();

        match rx.recv().unwrap() {
            Command::AttachPipe(pipe) => assert_eq!(pipe.id(), id),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(matches!(rx.recv().unwrap(), Command::TimerExpired(3)));
        assert!(matches!(rx.recv().unwrap(), Command::Stop));
    }
}
