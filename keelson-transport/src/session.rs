//! Sessions: the durable half of a logical connection.
//!
//! A session owns the pipe toward the socket core for as long as the
//! logical connection exists. Engines are transient: attaching a new
//! stream lends the pipe to a fresh engine, and when the engine dies
//! the pipe comes back, unread and unflushed frames intact. Queued
//! outbound frames therefore survive reconnects.

use compio::io::{AsyncRead, AsyncWrite};

use keelson_core::options::SocketOptions;
use keelson_core::pipe::Pipe;

use crate::engine::{EngineStatus, StreamEngine};

/// Durable per-connection state bridging a socket-core pipe to
/// zero-or-one engine.
pub struct Session {
    pipe: Option<Pipe>,
    options: SocketOptions,
    drain_tx: flume::Sender<()>,
    drain_rx: flume::Receiver<()>,
}

impl Session {
    /// Wrap the socket-facing pipe endpoint.
    #[must_use]
    pub fn new(pipe: Pipe, options: SocketOptions) -> Self {
        let (drain_tx, drain_rx) = flume::bounded(1);
        Self {
            pipe: Some(pipe),
            options,
            drain_tx,
            drain_rx,
        }
    }

    /// Attach the halves of a connected stream as this session's
    /// engine and drive it to completion. Replaces whatever engine ran
    /// before; the pipe is handed to the engine for the duration and
    /// reclaimed afterward.
    pub async fn attach<R, W>(&mut self, reader: R, writer: W) -> EngineStatus
    where
        R: AsyncRead + Unpin + 'static,
        W: AsyncWrite + Unpin,
    {
        let Some(pipe) = self.pipe.take() else {
            // Already detached; nothing to bridge.
            return EngineStatus::Terminated;
        };
        let engine =
            StreamEngine::new(reader, writer, pipe, &self.options, self.drain_rx.clone());
        let (pipe, status) = engine.run().await;
        self.pipe = Some(pipe);
        status
    }

    /// Handle that asks the attached engine to flush already-queued
    /// outbound frames and close its pipe. Usable while
    /// [`Session::attach`] is in flight; the caller bounds the drain
    /// with its linger deadline.
    #[must_use]
    pub fn drain_handle(&self) -> flume::Sender<()> {
        self.drain_tx.clone()
    }

    /// Whether the socket core has torn the pipe down, ending the
    /// logical connection.
    pub fn is_terminated(&mut self) -> bool {
        match self.pipe.as_mut() {
            Some(pipe) => pipe.is_terminated(),
            None => true,
        }
    }

    /// Begin teardown of the session's pipe.
    ///
    /// A zero linger discards undelivered frames immediately.
    /// Otherwise already-flushed frames are still drained before the
    /// pipe closes; flushing queued outbound frames to a live
    /// connection is [`Session::drain_handle`]'s job while an engine
    /// is attached.
    pub fn detach(&mut self) {
        let linger_drain = !matches!(self.options.linger, Some(d) if d.is_zero());
        if let Some(pipe) = self.pipe.as_mut() {
            pipe.terminate(linger_drain);
        }
    }

    /// Reconnecting makes sense only while the logical connection is
    /// alive and the options allow it.
    pub fn should_reconnect(&mut self, status: &EngineStatus) -> bool {
        if self.is_terminated() || !self.options.reconnect_enabled() {
            return false;
        }
        match status {
            EngineStatus::Error(err) => err.is_connection_fatal(),
            EngineStatus::Terminated => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_core::error::KeelsonError;
    use keelson_core::pipe::pipe_pair;

    #[test]
    fn detach_with_zero_linger_terminates_immediately() {
        let (local, mut remote) = pipe_pair(0, 0);
        let options = SocketOptions::new().with_linger(Some(std::time::Duration::ZERO));
        let mut session = Session::new(local, options);

        session.detach();
        assert!(remote.is_terminated());
        assert!(session.is_terminated());
    }

    #[test]
    fn reconnect_only_for_fatal_errors_on_live_pipes() {
        let (local, mut remote) = pipe_pair(0, 0);
        let mut session = Session::new(local, SocketOptions::default());

        let fatal = EngineStatus::Error(KeelsonError::ConnectionLost("reset".into()));
        assert!(session.should_reconnect(&fatal));
        assert!(!session.should_reconnect(&EngineStatus::Terminated));

        remote.terminate(false);
        assert!(!session.should_reconnect(&fatal));
    }

    #[test]
    fn reconnect_disabled_by_options() {
        let (local, _remote) = pipe_pair(0, 0);
        let options = SocketOptions::new().with_reconnect_ivl(std::time::Duration::ZERO);
        let mut session = Session::new(local, options);

        let fatal = EngineStatus::Error(KeelsonError::ConnectionLost("reset".into()));
        assert!(!session.should_reconnect(&fatal));
    }
}
