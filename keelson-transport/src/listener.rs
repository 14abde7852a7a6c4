//! Passive connection acceptance.
//!
//! A listener binds an endpoint and accepts in a loop. Every accepted
//! stream gets its own session and engine on the listener's worker
//! thread, and the socket-core end of the new pipe is delivered to the
//! owning socket's mailbox as [`Command::AttachPipe`]. Transient accept
//! failures are reported and accepting resumes; anything else stops
//! the listener. Passive sessions never reconnect.

use std::marker::PhantomData;

use futures::FutureExt;

use keelson_core::endpoint::Endpoint;
use keelson_core::error::{KeelsonError, KeelsonResult};
use keelson_core::monitor::{self, TransportEvent, TransportEventSender};
use keelson_core::options::SocketOptions;
use keelson_core::pipe::pipe_pair;

use crate::mailbox::{mailbox, Command, Mailbox, MailboxSender};
use crate::reactor::IoThreadHandle;
use crate::session::Session;
use crate::transport::{TcpTransport, Transport};

/// Accepting endpoint bound to one socket core.
pub struct Listener<T: Transport = TcpTransport> {
    acceptor: T::Acceptor,
    endpoint: Endpoint,
    options: SocketOptions,
    /// Socket-core mailbox receiving a pipe per accepted connection.
    sink: MailboxSender,
    mailbox: Mailbox,
    monitor: Option<TransportEventSender>,
    // fn() -> T keeps the listener Send regardless of T.
    _transport: PhantomData<fn() -> T>,
}

impl<T: Transport + 'static> Listener<T> {
    /// Bind `endpoint` and prepare to accept.
    pub async fn bind(
        endpoint: &Endpoint,
        options: SocketOptions,
        sink: MailboxSender,
        commands: Mailbox,
        monitor: Option<TransportEventSender>,
    ) -> KeelsonResult<Self> {
        let acceptor = T::bind(endpoint).await?;
        let endpoint = T::local_endpoint(&acceptor)?;
        Ok(Self {
            acceptor,
            endpoint,
            options,
            sink,
            mailbox: commands,
            monitor,
            _transport: PhantomData,
        })
    }

    /// The endpoint actually bound (port 0 resolved).
    #[must_use]
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Spawn a listener onto a reactor worker.
    ///
    /// Blocks the calling thread briefly until the bind result is
    /// known; returns the bound endpoint and a stop sender.
    pub fn spawn(
        worker: &IoThreadHandle,
        endpoint: Endpoint,
        options: SocketOptions,
        sink: MailboxSender,
        monitor: Option<TransportEventSender>,
    ) -> KeelsonResult<(Endpoint, MailboxSender)> {
        let (control, commands) = mailbox();
        let (bound_tx, bound_rx) = flume::bounded(1);
        let guard = worker.load_guard();
        worker.execute(move || {
            compio::runtime::spawn(async move {
                match Self::bind(&endpoint, options, sink, commands, monitor).await {
                    Ok(listener) => {
                        let _ = bound_tx.send(Ok(listener.local_endpoint().clone()));
                        listener.run().await;
                    }
                    Err(err) => {
                        let _ = bound_tx.send(Err(err));
                    }
                }
                drop(guard);
            })
            .detach();
        })?;
        let bound = bound_rx.recv().map_err(|_| KeelsonError::Terminating)??;
        Ok((bound, control))
    }

    /// Accept until stopped or a fatal accept error.
    pub async fn run(self) {
        self.emit(TransportEvent::Listening(self.endpoint.clone()));
        tracing::debug!(endpoint = %self.endpoint, "listening");
        loop {
            let Some(accepted) = self.accept_or_stop().await else {
                break;
            };
            match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = T::configure(&stream, &self.options) {
                        tracing::warn!(%peer, %err, "stream options not applied");
                    }
                    if !self.hand_off(stream) {
                        // Socket core is gone.
                        break;
                    }
                    tracing::debug!(endpoint = %self.endpoint, %peer, "accepted");
                    self.emit(TransportEvent::Accepted(self.endpoint.clone()));
                }
                Err(err) if is_transient_accept(&err) => {
                    self.emit(TransportEvent::AcceptFailed {
                        endpoint: self.endpoint.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::error!(endpoint = %self.endpoint, %err, "listener failed");
                    self.emit(TransportEvent::AcceptFailed {
                        endpoint: self.endpoint.clone(),
                        reason: err.to_string(),
                    });
                    break;
                }
            }
        }
    }

    /// Create the session/engine pair for an accepted stream and
    /// deliver the socket-core pipe end. Returns `false` when the
    /// socket core no longer listens to its mailbox.
    fn hand_off(&self, stream: T::Stream) -> bool {
        let (core_pipe, session_pipe) = pipe_pair(self.options.send_hwm, self.options.recv_hwm);
        if self.sink.send(Command::AttachPipe(core_pipe)).is_err() {
            return false;
        }
        let mut session = Session::new(session_pipe, self.options.clone());
        let (reader, writer) = T::split(stream);
        compio::runtime::spawn(async move {
            let status = session.attach(reader, writer).await;
            tracing::debug!(?status, "accepted connection closed");
            session.detach();
        })
        .detach();
        true
    }

    async fn accept_or_stop(
        &self,
    ) -> Option<KeelsonResult<(T::Stream, std::net::SocketAddr)>> {
        let accept = T::accept(&self.acceptor).fuse();
        futures::pin_mut!(accept);
        loop {
            let cmd = self.mailbox.recv_async().fuse();
            futures::pin_mut!(cmd);
            futures::select! {
                accepted = accept => return Some(accepted),
                cmd = cmd => match cmd {
                    Ok(Command::Stop) | Err(_) => return None,
                    _ => {}
                },
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        monitor::emit(&self.monitor, event);
    }
}

/// Accept errors that leave the listener usable: per-connection
/// failures and momentary resource exhaustion. Fd and buffer
/// exhaustion arrive as raw errnos that `io::ErrorKind` does not
/// distinguish.
fn is_transient_accept(err: &KeelsonError) -> bool {
    match err {
        KeelsonError::Io(err) => {
            matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ) || matches!(
                err.raw_os_error(),
                Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS)
            )
        }
        _ => false,
    }
}
