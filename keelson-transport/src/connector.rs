//! Active connection establishment with reconnect backoff.
//!
//! A connector loops through `Delaying -> Connecting -> Attached`:
//! connect, hand the stream to its session, and when the engine dies
//! of a connection-level fault, schedule another attempt after a
//! jittered exponential delay. The loop ends when the socket core
//! terminates the session's pipe, when reconnection is disabled, or on
//! a `Stop` command.

use std::marker::PhantomData;
use std::time::Duration;

use futures::FutureExt;

use keelson_core::endpoint::Endpoint;
use keelson_core::error::KeelsonResult;
use keelson_core::monitor::{self, TransportEvent, TransportEventSender};
use keelson_core::options::SocketOptions;
use keelson_core::pipe::{pipe_pair, Pipe};
use keelson_core::reconnect::ReconnectTimer;

use crate::engine::EngineStatus;
use crate::mailbox::{mailbox, Command, Mailbox, MailboxSender};
use crate::reactor::IoThreadHandle;
use crate::session::Session;
use crate::transport::{TcpTransport, Transport};

/// Active connecter for one endpoint.
pub struct Connector<T: Transport = TcpTransport> {
    endpoint: Endpoint,
    options: SocketOptions,
    session: Session,
    timer: ReconnectTimer,
    mailbox: Mailbox,
    monitor: Option<TransportEventSender>,
    delayed_start: bool,
    // fn() -> T keeps the connector Send regardless of T.
    _transport: PhantomData<fn() -> T>,
}

impl<T: Transport + 'static> Connector<T> {
    /// Create a connector owning `session`. Commands (notably
    /// [`Command::Stop`]) arrive through `mailbox`.
    #[must_use]
    pub fn new(
        endpoint: Endpoint,
        options: SocketOptions,
        session: Session,
        mailbox: Mailbox,
        monitor: Option<TransportEventSender>,
        delayed_start: bool,
    ) -> Self {
        let timer = ReconnectTimer::new(options.reconnect_ivl, options.reconnect_ivl_max);
        Self {
            endpoint,
            options,
            session,
            timer,
            mailbox,
            monitor,
            delayed_start,
            _transport: PhantomData,
        }
    }

    /// Spawn a connector onto a reactor worker.
    ///
    /// Returns the socket-core end of the session pipe and a sender
    /// for stopping the connector. The pipe survives reconnects.
    pub fn spawn(
        worker: &IoThreadHandle,
        endpoint: Endpoint,
        options: SocketOptions,
        monitor: Option<TransportEventSender>,
        delayed_start: bool,
    ) -> KeelsonResult<(Pipe, MailboxSender)> {
        let (core_pipe, session_pipe) = pipe_pair(options.send_hwm, options.recv_hwm);
        let (control, commands) = mailbox();
        let session = Session::new(session_pipe, options.clone());
        let connector = Self::new(endpoint, options, session, commands, monitor, delayed_start);
        let guard = worker.load_guard();
        worker.execute(move || {
            compio::runtime::spawn(async move {
                connector.run().await;
                drop(guard);
            })
            .detach();
        })?;
        Ok((core_pipe, control))
    }

    /// Drive the connect/reconnect loop to completion.
    pub async fn run(mut self) {
        if self.delayed_start {
            let delay = self.timer.next_interval();
            if !self.delay_or_stop(delay).await {
                self.session.detach();
                return;
            }
        }
        loop {
            if self.session.is_terminated() {
                break;
            }
            match T::connect(&self.endpoint).await {
                Ok(stream) => {
                    if let Err(err) = T::configure(&stream, &self.options) {
                        tracing::warn!(endpoint = %self.endpoint, %err, "stream options not applied");
                    }
                    self.timer.reset();
                    self.emit(TransportEvent::Connected(self.endpoint.clone()));
                    tracing::debug!(endpoint = %self.endpoint, "connected");

                    let Some(status) = self.drive_engine(stream).await else {
                        // Stopped mid-connection; the engine was
                        // dropped with the stream.
                        return;
                    };
                    self.emit(TransportEvent::Disconnected(self.endpoint.clone()));
                    if !self.session.should_reconnect(&status) {
                        break;
                    }
                }
                Err(err) => {
                    if self.session.is_terminated() || !self.options.reconnect_enabled() {
                        self.emit(TransportEvent::ConnectFailed {
                            endpoint: self.endpoint.clone(),
                            reason: err.to_string(),
                        });
                        break;
                    }
                    tracing::debug!(endpoint = %self.endpoint, %err, "connect failed");
                }
            }
            let delay = self.timer.next_interval();
            self.emit(TransportEvent::ConnectRetried {
                endpoint: self.endpoint.clone(),
                delay,
            });
            if !self.delay_or_stop(delay).await {
                break;
            }
        }
        self.session.detach();
    }

    /// Run the engine, racing it against the command mailbox.
    /// `None` means a stop was requested.
    ///
    /// On stop, a zero linger drops the engine along with any queued
    /// frames. Otherwise the engine is asked to drain and keeps
    /// running until its pipe closes or the linger deadline passes
    /// (`linger: None` waits indefinitely).
    async fn drive_engine(&mut self, stream: T::Stream) -> Option<EngineStatus> {
        let drain = self.session.drain_handle();
        let (reader, writer) = T::split(stream);
        let attach = self.session.attach(reader, writer).fuse();
        futures::pin_mut!(attach);
        loop {
            let cmd = self.mailbox.recv_async().fuse();
            futures::pin_mut!(cmd);
            futures::select! {
                status = attach => return Some(status),
                cmd = cmd => match cmd {
                    Ok(Command::Stop) | Err(_) => break,
                    _ => {}
                },
            }
        }
        if matches!(self.options.linger, Some(d) if d.is_zero()) {
            return None;
        }
        let _ = drain.try_send(());
        let deadline = async {
            match self.options.linger {
                Some(d) => compio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        }
        .fuse();
        futures::pin_mut!(deadline);
        futures::select! {
            _ = attach => {}
            _ = deadline => {
                tracing::debug!(endpoint = %self.endpoint, "linger deadline passed");
            }
        }
        None
    }

    /// Sleep for `delay` unless a stop arrives first.
    async fn delay_or_stop(&mut self, delay: Duration) -> bool {
        let sleep = compio::time::sleep(delay).fuse();
        futures::pin_mut!(sleep);
        loop {
            let cmd = self.mailbox.recv_async().fuse();
            futures::pin_mut!(cmd);
            futures::select! {
                _ = sleep => return true,
                cmd = cmd => match cmd {
                    Ok(Command::Stop) | Err(_) => return false,
                    _ => {}
                },
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        monitor::emit(&self.monitor, event);
    }
}
