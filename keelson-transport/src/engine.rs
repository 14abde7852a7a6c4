//! Stream engine: one connection's byte pump.
//!
//! An engine binds the two halves of a connected stream, an encoder,
//! a decoder, and the pipe toward the owning session. The read half
//! lives in a spawned read pump that drives every kernel read to
//! completion and hands filled buffers over a bounded channel; with
//! completion-based I/O a read future dropped after the kernel filled
//! its buffer would discard those bytes, so no read is ever raced
//! against anything else. The engine task itself writes, decodes, and
//! moves frames between the wire and the pipe.
//!
//! The engine is `Active` while it has outbound data and `ActiveIdle`
//! once the pipe runs dry; idle engines issue no writes and are woken
//! by pipe activity. Inbound backpressure is structural: when the pipe
//! toward the session is full the engine stops taking buffers off the
//! wire channel, the read pump stalls on the channel's capacity, and
//! TCP flow control pushes back on the peer. Read-ahead is bounded by
//! that capacity plus the one buffer in flight.
//!
//! On exit the engine hands its pipe back to the caller: the session
//! keeps the pipe across reconnects and only the engine is replaced.

use bytes::Bytes;
use compio::buf::{BufResult, IntoInner, IoBuf};
use compio::io::{AsyncRead, AsyncWrite};
use compio::runtime::Task;
use futures::FutureExt;

use keelson_core::error::{KeelsonError, KeelsonResult};
use keelson_core::options::SocketOptions;
use keelson_core::pipe::Pipe;

use crate::codec::{FrameDecoder, FrameEncoder};

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    /// Outbound data pending or in flight.
    Active,
    /// Nothing to send; waiting on the wire or the pipe.
    ActiveIdle,
}

/// Why an engine stopped.
#[derive(Debug)]
pub enum EngineStatus {
    /// The connection failed; a connector-owned session may reconnect.
    Error(KeelsonError),
    /// The pipe terminated; this is a clean local shutdown.
    Terminated,
}

/// Per-connection byte pump between a stream and a session pipe.
///
/// Generic only over the write half; the read half is consumed by the
/// spawned read pump.
pub struct StreamEngine<W>
where
    W: AsyncWrite + Unpin,
{
    writer: W,
    pipe: Pipe,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    state: EngineState,
    write_buffer_size: usize,
    /// Buffers read off the socket; an empty buffer marks EOF.
    wire: flume::Receiver<std::io::Result<Bytes>>,
    /// A signal here asks the engine to flush queued outbound frames
    /// and close its pipe. The caller bounds the drain with its own
    /// linger deadline.
    drain: flume::Receiver<()>,
    /// Cancels the read pump when the engine goes away.
    _read_pump: Task<()>,
}

impl<W> StreamEngine<W>
where
    W: AsyncWrite + Unpin,
{
    /// Bind the halves of a connected stream to `pipe`. The codec is
    /// configured from `options` (endianness, maximum frame size,
    /// buffer sizes). Must be called on a runtime thread; the read
    /// pump is spawned onto it.
    #[must_use]
    pub fn new<R>(
        reader: R,
        writer: W,
        pipe: Pipe,
        options: &SocketOptions,
        drain: flume::Receiver<()>,
    ) -> Self
    where
        R: AsyncRead + Unpin + 'static,
    {
        let (wire_tx, wire_rx) = flume::bounded(1);
        let read_pump =
            compio::runtime::spawn(read_pump(reader, wire_tx, options.read_buffer_size));
        Self {
            writer,
            pipe,
            encoder: FrameEncoder::new(options.endian),
            decoder: FrameDecoder::new(options.endian, options.max_msg_size),
            state: EngineState::ActiveIdle,
            write_buffer_size: options.write_buffer_size,
            wire: wire_rx,
            drain,
            _read_pump: read_pump,
        }
    }

    /// Drive the connection until it fails or the pipe terminates.
    ///
    /// Returns the pipe so the owning session can carry it into a
    /// replacement engine.
    pub async fn run(mut self) -> (Pipe, EngineStatus) {
        let status = self.pump().await;
        tracing::debug!(pipe = self.pipe.id(), ?status, "engine stopped");
        (self.pipe, status)
    }

    async fn pump(&mut self) -> EngineStatus {
        loop {
            // Frames decoded earlier but held back by a full pipe.
            if let Err(status) = self.deliver_inbound() {
                return status;
            }

            match self.fill_send_buffer() {
                Ok(out) if !out.is_empty() => {
                    if self.state != EngineState::Active {
                        self.state = EngineState::Active;
                        tracing::trace!(pipe = self.pipe.id(), "engine active");
                    }
                    if let Err(err) = self.send_all(out).await {
                        return EngineStatus::Error(err);
                    }
                    continue;
                }
                Ok(_) => {
                    if self.state != EngineState::ActiveIdle {
                        self.state = EngineState::ActiveIdle;
                        tracing::trace!(pipe = self.pipe.id(), "engine idle");
                    }
                }
                Err(status) => return status,
            }

            if !self.pipe.check_write() {
                if self.pipe.is_terminated() {
                    return EngineStatus::Terminated;
                }
                // Inbound side is full (or the pipe is winding down):
                // leave wire buffers in the channel so the read pump
                // stalls and the session drains at its own pace.
                self.pipe.wait().await;
                continue;
            }

            enum Step {
                Wire(std::io::Result<Bytes>),
                Pipe,
                Drain,
            }
            let step = {
                let wire = self.wire.recv_async().fuse();
                let wake = self.pipe.wait().fuse();
                let drain = self.drain.recv_async().fuse();
                futures::pin_mut!(wire, wake, drain);
                futures::select! {
                    r = wire => Step::Wire(r.unwrap_or_else(|_| Ok(Bytes::new()))),
                    _ = wake => Step::Pipe,
                    _ = drain => Step::Drain,
                }
            };
            match step {
                Step::Wire(Ok(data)) if data.is_empty() => {
                    return EngineStatus::Error(KeelsonError::ConnectionLost(
                        "peer closed the connection".to_string(),
                    ));
                }
                Step::Wire(Ok(data)) => self.decoder.push(data),
                Step::Wire(Err(err)) => {
                    return EngineStatus::Error(err.into());
                }
                Step::Pipe => {}
                Step::Drain => {
                    // Ship what the session already queued, then run
                    // the termination handshake.
                    self.pipe.terminate(true);
                }
            }
        }
    }

    /// Move decoded frames into the pipe, one flush per batch. Stops
    /// early when the pipe fills, leaving the rest in the decoder.
    fn deliver_inbound(&mut self) -> Result<(), EngineStatus> {
        let mut wrote = false;
        let result = loop {
            if !self.pipe.check_write() {
                break Ok(());
            }
            match self.decoder.next() {
                Ok(Some(msg)) => {
                    if self.pipe.write(msg).is_err() {
                        break if self.pipe.is_terminated() {
                            Err(EngineStatus::Terminated)
                        } else {
                            Ok(())
                        };
                    }
                    wrote = true;
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(EngineStatus::Error(err)),
            }
        };
        if wrote {
            self.pipe.flush();
        }
        result
    }

    /// Pull frames from the pipe and encode them back-to-back, up to
    /// one send buffer's worth.
    fn fill_send_buffer(&mut self) -> Result<Vec<u8>, EngineStatus> {
        let mut out = Vec::new();
        loop {
            if out.len() >= self.write_buffer_size {
                return Ok(out);
            }
            match self.pipe.read() {
                Ok(msg) => self.encoder.encode(&msg, &mut out),
                Err(KeelsonError::PipeEmpty) => return Ok(out),
                Err(_) => {
                    return if out.is_empty() {
                        Err(EngineStatus::Terminated)
                    } else {
                        // Ship what was already pulled first.
                        Ok(out)
                    };
                }
            }
        }
    }

    async fn send_all(&mut self, buf: Vec<u8>) -> KeelsonResult<()> {
        let len = buf.len();
        let mut buf = buf;
        let mut written = 0;
        while written < len {
            let BufResult(result, slice) =
                AsyncWrite::write(&mut self.writer, buf.slice(written..)).await;
            buf = slice.into_inner();
            match result {
                Ok(0) => {
                    return Err(KeelsonError::ConnectionLost(
                        "peer closed the connection".to_string(),
                    ));
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

/// Owns the read half of a connection. Every issued read is awaited
/// to completion before anything else happens, so a buffer the kernel
/// already filled is never dropped. Delivery blocks on the bounded
/// channel, which is what throttles reading when the engine falls
/// behind. An empty buffer marks EOF.
async fn read_pump<R>(
    mut reader: R,
    wire: flume::Sender<std::io::Result<Bytes>>,
    buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let buf = Vec::with_capacity(buffer_size);
        let BufResult(result, buf) = AsyncRead::read(&mut reader, buf).await;
        match result {
            Ok(0) => {
                let _ = wire.send_async(Ok(Bytes::new())).await;
                return;
            }
            Ok(_) => {
                if wire.send_async(Ok(Bytes::from(buf))).await.is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                let _ = wire.send_async(Err(err)).await;
                return;
            }
        }
    }
}
