//! Bounded SPSC message pipes with backpressure and two-phase teardown.
//!
//! A [`Pipe`] is one endpoint of a bidirectional link between two core
//! objects, usually living on different threads. Each direction is a
//! single-producer/single-consumer queue:
//!
//! - Writes land in a writer-local buffer and become visible to the
//!   reader only at [`Pipe::flush`], which publishes the whole buffered
//!   batch atomically. The reader can never observe a partial batch.
//! - Capacity is counter-based: the writer tracks frames written minus
//!   frames the peer has reported read. At the high-water mark writes
//!   fail; the reader reports progress every low-water-mark frames, so
//!   resumption is edge-triggered rather than polled.
//! - Teardown is a two-phase handshake (`PipeTerm` request,
//!   `PipeTermAck` reply). Neither side treats the pipe as dead until
//!   its half of the handshake has completed, so no frame is observed
//!   after termination.
//!
//! Control traffic (activation, termination) travels on a dedicated
//! channel beside the data channel and is absorbed by every public
//! operation before it acts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;

use crate::error::{KeelsonError, KeelsonResult};
use crate::msg::Msg;
use crate::options::compute_lwm;

/// Unique pipe endpoint identifier, used for logging and socket-layer
/// bookkeeping.
pub type PipeId = u64;

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(1);

/// Termination phase of a pipe endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    /// Normal operation.
    Active,
    /// Local terminate with `delay` requested; still draining inbound
    /// frames before the handshake starts.
    Draining,
    /// `PipeTerm` sent, waiting for the peer's reply.
    TermRequested,
    /// Handshake complete (or peer vanished). All operations fail.
    Terminated,
}

/// Control messages exchanged between the two endpoints of a pipe.
#[derive(Debug, Clone, Copy)]
enum Ctrl {
    /// The sender has read this many frames in total; unblocks the
    /// receiver's write side.
    ActivateWrite(u64),
    /// Termination request.
    PipeTerm,
    /// Termination acknowledgement.
    PipeTermAck,
}

/// Callbacks a pipe delivers into its owning socket-pattern object.
///
/// Invoked from [`Pipe::process_control`], always on the owner's
/// thread. Each callback reports an edge, not a level: it fires once
/// per transition, so the owner reacts instead of polling.
pub trait PipeEvents {
    /// Frames became readable on a previously empty pipe.
    fn read_activated(&mut self, pipe: PipeId);
    /// The peer drained below the low-water mark; writes resume.
    fn write_activated(&mut self, pipe: PipeId);
    /// The termination handshake completed; detach the pipe.
    fn pipe_terminated(&mut self, pipe: PipeId);
}

/// One endpoint of a bidirectional SPSC pipe.
///
/// Created in pairs by [`pipe_pair`]; each endpoint must only ever be
/// used from one thread at a time (move it, do not share it).
pub struct Pipe {
    id: PipeId,
    state: PipeState,

    data_tx: flume::Sender<Vec<Msg>>,
    ctrl_tx: flume::Sender<Ctrl>,
    data_rx: flume::Receiver<Vec<Msg>>,
    ctrl_rx: flume::Receiver<Ctrl>,

    // Write side.
    unflushed: Vec<Msg>,
    msgs_written: u64,
    peers_msgs_read: u64,
    out_hwm: usize,
    out_more: bool,

    // Read side.
    pending: VecDeque<Msg>,
    msgs_read: u64,
    in_lwm: usize,
}

/// Create a connected pair of pipe endpoints.
///
/// `hwm_a_to_b` bounds frames flowing from the first endpoint to the
/// second; `hwm_b_to_a` bounds the reverse direction. `0` means
/// unbounded.
#[must_use]
pub fn pipe_pair(hwm_a_to_b: usize, hwm_b_to_a: usize) -> (Pipe, Pipe) {
    let (data_ab_tx, data_ab_rx) = flume::unbounded();
    let (data_ba_tx, data_ba_rx) = flume::unbounded();
    let (ctrl_ab_tx, ctrl_ab_rx) = flume::unbounded();
    let (ctrl_ba_tx, ctrl_ba_rx) = flume::unbounded();

    let a = Pipe {
        id: NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed),
        state: PipeState::Active,
        data_tx: data_ab_tx,
        ctrl_tx: ctrl_ab_tx,
        data_rx: data_ba_rx,
        ctrl_rx: ctrl_ba_rx,
        unflushed: Vec::new(),
        msgs_written: 0,
        peers_msgs_read: 0,
        out_hwm: hwm_a_to_b,
        out_more: false,
        pending: VecDeque::new(),
        msgs_read: 0,
        in_lwm: compute_lwm(hwm_b_to_a),
    };
    let b = Pipe {
        id: NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed),
        state: PipeState::Active,
        data_tx: data_ba_tx,
        ctrl_tx: ctrl_ba_tx,
        data_rx: data_ab_rx,
        ctrl_rx: ctrl_ab_rx,
        unflushed: Vec::new(),
        msgs_written: 0,
        peers_msgs_read: 0,
        out_hwm: hwm_b_to_a,
        out_more: false,
        pending: VecDeque::new(),
        msgs_read: 0,
        in_lwm: compute_lwm(hwm_a_to_b),
    };
    (a, b)
}

impl Pipe {
    /// Endpoint identifier.
    #[must_use]
    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Current termination phase, after absorbing any pending control
    /// traffic from the peer.
    pub fn state(&mut self) -> PipeState {
        self.process_ctrl();
        self.state
    }

    /// Whether the termination handshake has completed on this side.
    pub fn is_terminated(&mut self) -> bool {
        self.state() == PipeState::Terminated
    }

    /// Whether a write would currently be accepted.
    pub fn check_write(&mut self) -> bool {
        self.process_ctrl();
        if self.state != PipeState::Active {
            return false;
        }
        // A started multi-frame message always completes; interleaving
        // a partial message with a capacity failure would corrupt the
        // stream for the reader.
        if self.out_more {
            return true;
        }
        !self.is_full()
    }

    /// Append a frame to the write side.
    ///
    /// On failure the frame is handed back untouched so the caller can
    /// buffer or drop it per its own semantics. Written frames are not
    /// visible to the reader until [`Pipe::flush`].
    pub fn write(&mut self, msg: Msg) -> Result<(), Msg> {
        if !self.check_write() {
            return Err(msg);
        }
        self.out_more = msg.more();
        self.msgs_written += 1;
        self.unflushed.push(msg);
        Ok(())
    }

    /// Publish all written-but-unflushed frames to the reader as one
    /// atomic batch.
    pub fn flush(&mut self) {
        if self.unflushed.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.unflushed);
        if self.state == PipeState::Active || self.state == PipeState::Draining {
            // A closed receiver means the peer endpoint is gone; the
            // control channel will report the same thing shortly.
            let _ = self.data_tx.send(batch);
        }
    }

    /// Whether a read would currently yield a frame.
    pub fn check_read(&mut self) -> bool {
        self.process_ctrl();
        if self.state == PipeState::Terminated {
            return false;
        }
        !self.pending.is_empty() || !self.data_rx.is_empty()
    }

    /// Take the next flushed frame, in FIFO order.
    ///
    /// Returns [`KeelsonError::PipeEmpty`] when no flushed frame is
    /// available and [`KeelsonError::PipeTerminated`] once the teardown
    /// handshake has completed.
    pub fn read(&mut self) -> KeelsonResult<Msg> {
        self.process_ctrl();
        if self.state == PipeState::Terminated {
            return Err(KeelsonError::PipeTerminated);
        }
        self.refill();
        match self.pending.pop_front() {
            Some(msg) => {
                self.msgs_read += 1;
                if self.in_lwm > 0 && self.msgs_read % self.in_lwm as u64 == 0 {
                    let _ = self.ctrl_tx.send(Ctrl::ActivateWrite(self.msgs_read));
                }
                Ok(msg)
            }
            None => {
                if self.state == PipeState::Draining {
                    // Deferred terminate: inbound is now drained.
                    self.start_handshake();
                }
                Err(KeelsonError::PipeEmpty)
            }
        }
    }

    /// Begin teardown of this endpoint.
    ///
    /// With `delay` set, teardown waits until every already-flushed
    /// inbound frame has been read; otherwise the handshake starts
    /// immediately and undelivered frames are discarded. Idempotent.
    pub fn terminate(&mut self, delay: bool) {
        self.process_ctrl();
        if self.state != PipeState::Active {
            return;
        }
        self.flush();
        if delay && (!self.pending.is_empty() || !self.data_rx.is_empty()) {
            tracing::trace!(pipe = self.id, "terminate deferred until drained");
            self.state = PipeState::Draining;
        } else {
            self.start_handshake();
        }
    }

    /// Wait until a read would make progress, the write side is
    /// reactivated, or the pipe terminates.
    ///
    /// Returns immediately when a flushed frame is already pending.
    pub async fn wait(&mut self) {
        self.process_ctrl();
        if self.state == PipeState::Terminated || !self.pending.is_empty() {
            return;
        }
        enum Wakeup {
            Data(Vec<Msg>),
            Ctrl(Ctrl),
            PeerGone,
        }
        let wake = {
            let data = self.data_rx.recv_async().fuse();
            let ctrl = self.ctrl_rx.recv_async().fuse();
            futures::pin_mut!(data, ctrl);
            futures::select! {
                batch = data => batch.map_or(Wakeup::PeerGone, Wakeup::Data),
                cmd = ctrl => cmd.map_or(Wakeup::PeerGone, Wakeup::Ctrl),
            }
        };
        match wake {
            Wakeup::Data(batch) => self.pending.extend(batch),
            Wakeup::Ctrl(cmd) => self.handle_ctrl(cmd),
            Wakeup::PeerGone => self.state = PipeState::Terminated,
        }
    }

    /// Absorb pending control and data traffic, reporting state edges
    /// to the owning pattern object.
    pub fn process_control(&mut self, events: &mut dyn PipeEvents) {
        let was_blocked = self.state == PipeState::Active && self.is_full() && !self.out_more;
        let was_readable = !self.pending.is_empty();
        let was_terminated = self.state == PipeState::Terminated;

        self.process_ctrl();
        if self.state == PipeState::Terminated {
            if !was_terminated {
                events.pipe_terminated(self.id);
            }
            return;
        }
        self.refill();

        if was_blocked && !self.is_full() {
            events.write_activated(self.id);
        }
        if !was_readable && !self.pending.is_empty() {
            events.read_activated(self.id);
        }
    }

    fn is_full(&self) -> bool {
        self.out_hwm > 0 && self.msgs_written - self.peers_msgs_read >= self.out_hwm as u64
    }

    fn refill(&mut self) {
        while let Ok(batch) = self.data_rx.try_recv() {
            self.pending.extend(batch);
        }
    }

    fn start_handshake(&mut self) {
        tracing::trace!(pipe = self.id, "sending termination request");
        if self.ctrl_tx.send(Ctrl::PipeTerm).is_err() {
            // Peer endpoint already dropped.
            self.state = PipeState::Terminated;
            self.pending.clear();
        } else {
            self.state = PipeState::TermRequested;
        }
    }

    fn process_ctrl(&mut self) {
        while let Ok(cmd) = self.ctrl_rx.try_recv() {
            self.handle_ctrl(cmd);
        }
        if self.state != PipeState::Terminated && self.ctrl_rx.is_disconnected() {
            self.state = PipeState::Terminated;
            self.pending.clear();
        }
    }

    fn handle_ctrl(&mut self, cmd: Ctrl) {
        match cmd {
            Ctrl::ActivateWrite(read) => {
                self.peers_msgs_read = self.peers_msgs_read.max(read);
            }
            Ctrl::PipeTerm => {
                // Reply even if we initiated our own handshake; the
                // peer completes on whichever of our messages it sees
                // first.
                let _ = self.ctrl_tx.send(Ctrl::PipeTermAck);
                tracing::trace!(pipe = self.id, "terminated by peer request");
                self.state = PipeState::Terminated;
                self.pending.clear();
            }
            Ctrl::PipeTermAck => {
                tracing::trace!(pipe = self.id, "termination acknowledged");
                self.state = PipeState::Terminated;
                self.pending.clear();
            }
        }
    }
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("written", &self.msgs_written)
            .field("read", &self.msgs_read)
            .finish()
    }
}
