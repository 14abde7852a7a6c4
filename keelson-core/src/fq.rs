//! Fair-queue inbound dispatch.
//!
//! Round-robins reads across attached pipes, resuming just past the
//! last pipe that produced a complete message so no pipe is starved.
//! While a multi-frame message is in flight the queue sticks to its
//! pipe; frames of different logical messages are never interleaved.

use hashbrown::HashMap;

use crate::error::{KeelsonError, KeelsonResult};
use crate::msg::Msg;
use crate::pipe::{Pipe, PipeId};

/// Round-robin reader over a set of inbound pipes.
///
/// The pipes themselves are owned by the caller (keyed by [`PipeId`]);
/// the fair queue only tracks attachment order and its cursor.
#[derive(Debug, Default)]
pub struct FairQueue {
    order: Vec<PipeId>,
    current: usize,
    more: bool,
}

impl FairQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attached pipes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Attach a pipe at the back of the rotation.
    pub fn attach(&mut self, id: PipeId) {
        self.order.push(id);
    }

    /// Detach a pipe, keeping the cursor on the same neighbor.
    ///
    /// Removing the pipe a multi-frame message is in flight on
    /// abandons that message; the next read starts a fresh one rather
    /// than pulling continuation frames from a neighbor.
    pub fn remove(&mut self, id: PipeId) {
        if let Some(pos) = self.order.iter().position(|&p| p == id) {
            if self.more && pos == self.current {
                self.more = false;
            }
            self.order.remove(pos);
            if pos < self.current {
                self.current -= 1;
            }
            if self.current >= self.order.len() {
                self.current = 0;
            }
        }
    }

    /// Read the next frame, visiting pipes round-robin.
    ///
    /// Returns [`KeelsonError::PipeEmpty`] when no attached pipe has a
    /// flushed frame. Pipes found terminated are detached along the
    /// way; a pipe terminating mid-message surfaces as
    /// [`KeelsonError::PipeTerminated`] so the caller can discard the
    /// truncated message.
    pub fn recv(&mut self, pipes: &mut HashMap<PipeId, Pipe>) -> KeelsonResult<Msg> {
        if self.more {
            return self.recv_continuation(pipes);
        }
        let mut remaining = self.order.len();
        while remaining > 0 {
            let id = self.order[self.current];
            let result = match pipes.get_mut(&id) {
                Some(pipe) => pipe.read(),
                None => Err(KeelsonError::PipeTerminated),
            };
            match result {
                Ok(msg) => {
                    self.more = msg.more();
                    if !self.more {
                        self.advance();
                    }
                    return Ok(msg);
                }
                Err(KeelsonError::PipeEmpty) => {
                    self.advance();
                    remaining -= 1;
                }
                Err(KeelsonError::PipeTerminated) => {
                    self.remove(id);
                    pipes.remove(&id);
                    remaining = remaining.saturating_sub(1);
                }
                Err(err) => return Err(err),
            }
        }
        Err(KeelsonError::PipeEmpty)
    }

    /// Whether any attached pipe has a frame ready.
    pub fn has_in(&mut self, pipes: &mut HashMap<PipeId, Pipe>) -> bool {
        if self.more {
            return true;
        }
        self.order.iter().any(|id| {
            pipes
                .get_mut(id)
                .map(Pipe::check_read)
                .unwrap_or(false)
        })
    }

    fn recv_continuation(&mut self, pipes: &mut HashMap<PipeId, Pipe>) -> KeelsonResult<Msg> {
        let id = self.order[self.current];
        let result = match pipes.get_mut(&id) {
            Some(pipe) => pipe.read(),
            None => Err(KeelsonError::PipeTerminated),
        };
        match result {
            Ok(msg) => {
                self.more = msg.more();
                if !self.more {
                    self.advance();
                }
                Ok(msg)
            }
            Err(KeelsonError::PipeEmpty) => Err(KeelsonError::PipeEmpty),
            Err(err) => {
                // Pipe died mid-message; the partial message is lost.
                self.more = false;
                self.remove(id);
                pipes.remove(&id);
                Err(err)
            }
        }
    }

    fn advance(&mut self) {
        if !self.order.is_empty() {
            self.current = (self.current + 1) % self.order.len();
        } else {
            self.current = 0;
        }
    }
}
