//! Load-balanced outbound dispatch.
//!
//! Round-robins complete logical messages across attached pipes,
//! skipping any pipe that is currently backpressured. A multi-frame
//! message goes to a single pipe in its entirety and is flushed as one
//! batch on its final frame.

use hashbrown::HashMap;

use crate::msg::Msg;
use crate::pipe::{Pipe, PipeId};

/// Round-robin writer over a set of outbound pipes.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    order: Vec<PipeId>,
    current: usize,
    more: bool,
}

impl LoadBalancer {
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
    /// abandons that message; leftover continuation frames are
    /// treated as the start of a new one rather than retargeted at a
    /// neighbor.
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

    /// Send a frame to the next writable pipe.
    ///
    /// When every attached pipe is backpressured (or none is attached)
    /// the frame is handed back so the caller can apply its own
    /// would-block semantics. Continuation frames of an in-flight
    /// multi-frame message always go to the pipe the message started
    /// on; a pipe accepts them even past its high-water mark.
    pub fn send(&mut self, pipes: &mut HashMap<PipeId, Pipe>, msg: Msg) -> Result<(), Msg> {
        if self.more {
            return self.send_continuation(pipes, msg);
        }
        let mut remaining = self.order.len();
        while remaining > 0 {
            let id = self.order[self.current];
            // None = gone, remove; Some(false) = backpressured, skip.
            let writable = pipes.get_mut(&id).and_then(|pipe| {
                if pipe.is_terminated() {
                    None
                } else {
                    Some(pipe.check_write())
                }
            });
            match writable {
                Some(true) => return self.write_to(pipes, id, msg),
                Some(false) => {
                    self.advance();
                    remaining -= 1;
                }
                None => {
                    self.remove(id);
                    pipes.remove(&id);
                    remaining = remaining.saturating_sub(1);
                }
            }
        }
        Err(msg)
    }

    /// Whether at least one attached pipe would accept a frame.
    pub fn has_out(&mut self, pipes: &mut HashMap<PipeId, Pipe>) -> bool {
        if self.more {
            return true;
        }
        self.order.iter().any(|id| {
            pipes
                .get_mut(id)
                .map(Pipe::check_write)
                .unwrap_or(false)
        })
    }

    fn send_continuation(
        &mut self,
        pipes: &mut HashMap<PipeId, Pipe>,
        msg: Msg,
    ) -> Result<(), Msg> {
        let id = self.order[self.current];
        let alive = pipes
            .get_mut(&id)
            .is_some_and(|pipe| !pipe.is_terminated());
        if alive {
            self.write_to(pipes, id, msg)
        } else {
            // The pipe died under an unfinished message; drop the
            // rest of it.
            self.more = false;
            self.remove(id);
            pipes.remove(&id);
            Err(msg)
        }
    }

    fn write_to(
        &mut self,
        pipes: &mut HashMap<PipeId, Pipe>,
        id: PipeId,
        msg: Msg,
    ) -> Result<(), Msg> {
        let last = !msg.more();
        let pipe = match pipes.get_mut(&id) {
            Some(pipe) => pipe,
            None => return Err(msg),
        };
        pipe.write(msg)?;
        self.more = !last;
        if last {
            // Whole logical message published at once.
            pipe.flush();
            self.advance();
        }
        Ok(())
    }

    fn advance(&mut self) {
        if !self.order.is_empty() {
            self.current = (self.current + 1) % self.order.len();
        } else {
            self.current = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe_pair;
    use bytes::Bytes;

    fn frame(payload: &'static [u8], more: bool) -> Msg {
        let mut msg = Msg::from_bytes(Bytes::from_static(payload));
        msg.set_more(more);
        msg
    }

    fn attach_pair(
        lb: &mut LoadBalancer,
        pipes: &mut HashMap<PipeId, Pipe>,
        hwm: usize,
    ) -> Pipe {
        let (local, remote) = pipe_pair(hwm, 0);
        lb.attach(local.id());
        pipes.insert(local.id(), local);
        remote
    }

    #[test]
    fn alternates_between_pipes() {
        let mut lb = LoadBalancer::new();
        let mut pipes = HashMap::new();
        let mut r0 = attach_pair(&mut lb, &mut pipes, 0);
        let mut r1 = attach_pair(&mut lb, &mut pipes, 0);

        for _ in 0..2 {
            lb.send(&mut pipes, frame(b"m", false)).unwrap();
        }
        assert_eq!(r0.read().unwrap().data(), b"m");
        assert_eq!(r1.read().unwrap().data(), b"m");
    }

    #[test]
    fn skips_backpressured_pipe() {
        let mut lb = LoadBalancer::new();
        let mut pipes = HashMap::new();
        let _r0 = attach_pair(&mut lb, &mut pipes, 1);
        let mut r1 = attach_pair(&mut lb, &mut pipes, 0);

        // Fills pipe 0 (HWM 1), so the next two land on pipe 1.
        lb.send(&mut pipes, frame(b"a", false)).unwrap();
        lb.send(&mut pipes, frame(b"b", false)).unwrap();
        lb.send(&mut pipes, frame(b"c", false)).unwrap();

        assert_eq!(r1.read().unwrap().data(), b"b");
        assert_eq!(r1.read().unwrap().data(), b"c");
    }

    #[test]
    fn would_block_when_all_full() {
        let mut lb = LoadBalancer::new();
        let mut pipes = HashMap::new();
        let _r0 = attach_pair(&mut lb, &mut pipes, 1);

        lb.send(&mut pipes, frame(b"a", false)).unwrap();
        assert!(!lb.has_out(&mut pipes));
        assert!(lb.send(&mut pipes, frame(b"b", false)).is_err());
    }

    #[test]
    fn multipart_stays_on_one_pipe() {
        let mut lb = LoadBalancer::new();
        let mut pipes = HashMap::new();
        let mut r0 = attach_pair(&mut lb, &mut pipes, 0);
        let mut r1 = attach_pair(&mut lb, &mut pipes, 0);

        lb.send(&mut pipes, frame(b"x1", true)).unwrap();
        lb.send(&mut pipes, frame(b"x2", false)).unwrap();
        lb.send(&mut pipes, frame(b"y", false)).unwrap();

        assert_eq!(r0.read().unwrap().data(), b"x1");
        assert_eq!(r0.read().unwrap().data(), b"x2");
        assert_eq!(r1.read().unwrap().data(), b"y");
    }

    #[test]
    fn removing_mid_message_pipe_abandons_the_message() {
        let mut lb = LoadBalancer::new();
        let mut pipes = HashMap::new();
        let (local, mut r0) = pipe_pair(0, 0);
        let id0 = local.id();
        lb.attach(id0);
        pipes.insert(id0, local);
        let mut r1 = attach_pair(&mut lb, &mut pipes, 0);

        lb.send(&mut pipes, frame(b"x1", true)).unwrap();

        // Owner drops the in-flight pipe between frames.
        lb.remove(id0);
        pipes.remove(&id0);

        // The next frame starts a fresh message on the survivor
        // instead of being retargeted as a continuation.
        lb.send(&mut pipes, frame(b"y", false)).unwrap();
        assert_eq!(r1.read().unwrap().data(), b"y");
        assert!(r0.read().is_err());
    }

    #[test]
    fn removing_the_last_mid_message_pipe_hands_frames_back() {
        let mut lb = LoadBalancer::new();
        let mut pipes = HashMap::new();
        let (local, _r0) = pipe_pair(0, 0);
        let id0 = local.id();
        lb.attach(id0);
        pipes.insert(id0, local);

        lb.send(&mut pipes, frame(b"x1", true)).unwrap();
        lb.remove(id0);
        pipes.remove(&id0);

        assert!(lb.send(&mut pipes, frame(b"x2", false)).is_err());
    }

    #[test]
    fn no_pipes_would_block() {
        let mut lb = LoadBalancer::new();
        let mut pipes = HashMap::new();
        assert!(!lb.has_out(&mut pipes));
        assert!(lb.send(&mut pipes, frame(b"m", false)).is_err());
    }
}
