//! I/O reactor: a fixed pool of worker threads, each running its own
//! completion-based runtime.
//!
//! Engines, listeners, and connectors are handed to a worker as a
//! closure; the closure runs on that worker's thread and typically
//! spawns a local (non-`Send`) task driving the object for its whole
//! life. An object therefore only ever executes on the thread that
//! owns it, and its callbacks never run concurrently with each other.
//!
//! Timers are cooperative sleep-tasks: they fire once into a mailbox
//! and can be canceled through a shared flag, never after their
//! [`TimerHandle`] reports canceled.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keelson_core::error::{KeelsonError, KeelsonResult};

use crate::mailbox::{Command, MailboxSender};

enum IoTask {
    Run(Box<dyn FnOnce() + Send + 'static>),
    Stop,
}

/// Handle to one reactor worker thread.
#[derive(Clone)]
pub struct IoThreadHandle {
    index: usize,
    tasks: flume::Sender<IoTask>,
    load: Arc<AtomicUsize>,
}

impl IoThreadHandle {
    /// Worker index, usable as an affinity bit position.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Long-lived objects currently owned by this worker.
    #[must_use]
    pub fn load(&self) -> usize {
        self.load.load(Ordering::Relaxed)
    }

    /// Run `f` on this worker's thread.
    ///
    /// `f` may spawn local tasks on the worker's runtime; that is how
    /// engines and accept loops come to live there.
    pub fn execute<F>(&self, f: F) -> KeelsonResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tasks
            .send(IoTask::Run(Box::new(f)))
            .map_err(|_| KeelsonError::Terminating)
    }

    /// Account a long-lived object against this worker until the
    /// returned guard is dropped. Used by [`Reactor::choose`] to place
    /// new connections on the least busy worker.
    #[must_use]
    pub fn load_guard(&self) -> LoadGuard {
        self.load.fetch_add(1, Ordering::Relaxed);
        LoadGuard {
            load: Arc::clone(&self.load),
        }
    }

    /// Arm a one-shot timer on this worker.
    ///
    /// After `delay`, `Command::TimerExpired(id)` is sent to `reply`
    /// unless the timer was canceled first. Re-arming is the caller's
    /// job.
    pub fn add_timer(
        &self,
        delay: Duration,
        id: u64,
        reply: MailboxSender,
    ) -> KeelsonResult<TimerHandle> {
        let canceled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&canceled);
        self.execute(move || {
            compio::runtime::spawn(async move {
                compio::time::sleep(delay).await;
                if !flag.load(Ordering::Acquire) {
                    let _ = reply.send(Command::TimerExpired(id));
                }
            })
            .detach();
        })?;
        Ok(TimerHandle { id, canceled })
    }
}

/// Decrements a worker's load count on drop.
pub struct LoadGuard {
    load: Arc<AtomicUsize>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.load.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Cancelation handle for a one-shot timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    canceled: Arc<AtomicBool>,
}

impl TimerHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Prevent the timer from firing. Idempotent; a timer that already
    /// fired is unaffected.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }
}

/// Fixed pool of I/O worker threads.
///
/// Dropping the reactor stops every worker; outstanding objects on a
/// worker are dropped with its runtime, so sessions must have lingered
/// and detached before shutdown for a clean close.
pub struct Reactor {
    handles: Vec<IoThreadHandle>,
    joins: Vec<std::thread::JoinHandle<()>>,
}

impl Reactor {
    /// Start `threads` workers; `0` means one per CPU.
    pub fn new(threads: usize) -> KeelsonResult<Self> {
        let count = if threads == 0 {
            num_cpus::get()
        } else {
            threads
        };
        let mut handles = Vec::with_capacity(count);
        let mut joins = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = flume::unbounded::<IoTask>();
            let join = std::thread::Builder::new()
                .name(format!("keelson-io-{index}"))
                .spawn(move || run_worker(index, &rx))?;
            handles.push(IoThreadHandle {
                index,
                tasks: tx,
                load: Arc::new(AtomicUsize::new(0)),
            });
            joins.push(join);
        }
        Ok(Self { handles, joins })
    }

    /// Number of workers.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Pick the least-loaded worker allowed by `affinity` (a bitmask
    /// over worker indices; `0` allows all).
    #[must_use]
    pub fn choose(&self, affinity: u64) -> &IoThreadHandle {
        self.handles
            .iter()
            .filter(|h| affinity == 0 || (h.index < 64 && affinity & (1 << h.index) != 0))
            .min_by_key(|h| h.load())
            .unwrap_or(&self.handles[0])
    }

    /// Worker by index.
    #[must_use]
    pub fn handle(&self, index: usize) -> &IoThreadHandle {
        &self.handles[index]
    }

    /// Stop all workers and wait for them to exit.
    pub fn shutdown(&mut self) {
        for handle in &self.handles {
            let _ = handle.tasks.send(IoTask::Stop);
        }
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(index: usize, tasks: &flume::Receiver<IoTask>) {
    let runtime = match compio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(worker = index, %err, "failed to start I/O runtime");
            return;
        }
    };
    tracing::debug!(worker = index, "I/O thread running");
    runtime.block_on(async {
        while let Ok(task) = tasks.recv_async().await {
            match task {
                IoTask::Run(f) => {
                    // One misbehaving handler must not take down the
                    // worker; it shares this thread with every other
                    // connection placed here.
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
                        tracing::error!(worker = index, "task panicked");
                    }
                }
                IoTask::Stop => break,
            }
        }
    });
    tracing::debug!(worker = index, "I/O thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::mailbox;

    #[test]
    fn executes_on_worker_thread() {
        let mut reactor = Reactor::new(2).unwrap();
        let (tx, rx) = flume::unbounded();
        reactor
            .handle(1)
            .execute(move || {
                let _ = tx.send(std::thread::current().name().map(String::from));
            })
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("keelson-io-1"));
        reactor.shutdown();
    }

    #[test]
    fn panicking_task_leaves_worker_alive() {
        let mut reactor = Reactor::new(1).unwrap();
        reactor
            .handle(0)
            .execute(|| panic!("handler bug"))
            .unwrap();
        let (tx, rx) = flume::unbounded();
        reactor
            .handle(0)
            .execute(move || {
                let _ = tx.send(());
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        reactor.shutdown();
    }

    #[test]
    fn choose_prefers_least_loaded() {
        let reactor = Reactor::new(3).unwrap();
        let _g0 = reactor.handle(0).load_guard();
        let _g1 = reactor.handle(1).load_guard();
        assert_eq!(reactor.choose(0).index(), 2);
    }

    #[test]
    fn choose_honors_affinity_mask() {
        let reactor = Reactor::new(3).unwrap();
        // Only worker 1 allowed.
        assert_eq!(reactor.choose(0b010).index(), 1);
        let _g = reactor.handle(1).load_guard();
        // Still worker 1: the mask outranks load.
        assert_eq!(reactor.choose(0b010).index(), 1);
    }

    #[test]
    fn load_guard_releases_on_drop() {
        let reactor = Reactor::new(1).unwrap();
        {
            let _guard = reactor.handle(0).load_guard();
            assert_eq!(reactor.handle(0).load(), 1);
        }
        assert_eq!(reactor.handle(0).load(), 0);
    }

    #[test]
    fn timer_fires_into_mailbox() {
        let reactor = Reactor::new(1).unwrap();
        let (tx, rx) = mailbox();
        reactor
            .handle(0)
            .add_timer(Duration::from_millis(10), 42, tx)
            .unwrap();
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Command::TimerExpired(42) => {}
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn canceled_timer_never_fires() {
        let reactor = Reactor::new(1).unwrap();
        let (tx, rx) = mailbox();
        let timer = reactor
            .handle(0)
            .add_timer(Duration::from_millis(30), 7, tx)
            .unwrap();
        timer.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
