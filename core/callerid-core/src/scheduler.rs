//! Deferred, cancellable task execution on a single owning thread.
//!
//! The overlay window may only be touched from one thread, and the two timed
//! behaviors (the ring debounce and the lookup retry) must never block. Both
//! needs are served by [`Scheduler`]: `post` hands a task to the owning
//! thread, `post_delayed` does the same after a delay and returns a
//! [`TaskHandle`] that can cancel it.
//!
//! [`Looper`] is the production implementation: one named thread fed by a
//! channel, with delayed tasks kept in a due-time heap and awaited via
//! `recv_deadline`.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{CallerIdError, Result};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Millisecond time source. Only differences between readings are meaningful.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Cancellation token for a scheduled task.
///
/// Cancelling is idempotent; a cancelled task never runs, even if already due.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}

pub trait Scheduler: Send + Sync {
    /// Runs `task` on the owning thread as soon as possible.
    fn post(&self, task: Task);

    /// Runs `task` on the owning thread after `delay`, unless cancelled first.
    fn post_delayed(&self, delay: Duration, task: Task) -> TaskHandle;
}

/// Runs a task, containing any panic so the owning thread survives it.
pub(crate) fn run_guarded(task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!("Scheduled task panicked; continuing");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Looper
// ─────────────────────────────────────────────────────────────────────────────

enum Message {
    Run(Task),
    Delayed(Delayed),
    Quit,
}

struct Delayed {
    due: Instant,
    seq: u64,
    handle: TaskHandle,
    task: Task,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Single-threaded task loop, the owner of all overlay mutations.
pub struct Looper {
    sender: Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    seq: AtomicU64,
}

impl Looper {
    pub fn start(name: &str) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(receiver))
            .map_err(|source| CallerIdError::Io {
                context: format!("Failed to spawn {} thread", name),
                source,
            })?;
        let thread_id = handle.thread().id();

        tracing::debug!(thread = name, "Looper started");
        Ok(Self {
            sender,
            thread: Mutex::new(Some(handle)),
            thread_id,
            seq: AtomicU64::new(0),
        })
    }

    /// True when called from the looper's own thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stops the loop. Pending delayed tasks are dropped without running.
    pub fn quit(&self) {
        let _ = self.sender.send(Message::Quit);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            // Joining from inside a task would wait on ourselves.
            if !self.is_current() && handle.join().is_err() {
                tracing::warn!("Looper thread exited with a panic");
            }
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

impl Scheduler for Looper {
    fn post(&self, task: Task) {
        if self.sender.send(Message::Run(task)).is_err() {
            tracing::debug!("Looper stopped; dropping posted task");
        }
    }

    fn post_delayed(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let delayed = Delayed {
            due: Instant::now() + delay,
            seq: self.next_seq(),
            handle: handle.clone(),
            task,
        };
        if self.sender.send(Message::Delayed(delayed)).is_err() {
            tracing::debug!("Looper stopped; dropping delayed task");
            handle.cancel();
        }
        handle
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        self.quit();
    }
}

fn run_loop(receiver: Receiver<Message>) {
    let mut delayed: BinaryHeap<Reverse<Delayed>> = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while delayed
            .peek()
            .map(|Reverse(next)| next.due <= now)
            .unwrap_or(false)
        {
            if let Some(Reverse(next)) = delayed.pop() {
                if !next.handle.is_cancelled() {
                    run_guarded(next.task);
                }
            }
        }

        let message = match delayed.peek() {
            Some(Reverse(next)) => match receiver.recv_deadline(next.due) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            Message::Run(task) => run_guarded(task),
            Message::Delayed(task) => delayed.push(Reverse(task)),
            Message::Quit => break,
        }
    }

    tracing::debug!(dropped = delayed.len(), "Looper stopped");
}
