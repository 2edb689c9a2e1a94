//! Deterministic fakes for exercising the engine without a host.
//!
//! Enabled for unit tests and, through the `test-helpers` feature, for
//! integration tests. Time only moves when a test calls
//! [`ManualScheduler::advance`].

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use callerid_protocol::{Request, Response};

use crate::directory::{DirectorySink, PublishReport};
use crate::lookup::{LookupTransport, Reply};
use crate::overlay::{OverlayHost, WindowSpec};
use crate::scheduler::{Clock, Scheduler, Task, TaskHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─────────────────────────────────────────────────────────────────────────────
// Time
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now_ms(&self) -> u64 {
        self.now.load(AtomicOrdering::SeqCst)
    }

    pub fn set_ms(&self, now: u64) {
        self.now.store(now, AtomicOrdering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        ManualClock::now_ms(self)
    }
}

struct Pending {
    due: u64,
    seq: u64,
    handle: TaskHandle,
    task: Task,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Scheduler driven by a [`ManualClock`]. Tasks run on the calling thread
/// during [`advance`](ManualScheduler::advance), in due-time then post order.
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    queue: Mutex<BinaryHeap<Reverse<Pending>>>,
    seq: AtomicU64,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        })
    }

    /// Number of queued tasks that have not been cancelled.
    pub fn pending(&self) -> usize {
        lock(&self.queue)
            .iter()
            .filter(|Reverse(entry)| !entry.handle.is_cancelled())
            .count()
    }

    /// Runs everything already due, including tasks those tasks post.
    pub fn run_pending(&self) {
        self.advance(Duration::ZERO);
    }

    /// Moves time forward by `by`, running each task as its due time is reached.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now_ms() + by.as_millis() as u64;

        loop {
            let next = {
                let mut queue = lock(&self.queue);
                match queue.peek() {
                    Some(Reverse(entry)) if entry.due <= target => queue.pop(),
                    _ => None,
                }
            };
            let Some(Reverse(entry)) = next else {
                break;
            };

            if entry.due > self.clock.now_ms() {
                self.clock.set_ms(entry.due);
            }
            if !entry.handle.is_cancelled() {
                (entry.task)();
            }
        }

        self.clock.set_ms(target);
    }

    fn enqueue(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let entry = Pending {
            due: self.clock.now_ms() + delay.as_millis() as u64,
            seq: self.seq.fetch_add(1, AtomicOrdering::SeqCst),
            handle: handle.clone(),
            task,
        };
        lock(&self.queue).push(Reverse(entry));
        handle
    }
}

impl Scheduler for ManualScheduler {
    fn post(&self, task: Task) {
        self.enqueue(Duration::ZERO, task);
    }

    fn post_delayed(&self, delay: Duration, task: Task) -> TaskHandle {
        self.enqueue(delay, task)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lookup
// ─────────────────────────────────────────────────────────────────────────────

/// Answers each request inline from a script; the last response repeats.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Response>>,
    last: Mutex<Option<Response>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn answering(response: Response) -> Arc<Self> {
        Self::scripted(vec![response])
    }

    pub fn scripted(responses: Vec<Response>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requested_numbers(&self) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .filter_map(|request| request.number().ok().map(str::to_string))
            .collect()
    }

    fn next_response(&self) -> Option<Response> {
        let mut last = lock(&self.last);
        if let Some(next) = lock(&self.script).pop_front() {
            *last = Some(next);
        }
        last.clone()
    }
}

impl LookupTransport for ScriptedTransport {
    fn invoke(&self, request: Request, reply: Reply) {
        let id = request.id.clone();
        lock(&self.requests).push(request);

        match self.next_response() {
            Some(mut response) => {
                response.id = id;
                reply(response);
            }
            None => tracing::debug!("Script exhausted; request left unanswered"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Overlay
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    StartForeground,
    StopForeground,
    AddWindow {
        id: u64,
        spec: WindowSpec,
        number: String,
        label: String,
    },
    UpdateWindow {
        id: u64,
        number: String,
        label: String,
    },
    RemoveWindow {
        id: u64,
    },
}

/// Overlay host recording every window and service call.
pub struct RecordingOverlayHost {
    permitted: AtomicBool,
    refuse: AtomicBool,
    next_id: AtomicU64,
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingOverlayHost {
    fn with_permission(permitted: bool) -> Arc<Self> {
        Arc::new(Self {
            permitted: AtomicBool::new(permitted),
            refuse: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn granted() -> Arc<Self> {
        Self::with_permission(true)
    }

    pub fn denied() -> Arc<Self> {
        Self::with_permission(false)
    }

    /// Grants or revokes the overlay permission from now on.
    pub fn set_permission(&self, permitted: bool) {
        self.permitted.store(permitted, AtomicOrdering::SeqCst);
    }

    /// Makes every following `add_window` fail.
    pub fn refuse_windows(&self) {
        self.refuse.store(true, AtomicOrdering::SeqCst);
    }

    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.calls).clone()
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&HostCall) -> bool,
    {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    pub fn add_count(&self) -> usize {
        self.count(|call| matches!(call, HostCall::AddWindow { .. }))
    }

    /// Number and label of the most recent window update.
    pub fn last_update(&self) -> Option<(String, String)> {
        lock(&self.calls).iter().rev().find_map(|call| match call {
            HostCall::UpdateWindow { number, label, .. } => Some((number.clone(), label.clone())),
            _ => None,
        })
    }

    fn record(&self, call: HostCall) {
        lock(&self.calls).push(call);
    }
}

impl OverlayHost for RecordingOverlayHost {
    fn can_draw_overlays(&self) -> bool {
        self.permitted.load(AtomicOrdering::SeqCst)
    }

    fn start_foreground(&self) -> bool {
        self.record(HostCall::StartForeground);
        true
    }

    fn stop_foreground(&self) {
        self.record(HostCall::StopForeground);
    }

    fn add_window(&self, spec: WindowSpec, number: String, label: String) -> Option<u64> {
        if self.refuse.load(AtomicOrdering::SeqCst) {
            return None;
        }
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        self.record(HostCall::AddWindow {
            id,
            spec,
            number,
            label,
        });
        Some(id)
    }

    fn update_window(&self, window_id: u64, number: String, label: String) {
        self.record(HostCall::UpdateWindow {
            id: window_id,
            number,
            label,
        });
    }

    fn remove_window(&self, window_id: u64) {
        self.record(HostCall::RemoveWindow { id: window_id });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    RemoveAll,
    Add(u64, String),
    Complete(PublishReport),
}

#[derive(Default)]
pub struct RecordingDirectorySink {
    rejected: Mutex<HashSet<u64>>,
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingDirectorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the sink refuse `number`.
    pub fn reject(&self, number: u64) {
        lock(&self.rejected).insert(number);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        lock(&self.calls).clone()
    }

    /// Numbers the sink accepted, in call order.
    pub fn added_numbers(&self) -> Vec<u64> {
        let rejected = lock(&self.rejected);
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                SinkCall::Add(number, _) if !rejected.contains(number) => Some(*number),
                _ => None,
            })
            .collect()
    }
}

impl DirectorySink for RecordingDirectorySink {
    fn remove_all_entries(&self) {
        lock(&self.calls).push(SinkCall::RemoveAll);
    }

    fn add_entry(&self, number: u64, label: String) -> bool {
        lock(&self.calls).push(SinkCall::Add(number, label));
        !lock(&self.rejected).contains(&number)
    }

    fn complete(&self, report: PublishReport) {
        lock(&self.calls).push(SinkCall::Complete(report));
    }
}
