//! Asynchronous number → label resolution against the lookup engine.
//!
//! The engine may exist before its handler is attached, in which case it
//! answers `not_implemented`. That startup race is absorbed by a bounded
//! retry ([`RetryPolicy`], 10 attempts 100ms apart by default); every other
//! outcome is final. Retries are scheduled, never slept, and outcomes are
//! always delivered on the scheduler's owning thread.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use callerid_protocol::{LookupReply, Request, Response};

use crate::config::CallerIdConfig;
use crate::registry::Registry;
use crate::scheduler::{Scheduler, TaskHandle};

pub const LABEL_SEARCHING: &str = "searching…";
pub const LABEL_NOT_REGISTERED: &str = "not registered";
pub const LABEL_LOOKUP_ERROR: &str = "lookup error";
pub const LABEL_UNIMPLEMENTED: &str = "unimplemented";

const SPAWN_FAILED_CODE: &str = "spawn_failed";

pub type Reply = Box<dyn FnOnce(Response) + Send + 'static>;

/// Call channel to the lookup engine. `reply` may be invoked from any thread,
/// exactly once per request.
pub trait LookupTransport: Send + Sync {
    fn invoke(&self, request: Request, reply: Reply);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CallerIdConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CallerIdConfig) -> Self {
        Self {
            max_attempts: config.lookup_max_attempts.max(1),
            interval: config.lookup_retry_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Label(String),
    NotRegistered,
    Failed { code: String, message: String },
    Unimplemented,
}

impl LookupOutcome {
    /// The fixed overlay text for this outcome.
    pub fn display_text(&self) -> &str {
        match self {
            LookupOutcome::Label(label) => label,
            LookupOutcome::NotRegistered => LABEL_NOT_REGISTERED,
            LookupOutcome::Failed { .. } => LABEL_LOOKUP_ERROR,
            LookupOutcome::Unimplemented => LABEL_UNIMPLEMENTED,
        }
    }
}

/// An in-flight resolution. Cancelling stops further retries and suppresses delivery.
#[derive(Debug, Clone, Default)]
pub struct LookupTask {
    handle: TaskHandle,
}

impl LookupTask {
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

#[derive(Clone)]
pub struct LookupClient {
    transport: Arc<dyn LookupTransport>,
    scheduler: Arc<dyn Scheduler>,
    policy: RetryPolicy,
}

impl LookupClient {
    pub fn new(
        transport: Arc<dyn LookupTransport>,
        scheduler: Arc<dyn Scheduler>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            scheduler,
            policy,
        }
    }

    pub fn resolve<F>(&self, number: &str, on_outcome: F) -> LookupTask
    where
        F: FnOnce(LookupOutcome) + Send + 'static,
    {
        let task = LookupTask::default();
        let chain = RetryChain {
            client: self.clone(),
            number: number.to_string(),
            handle: task.handle.clone(),
            on_outcome: Box::new(on_outcome),
        };
        chain.attempt(1);
        task
    }
}

struct RetryChain {
    client: LookupClient,
    number: String,
    handle: TaskHandle,
    on_outcome: Box<dyn FnOnce(LookupOutcome) + Send + 'static>,
}

impl RetryChain {
    fn attempt(self, attempt: u32) {
        if self.handle.is_cancelled() {
            tracing::debug!(attempt, "Lookup cancelled before attempt");
            return;
        }

        let request_id = ulid::Ulid::new().to_string();
        tracing::debug!(attempt, id = %request_id, "Lookup request");
        let request = Request::lookup_label(Some(request_id), &self.number);
        let transport = Arc::clone(&self.client.transport);
        transport.invoke(
            request,
            Box::new(move |response| self.on_response(attempt, response)),
        );
    }

    fn on_response(self, attempt: u32, response: Response) {
        if self.handle.is_cancelled() {
            return;
        }

        let outcome = match response.into_reply() {
            LookupReply::Label(label) if !label.trim().is_empty() => LookupOutcome::Label(label),
            LookupReply::Label(_) => LookupOutcome::NotRegistered,
            LookupReply::Error { code, message } => {
                tracing::warn!(code = %code, message = %message, "Lookup failed");
                LookupOutcome::Failed { code, message }
            }
            LookupReply::NotReady if attempt < self.client.policy.max_attempts => {
                tracing::debug!(attempt, "Lookup engine not ready; retrying");
                let scheduler = Arc::clone(&self.client.scheduler);
                let interval = self.client.policy.interval;
                scheduler.post_delayed(interval, Box::new(move || self.attempt(attempt + 1)));
                return;
            }
            LookupReply::NotReady => {
                tracing::warn!(attempts = attempt, "Lookup engine never became ready");
                LookupOutcome::Unimplemented
            }
        };

        self.deliver(outcome);
    }

    fn deliver(self, outcome: LookupOutcome) {
        let RetryChain {
            client,
            handle,
            on_outcome,
            ..
        } = self;
        client.scheduler.post(Box::new(move || {
            if !handle.is_cancelled() {
                on_outcome(outcome);
            }
        }));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine-backed transport
// ─────────────────────────────────────────────────────────────────────────────

/// Host-implemented lookup engine (e.g. a background script runtime).
///
/// Called from a worker thread; may block.
#[uniffi::export(with_foreign)]
pub trait LookupEngine: Send + Sync {
    fn lookup_label(&self, number: String) -> EngineReply;
}

#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum EngineReply {
    Label { label: String },
    Error { code: String, message: String },
    NotReady,
}

impl From<EngineReply> for LookupReply {
    fn from(reply: EngineReply) -> Self {
        match reply {
            EngineReply::Label { label } => LookupReply::Label(label),
            EngineReply::Error { code, message } => LookupReply::Error { code, message },
            EngineReply::NotReady => LookupReply::NotReady,
        }
    }
}

type EngineFactory = Box<dyn Fn() -> Arc<dyn LookupEngine> + Send + Sync>;

/// Adapts a blocking [`LookupEngine`] to the asynchronous transport contract.
///
/// The engine is created lazily on the first request and shared afterwards.
pub struct EngineTransport {
    factory: EngineFactory,
    engine: Registry<dyn LookupEngine>,
}

impl EngineTransport {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn LookupEngine> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            engine: Registry::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.engine.is_active()
    }

    pub fn shutdown(&self) {
        if self.engine.dispose().is_some() {
            tracing::debug!("Lookup engine released");
        }
    }
}

impl LookupTransport for EngineTransport {
    fn invoke(&self, request: Request, reply: Reply) {
        let id = request.id.clone();
        let number = match request.number() {
            Ok(number) => number.to_string(),
            Err(info) => {
                reply(Response::error(id, &info.code, info.message));
                return;
            }
        };

        let engine = self.engine.ensure(|| {
            tracing::info!("Starting lookup engine");
            (self.factory)()
        });

        let pending = PendingReply::new(reply);
        let worker_reply = pending.clone();
        let worker_id = id.clone();
        let spawned = thread::Builder::new()
            .name("callerid-lookup".to_string())
            .spawn(move || {
                let answer = engine.lookup_label(number);
                worker_reply.send(Response::from_reply(worker_id, answer.into()));
            });
        if let Err(err) = spawned {
            answer_spawn_failure(&pending, id, &err);
        }
    }
}

/// A reply shared between the caller and a worker; whichever sends first wins.
#[derive(Clone)]
struct PendingReply(Arc<Mutex<Option<Reply>>>);

impl PendingReply {
    fn new(reply: Reply) -> Self {
        Self(Arc::new(Mutex::new(Some(reply))))
    }

    fn send(&self, response: Response) -> bool {
        let reply = self.0.lock().ok().and_then(|mut slot| slot.take());
        match reply {
            Some(reply) => {
                reply(response);
                true
            }
            None => false,
        }
    }
}

fn answer_spawn_failure(pending: &PendingReply, id: Option<String>, err: &io::Error) {
    tracing::error!(error = %err, "Failed to spawn lookup worker");
    pending.send(Response::error(
        id,
        SPAWN_FAILED_CODE,
        format!("lookup worker unavailable: {}", err),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, ManualScheduler, ScriptedTransport};
    use std::sync::Mutex;

    fn client(
        transport: Arc<ScriptedTransport>,
    ) -> (LookupClient, Arc<ManualScheduler>, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let scheduler = ManualScheduler::new(Arc::clone(&clock));
        let client = LookupClient::new(transport, scheduler.clone(), RetryPolicy::default());
        (client, scheduler, clock)
    }

    fn capture() -> (
        Arc<Mutex<Vec<LookupOutcome>>>,
        impl FnOnce(LookupOutcome) + Send + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |outcome| sink.lock().unwrap().push(outcome))
    }

    #[test]
    fn test_label_is_delivered_on_scheduler() {
        let transport = ScriptedTransport::answering(Response::label(None, "Tanaka"));
        let (client, scheduler, _) = client(transport.clone());
        let (seen, on_outcome) = capture();

        client.resolve("09012345678", on_outcome);
        assert!(seen.lock().unwrap().is_empty());

        scheduler.run_pending();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![LookupOutcome::Label("Tanaka".to_string())]
        );
        assert_eq!(transport.requested_numbers(), vec!["09012345678".to_string()]);
    }

    #[test]
    fn test_blank_label_is_not_registered() {
        let transport = ScriptedTransport::answering(Response::label(None, "   "));
        let (client, scheduler, _) = client(transport);
        let (seen, on_outcome) = capture();

        client.resolve("1", on_outcome);
        scheduler.run_pending();
        assert_eq!(*seen.lock().unwrap(), vec![LookupOutcome::NotRegistered]);
        assert_eq!(LookupOutcome::NotRegistered.display_text(), "not registered");
    }

    #[test]
    fn test_error_is_not_retried() {
        let transport = ScriptedTransport::answering(Response::error(None, "boom", "failed"));
        let (client, scheduler, _) = client(transport.clone());
        let (seen, on_outcome) = capture();

        client.resolve("1", on_outcome);
        scheduler.advance(Duration::from_secs(5));
        assert_eq!(transport.request_count(), 1);
        let outcomes = seen.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].display_text(), "lookup error");
    }

    #[test]
    fn test_not_ready_retries_then_succeeds() {
        let transport = ScriptedTransport::scripted(vec![
            Response::not_implemented(None),
            Response::not_implemented(None),
            Response::label(None, "Suzuki"),
        ]);
        let (client, scheduler, clock) = client(transport.clone());
        let (seen, on_outcome) = capture();

        client.resolve("1", on_outcome);
        scheduler.advance(Duration::from_millis(199));
        assert_eq!(transport.request_count(), 2);
        assert!(seen.lock().unwrap().is_empty());

        scheduler.advance(Duration::from_millis(1));
        assert_eq!(transport.request_count(), 3);
        assert_eq!(clock.now_ms(), 200);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![LookupOutcome::Label("Suzuki".to_string())]
        );
    }

    #[test]
    fn test_ten_not_ready_degrades_to_unimplemented() {
        let transport = ScriptedTransport::answering(Response::not_implemented(None));
        let (client, scheduler, _) = client(transport.clone());
        let (seen, on_outcome) = capture();

        client.resolve("1", on_outcome);
        scheduler.advance(Duration::from_millis(900));
        assert_eq!(transport.request_count(), 10);
        assert_eq!(*seen.lock().unwrap(), vec![LookupOutcome::Unimplemented]);

        scheduler.advance(Duration::from_secs(10));
        assert_eq!(transport.request_count(), 10);
        assert_eq!(LookupOutcome::Unimplemented.display_text(), "unimplemented");
    }

    #[test]
    fn test_cancel_stops_retry_chain() {
        let transport = ScriptedTransport::answering(Response::not_implemented(None));
        let (client, scheduler, _) = client(transport.clone());
        let (seen, on_outcome) = capture();

        let task = client.resolve("1", on_outcome);
        scheduler.advance(Duration::from_millis(250));
        assert_eq!(transport.request_count(), 3);

        task.cancel();
        task.cancel();
        scheduler.advance(Duration::from_secs(5));
        assert_eq!(transport.request_count(), 3);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_suppresses_pending_delivery() {
        let transport = ScriptedTransport::answering(Response::label(None, "Tanaka"));
        let (client, scheduler, _) = client(transport);
        let (seen, on_outcome) = capture();

        let task = client.resolve("1", on_outcome);
        task.cancel();
        scheduler.run_pending();
        assert!(seen.lock().unwrap().is_empty());
    }

    struct FixedEngine(EngineReply);

    impl LookupEngine for FixedEngine {
        fn lookup_label(&self, _number: String) -> EngineReply {
            self.0.clone()
        }
    }

    #[test]
    fn test_engine_transport_starts_engine_once() {
        let starts = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&starts);
        let transport = EngineTransport::new(move || {
            *counter.lock().unwrap() += 1;
            Arc::new(FixedEngine(EngineReply::Label {
                label: "Sato".to_string(),
            })) as Arc<dyn LookupEngine>
        });
        assert!(!transport.is_started());

        let (tx, rx) = crossbeam_channel::bounded(2);
        for _ in 0..2 {
            let tx = tx.clone();
            transport.invoke(
                Request::lookup_label(Some("id".to_string()), "1"),
                Box::new(move |response| {
                    let _ = tx.send(response);
                }),
            );
        }

        for _ in 0..2 {
            let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(response.id.as_deref(), Some("id"));
            assert_eq!(response.into_reply(), LookupReply::Label("Sato".to_string()));
        }
        assert_eq!(*starts.lock().unwrap(), 1);
        assert!(transport.is_started());

        transport.shutdown();
        assert!(!transport.is_started());
    }

    #[test]
    fn test_engine_transport_maps_not_ready() {
        let transport = EngineTransport::new(|| {
            Arc::new(FixedEngine(EngineReply::NotReady)) as Arc<dyn LookupEngine>
        });
        let (tx, rx) = crossbeam_channel::bounded(1);
        transport.invoke(
            Request::lookup_label(None, "1"),
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        );
        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(response.into_reply(), LookupReply::NotReady);
    }

    #[test]
    fn test_spawn_failure_still_answers_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let pending = PendingReply::new(Box::new(move |response: Response| {
            sink.lock().unwrap().push(response.into_reply());
        }));

        let err = io::Error::new(io::ErrorKind::WouldBlock, "thread limit");
        answer_spawn_failure(&pending, Some("id".to_string()), &err);
        assert!(!pending.send(Response::label(None, "late")));

        let replies = seen.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert!(matches!(
            &replies[0],
            LookupReply::Error { code, .. } if code == SPAWN_FAILED_CODE
        ));
    }

    #[test]
    fn test_spawn_failure_shows_lookup_error() {
        let clock = ManualClock::new();
        let scheduler = ManualScheduler::new(clock);
        let transport = ScriptedTransport::answering(Response::error(
            None,
            SPAWN_FAILED_CODE,
            "lookup worker unavailable",
        ));
        let client =
            LookupClient::new(transport.clone(), scheduler.clone(), RetryPolicy::default());
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        client.resolve("1", move |outcome| {
            *sink.lock().unwrap() = Some(outcome.display_text().to_string());
        });
        scheduler.run_pending();

        assert_eq!(transport.request_count(), 1);
        assert_eq!(seen.lock().unwrap().as_deref(), Some(LABEL_LOOKUP_ERROR));
    }

    #[test]
    fn test_engine_transport_rejects_bad_request() {
        let transport = EngineTransport::new(|| {
            Arc::new(FixedEngine(EngineReply::NotReady)) as Arc<dyn LookupEngine>
        });
        let mut request = Request::lookup_label(None, "1");
        request.args = None;

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        transport.invoke(
            request,
            Box::new(move |response| {
                *sink.lock().unwrap() = Some(response.into_reply());
            }),
        );
        assert!(matches!(
            seen.lock().unwrap().as_ref(),
            Some(LookupReply::Error { code, .. }) if code == "missing_field"
        ));
        assert!(!transport.is_started());
    }
}
