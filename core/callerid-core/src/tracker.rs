//! Incoming-call detection from raw telephony state broadcasts.
//!
//! Broadcast delivery is device-dependent: RINGING may arrive several times
//! per call, the number may only be attached to a later delivery, and IDLE
//! may pulse before the call really ends. The tracker therefore
//!
//! - debounces the first RINGING of a session (500ms by default) so the
//!   overlay renders with the latest number,
//! - refreshes an already shown overlay on duplicate RINGING deliveries,
//! - ignores IDLE arriving before the overlay has been visible for the
//!   minimum time (1200ms by default).
//!
//! ```text
//! IDLE ──RINGING──▶ RINGING ──OFFHOOK──▶ OFFHOOK
//!   ▲                  │ (debounced show)   │
//!   └──────IDLE────────┴────────IDLE────────┘ (close if shown long enough)
//! ```
//!
//! Events are processed one at a time on the scheduler's owning thread.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::CallerIdConfig;
use crate::overlay::{OverlayController, UNKNOWN_NUMBER};
use crate::scheduler::{Clock, Scheduler, TaskHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhoneState {
    #[default]
    Idle,
    Ringing,
    Offhook,
}

impl PhoneState {
    /// Parses the platform's state extra. Anything unrecognized is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IDLE" => Some(PhoneState::Idle),
            "RINGING" => Some(PhoneState::Ringing),
            "OFFHOOK" => Some(PhoneState::Offhook),
            _ => None,
        }
    }
}

/// One ring episode. Reset to the default whenever the phone returns to IDLE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSession {
    pub last_state: PhoneState,
    pub incoming_number: Option<String>,
    pub has_shown_this_session: bool,
    pub ring_started_at: Option<u64>,
    pub overlay_shown_at: Option<u64>,
}

impl CallSession {
    fn display_number(&self) -> String {
        self.incoming_number
            .clone()
            .unwrap_or_else(|| UNKNOWN_NUMBER.to_string())
    }
}

/// Receiver of the tracker's show/close decisions.
pub trait OverlaySink: Send + Sync {
    fn show(&self, number: &str);
    fn close(&self);
}

impl OverlaySink for OverlayController {
    fn show(&self, number: &str) {
        OverlayController::show(self, number);
    }

    fn close(&self) {
        OverlayController::close(self);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerTiming {
    pub debounce: Duration,
    pub min_visible: Duration,
}

impl Default for TrackerTiming {
    fn default() -> Self {
        Self::from_config(&CallerIdConfig::default())
    }
}

impl TrackerTiming {
    pub fn from_config(config: &CallerIdConfig) -> Self {
        Self {
            debounce: config.debounce(),
            min_visible: config.min_visible(),
        }
    }
}

#[derive(Default)]
struct TrackerState {
    session: CallSession,
    pending: Option<TaskHandle>,
}

impl TrackerState {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
    }
}

pub struct CallStateTracker {
    state: Arc<Mutex<TrackerState>>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    overlay: Arc<dyn OverlaySink>,
    timing: TrackerTiming,
}

fn lock(state: &Mutex<TrackerState>) -> MutexGuard<'_, TrackerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CallStateTracker {
    pub fn new(
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        overlay: Arc<dyn OverlaySink>,
        timing: TrackerTiming,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            clock,
            scheduler,
            overlay,
            timing,
        }
    }

    pub fn session(&self) -> CallSession {
        lock(&self.state).session.clone()
    }

    pub fn has_pending_trigger(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    /// Handles a raw broadcast. Unknown states are ignored.
    pub fn on_event(&self, state: &str, number: Option<&str>) {
        match PhoneState::parse(state) {
            Some(state) => self.on_state(state, number),
            None => tracing::debug!(state = %state, "Ignoring unrecognized phone state"),
        }
    }

    pub fn on_state(&self, state: PhoneState, number: Option<&str>) {
        let number = number.map(str::trim).filter(|n| !n.is_empty());
        tracing::debug!(
            state = ?state,
            has_number = number.is_some(),
            last = ?self.session().last_state,
            "Phone state received"
        );

        match state {
            PhoneState::Ringing => self.on_ringing(number),
            PhoneState::Offhook => self.on_offhook(number),
            PhoneState::Idle => self.on_idle(),
        }
    }

    fn on_ringing(&self, number: Option<&str>) {
        let now = self.clock.now_ms();
        let mut state = lock(&self.state);

        if state.session.last_state != PhoneState::Ringing {
            state.session = CallSession {
                ring_started_at: Some(now),
                ..CallSession::default()
            };
        }
        if let Some(number) = number {
            state.session.incoming_number = Some(number.to_string());
        }
        state.session.last_state = PhoneState::Ringing;

        if state.session.has_shown_this_session {
            // Duplicate delivery: refresh what is on screen right away.
            let number = state.session.display_number();
            drop(state);
            tracing::debug!(number = %number, "Refreshing overlay");
            self.overlay.show(&number);
            return;
        }

        state.cancel_pending();
        let shared = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        let overlay = Arc::clone(&self.overlay);
        let handle = self.scheduler.post_delayed(
            self.timing.debounce,
            Box::new(move || fire_pending(&shared, clock.as_ref(), overlay.as_ref())),
        );
        state.pending = Some(handle);
        tracing::debug!(delay_ms = self.timing.debounce.as_millis() as u64, "Overlay scheduled");
    }

    fn on_offhook(&self, number: Option<&str>) {
        let mut state = lock(&self.state);
        if let Some(number) = number {
            state.session.incoming_number = Some(number.to_string());
        }
        state.session.last_state = PhoneState::Offhook;
    }

    fn on_idle(&self) {
        let now = self.clock.now_ms();
        let mut state = lock(&self.state);
        state.cancel_pending();

        let session = std::mem::take(&mut state.session);
        drop(state);

        let shown_for = session
            .overlay_shown_at
            .map(|shown_at| now.saturating_sub(shown_at));
        let elapsed_since_ring = session
            .ring_started_at
            .map(|started| now.saturating_sub(started));
        let min_visible = self.timing.min_visible.as_millis() as u64;
        let should_close = session.has_shown_this_session
            && shown_for.map(|ms| ms >= min_visible).unwrap_or(false)
            && matches!(
                session.last_state,
                PhoneState::Ringing | PhoneState::Offhook
            );

        tracing::debug!(
            elapsed_since_ring = ?elapsed_since_ring,
            shown_for = ?shown_for,
            should_close,
            "IDLE received"
        );
        if should_close {
            self.overlay.close();
        } else {
            tracing::debug!("IDLE ignored (spurious or too early)");
        }
    }
}

fn fire_pending(state: &Mutex<TrackerState>, clock: &dyn Clock, overlay: &dyn OverlaySink) {
    let mut guard = lock(state);
    guard.pending = None;
    if guard.session.last_state == PhoneState::Idle {
        return;
    }
    guard.session.has_shown_this_session = true;
    guard.session.overlay_shown_at = Some(clock.now_ms());
    let number = guard.session.display_number();
    drop(guard);

    tracing::info!(number = %number, "Showing incoming-call overlay");
    overlay.show(&number);
}
