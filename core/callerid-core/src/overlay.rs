//! Incoming-call overlay lifecycle.
//!
//! Owns the single on-screen window and the foreground service keeping it
//! alive. A show request while a window is up rewrites that window instead
//! of stacking a second one. Every teardown path (tracker close, user tap,
//! engine shutdown) goes through [`OverlayController::close`], and the
//! window itself is released when its [`OverlayWindow`] is dropped.
//!
//! All methods are expected to run on the scheduler's owning thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::CallerIdError;
use crate::lookup::{LookupClient, LookupOutcome, LookupTask, LABEL_SEARCHING};
use crate::registry::Registry;

pub const UNKNOWN_NUMBER: &str = "Unknown";

/// Window placement and behavior requested from the host.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct WindowSpec {
    pub centered: bool,
    pub wrap_content: bool,
    pub focusable: bool,
    pub show_when_locked: bool,
}

impl WindowSpec {
    /// Centered, content-sized, never takes focus, visible over the lock screen.
    pub fn incoming_call() -> Self {
        Self {
            centered: true,
            wrap_content: true,
            focusable: false,
            show_when_locked: true,
        }
    }
}

/// Platform window and service primitives, implemented by the host shell.
#[uniffi::export(with_foreign)]
pub trait OverlayHost: Send + Sync {
    /// Whether the "draw over other apps" capability is granted.
    fn can_draw_overlays(&self) -> bool;
    /// Starts the foreground service backing the window. Returns false on failure.
    fn start_foreground(&self) -> bool;
    fn stop_foreground(&self);
    /// Adds the window with its initial text, returning its id, or None on failure.
    fn add_window(&self, spec: WindowSpec, number: String, label: String) -> Option<u64>;
    fn update_window(&self, window_id: u64, number: String, label: String);
    fn remove_window(&self, window_id: u64);
}

/// What the overlay currently displays.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct OverlayView {
    pub number: String,
    pub label: String,
}

/// The live window. Dropping it removes the window from the screen.
pub struct OverlayWindow {
    id: u64,
    host: Arc<dyn OverlayHost>,
    view: Mutex<OverlayView>,
    generation: AtomicU64,
    lookup: Mutex<Option<LookupTask>>,
}

impl OverlayWindow {
    fn view(&self) -> MutexGuard<'_, OverlayView> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self) -> MutexGuard<'_, Option<LookupTask>> {
        self.lookup.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn snapshot(&self) -> OverlayView {
        self.view().clone()
    }

    /// Shows a (possibly new) number with the searching placeholder.
    /// Returns the generation the next label must match.
    fn present(&self, number: &str, push: bool) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut view = self.view();
        view.number = number.to_string();
        view.label = LABEL_SEARCHING.to_string();
        if push {
            self.host
                .update_window(self.id, view.number.clone(), view.label.clone());
        }
        generation
    }

    fn set_label(&self, generation: u64, label: &str) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        let mut view = self.view();
        view.label = label.to_string();
        self.host
            .update_window(self.id, view.number.clone(), view.label.clone());
        true
    }

    fn replace_lookup(&self, task: LookupTask) {
        if let Some(previous) = self.lookup().replace(task) {
            previous.cancel();
        }
    }
}

impl Drop for OverlayWindow {
    fn drop(&mut self) {
        if let Some(task) = self.lookup().take() {
            task.cancel();
        }
        self.host.remove_window(self.id);
        tracing::debug!(window_id = self.id, "Overlay window removed");
    }
}

#[derive(Clone)]
pub struct OverlayController {
    host: Arc<dyn OverlayHost>,
    lookup: LookupClient,
    window: Arc<Registry<OverlayWindow>>,
    foreground: Arc<AtomicBool>,
}

impl OverlayController {
    pub fn new(host: Arc<dyn OverlayHost>, lookup: LookupClient) -> Self {
        Self {
            host,
            lookup,
            window: Arc::new(Registry::new()),
            foreground: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn permission_granted(&self) -> bool {
        self.host.can_draw_overlays()
    }

    pub fn is_showing(&self) -> bool {
        self.window.is_active()
    }

    pub fn showing(&self) -> Option<OverlayView> {
        self.window.get().map(|window| window.snapshot())
    }

    /// Shows `number` and starts resolving its label.
    pub fn show(&self, number: &str) {
        let number = match number.trim() {
            "" => UNKNOWN_NUMBER,
            trimmed => trimmed,
        };

        if !self.ensure_foreground() {
            return;
        }
        if !self.host.can_draw_overlays() {
            tracing::warn!("{}; overlay not shown", CallerIdError::OverlayPermissionDenied);
            self.close();
            return;
        }

        let mut created = false;
        let window = match self.window.try_ensure(|| {
            created = true;
            self.create_window(number)
        }) {
            Ok(window) => window,
            Err(err) => {
                tracing::warn!(error = %err, "Overlay window unavailable");
                self.release_foreground();
                return;
            }
        };

        let generation = window.present(number, !created);
        tracing::info!(
            window_id = window.id(),
            number = %number,
            reused = !created,
            "Overlay showing"
        );

        let controller = self.clone();
        let task = self.lookup.resolve(number, move |outcome| {
            controller.apply_outcome(generation, outcome);
        });
        window.replace_lookup(task);
    }

    /// Tears down the window and the foreground service. Safe to call when nothing is shown.
    pub fn close(&self) {
        if let Some(window) = self.window.dispose() {
            tracing::info!(window_id = window.id(), "Overlay closing");
            drop(window);
        }
        self.release_foreground();
    }

    /// User tapped the overlay.
    pub fn dismiss(&self) {
        tracing::debug!("Overlay dismissed by user");
        self.close();
    }

    fn create_window(&self, number: &str) -> Result<Arc<OverlayWindow>, CallerIdError> {
        let id = self
            .host
            .add_window(
                WindowSpec::incoming_call(),
                number.to_string(),
                LABEL_SEARCHING.to_string(),
            )
            .ok_or_else(|| CallerIdError::host("add_window", "host refused the overlay window"))?;

        Ok(Arc::new(OverlayWindow {
            id,
            host: Arc::clone(&self.host),
            view: Mutex::new(OverlayView {
                number: number.to_string(),
                label: LABEL_SEARCHING.to_string(),
            }),
            generation: AtomicU64::new(0),
            lookup: Mutex::new(None),
        }))
    }

    fn apply_outcome(&self, generation: u64, outcome: LookupOutcome) {
        let Some(window) = self.window.get() else {
            tracing::debug!("Lookup finished after overlay closed");
            return;
        };
        if window.set_label(generation, outcome.display_text()) {
            tracing::debug!(outcome = ?outcome, "Overlay label updated");
        } else {
            tracing::debug!("Discarding label for a replaced number");
        }
    }

    fn ensure_foreground(&self) -> bool {
        if self.foreground.swap(true, Ordering::SeqCst) {
            return true;
        }
        if self.host.start_foreground() {
            return true;
        }
        self.foreground.store(false, Ordering::SeqCst);
        tracing::warn!("Foreground service failed to start; overlay not shown");
        false
    }

    fn release_foreground(&self) {
        if self.foreground.swap(false, Ordering::SeqCst) {
            self.host.stop_foreground();
        }
    }
}
