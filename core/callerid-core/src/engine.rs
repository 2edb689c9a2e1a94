//! CallerIdEngine - the entry point for Android/iOS hosts.
//!
//! Wires storage, configuration, the event loop, the lookup client, the
//! overlay controller and the call-state tracker into one object. Telephony
//! broadcasts and overlay commands may arrive on any host thread; they are
//! posted to the engine's [`Looper`] so the tracker and the window are only
//! ever touched from there.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use callerid_core::CallerIdEngine;
//!
//! let engine = CallerIdEngine::new(root, overlay_host, lookup_engine)?;
//! engine.on_phone_state("RINGING".into(), Some("09012345678".into()));
//! ```

use std::sync::Arc;

use crate::config::{load_config_with_storage, CallerIdConfig};
use crate::directory::{
    load_status, publish, record_report, synchronize, DirectorySink, DirectoryStatus,
    PublishReport, RequestMode,
};
use crate::error::{CallerIdFfiError, Result};
use crate::lookup::{EngineTransport, LookupClient, LookupEngine, LookupTransport, RetryPolicy};
use crate::overlay::{OverlayController, OverlayHost, OverlayView};
use crate::phonebook::{load_payload, save_payload_json};
use crate::scheduler::{Clock, Looper, Scheduler, SystemClock};
use crate::storage::StorageConfig;
use crate::tracker::{CallStateTracker, TrackerTiming};

const LOOPER_THREAD_NAME: &str = "callerid-main";

/// Last directory publication, as reported to hosts.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct DirectoryStatusInfo {
    pub applied_count: u64,
    pub rejected_count: u64,
    /// Unix epoch milliseconds.
    pub applied_at_ms: i64,
}

impl From<DirectoryStatus> for DirectoryStatusInfo {
    fn from(status: DirectoryStatus) -> Self {
        Self {
            applied_count: status.applied_count,
            rejected_count: status.rejected_count,
            applied_at_ms: status.applied_at.timestamp_millis(),
        }
    }
}

#[derive(uniffi::Object)]
pub struct CallerIdEngine {
    storage: StorageConfig,
    config: CallerIdConfig,
    host: Arc<dyn OverlayHost>,
    scheduler: Arc<dyn Scheduler>,
    looper: Option<Arc<Looper>>,
    engine_transport: Option<Arc<EngineTransport>>,
    overlay: OverlayController,
    tracker: Arc<CallStateTracker>,
}

impl CallerIdEngine {
    /// Assembles an engine from explicit parts.
    ///
    /// Used by tests with a manual clock and scheduler. Not exposed to FFI.
    pub fn with_parts(
        storage: StorageConfig,
        config: CallerIdConfig,
        host: Arc<dyn OverlayHost>,
        transport: Arc<dyn LookupTransport>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let lookup = LookupClient::new(
            transport,
            Arc::clone(&scheduler),
            RetryPolicy::from_config(&config),
        );
        let overlay = OverlayController::new(Arc::clone(&host), lookup);
        let tracker = Arc::new(CallStateTracker::new(
            clock,
            Arc::clone(&scheduler),
            Arc::new(overlay.clone()),
            TrackerTiming::from_config(&config),
        ));

        Self {
            storage,
            config,
            host,
            scheduler,
            looper: None,
            engine_transport: None,
            overlay,
            tracker,
        }
    }

    /// Creates an engine running on its own event loop with configuration read from `storage`.
    pub fn with_storage(
        storage: StorageConfig,
        overlay_host: Arc<dyn OverlayHost>,
        lookup_engine: Arc<dyn LookupEngine>,
    ) -> Result<Self> {
        let config = load_config_with_storage(&storage);
        let looper = Arc::new(Looper::start(LOOPER_THREAD_NAME)?);
        let transport = Arc::new(EngineTransport::new(move || Arc::clone(&lookup_engine)));

        let mut engine = Self::with_parts(
            storage,
            config,
            overlay_host,
            transport.clone(),
            looper.clone(),
            Arc::new(SystemClock::new()),
        );
        engine.looper = Some(looper);
        engine.engine_transport = Some(transport);

        tracing::info!(
            root = %engine.storage.root().display(),
            country_code = %engine.config.default_country_code,
            "Caller-ID engine started"
        );
        Ok(engine)
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn tracker(&self) -> &CallStateTracker {
        &self.tracker
    }

    /// Synchronizes the stored phone book into `sink` and records the outcome.
    pub fn publish_directory(
        &self,
        sink: &dyn DirectorySink,
        mode: RequestMode,
    ) -> Result<PublishReport> {
        let payload = load_payload(&self.storage);
        let snapshot = synchronize(&payload.entries, &self.config.default_country_code);
        tracing::info!(
            raw = payload.entries.len(),
            normalized = snapshot.len(),
            "Directory request"
        );

        let report = publish(&snapshot, sink, mode);
        record_report(&self.storage, &report)?;
        Ok(report)
    }

    fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.post(Box::new(task));
    }
}

#[uniffi::export]
impl CallerIdEngine {
    /// Creates an engine rooted at `storage_root` (blank for the default location).
    #[uniffi::constructor]
    pub fn new(
        storage_root: String,
        overlay_host: Arc<dyn OverlayHost>,
        lookup_engine: Arc<dyn LookupEngine>,
    ) -> std::result::Result<Self, CallerIdFfiError> {
        let storage = match storage_root.trim() {
            "" => StorageConfig::default(),
            root => StorageConfig::with_root(root.into()),
        };
        Self::with_storage(storage, overlay_host, lookup_engine).map_err(CallerIdFfiError::from)
    }

    pub fn storage_root(&self) -> String {
        self.storage.root().to_string_lossy().to_string()
    }

    pub fn config(&self) -> CallerIdConfig {
        self.config.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Incoming calls
    // ─────────────────────────────────────────────────────────────────────────────

    /// Feeds one telephony broadcast (`"IDLE"`, `"RINGING"`, `"OFFHOOK"`).
    pub fn on_phone_state(&self, state: String, number: Option<String>) {
        let tracker = Arc::clone(&self.tracker);
        self.post(move || tracker.on_event(&state, number.as_deref()));
    }

    /// The user tapped the overlay.
    pub fn on_overlay_tapped(&self) {
        let overlay = self.overlay.clone();
        self.post(move || overlay.dismiss());
    }

    /// Shows the overlay for `number` outside of a call, for testing the host UI.
    pub fn show_overlay(&self, number: String) {
        let overlay = self.overlay.clone();
        self.post(move || overlay.show(&number));
    }

    pub fn stop_overlay(&self) {
        let overlay = self.overlay.clone();
        self.post(move || overlay.close());
    }

    pub fn overlay_permission_granted(&self) -> bool {
        self.host.can_draw_overlays()
    }

    pub fn showing(&self) -> Option<OverlayView> {
        self.overlay.showing()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Phone book and directory
    // ─────────────────────────────────────────────────────────────────────────────

    /// Validates and stores a `{"entries":[{"number","label"}]}` payload.
    /// Returns the number of entries stored.
    pub fn save_phone_book(&self, json: String) -> std::result::Result<u64, CallerIdFfiError> {
        let payload = save_payload_json(&self.storage, &json)?;
        Ok(payload.entries.len() as u64)
    }

    /// Answers a directory request from the stored phone book.
    ///
    /// Returns true when every entry was registered. `complete` is called on
    /// the sink even when this returns false.
    pub fn reload_directory(&self, sink: Arc<dyn DirectorySink>, mode: RequestMode) -> bool {
        match self.publish_directory(sink.as_ref(), mode) {
            Ok(report) => !report.is_partial_failure(),
            Err(err) => {
                tracing::error!(error = %err, "Failed to record directory status");
                false
            }
        }
    }

    pub fn directory_status(&self) -> Option<DirectoryStatusInfo> {
        load_status(&self.storage).map(DirectoryStatusInfo::from)
    }
}

impl Drop for CallerIdEngine {
    fn drop(&mut self) {
        if let Some(looper) = self.looper.take() {
            looper.quit();
        }
        // The loop is stopped (or never existed), so closing here cannot race it.
        self.overlay.close();
        if let Some(transport) = self.engine_transport.take() {
            transport.shutdown();
        }
        tracing::debug!("Caller-ID engine stopped");
    }
}
