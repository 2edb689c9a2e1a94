//! # callerid-core
//!
//! Phone-book caller identification, shared by the Android and iOS hosts.
//!
//! - **Directory**: normalizes a user-maintained phone book into the strictly
//!   ascending numeric directory the OS consults during incoming calls.
//! - **Overlay**: watches telephony state, debounces noisy RINGING/IDLE
//!   deliveries, and shows a floating window with the caller's number and a
//!   label resolved asynchronously from the lookup engine.
//!
//! ## Design Principles
//!
//! - **Host primitives behind traits**: windows, foreground services, the
//!   directory-provider context and the lookup engine are foreign traits the
//!   host implements ([`OverlayHost`], [`DirectorySink`], [`LookupEngine`]).
//! - **One owning thread**: tracker events and overlay mutations run on the
//!   engine's event loop; nothing blocks it.
//! - **Graceful degradation**: missing or corrupt files yield empty/default
//!   values, host failures are logged, nothing here panics the host process.
//! - **FFI-ready**: UniFFI annotations generate Kotlin and Swift bindings.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use callerid_core::{CallerIdEngine, RequestMode};
//!
//! let engine = CallerIdEngine::new(root, overlay_host, lookup_engine)?;
//! engine.save_phone_book(r#"{"entries":[{"number":"090-1234-5678","label":"Tanaka"}]}"#.into())?;
//! engine.reload_directory(directory_sink, RequestMode::Incremental);
//! engine.on_phone_state("RINGING".into(), Some("09012345678".into()));
//! ```

// UniFFI scaffolding for Kotlin/Swift bindings
uniffi::setup_scaffolding!();

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod lookup;
pub mod normalize;
pub mod overlay;
pub mod phonebook;
pub mod registry;
pub mod scheduler;
pub mod storage;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod tracker;

pub use config::*;
pub use directory::{
    load_status, publish, record_report, record_status, synchronize, DirectoryEntry,
    DirectorySink, DirectorySnapshot, DirectoryStatus, PublishReport, RequestMode,
};
pub use engine::{CallerIdEngine, DirectoryStatusInfo};
pub use error::{CallerIdError, CallerIdFfiError, Result};
pub use lookup::{
    EngineReply, EngineTransport, LookupClient, LookupEngine, LookupOutcome, LookupTask,
    LookupTransport, RetryPolicy,
};
pub use normalize::{normalize, normalize_number};
pub use overlay::{OverlayController, OverlayHost, OverlayView, WindowSpec, UNKNOWN_NUMBER};
pub use phonebook::{load_payload, save_payload, save_payload_json};
pub use registry::Registry;
pub use scheduler::{Clock, Looper, Scheduler, SystemClock, Task, TaskHandle};
pub use storage::*;
pub use tracker::{CallSession, CallStateTracker, OverlaySink, PhoneState, TrackerTiming};
