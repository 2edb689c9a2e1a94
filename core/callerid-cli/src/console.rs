//! Terminal stand-ins for the host primitives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use callerid_core::{
    normalize, synchronize, DirectorySink, DirectorySnapshot, EngineReply, LookupEngine,
    OverlayHost, PublishReport, WindowSpec,
};

/// Draws the overlay as lines on stdout.
pub struct ConsoleOverlayHost {
    permitted: bool,
    next_id: AtomicU64,
}

impl ConsoleOverlayHost {
    pub fn new(permitted: bool) -> Self {
        Self {
            permitted,
            next_id: AtomicU64::new(1),
        }
    }
}

impl OverlayHost for ConsoleOverlayHost {
    fn can_draw_overlays(&self) -> bool {
        self.permitted
    }

    fn start_foreground(&self) -> bool {
        println!("[service] foreground started");
        true
    }

    fn stop_foreground(&self) {
        println!("[service] foreground stopped");
    }

    fn add_window(&self, spec: WindowSpec, number: String, label: String) -> Option<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        println!(
            "[overlay #{}] shown{} | {} | {}",
            id,
            if spec.show_when_locked { " (lock screen)" } else { "" },
            number,
            label
        );
        Some(id)
    }

    fn update_window(&self, window_id: u64, number: String, label: String) {
        println!("[overlay #{}] {} | {}", window_id, number, label);
    }

    fn remove_window(&self, window_id: u64) {
        println!("[overlay #{}] removed", window_id);
    }
}

/// Prints each registration instead of handing it to an OS directory.
#[derive(Default)]
pub struct PrintingSink {
    /// Numbers the sink refuses, to exercise partial failure.
    pub reject: Vec<u64>,
}

impl DirectorySink for PrintingSink {
    fn remove_all_entries(&self) {
        println!("- remove all entries");
    }

    fn add_entry(&self, number: u64, label: String) -> bool {
        if self.reject.contains(&number) {
            println!("! {:>15}  {} (rejected)", number, label);
            return false;
        }
        println!("+ {:>15}  {}", number, label);
        true
    }

    fn complete(&self, report: PublishReport) {
        println!(
            "= complete: {} applied, {} rejected",
            report.applied, report.rejected
        );
    }
}

/// Lookup engine answering from the stored phone book.
///
/// Answers "not ready" for the first `warmup` requests, mimicking a script
/// runtime whose handler is attached late.
pub struct PhoneBookEngine {
    labels: HashMap<u64, String>,
    country_code: String,
    warmup: AtomicU32,
}

impl PhoneBookEngine {
    pub fn new(snapshot: DirectorySnapshot, country_code: &str, warmup: u32) -> Self {
        let labels = snapshot
            .into_entries()
            .into_iter()
            .map(|entry| (entry.number, entry.label))
            .collect();
        Self {
            labels,
            country_code: country_code.to_string(),
            warmup: AtomicU32::new(warmup),
        }
    }

    pub fn from_entries(
        entries: &[callerid_protocol::PhoneBookEntry],
        country_code: &str,
        warmup: u32,
    ) -> Self {
        Self::new(synchronize(entries, country_code), country_code, warmup)
    }
}

impl LookupEngine for PhoneBookEngine {
    fn lookup_label(&self, number: String) -> EngineReply {
        let warming = self
            .warmup
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if warming {
            tracing::debug!("Lookup engine warming up");
            return EngineReply::NotReady;
        }

        let label = normalize(&number, &self.country_code)
            .and_then(|key| self.labels.get(&key).cloned())
            .unwrap_or_default();
        EngineReply::Label { label }
    }
}
