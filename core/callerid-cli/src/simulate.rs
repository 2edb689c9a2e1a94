//! Replays a telephony event script against a live engine.
//!
//! Script format, one step per line (`#` starts a comment):
//!
//! ```text
//! # wait_ms  event    [number]
//! 0          RINGING
//! 400        RINGING  09012345678
//! 500        OFFHOOK
//! 1400       IDLE
//! ```
//!
//! `wait_ms` is the pause before the step. Events are phone states as the
//! platform spells them, or `TAP` for a user tap on the overlay.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use callerid_core::{load_config_with_storage, load_payload, CallerIdEngine, StorageConfig};

use crate::console::{ConsoleOverlayHost, PhoneBookEngine};

pub const DEFAULT_SCRIPT: &str = "\
0    RINGING
400  RINGING  09012345678
500  OFFHOOK
1400 IDLE
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PhoneState {
        state: String,
        number: Option<String>,
    },
    Tap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub wait: Duration,
    pub action: Action,
}

pub fn parse_script(script: &str) -> Result<Vec<Step>, String> {
    let mut steps = Vec::new();

    for (index, line) in script.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let line_no = index + 1;
        let mut fields = line.split_whitespace();

        let wait_ms: u64 = fields
            .next()
            .and_then(|field| field.parse().ok())
            .ok_or_else(|| format!("line {}: expected a wait in milliseconds", line_no))?;
        let event = fields
            .next()
            .ok_or_else(|| format!("line {}: missing event", line_no))?;
        let number = fields.next().map(str::to_string);
        if fields.next().is_some() {
            return Err(format!("line {}: too many fields", line_no));
        }

        let action = if event.eq_ignore_ascii_case("TAP") {
            Action::Tap
        } else {
            Action::PhoneState {
                state: event.to_string(),
                number,
            }
        };
        steps.push(Step {
            wait: Duration::from_millis(wait_ms),
            action,
        });
    }

    Ok(steps)
}

pub struct Options {
    pub permitted: bool,
    pub warmup: u32,
    pub linger: Duration,
}

pub fn run(storage: StorageConfig, steps: &[Step], options: Options) -> Result<(), String> {
    let payload = load_payload(&storage);
    let config = load_config_with_storage(&storage);
    let lookup = PhoneBookEngine::from_entries(
        &payload.entries,
        &config.default_country_code,
        options.warmup,
    );

    let engine = CallerIdEngine::with_storage(
        storage,
        Arc::new(ConsoleOverlayHost::new(options.permitted)),
        Arc::new(lookup),
    )
    .map_err(String::from)?;

    let started = Instant::now();
    for step in steps {
        thread::sleep(step.wait);
        let at = started.elapsed().as_millis();
        match &step.action {
            Action::PhoneState { state, number } => {
                println!("[t={:>5}ms] {} {}", at, state, number.as_deref().unwrap_or("-"));
                engine.on_phone_state(state.clone(), number.clone());
            }
            Action::Tap => {
                println!("[t={:>5}ms] TAP", at);
                engine.on_overlay_tapped();
            }
        }
    }

    thread::sleep(options.linger);
    match engine.showing() {
        Some(view) => println!("still showing: {} | {}", view.number, view.label),
        None => println!("overlay closed"),
    }
    drop(engine);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_script_parses() {
        let steps = parse_script(DEFAULT_SCRIPT).unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(
            steps[1],
            Step {
                wait: Duration::from_millis(400),
                action: Action::PhoneState {
                    state: "RINGING".to_string(),
                    number: Some("09012345678".to_string()),
                },
            }
        );
    }

    #[test]
    fn test_comments_and_tap() {
        let steps = parse_script("# header\n\n100 tap  # user dismisses\n").unwrap();
        assert_eq!(
            steps,
            vec![Step {
                wait: Duration::from_millis(100),
                action: Action::Tap,
            }]
        );
    }

    #[test]
    fn test_bad_lines_report_line_number() {
        let err = parse_script("0 RINGING\nsoon IDLE\n").unwrap_err();
        assert!(err.starts_with("line 2:"));

        let err = parse_script("0 RINGING 1 2\n").unwrap_err();
        assert!(err.contains("too many fields"));

        let err = parse_script("10\n").unwrap_err();
        assert!(err.contains("missing event"));
    }
}
