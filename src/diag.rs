//! Diagnostic side channel
//!
//! When the environment variable `GH_NEURALNOTE_CPP_DIAG` is truthy
//! (1/true/yes/on), components emit JSON lines to stdout describing what they
//! are doing. The flag is consulted once per process and cached; the
//! pipelines' functional behavior never depends on it.

use std::time::Instant;

use once_cell::sync::Lazy;
use serde_json::json;

static ENABLED: Lazy<bool> =
    Lazy::new(|| env_flag_enabled(std::env::var("GH_NEURALNOTE_CPP_DIAG").ok().as_deref()));

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Interpret a CLI/environment boolean, accepting 1/0, true/false, yes/no,
/// on/off in any case.
pub fn env_flag_enabled(value: Option<&str>) -> bool {
    match value {
        Some(raw) => matches!(
            raw.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => false,
    }
}

/// Whether diagnostics are enabled for this process.
pub fn enabled() -> bool {
    *ENABLED
}

/// Emit one diagnostic line. `detail` and `progress` are omitted from the
/// payload when empty / absent.
pub fn emit(component: &str, event: &str, detail: &str, progress: Option<f64>) {
    if !enabled() {
        return;
    }

    let elapsed_ms = PROCESS_START.elapsed().as_millis() as u64;
    let mut payload = json!({
        "type": "diag",
        "component": component,
        "event": event,
        "elapsedMs": elapsed_ms,
    });
    if !detail.is_empty() {
        payload["detail"] = json!(detail);
    }
    if let Some(progress) = progress {
        payload["progress"] = json!(progress);
    }
    println!("{}", payload);
}

/// Emit a progress event for the host application. Unlike `emit`, progress
/// lines are part of the notes CLI contract and are printed unconditionally.
pub fn progress(stage: &str, progress: f64) {
    println!(
        "{{\"type\":\"progress\",\"stage\":{},\"progress\":{}}}",
        json!(stage),
        progress
    );
}

/// Heartbeat cadence for per-frame loops: dense for short clips, sparse for
/// long ones.
pub fn heartbeat_every(total_frames: usize) -> usize {
    if total_frames <= 120 {
        8
    } else if total_frames <= 600 {
        20
    } else {
        (total_frames / 24).max(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing_accepts_common_truthy_spellings() {
        for value in ["1", "true", "TRUE", "yes", "On"] {
            assert!(env_flag_enabled(Some(value)), "{} should enable", value);
        }
        for value in ["0", "false", "no", "off", ""] {
            assert!(!env_flag_enabled(Some(value)), "{} should disable", value);
        }
        assert!(!env_flag_enabled(None));
    }

    #[test]
    fn heartbeat_cadence_scales_with_length() {
        assert_eq!(heartbeat_every(100), 8);
        assert_eq!(heartbeat_every(400), 20);
        assert_eq!(heartbeat_every(6000), 250);
        assert_eq!(heartbeat_every(700), 30);
    }
}
