//! Structured logging for warden.
//!
//! Log levels:
//! - ERROR: Critical failures that prevent an agent or orchestrator from running
//! - WARN: Unexpected conditions that are recoverable (malformed payloads, failed publishes)
//! - INFO: Lifecycle notifications (start, stop, registration, workflow completion)
//! - DEBUG: Detailed message traces (dispatch, responses, heartbeats)
//! - TRACE: Raw wire traffic
//!
//! `RUST_LOG` always wins. Otherwise debug mode can be enabled with
//! [`init_with_debug`] or the `WARDEN_DEBUG=1` env var.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

const DEBUG_ENV: &str = "WARDEN_DEBUG";

/// Initialize logging at the default level.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first subscriber is installed.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "warden=debug"
    } else {
        "warden=info"
    }
}
