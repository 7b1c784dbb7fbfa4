//! Structured logging setup (SPEC_FULL.md §1 Ambient Stack), mirroring
//! the teacher's `tasker_shared::logging::init_tracing` convention: a
//! `tracing-subscriber` `EnvFilter` layer for operator-facing logs, plus
//! — layered on top when [`crate::config::LoggingConfig::enabled`] is set
//! — the durable `background_tasks.log` sink described in spec §6, which
//! is a plain line-oriented file independent of whichever tracing
//! subscriber (if any) the host has installed.

use std::path::Path;
use std::sync::{Once, OnceLock};

use tracing_subscriber::prelude::*;

static INIT: Once = Once::new();
/// Held for the process lifetime: dropping it stops the background
/// flush thread and would silently truncate in-flight log writes.
static APPENDER_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install a global `tracing` subscriber reading `RUST_LOG` (defaulting
/// to `info`), safe to call more than once — only the first call takes
/// effect, matching a binary's "initialize logging first" startup step.
pub fn init_tracing() {
    init_tracing_to(None);
}

/// As [`init_tracing`], additionally layering a daily-rolling JSON file
/// sink under `log_directory` when one is given — the structured
/// counterpart to [`crate::log::TaskLog`]'s plain-text
/// `background_tasks.log`, for hosts that want machine-parseable logs on
/// disk independent of stdout.
pub fn init_tracing_to(log_directory: Option<&Path>) {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);
        let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);

        let file_layer = log_directory.map(|dir| {
            let appender = tracing_appender::rolling::daily(dir, "taskdefer.jsonl");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let _ = APPENDER_GUARD.set(guard);
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
        });

        if registry.with(file_layer).try_init().is_err() {
            // Another subscriber (e.g. the host application's) already won;
            // that's fine, we just don't double-install.
        }
    });
}
