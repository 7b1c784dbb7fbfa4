//! `taskdefer-worker`: the fixed binary that realizes `WorkerScript`
//! (spec §4.2). Parameterized by a hydration file path passed as its
//! only argument; see `taskdefer::worker` for the hydrate/run/write-status
//! lifecycle.

use std::path::PathBuf;

#[tokio::main]
async fn main() {
    taskdefer::logging::init_tracing();

    let hydration_path: PathBuf = match std::env::args().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => {
            eprintln!("usage: taskdefer-worker <hydration-file>");
            std::process::exit(2);
        }
    };

    tracing::info!(path = ?hydration_path, pid = std::process::id(), "taskdefer-worker starting");
    let code = taskdefer::worker::runtime::run(&hydration_path).await;
    tracing::info!(code, "taskdefer-worker exiting");
    std::process::exit(code);
}
