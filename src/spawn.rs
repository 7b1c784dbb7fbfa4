//! `ProcessSpawner` (spec §4.2, §5): launches a fully detached worker
//! process that survives parent exit, with the anti-fork-bomb guard from
//! spec §5 ("the spawn API inspects [`BACKGROUND_PROCESS`] and refuses to
//! spawn further workers from within a worker").

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::SpawnError;

/// Environment flag set inside every worker (spec §6).
pub const BACKGROUND_PROCESS_ENV: &str = "BACKGROUND_PROCESS";

/// Launches the worker binary detached, returning its PID once the OS has
/// accepted the spawn. Never blocks waiting for the child to finish.
pub trait ProcessSpawner: Send + Sync + std::fmt::Debug {
    fn spawn_worker(&self, worker_bin: &Path, hydration_file: &Path) -> Result<u32, SpawnError>;
}

/// Returns `true` if called from inside an already-spawned worker, in
/// which case spawning must be refused (spec §4.2 step 1, §5, §8
/// property 7).
pub fn is_reentrant() -> bool {
    std::env::var(BACKGROUND_PROCESS_ENV).as_deref() == Ok("1")
}

#[derive(Debug, Default)]
pub struct DetachedProcessSpawner;

impl ProcessSpawner for DetachedProcessSpawner {
    fn spawn_worker(&self, worker_bin: &Path, hydration_file: &Path) -> Result<u32, SpawnError> {
        if is_reentrant() {
            return Err(SpawnError::ReentrantSpawn);
        }

        let mut command = Command::new(worker_bin);
        command
            .arg(hydration_file)
            .env(BACKGROUND_PROCESS_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        detach(&mut command);

        let child = command.spawn().map_err(SpawnError::Os)?;
        Ok(child.id())
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: `setsid` is async-signal-safe and the only thing this
    // pre_exec hook does; it runs after fork and before exec in the
    // child, detaching it from the parent's session so the child
    // survives parent exit (spec §4.2 ProcessSpawner contract).
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(std::io::Error::from)?;
            Ok(())
        });
    }
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

/// A spawner used in tests: records invocations instead of touching the
/// OS process table, so pool/joiner tests can assert on call count and
/// arguments without forking real processes.
#[derive(Debug, Default)]
pub struct RecordingSpawner {
    pub calls: std::sync::Mutex<Vec<(PathBuf, PathBuf)>>,
    pub next_pid: std::sync::atomic::AtomicU32,
    pub fail: std::sync::atomic::AtomicBool,
}

impl ProcessSpawner for RecordingSpawner {
    fn spawn_worker(&self, worker_bin: &Path, hydration_file: &Path) -> Result<u32, SpawnError> {
        if is_reentrant() {
            return Err(SpawnError::ReentrantSpawn);
        }
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SpawnError::ImmediateExit(Some(1)));
        }
        self.calls
            .lock()
            .unwrap()
            .push((worker_bin.to_path_buf(), hydration_file.to_path_buf()));
        Ok(self.next_pid.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_spawner_returns_increasing_pids() {
        let spawner = RecordingSpawner::default();
        let a = spawner
            .spawn_worker(Path::new("/bin/worker"), Path::new("/tmp/a.json"))
            .unwrap();
        let b = spawner
            .spawn_worker(Path::new("/bin/worker"), Path::new("/tmp/b.json"))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(spawner.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn reentrant_spawn_is_refused() {
        // SAFETY: test-only, single-threaded section; restored immediately.
        unsafe { std::env::set_var(BACKGROUND_PROCESS_ENV, "1") };
        let spawner = RecordingSpawner::default();
        let err = spawner
            .spawn_worker(Path::new("/bin/worker"), Path::new("/tmp/a.json"))
            .unwrap_err();
        assert!(matches!(err, SpawnError::ReentrantSpawn));
        // SAFETY: see above.
        unsafe { std::env::remove_var(BACKGROUND_PROCESS_ENV) };
    }
}
