// ShutdownHook: best-effort cleanup of server processes when the harness
// itself is ending (Ctrl+C, SIGTERM, orchestrator shutdown).
//
// Firing sends a terminate signal and returns immediately. Nothing waits for
// the server to exit, and a server that ignores the signal keeps running.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Default)]
struct HookState {
    pids: BTreeSet<u32>,
    fired: bool,
}

/// Tracks live server processes and terminates them when fired.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHook {
    state: Arc<Mutex<HookState>>,
}

impl ShutdownHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a live process. If the hook already fired, the process is
    /// signalled right away instead.
    pub fn register(&self, pid: u32) {
        let mut state = self.state.lock();
        if state.fired {
            drop(state);
            terminate_process(pid);
            return;
        }
        state.pids.insert(pid);
    }

    /// Stop tracking a process, normally because it has exited.
    pub fn unregister(&self, pid: u32) {
        self.state.lock().pids.remove(&pid);
    }

    /// Processes currently tracked, in ascending pid order.
    pub fn tracked(&self) -> Vec<u32> {
        self.state.lock().pids.iter().copied().collect()
    }

    pub fn has_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Send a terminate signal to every tracked process without waiting.
    ///
    /// Returns how many signals were delivered. Firing again re-signals the
    /// processes that are still tracked.
    pub fn fire(&self) -> usize {
        let pids: Vec<u32> = {
            let mut state = self.state.lock();
            state.fired = true;
            state.pids.iter().copied().collect()
        };

        if !pids.is_empty() {
            tracing::info!("Stopping server...");
        }
        pids.into_iter().filter(|pid| terminate_process(*pid)).count()
    }
}

/// Ask a process to terminate (SIGTERM). Returns whether the signal was sent.
#[cfg(unix)]
pub fn terminate_process(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => {
            tracing::debug!(pid, "Sent SIGTERM to server process");
            true
        }
        Err(e) => {
            tracing::debug!(pid, error = %e, "Failed to send SIGTERM to server process");
            false
        }
    }
}

/// Non-Unix platforms have no portable terminate signal; the child handle's
/// own kill-on-drop takes over when the harness exits.
#[cfg(not(unix))]
pub fn terminate_process(pid: u32) -> bool {
    tracing::warn!(pid, "Cannot signal server process on this platform");
    false
}
