//! Supervised node observation: socket presence and process discovery.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Executable name of the supervised node process.
const NODE_PROCESS_NAME: &str = "cardano-node";

/// Consecutive positive checks before the node counts as stably present.
/// Avoids racing with socket re-creation during a node restart.
const STABLE_CHECKS: u32 = 2;

/// A presence transition observed between two checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTransition {
    /// Socket appeared since the previous check
    Ready,
    /// Socket disappeared since the previous check
    Failed,
}

/// Result of one presence check.
#[derive(Debug, Clone, Copy)]
pub struct NodeObservation {
    /// Whether the socket exists right now
    pub present: bool,

    /// Transition since the previous check, if any
    pub transition: Option<NodeTransition>,
}

/// Watches the supervised node's IPC socket.
pub struct NodeObserver {
    socket_path: PathBuf,
    disable_socket_check: bool,
    consecutive_present: u32,
    last_present: bool,
}

impl NodeObserver {
    /// Create an observer for the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>, disable_socket_check: bool) -> Self {
        Self {
            socket_path: socket_path.into(),
            disable_socket_check,
            consecutive_present: 0,
            last_present: false,
        }
    }

    /// Whether the node IPC socket exists and is a socket.
    pub fn is_node_present(&self) -> bool {
        if self.disable_socket_check {
            return true;
        }
        match fs::symlink_metadata(&self.socket_path) {
            Ok(metadata) => metadata.file_type().is_socket(),
            Err(_) => false,
        }
    }

    /// Check presence and fold the result into the dwell counter.
    pub fn observe(&mut self) -> NodeObservation {
        let present = self.is_node_present();

        let transition = match (self.last_present, present) {
            (false, true) => Some(NodeTransition::Ready),
            (true, false) => Some(NodeTransition::Failed),
            _ => None,
        };

        if present {
            self.consecutive_present = self.consecutive_present.saturating_add(1);
        } else {
            self.consecutive_present = 0;
        }
        self.last_present = present;

        NodeObservation {
            present,
            transition,
        }
    }

    /// Whether the socket has existed for the dwell window.
    pub fn is_stably_present(&self) -> bool {
        self.disable_socket_check || self.consecutive_present >= STABLE_CHECKS
    }
}

/// Scan the process table for the node executable.
///
/// A missing PID is an operating mode, not an error: with disjoint process
/// namespaces the signaling transport is simply unavailable and credential
/// file changes alone drive the node. Enumeration errors mean "PID unknown".
pub fn find_node_pid() -> Option<i32> {
    find_pid_by_name(Path::new("/proc"), NODE_PROCESS_NAME)
}

fn find_pid_by_name(proc_root: &Path, name: &str) -> Option<i32> {
    let entries = match fs::read_dir(proc_root) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(error = %err, "Process table enumeration failed");
            return None;
        }
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(pid) = file_name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };

        let comm_path = entry.path().join("comm");
        match fs::read_to_string(&comm_path) {
            Ok(comm) if comm.trim() == name => return Some(pid),
            Ok(_) => {}
            // Processes exit between readdir and read; ignore.
            Err(err) => debug!(pid, error = %err, "Skipping unreadable process entry"),
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn test_absent_socket() {
        let dir = tempfile::tempdir().unwrap();
        let observer = NodeObserver::new(dir.path().join("node.socket"), false);
        assert!(!observer.is_node_present());
    }

    #[test]
    fn test_regular_file_is_not_a_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.socket");
        fs::write(&path, b"not a socket").unwrap();

        let observer = NodeObserver::new(&path, false);
        assert!(!observer.is_node_present());
    }

    #[test]
    fn test_dwell_requires_two_checks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.socket");
        let _listener = UnixListener::bind(&path).unwrap();

        let mut observer = NodeObserver::new(&path, false);
        assert!(!observer.is_stably_present());

        let obs = observer.observe();
        assert!(obs.present);
        assert_eq!(obs.transition, Some(NodeTransition::Ready));
        assert!(!observer.is_stably_present());

        observer.observe();
        assert!(observer.is_stably_present());
    }

    #[test]
    fn test_failure_transition_resets_dwell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.socket");

        let mut observer = NodeObserver::new(&path, false);
        {
            let _listener = UnixListener::bind(&path).unwrap();
            observer.observe();
            observer.observe();
            assert!(observer.is_stably_present());
            fs::remove_file(&path).unwrap();
        }

        let obs = observer.observe();
        assert!(!obs.present);
        assert_eq!(obs.transition, Some(NodeTransition::Failed));
        assert!(!observer.is_stably_present());
    }

    #[test]
    fn test_disabled_check_is_always_present() {
        let mut observer = NodeObserver::new("/nonexistent/node.socket", true);
        assert!(observer.is_node_present());
        assert!(observer.is_stably_present());
        assert!(observer.observe().present);
    }

    #[test]
    fn test_pid_scan_handles_missing_proc_root() {
        assert_eq!(find_pid_by_name(Path::new("/nonexistent-proc"), "x"), None);
    }

    #[test]
    fn test_pid_scan_finds_own_process() {
        // Our own comm is visible under /proc on Linux test runners.
        let own_comm = fs::read_to_string("/proc/self/comm").unwrap();
        let pid = find_pid_by_name(Path::new("/proc"), own_comm.trim());
        assert!(pid.is_some());
    }
}
