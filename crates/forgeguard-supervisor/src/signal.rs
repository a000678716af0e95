//! Reload signaling toward the supervised node.
//!
//! The signal is an optimization: the node independently detects credential
//! file changes, so delivery is never guaranteed and failures never block a
//! tick.

use crate::error::{Result, SupervisorError};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Why a reload signal was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalReason {
    /// This replica just won the lease
    LeadershipAcquired,
    /// This replica just lost the lease
    LeadershipLost,
    /// The cluster arbiter started permitting local forging
    ClusterPermitted,
    /// The cluster arbiter stopped permitting local forging
    ClusterDenied,
    /// Bootstrap credentials removed after node start
    StartupCleanup,
}

impl SignalReason {
    /// Stable label for the signal counter.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalReason::LeadershipAcquired => "leadership_acquired",
            SignalReason::LeadershipLost => "leadership_lost",
            SignalReason::ClusterPermitted => "cluster_permitted",
            SignalReason::ClusterDenied => "cluster_denied",
            SignalReason::StartupCleanup => "startup_cleanup",
        }
    }
}

/// Deliver `SIGHUP` to the node process.
pub fn send_reload(pid: i32) -> Result<()> {
    kill(Pid::from_raw(pid), Signal::SIGHUP)
        .map_err(|err| SupervisorError::Signal { pid, source: err })
}
