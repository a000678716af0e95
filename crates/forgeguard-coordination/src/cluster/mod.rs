//! Cross-cluster arbitration: state objects, health probing, peer watch.

pub mod arbiter;
pub mod health;
pub mod state;
pub mod watch;

pub use arbiter::{effective_state_and_priority, ClusterArbiter, ForgeDecision};
pub use health::{HealthProber, HealthState};
pub use state::{
    ClusterSpec, ClusterStateObject, ClusterStatus, Condition, ForgeState, HealthCheckSpec,
    HealthStatus, ObjectMeta, OverrideSpec,
};
pub use watch::{PeerEntry, PeerMirror, PeerWatcher};
