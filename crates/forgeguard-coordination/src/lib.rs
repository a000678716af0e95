//! ForgeGuard Coordination
//!
//! Coordination primitives for the ForgeGuard supervisor: the store
//! abstraction with its in-memory implementation, lease-based local leader
//! election, the per-tenant forge status object, and the cross-cluster
//! arbitration layer (cluster state objects, health prober, peer watch).
//!
//! # Example
//!
//! ```no_run
//! use forgeguard_coordination::{CoordinationStore, LeaseElection, MemoryStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new()) as Arc<dyn CoordinationStore>;
//! let election = LeaseElection::new(
//!     store,
//!     "cardano",
//!     "cardano-leader-mainnet-qyfw2vvr",
//!     "bp-0",
//!     Duration::from_secs(15),
//! );
//!
//! let outcome = election.try_acquire_or_renew().await;
//! if outcome.is_leader {
//!     // Reconcile credentials toward Present.
//! }
//! # }
//! ```

pub mod cluster;
pub mod error;
pub mod lease;
pub mod status;
pub mod store;

pub use cluster::{
    effective_state_and_priority, ClusterArbiter, ClusterSpec, ClusterStateObject, ClusterStatus,
    Condition, ForgeDecision, ForgeState, HealthCheckSpec, HealthProber, HealthState,
    HealthStatus, ObjectMeta, OverrideSpec, PeerEntry, PeerMirror, PeerWatcher,
};
pub use error::{CoordinationError, Result};
pub use lease::{ElectionOutcome, LeaseElection, LeaseRecord, TransitionCallback};
pub use status::{ForgeStatus, StatusReporter};
pub use store::{
    ClusterWatchEvent, ClusterWatchStream, CoordinationStore, LabelSelector, MemoryStore,
};
