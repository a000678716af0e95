//! ForgeGuard Supervisor
//!
//! The co-located supervisor process for a Cardano block-producing node. It
//! guarantees that at most one replica across the fleet holds the forging
//! credentials at any moment: a lease-based local election picks the leader
//! within a cluster, an optional arbiter decides whether this cluster may
//! forge at all, and the credential manager materializes or revokes the key
//! files accordingly, signaling the node to reload.
//!
//! # Components
//!
//! - [`node::NodeObserver`] — node socket presence and PID discovery
//! - [`credentials::CredentialManager`] — atomic credential file lifecycle
//! - [`supervisor::Supervisor`] — the three-phase supervisor loop
//! - [`http`] — readiness, liveness, metrics, and peer-status endpoints

pub mod credentials;
pub mod error;
pub mod http;
pub mod metrics;
pub mod node;
pub mod signal;
pub mod supervisor;

pub use credentials::{CredentialManager, CredentialState};
pub use error::{Result, SupervisorError};
pub use node::{NodeObservation, NodeObserver, NodeTransition};
pub use signal::SignalReason;
pub use supervisor::{assemble, seed_cluster_spec, Supervisor, SupervisorParts, SupervisorStatus};
