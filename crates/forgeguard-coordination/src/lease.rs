//! Lease records and the local leader election engine.

use crate::error::{CoordinationError, Result};
use crate::store::CoordinationStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A named coordination lease.
///
/// A replica considers itself leader iff `holder_identity` equals its own pod
/// name and the renewal is fresher than the lease duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Lease name, derived from the tenant tuple
    pub name: String,

    /// Pod currently holding the lease
    pub holder_identity: String,

    /// When the current holder first acquired the lease
    pub acquire_time: DateTime<Utc>,

    /// Last renewal by the holder
    pub renew_time: DateTime<Utc>,

    /// Seconds after `renew_time` at which the lease expires
    pub lease_duration_seconds: u64,

    /// Opaque version token for optimistic updates
    #[serde(default)]
    pub version: u64,
}

impl LeaseRecord {
    /// Build a lease held by `holder` as of `now`.
    pub fn held_by(
        name: impl Into<String>,
        holder: impl Into<String>,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            holder_identity: holder.into(),
            acquire_time: now,
            renew_time: now,
            lease_duration_seconds: duration.as_secs(),
            version: 0,
        }
    }

    /// Whether the lease has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let duration = ChronoDuration::seconds(self.lease_duration_seconds as i64);
        now - self.renew_time >= duration
    }
}

/// Outcome of one election tick.
#[derive(Debug, Clone)]
pub struct ElectionOutcome {
    /// Whether this replica holds the lease
    pub is_leader: bool,

    /// Current (or last-known) holder identity
    pub holder: Option<String>,
}

/// Callback fired when the local leadership verdict flips.
pub type TransitionCallback = Box<dyn Fn(bool) + Send + Sync>;

struct ElectionState {
    is_leader: bool,
    last_known_holder: Option<String>,
}

/// Lease-based local leader election.
///
/// One tick performs at most one store round-trip beyond the initial read;
/// conflicts are answered on the next tick, never retried within one. Store
/// failures report not-leader so the supervisor falls back to the safe
/// default of not forging.
pub struct LeaseElection {
    store: Arc<dyn CoordinationStore>,
    namespace: String,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    state: Mutex<ElectionState>,
    on_transition: Option<TransitionCallback>,
}

impl LeaseElection {
    /// Create an election engine for the given lease.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        namespace: impl Into<String>,
        lease_name: impl Into<String>,
        identity: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            lease_name: lease_name.into(),
            identity: identity.into(),
            lease_duration,
            state: Mutex::new(ElectionState {
                is_leader: false,
                last_known_holder: None,
            }),
            on_transition: None,
        }
    }

    /// Attach a callback fired on every leadership flip.
    pub fn with_transition_callback(mut self, callback: TransitionCallback) -> Self {
        self.on_transition = Some(callback);
        self
    }

    /// The identity this engine competes with.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Last observed leadership verdict.
    pub fn is_leader(&self) -> bool {
        self.state.lock().is_leader
    }

    /// Run one election tick: acquire, renew, or observe.
    pub async fn try_acquire_or_renew(&self) -> ElectionOutcome {
        let outcome = match self.tick().await {
            Ok(outcome) => outcome,
            Err(err) => {
                let last_known = self.state.lock().last_known_holder.clone();
                warn!(
                    lease = %self.lease_name,
                    error = %err,
                    "Election tick failed; reporting not-leader"
                );
                ElectionOutcome {
                    is_leader: false,
                    holder: last_known,
                }
            }
        };

        let flipped = {
            let mut state = self.state.lock();
            let flipped = state.is_leader != outcome.is_leader;
            state.is_leader = outcome.is_leader;
            if outcome.holder.is_some() {
                state.last_known_holder = outcome.holder.clone();
            }
            flipped
        };

        if flipped {
            info!(
                lease = %self.lease_name,
                is_leader = outcome.is_leader,
                holder = outcome.holder.as_deref().unwrap_or(""),
                "Leadership changed"
            );
            if let Some(callback) = &self.on_transition {
                callback(outcome.is_leader);
            }
        }

        outcome
    }

    async fn tick(&self) -> Result<ElectionOutcome> {
        let now = Utc::now();

        let lease = match self.store.get_lease(&self.namespace, &self.lease_name).await {
            Ok(lease) => lease,
            Err(CoordinationError::NotFound(_)) => return self.create(now).await,
            Err(err) => return Err(err),
        };

        if lease.holder_identity == self.identity {
            return self.renew(lease, now).await;
        }

        if lease.is_expired(now) {
            return self.take_over(lease, now).await;
        }

        Ok(ElectionOutcome {
            is_leader: false,
            holder: Some(lease.holder_identity),
        })
    }

    async fn create(&self, now: DateTime<Utc>) -> Result<ElectionOutcome> {
        let lease = LeaseRecord::held_by(
            self.lease_name.clone(),
            self.identity.clone(),
            now,
            self.lease_duration,
        );

        match self.store.create_lease(&self.namespace, lease).await {
            Ok(created) => {
                debug!(lease = %self.lease_name, "Created lease");
                Ok(ElectionOutcome {
                    is_leader: true,
                    holder: Some(created.holder_identity),
                })
            }
            // Another replica created it first; observe on the next tick.
            Err(CoordinationError::AlreadyExists(_)) | Err(CoordinationError::Conflict(_)) => {
                Ok(ElectionOutcome {
                    is_leader: false,
                    holder: None,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn renew(&self, mut lease: LeaseRecord, now: DateTime<Utc>) -> Result<ElectionOutcome> {
        lease.renew_time = now;
        lease.lease_duration_seconds = self.lease_duration.as_secs();

        match self.store.update_lease(&self.namespace, lease).await {
            Ok(updated) => Ok(ElectionOutcome {
                is_leader: true,
                holder: Some(updated.holder_identity),
            }),
            Err(CoordinationError::Conflict(_)) | Err(CoordinationError::NotFound(_)) => {
                Ok(ElectionOutcome {
                    is_leader: false,
                    holder: None,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn take_over(
        &self,
        mut lease: LeaseRecord,
        now: DateTime<Utc>,
    ) -> Result<ElectionOutcome> {
        let previous_holder = lease.holder_identity.clone();
        lease.holder_identity = self.identity.clone();
        lease.acquire_time = now;
        lease.renew_time = now;
        lease.lease_duration_seconds = self.lease_duration.as_secs();

        match self.store.update_lease(&self.namespace, lease).await {
            Ok(updated) => {
                info!(
                    lease = %self.lease_name,
                    previous = %previous_holder,
                    "Took over expired lease"
                );
                Ok(ElectionOutcome {
                    is_leader: true,
                    holder: Some(updated.holder_identity),
                })
            }
            // Lost the takeover race.
            Err(CoordinationError::Conflict(_)) | Err(CoordinationError::NotFound(_)) => {
                Ok(ElectionOutcome {
                    is_leader: false,
                    holder: Some(previous_holder),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Best-effort relinquish on shutdown: expire the lease so a standby can
    /// take over without waiting out the full duration.
    pub async fn release_if_held(&self) {
        let result: Result<()> = async {
            let mut lease = self.store.get_lease(&self.namespace, &self.lease_name).await?;
            if lease.holder_identity != self.identity {
                return Ok(());
            }

            let expired =
                Utc::now() - ChronoDuration::seconds(lease.lease_duration_seconds as i64);
            lease.renew_time = expired;
            self.store.update_lease(&self.namespace, lease).await?;
            info!(lease = %self.lease_name, "Released lease");
            Ok(())
        }
        .await;

        if let Err(err) = result {
            debug!(lease = %self.lease_name, error = %err, "Lease release skipped");
        }

        self.state.lock().is_leader = false;
    }
}
