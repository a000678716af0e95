//! Credential file lifecycle on the shared volume.
//!
//! Targets are reconciled toward a desired state each tick. Writes are atomic
//! from any concurrent reader's perspective: a sibling temp file in the target
//! directory is written, permissioned, and renamed into place. File contents
//! are never logged.

use crate::error::{Result, SupervisorError};
use crate::metrics;
use forgeguard_core::{CredentialKind, CredentialPair};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

/// Mode applied to every materialized credential file.
const CREDENTIAL_MODE: u32 = 0o600;

/// Desired state of the credential set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// All three files materialized on the shared volume
    Present,
    /// No files on the shared volume
    Absent,
}

/// Reconciles the three credential file pairs.
pub struct CredentialManager {
    pairs: Vec<CredentialPair>,
}

impl CredentialManager {
    /// Create a manager over the configured pairs.
    pub fn new(pairs: Vec<CredentialPair>) -> Self {
        Self { pairs }
    }

    /// Drive the target files toward `desired`. Returns true iff state on
    /// disk changed.
    ///
    /// A missing source is fatal; per-target IO failures are logged, leave
    /// the failing file unapplied, and the next tick retries.
    pub fn apply(&self, desired: CredentialState) -> Result<bool> {
        match desired {
            CredentialState::Present => self.ensure_present(),
            CredentialState::Absent => Ok(self.ensure_absent()),
        }
    }

    fn ensure_present(&self) -> Result<bool> {
        let mut changed = false;

        for pair in &self.pairs {
            let source_bytes =
                fs::read(&pair.source).map_err(|err| SupervisorError::SourceMissing {
                    path: pair.source.clone(),
                    source: err,
                })?;

            let up_to_date = matches!(fs::read(&pair.target), Ok(existing) if existing == source_bytes);
            if up_to_date {
                metrics::record_credential_operation("verify_skip", pair.kind.label());
                continue;
            }

            match write_atomic(&pair.target, &source_bytes) {
                Ok(()) => {
                    metrics::record_credential_operation("write", pair.kind.label());
                    info!(file = pair.kind.label(), "Credential file written");
                    changed = true;
                }
                Err(err) => {
                    error!(
                        file = pair.kind.label(),
                        error = %err,
                        "Credential file write failed"
                    );
                }
            }
        }

        Ok(changed)
    }

    fn ensure_absent(&self) -> bool {
        let mut changed = false;

        for pair in &self.pairs {
            match fs::remove_file(&pair.target) {
                Ok(()) => {
                    metrics::record_credential_operation("remove", pair.kind.label());
                    info!(file = pair.kind.label(), "Credential file removed");
                    changed = true;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(file = pair.kind.label(), "Credential file already absent");
                }
                Err(err) => {
                    error!(
                        file = pair.kind.label(),
                        error = %err,
                        "Credential file removal failed"
                    );
                }
            }
        }

        changed
    }

    /// Whether all three target files exist and are non-empty. Used by the
    /// startup-readiness endpoint.
    pub fn credentials_present(&self) -> bool {
        self.pairs.iter().all(|pair| {
            fs::metadata(&pair.target)
                .map(|metadata| metadata.len() > 0)
                .unwrap_or(false)
        })
    }

    /// The managed credential kinds, in reconciliation order.
    pub fn kinds(&self) -> Vec<CredentialKind> {
        self.pairs.iter().map(|pair| pair.kind).collect()
    }
}

fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file()
        .set_permissions(fs::Permissions::from_mode(CREDENTIAL_MODE))?;
    temp.persist(target).map_err(|err| err.error)?;
    Ok(())
}
