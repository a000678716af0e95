//! Environment-driven configuration.
//!
//! All tunables arrive as environment variables. The recognized option set is
//! closed; every option has a default except `POD_NAME`. Validation failures
//! are fatal at startup and name the offending variable.

use crate::error::{CoreError, Result};
use crate::identity::ReplicaIdentity;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// The three credential files the supervisor manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialKind {
    /// KES signing key
    KesKey,
    /// VRF key
    VrfKey,
    /// Operational certificate
    OpCert,
}

impl CredentialKind {
    /// Stable label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            CredentialKind::KesKey => "kes_key",
            CredentialKind::VrfKey => "vrf_key",
            CredentialKind::OpCert => "op_cert",
        }
    }
}

/// One managed credential file: read-only source, shared-volume target.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    /// Which credential this pair carries
    pub kind: CredentialKind,

    /// Pre-mounted read-only source path
    pub source: PathBuf,

    /// Target path on the shared volume
    pub target: PathBuf,
}

/// Identity-related settings.
#[derive(Debug, Clone)]
pub struct IdentitySettings {
    /// Pod name (required, unique within the cluster)
    pub pod_name: String,

    /// Namespace of the pod
    pub namespace: String,

    /// Cardano network name
    pub network: String,

    /// Network magic, when the network needs one
    pub network_magic: Option<u64>,

    /// Bech32 pool id
    pub pool_id: Option<String>,

    /// Hex-encoded pool id
    pub pool_id_hex: Option<String>,

    /// Pool ticker
    pub pool_ticker: Option<String>,

    /// Application type label
    pub application: String,
}

/// Filesystem paths the supervisor touches.
#[derive(Debug, Clone)]
pub struct PathSettings {
    /// Node IPC socket path
    pub node_socket: PathBuf,

    /// KES key source → target
    pub kes: (PathBuf, PathBuf),

    /// VRF key source → target
    pub vrf: (PathBuf, PathBuf),

    /// Operational certificate source → target
    pub op_cert: (PathBuf, PathBuf),
}

/// Leader-election settings.
#[derive(Debug, Clone)]
pub struct ElectionSettings {
    /// Lease name override; derived from the tenant tuple when empty
    pub lease_name: Option<String>,

    /// Lease duration
    pub lease_duration: Duration,

    /// Main-loop tick period
    pub sleep_interval: Duration,
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            lease_name: None,
            lease_duration: Duration::from_secs(15),
            sleep_interval: Duration::from_secs(5),
        }
    }
}

/// Cluster-arbitration settings.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// Whether the cluster arbiter runs at all
    pub enabled: bool,

    /// Region label of this cluster
    pub region: Option<String>,

    /// Configured base priority, 1 = highest
    pub priority: i32,

    /// Health endpoint probed by the arbiter
    pub health_endpoint: Option<String>,

    /// Health probe interval
    pub health_interval: Duration,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            region: None,
            priority: 100,
            health_endpoint: None,
            health_interval: Duration::from_secs(30),
        }
    }
}

/// Complete supervisor configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Identity settings
    pub identity: IdentitySettings,

    /// Path settings
    pub paths: PathSettings,

    /// Election settings
    pub election: ElectionSettings,

    /// Cluster arbitration settings
    pub cluster: ClusterSettings,

    /// Port the metrics/readiness HTTP server binds
    pub metrics_port: u16,

    /// Bearer token protecting `/cluster-status`; route disabled when unset
    pub cluster_status_token: Option<String>,

    /// Skip the node socket gate (testing only)
    pub disable_socket_check: bool,
}

impl Settings {
    /// Assemble settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let identity = IdentitySettings {
            pod_name: require("POD_NAME")?,
            namespace: string_or("NAMESPACE", "default"),
            network: string_or("CARDANO_NETWORK", "mainnet"),
            network_magic: parse_opt::<u64>("NETWORK_MAGIC")?,
            pool_id: optional("POOL_ID"),
            pool_id_hex: optional("POOL_ID_HEX"),
            pool_ticker: optional("POOL_TICKER"),
            application: string_or("APPLICATION_TYPE", "block-producer"),
        };

        let paths = PathSettings {
            node_socket: path_or("NODE_SOCKET", "/ipc/node.socket"),
            kes: (
                path_or("SOURCE_KES_KEY", "/secrets/kes.skey"),
                path_or("TARGET_KES_KEY", "/ipc/kes.skey"),
            ),
            vrf: (
                path_or("SOURCE_VRF_KEY", "/secrets/vrf.skey"),
                path_or("TARGET_VRF_KEY", "/ipc/vrf.skey"),
            ),
            op_cert: (
                path_or("SOURCE_OP_CERT", "/secrets/node.cert"),
                path_or("TARGET_OP_CERT", "/ipc/node.cert"),
            ),
        };

        let election = ElectionSettings {
            lease_name: optional("LEASE_NAME"),
            lease_duration: Duration::from_secs(parse_or("LEASE_DURATION", 15)?),
            sleep_interval: Duration::from_secs(parse_or("SLEEP_INTERVAL", 5)?),
        };

        let cluster = ClusterSettings {
            enabled: bool_or("ENABLE_CLUSTER_MANAGEMENT", false)?,
            region: optional("CLUSTER_REGION"),
            priority: parse_or("CLUSTER_PRIORITY", 100)?,
            health_endpoint: optional("HEALTH_CHECK_ENDPOINT"),
            health_interval: Duration::from_secs(parse_or("HEALTH_CHECK_INTERVAL", 30)?),
        };

        let settings = Settings {
            identity,
            paths,
            election,
            cluster,
            metrics_port: parse_or("METRICS_PORT", 8000)?,
            cluster_status_token: optional("CLUSTER_STATUS_TOKEN"),
            disable_socket_check: bool_or("DISABLE_SOCKET_CHECK", false)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.identity.pod_name.is_empty() {
            return Err(CoreError::MissingVariable("POD_NAME"));
        }

        if !(1..=999).contains(&self.cluster.priority) {
            return Err(CoreError::invalid(
                "CLUSTER_PRIORITY",
                format!("{} is outside [1, 999]", self.cluster.priority),
            ));
        }

        if self.election.lease_duration.is_zero() {
            return Err(CoreError::invalid("LEASE_DURATION", "must be non-zero"));
        }

        if self.election.sleep_interval.is_zero() {
            return Err(CoreError::invalid("SLEEP_INTERVAL", "must be non-zero"));
        }

        if self.cluster.enabled && self.cluster.region.is_none() {
            return Err(CoreError::invalid(
                "CLUSTER_REGION",
                "required when ENABLE_CLUSTER_MANAGEMENT is set",
            ));
        }

        Ok(())
    }

    /// The replica identity this configuration describes.
    pub fn replica_identity(&self) -> ReplicaIdentity {
        ReplicaIdentity {
            pod_name: self.identity.pod_name.clone(),
            namespace: self.identity.namespace.clone(),
            network: self.identity.network.clone(),
            pool_id: self.identity.pool_id.clone(),
            region: self.cluster.region.clone(),
            application: self.identity.application.clone(),
        }
    }

    /// Lease name, honoring the override.
    pub fn lease_name(&self) -> String {
        match &self.election.lease_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.replica_identity().lease_name(),
        }
    }

    /// The three managed credential pairs.
    pub fn credential_pairs(&self) -> Vec<CredentialPair> {
        vec![
            CredentialPair {
                kind: CredentialKind::KesKey,
                source: self.paths.kes.0.clone(),
                target: self.paths.kes.1.clone(),
            },
            CredentialPair {
                kind: CredentialKind::VrfKey,
                source: self.paths.vrf.0.clone(),
                target: self.paths.vrf.1.clone(),
            },
            CredentialPair {
                kind: CredentialKind::OpCert,
                source: self.paths.op_cert.0.clone(),
                target: self.paths.op_cert.1.clone(),
            },
        ]
    }
}

fn require(name: &'static str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(CoreError::MissingVariable(name)),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn string_or(name: &str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

fn path_or(name: &str, default: &str) -> PathBuf {
    PathBuf::from(string_or(name, default))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| CoreError::invalid(name, e.to_string())),
        None => Ok(default),
    }
}

fn parse_opt<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| CoreError::invalid(name, e.to_string())),
        None => Ok(None),
    }
}

fn bool_or(name: &'static str, default: bool) -> Result<bool> {
    match optional(name) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(CoreError::invalid(
                name,
                format!("{} is not a recognized boolean", other),
            )),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment mutation is process-global; serialize the tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn base_settings() -> Settings {
        Settings {
            identity: IdentitySettings {
                pod_name: "pod-0".to_string(),
                namespace: "default".to_string(),
                network: "mainnet".to_string(),
                network_magic: None,
                pool_id: None,
                pool_id_hex: None,
                pool_ticker: None,
                application: "block-producer".to_string(),
            },
            paths: PathSettings {
                node_socket: PathBuf::from("/ipc/node.socket"),
                kes: ("/secrets/kes.skey".into(), "/ipc/kes.skey".into()),
                vrf: ("/secrets/vrf.skey".into(), "/ipc/vrf.skey".into()),
                op_cert: ("/secrets/node.cert".into(), "/ipc/node.cert".into()),
            },
            election: ElectionSettings::default(),
            cluster: ClusterSettings::default(),
            metrics_port: 8000,
            cluster_status_token: None,
            disable_socket_check: false,
        }
    }

    #[test]
    fn test_from_env_requires_pod_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("POD_NAME");
        let err = Settings::from_env().unwrap_err();
        assert!(matches!(err, CoreError::MissingVariable("POD_NAME")));
    }

    #[test]
    fn test_from_env_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("POD_NAME", "pod-0");
        env::remove_var("ENABLE_CLUSTER_MANAGEMENT");
        env::remove_var("LEASE_DURATION");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.identity.namespace, "default");
        assert_eq!(settings.election.lease_duration, Duration::from_secs(15));
        assert_eq!(settings.election.sleep_interval, Duration::from_secs(5));
        assert_eq!(settings.metrics_port, 8000);
        assert!(!settings.cluster.enabled);

        env::remove_var("POD_NAME");
    }

    #[test]
    fn test_from_env_rejects_bad_boolean() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("POD_NAME", "pod-0");
        env::set_var("ENABLE_CLUSTER_MANAGEMENT", "maybe");

        let err = Settings::from_env().unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidVariable {
                variable: "ENABLE_CLUSTER_MANAGEMENT",
                ..
            }
        ));

        env::remove_var("POD_NAME");
        env::remove_var("ENABLE_CLUSTER_MANAGEMENT");
    }

    #[test]
    fn test_validate_priority_bounds() {
        let mut settings = base_settings();
        settings.cluster.priority = 0;
        assert!(settings.validate().is_err());

        settings.cluster.priority = 1000;
        assert!(settings.validate().is_err());

        settings.cluster.priority = 1;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_cluster_requires_region() {
        let mut settings = base_settings();
        settings.cluster.enabled = true;
        assert!(settings.validate().is_err());

        settings.cluster.region = Some("us-east-1".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_lease_name_override() {
        let mut settings = base_settings();
        assert_eq!(settings.lease_name(), "cardano-node-leader");

        settings.election.lease_name = Some("custom-lease".to_string());
        assert_eq!(settings.lease_name(), "custom-lease");
    }

    #[test]
    fn test_credential_pairs_complete() {
        let settings = base_settings();
        let pairs = settings.credential_pairs();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].kind, CredentialKind::KesKey);
        assert_eq!(pairs[1].kind, CredentialKind::VrfKey);
        assert_eq!(pairs[2].kind, CredentialKind::OpCert);
    }
}
