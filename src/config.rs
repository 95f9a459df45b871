//! Launcher configuration: absolute artifact paths and lifecycle timings
//!
//! Every path used by the launcher is derived from an [`ArtifactLayout`]
//! resolved once at startup, so behavior never depends on the working
//! directory of the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::network::OrgRole;
use crate::retry::RetryConfig;
use crate::{
    Error, Result, HEALTH_SETTLE_DELAY, NAMESPACE_DELETE_TIMEOUT, NAMESPACE_POLL_INTERVAL,
    POD_MAX_POLLS, POD_POLL_INTERVAL,
};

/// Locations of every generated artifact
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    /// Use `root` as the artifact root; it must be absolute
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(Error::config(format!(
                "artifact root {} must be absolute",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Resolve `location` from a spec file; relative locations are taken
    /// relative to the directory containing the spec
    pub fn resolve(spec_path: &Path, location: &str) -> Result<Self> {
        let location = Path::new(location);
        let joined = if location.is_absolute() {
            location.to_path_buf()
        } else {
            let base = spec_path.parent().unwrap_or_else(|| Path::new("."));
            base.join(location)
        };
        let root = std::path::absolute(&joined).map_err(|e| Error::io(&joined, e))?;
        Self::new(root)
    }

    /// Artifact root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output of the crypto material generator
    pub fn crypto_config_dir(&self) -> PathBuf {
        self.root.join("crypto-config")
    }

    /// Genesis block and channel transactions
    pub fn channel_artifacts_dir(&self) -> PathBuf {
        self.root.join("channel-artifacts")
    }

    /// Per-organization connection profiles
    pub fn connection_profile_dir(&self) -> PathBuf {
        self.root.join("connection-profile")
    }

    /// Rendered inputs for the external tools
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// `crypto-config.yaml`
    pub fn crypto_config_file(&self) -> PathBuf {
        self.config_dir().join("crypto-config.yaml")
    }

    /// `configtx.yaml`
    pub fn configtx_file(&self) -> PathBuf {
        self.config_dir().join("configtx.yaml")
    }

    /// Orderer system channel genesis block
    pub fn genesis_block(&self) -> PathBuf {
        self.channel_artifacts_dir().join("genesis.block")
    }

    /// Connection profile for one organization
    pub fn connection_profile(&self, org: &str) -> PathBuf {
        self.connection_profile_dir()
            .join(format!("connection_profile_{org}.yaml"))
    }

    /// Organization directory in the crypto tree
    pub fn org_dir(&self, role: OrgRole, org: &str) -> PathBuf {
        self.crypto_config_dir().join(role.org_dir()).join(org)
    }

    /// Node directory in the crypto tree, keyed by crypto hostname
    pub fn node_dir(&self, role: OrgRole, org: &str, hostname: &str) -> PathBuf {
        self.org_dir(role, org).join(role.nodes_dir()).join(hostname)
    }

    /// Admin user directory of an organization
    pub fn admin_dir(&self, role: OrgRole, org: &str) -> PathBuf {
        self.org_dir(role, org)
            .join("users")
            .join(format!("Admin@{org}"))
    }

    /// Directories removed by `down`
    pub fn generated_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.crypto_config_dir(),
            self.channel_artifacts_dir(),
            self.connection_profile_dir(),
            self.config_dir(),
        ]
    }

    /// Create output directories that tools expect to exist
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.channel_artifacts_dir(),
            self.connection_profile_dir(),
            self.config_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::io(&dir, e))?;
        }
        Ok(())
    }
}

/// Timings used by the lifecycle controller
#[derive(Clone, Debug)]
pub struct LauncherSettings {
    /// Wait between pods running and the first health check
    pub settle_delay: Duration,
    /// Readiness tick interval
    pub pod_poll_interval: Duration,
    /// Ticks before a pod is declared timed out
    pub pod_max_polls: u32,
    /// Interval between namespace existence checks on `down`
    pub namespace_poll_interval: Duration,
    /// Bound on waiting for namespace deletion
    pub namespace_delete_timeout: Duration,
    /// Caller-side retry of health checks
    pub health_retry: RetryConfig,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            settle_delay: HEALTH_SETTLE_DELAY,
            pod_poll_interval: POD_POLL_INTERVAL,
            pod_max_polls: POD_MAX_POLLS,
            namespace_poll_interval: NAMESPACE_POLL_INTERVAL,
            namespace_delete_timeout: NAMESPACE_DELETE_TIMEOUT,
            health_retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(30),
                backoff_multiplier: 2.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_location_resolves_against_spec_directory() {
        let layout =
            ArtifactLayout::resolve(Path::new("/work/specs/network.yaml"), "artifacts").unwrap();
        assert_eq!(layout.root(), Path::new("/work/specs/artifacts"));
        assert_eq!(
            layout.genesis_block(),
            Path::new("/work/specs/artifacts/channel-artifacts/genesis.block")
        );
    }

    #[test]
    fn absolute_location_is_kept() {
        let layout = ArtifactLayout::resolve(Path::new("/work/network.yaml"), "/data/fabric").unwrap();
        assert_eq!(layout.root(), Path::new("/data/fabric"));
    }

    #[test]
    fn relative_root_is_rejected() {
        assert!(matches!(
            ArtifactLayout::new("artifacts"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn crypto_tree_paths_follow_generator_layout() {
        let layout = ArtifactLayout::new("/a").unwrap();
        assert_eq!(
            layout.node_dir(OrgRole::Peer, "org1", "peer0-org1.org1"),
            Path::new("/a/crypto-config/peerOrganizations/org1/peers/peer0-org1.org1")
        );
        assert_eq!(
            layout.node_dir(OrgRole::Orderer, "ordererorg1", "orderer0-ordererorg1.ordererorg1"),
            Path::new(
                "/a/crypto-config/ordererOrganizations/ordererorg1/orderers/orderer0-ordererorg1.ordererorg1"
            )
        );
        assert_eq!(
            layout.admin_dir(OrgRole::Peer, "org2"),
            Path::new("/a/crypto-config/peerOrganizations/org2/users/Admin@org2")
        );
        assert_eq!(
            layout.connection_profile("org1"),
            Path::new("/a/connection-profile/connection_profile_org1.yaml")
        );
    }

    #[test]
    fn down_removes_every_generated_directory() {
        let layout = ArtifactLayout::new("/a").unwrap();
        let dirs = layout.generated_dirs();
        assert_eq!(dirs.len(), 4);
        assert!(dirs.contains(&PathBuf::from("/a/crypto-config")));
        assert!(dirs.contains(&PathBuf::from("/a/channel-artifacts")));
        assert!(dirs.contains(&PathBuf::from("/a/connection-profile")));
    }

    #[tokio::test]
    async fn ensure_dirs_creates_tool_output_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(tmp.path().join("artifacts")).unwrap();
        layout.ensure_dirs().await.unwrap();
        assert!(layout.channel_artifacts_dir().is_dir());
        assert!(layout.connection_profile_dir().is_dir());
        assert!(layout.config_dir().is_dir());
    }
}
