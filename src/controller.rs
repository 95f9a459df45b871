//! Lifecycle controller
//!
//! Sequences the network lifecycle over the trait seams of the other
//! modules. Every step runs to completion before the next starts and the
//! first error aborts the action; nothing is rolled back.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ArtifactLayout, LauncherSettings};
use crate::deployer::{ClusterClient, KubeClusterClient, ResourceDeployer};
use crate::endpoint::{EndpointResolver, KubeEndpointResolver};
use crate::identity::IdentityMaterializer;
use crate::kube_utils::create_client;
use crate::network::{NetworkSpec, NodeRef};
use crate::profile::ProfileGenerator;
use crate::readiness::{verify_pods_running, HealthCheck, HttpHealthCheck, KubePodObserver, PodObserver};
use crate::retry::retry_with_backoff;
use crate::tools::{
    render_configtx, render_crypto_config, ChannelTool, Configtxgen, CryptoTool, Cryptogen,
    GENESIS_PROFILE, SYSTEM_CHANNEL,
};
use crate::workload::{WorkloadBuilder, WorkloadDescriptor};
use crate::{Error, Result};

/// Lifecycle action requested on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    /// Generate material, deploy, wait for health, write profiles
    Up,
    /// Delete the namespace and generated artifacts
    Down,
    /// Probe the health of every orderer and peer
    Health,
    /// Add the peers listed in `add_peer` to a running network
    Extend,
}

impl Action {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Health => "health",
            Self::Extend => "extend",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "health" => Ok(Self::Health),
            "extend" => Ok(Self::Extend),
            other => Err(Error::validation(format!(
                "unknown action '{other}', expected up, down, health or extend"
            ))),
        }
    }
}

/// External collaborators of the controller
pub struct Backends {
    /// Object creation and namespace deletion
    pub cluster: Arc<dyn ClusterClient>,
    /// Pod readiness
    pub pods: Arc<dyn PodObserver>,
    /// Node health probes
    pub health: Arc<dyn HealthCheck>,
    /// Reachable addresses of services
    pub endpoints: Arc<dyn EndpointResolver>,
    /// Crypto material generator
    pub crypto: Arc<dyn CryptoTool>,
    /// Genesis block generator
    pub channel: Arc<dyn ChannelTool>,
}

impl Backends {
    /// Cluster-backed collaborators using `kubeconfig` and the given tool binaries
    pub async fn connect(
        kubeconfig: &Path,
        namespace: &str,
        settings: &LauncherSettings,
        cryptogen: PathBuf,
        configtxgen: PathBuf,
    ) -> Result<Self> {
        let client = create_client(kubeconfig).await?;
        let endpoints: Arc<dyn EndpointResolver> =
            Arc::new(KubeEndpointResolver::new(client.clone(), namespace));
        Ok(Self {
            cluster: Arc::new(KubeClusterClient::new(client.clone())),
            pods: Arc::new(KubePodObserver::new(
                client,
                namespace,
                settings.pod_poll_interval,
                settings.pod_max_polls,
            )),
            health: Arc::new(HttpHealthCheck::new(endpoints.clone())?),
            endpoints,
            crypto: Arc::new(Cryptogen::new(cryptogen)),
            channel: Arc::new(Configtxgen::new(configtxgen)),
        })
    }
}

/// Runs lifecycle actions for one network
pub struct Launcher {
    spec: NetworkSpec,
    layout: ArtifactLayout,
    settings: LauncherSettings,
    backends: Backends,
}

impl Launcher {
    /// Launcher for `spec` writing artifacts under `layout`
    pub fn new(
        spec: NetworkSpec,
        layout: ArtifactLayout,
        settings: LauncherSettings,
        backends: Backends,
    ) -> Self {
        Self {
            spec,
            layout,
            settings,
            backends,
        }
    }

    /// Run one action
    pub async fn run(&self, action: Action) -> Result<()> {
        info!(action = %action, namespace = %self.namespace(), "Running action");
        match action {
            Action::Up => self.up().await,
            Action::Down => self.down().await,
            Action::Health => self.health().await,
            Action::Extend => self.extend().await,
        }
    }

    fn namespace(&self) -> &str {
        &self.spec.k8s.namespace
    }

    fn deployer(&self) -> ResourceDeployer<'_> {
        ResourceDeployer::new(self.backends.cluster.as_ref(), self.namespace())
    }

    /// Bring up a fresh network
    pub async fn up(&self) -> Result<()> {
        let spec = &self.spec;
        spec.validate()?;
        self.layout.ensure_dirs().await?;

        let workloads = WorkloadBuilder::new(spec).build()?;
        write(
            &self.layout.crypto_config_file(),
            &render_crypto_config(spec, false)?,
        )
        .await?;
        write(
            &self.layout.configtx_file(),
            &render_configtx(spec, &self.layout, &workloads)?,
        )
        .await?;

        self.backends
            .crypto
            .generate(
                &self.layout.crypto_config_file(),
                &self.layout.crypto_config_dir(),
            )
            .await?;
        let genesis_path = self.layout.genesis_block();
        self.backends
            .channel
            .genesis_block(
                &self.layout.config_dir(),
                GENESIS_PROFILE,
                SYSTEM_CHANNEL,
                &genesis_path,
            )
            .await?;
        let genesis = tokio::fs::read(&genesis_path)
            .await
            .map_err(|e| Error::io(&genesis_path, e))?;

        let identities = IdentityMaterializer::new(spec, &self.layout)
            .materialize_all()
            .await?;
        self.deployer()
            .deploy_network(&workloads, &identities, genesis)
            .await?;

        verify_pods_running(self.backends.pods.clone(), &labels(&workloads)).await?;

        tokio::time::sleep(self.settings.settle_delay).await;
        let mut nodes = spec.orderer_nodes();
        nodes.extend(spec.peer_nodes());
        self.check_health(&nodes).await?;

        ProfileGenerator::new(spec, &self.layout, self.backends.endpoints.as_ref())
            .generate_all()
            .await?;
        info!(namespace = %self.namespace(), "Network is up");
        Ok(())
    }

    /// Tear the network down.
    ///
    /// Local artifacts are removed even when the namespace is still
    /// terminating; the namespace error is returned afterwards.
    pub async fn down(&self) -> Result<()> {
        let deleted = self
            .deployer()
            .delete_namespace(
                self.settings.namespace_poll_interval,
                self.settings.namespace_delete_timeout,
            )
            .await;

        for dir in self.layout.generated_dirs() {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => info!(dir = %dir.display(), "Removed generated artifacts"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove generated artifacts"),
            }
        }

        deleted
    }

    /// Probe every orderer, then every peer
    pub async fn health(&self) -> Result<()> {
        let mut nodes = self.spec.orderer_nodes();
        nodes.extend(self.spec.peer_nodes());
        self.check_health(&nodes).await
    }

    /// Add the peers listed in `add_peer`
    pub async fn extend(&self) -> Result<()> {
        let spec = &self.spec;
        if spec.add_peer.is_empty() {
            return Err(Error::validation(
                "extend requires at least one add_peer entry",
            ));
        }
        spec.validate()?;
        self.layout.ensure_dirs().await?;

        write(
            &self.layout.crypto_config_file(),
            &render_crypto_config(spec, true)?,
        )
        .await?;
        self.backends
            .crypto
            .extend(
                &self.layout.crypto_config_file(),
                &self.layout.crypto_config_dir(),
            )
            .await?;

        let workloads = WorkloadBuilder::new(spec).build_extension()?;
        let identities = IdentityMaterializer::new(spec, &self.layout)
            .materialize_delta()
            .await?;
        self.deployer()
            .deploy_extension(&workloads, &identities)
            .await?;

        verify_pods_running(self.backends.pods.clone(), &labels(&workloads)).await?;

        tokio::time::sleep(self.settings.settle_delay).await;
        self.check_health(&spec.delta_peer_nodes()).await?;

        ProfileGenerator::new(spec, &self.layout, self.backends.endpoints.as_ref())
            .append_peers()
            .await?;
        info!(added = workloads.len(), "Network extended");
        Ok(())
    }

    async fn check_health(&self, nodes: &[NodeRef]) -> Result<()> {
        for node in nodes {
            retry_with_backoff(&self.settings.health_retry, &node.name, || {
                self.backends.health.check(&node.name)
            })
            .await?;
            info!(node = %node.name, "Healthy");
        }
        Ok(())
    }
}

fn labels(workloads: &[WorkloadDescriptor]) -> Vec<String> {
    workloads.iter().map(|w| w.name.clone()).collect()
}

async fn write(path: &Path, content: &str) -> Result<()> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| Error::io(path, e))
}
