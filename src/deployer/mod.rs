//! Resource deployment: turns descriptors and identities into cluster objects
//!
//! Creation is ordered and fail-fast. An object that already exists is a
//! [`Error::ResourceConflict`]; any other API error is surfaced verbatim.
//! Nothing created before a failure is rolled back, so a half-deployed
//! network stays in place for inspection until `down` removes it.

pub mod resources;

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::identity::MaterializedIdentities;
use crate::kube_utils::{is_conflict, is_not_found};
use crate::network::NodeKind;
use crate::workload::WorkloadDescriptor;
use crate::{Error, Result};

/// Cluster operations needed to deploy and tear down a network
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a namespace
    async fn create_namespace(&self, namespace: &Namespace) -> Result<()>;

    /// Create a secret in `namespace`
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    /// Create a config map in `namespace`
    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()>;

    /// Create a persistent volume claim in `namespace`
    async fn create_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<()>;

    /// Create a service in `namespace`
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()>;

    /// Create a stateful set in `namespace`
    async fn create_stateful_set(&self, namespace: &str, stateful_set: &StatefulSet)
        -> Result<()>;

    /// Delete a namespace with background propagation.
    ///
    /// Returns `false` if the namespace did not exist.
    async fn delete_namespace(&self, name: &str) -> Result<bool>;

    /// Whether a namespace still exists (including while terminating)
    async fn namespace_exists(&self, name: &str) -> Result<bool>;
}

/// [`ClusterClient`] backed by a kube client
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn create<K>(api: Api<K>, obj: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
{
    let name = obj.meta().name.clone().unwrap_or_default();
    debug!(kind = %K::kind(&()), name = %name, "Creating resource");
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(()),
        Err(e) if is_conflict(&e) => Err(Error::conflict(K::kind(&()), name)),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        create(Api::<Namespace>::all(self.client.clone()), namespace).await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        create(Api::<Secret>::namespaced(self.client.clone(), namespace), secret).await
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        create(
            Api::<ConfigMap>::namespaced(self.client.clone(), namespace),
            config_map,
        )
        .await
    }

    async fn create_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<()> {
        create(
            Api::<PersistentVolumeClaim>::namespaced(self.client.clone(), namespace),
            pvc,
        )
        .await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        create(Api::<Service>::namespaced(self.client.clone(), namespace), service).await
    }

    async fn create_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<()> {
        create(
            Api::<StatefulSet>::namespaced(self.client.clone(), namespace),
            stateful_set,
        )
        .await
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api
            .delete(name, &DeleteParams::background().grace_period(0))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Creates the objects of a network in a fixed order
pub struct ResourceDeployer<'a> {
    client: &'a dyn ClusterClient,
    namespace: &'a str,
}

impl<'a> ResourceDeployer<'a> {
    /// Deployer into `namespace`
    pub fn new(client: &'a dyn ClusterClient, namespace: &'a str) -> Self {
        Self { client, namespace }
    }

    /// Create every object of a fresh network: namespace, genesis block,
    /// client root CAs (mutual TLS), organization maps, then each node
    pub async fn deploy_network(
        &self,
        workloads: &[WorkloadDescriptor],
        identities: &MaterializedIdentities,
        genesis_block: Vec<u8>,
    ) -> Result<()> {
        info!(namespace = %self.namespace, "Creating namespace");
        self.client
            .create_namespace(&resources::namespace(self.namespace))
            .await?;

        self.client
            .create_secret(self.namespace, &resources::genesis_secret(genesis_block))
            .await?;

        if let Some(roots) = &identities.client_root_cas {
            self.client
                .create_secret(self.namespace, &resources::client_root_ca_secret(roots))
                .await?;
        }

        for org in &identities.orgs {
            for map in resources::org_config_maps(org) {
                self.client.create_config_map(self.namespace, &map).await?;
            }
        }

        self.deploy_nodes(workloads, identities).await
    }

    /// Create only the per-node objects of peers added to a running network
    pub async fn deploy_extension(
        &self,
        workloads: &[WorkloadDescriptor],
        identities: &MaterializedIdentities,
    ) -> Result<()> {
        self.deploy_nodes(workloads, identities).await
    }

    async fn deploy_nodes(
        &self,
        workloads: &[WorkloadDescriptor],
        identities: &MaterializedIdentities,
    ) -> Result<()> {
        for desc in workloads {
            info!(workload = %desc.name, kind = %desc.kind, "Deploying workload");

            if matches!(desc.kind, NodeKind::Peer | NodeKind::Orderer) {
                let bundle = identities
                    .nodes
                    .iter()
                    .find(|b| b.node == desc.name)
                    .ok_or_else(|| {
                        Error::validation(format!("no identity materialized for {}", desc.name))
                    })?;
                for map in resources::node_config_maps(bundle) {
                    self.client.create_config_map(self.namespace, &map).await?;
                }
            }

            if let Some(claim) = &desc.storage {
                self.client
                    .create_pvc(self.namespace, &resources::persistent_volume_claim(claim))
                    .await?;
            }

            self.client
                .create_service(self.namespace, &resources::service(desc))
                .await?;
            self.client
                .create_stateful_set(self.namespace, &resources::stateful_set(desc))
                .await?;
        }
        Ok(())
    }

    /// Delete the namespace and wait for it to disappear.
    ///
    /// An already absent namespace is success. If it still exists after
    /// `timeout`, returns [`Error::NamespaceTerminating`].
    pub async fn delete_namespace(&self, poll: Duration, timeout: Duration) -> Result<()> {
        info!(namespace = %self.namespace, "Deleting namespace");
        if !self.client.delete_namespace(self.namespace).await? {
            info!(namespace = %self.namespace, "Namespace already absent");
            return Ok(());
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(poll);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(Error::NamespaceTerminating {
                        namespace: self.namespace.to_string(),
                    });
                }
                _ = ticker.tick() => {
                    if !self.client.namespace_exists(self.namespace).await? {
                        info!(namespace = %self.namespace, "Namespace deleted");
                        return Ok(());
                    }
                    debug!(namespace = %self.namespace, "Namespace still terminating");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use mockall::predicate::eq;

    use super::*;
    use crate::identity::{IdentityBundle, OrgIdentity};
    use crate::kube_utils::tests::api_error;
    use crate::network::tests::sample_spec;
    use crate::network::TlsMode;
    use crate::workload::WorkloadBuilder;

    fn identities_for(workloads: &[WorkloadDescriptor], mutual: bool) -> MaterializedIdentities {
        MaterializedIdentities {
            nodes: workloads
                .iter()
                .filter(|d| matches!(d.kind, NodeKind::Peer | NodeKind::Orderer))
                .map(|d| IdentityBundle {
                    node: d.name.clone(),
                    msp: Default::default(),
                    tls: Default::default(),
                })
                .collect(),
            orgs: vec![OrgIdentity {
                org: "org1".into(),
                admincerts: Default::default(),
                ca: Some(Default::default()),
            }],
            client_root_cas: mutual.then(Default::default),
        }
    }

    /// Records "kind/name" for every create, in call order
    fn recording_client(log: Arc<Mutex<Vec<String>>>) -> MockClusterClient {
        let mut client = MockClusterClient::new();
        let l = log.clone();
        client.expect_create_namespace().returning(move |ns| {
            l.lock().unwrap().push(format!("Namespace/{}", ns.metadata.name.clone().unwrap()));
            Ok(())
        });
        let l = log.clone();
        client.expect_create_secret().returning(move |_, s| {
            l.lock().unwrap().push(format!("Secret/{}", s.metadata.name.clone().unwrap()));
            Ok(())
        });
        let l = log.clone();
        client.expect_create_config_map().returning(move |_, m| {
            l.lock().unwrap().push(format!("ConfigMap/{}", m.metadata.name.clone().unwrap()));
            Ok(())
        });
        let l = log.clone();
        client.expect_create_pvc().returning(move |_, p| {
            l.lock().unwrap().push(format!("PVC/{}", p.metadata.name.clone().unwrap()));
            Ok(())
        });
        let l = log.clone();
        client.expect_create_service().returning(move |_, s| {
            l.lock().unwrap().push(format!("Service/{}", s.metadata.name.clone().unwrap()));
            Ok(())
        });
        let l = log;
        client.expect_create_stateful_set().returning(move |_, s| {
            l.lock().unwrap().push(format!("StatefulSet/{}", s.metadata.name.clone().unwrap()));
            Ok(())
        });
        client
    }

    // =========================================================================
    // Story: Deploying a network creates objects in a fixed order
    // =========================================================================

    #[tokio::test]
    async fn deploy_order_for_a_single_peer_network() {
        let mut spec = sample_spec();
        spec.peer_organizations.truncate(1);
        spec.peer_organizations[0].num_peers = 1;
        let workloads = WorkloadBuilder::new(&spec).build().unwrap();
        let ids = identities_for(&workloads, true);

        let log = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(log.clone());
        ResourceDeployer::new(&client, "fabric")
            .deploy_network(&workloads, &ids, vec![1, 2, 3])
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            [
                "Namespace/fabric",
                "Secret/genesisblock",
                "Secret/clientrootca",
                "ConfigMap/org1-admincerts",
                "ConfigMap/org1-ca",
                "ConfigMap/orderer0-ordererorg1-msp",
                "ConfigMap/orderer0-ordererorg1-tls",
                "PVC/orderer0-ordererorg1-data",
                "Service/orderer0-ordererorg1",
                "StatefulSet/orderer0-ordererorg1",
                "ConfigMap/peer0-org1-msp",
                "ConfigMap/peer0-org1-tls",
                "PVC/peer0-org1-data",
                "Service/peer0-org1",
                "StatefulSet/peer0-org1",
            ]
        );
    }

    #[tokio::test]
    async fn extension_creates_only_node_objects() {
        let spec = sample_spec();
        let workloads: Vec<_> = WorkloadBuilder::new(&spec)
            .build()
            .unwrap()
            .into_iter()
            .filter(|d| d.name == "peer1-org2")
            .collect();
        let ids = identities_for(&workloads, false);

        let log = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(log.clone());
        ResourceDeployer::new(&client, "fabric")
            .deploy_extension(&workloads, &ids)
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert!(log.iter().all(|entry| entry.contains("peer1-org2")), "{log:?}");
        assert_eq!(log.len(), 5);
    }

    #[tokio::test]
    async fn genesis_secret_is_created_in_the_network_namespace() {
        let mut spec = sample_spec();
        spec.tls = TlsMode::Enabled;
        let workloads = WorkloadBuilder::new(&spec).build().unwrap();
        let ids = identities_for(&workloads, false);

        let mut client = MockClusterClient::new();
        client.expect_create_namespace().times(1).returning(|_| Ok(()));
        client
            .expect_create_secret()
            .with(eq("fabric"), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));
        client.expect_create_config_map().returning(|_, _| Ok(()));
        client.expect_create_pvc().returning(|_, _| Ok(()));
        client.expect_create_service().returning(|_, _| Ok(()));
        client.expect_create_stateful_set().returning(|_, _| Ok(()));

        ResourceDeployer::new(&client, "fabric")
            .deploy_network(&workloads, &ids, vec![])
            .await
            .unwrap();
    }

    // =========================================================================
    // Story: Failures stop the deployment and leave earlier objects alone
    // =========================================================================

    #[tokio::test]
    async fn existing_service_aborts_before_later_objects() {
        let spec = sample_spec();
        let workloads = WorkloadBuilder::new(&spec).build().unwrap();
        let ids = identities_for(&workloads, true);

        let mut client = MockClusterClient::new();
        client.expect_create_namespace().returning(|_| Ok(()));
        client.expect_create_secret().returning(|_, _| Ok(()));
        client.expect_create_config_map().returning(|_, _| Ok(()));
        client.expect_create_pvc().returning(|_, _| Ok(()));
        client
            .expect_create_service()
            .times(1)
            .returning(|_, s| Err(Error::conflict("Service", s.metadata.name.clone().unwrap())));
        client.expect_create_stateful_set().never();
        client.expect_delete_namespace().never();

        let err = ResourceDeployer::new(&client, "fabric")
            .deploy_network(&workloads, &ids, vec![])
            .await
            .unwrap_err();
        match err {
            Error::ResourceConflict { kind, name } => {
                assert_eq!(kind, "Service");
                assert_eq!(name, "orderer0-ordererorg1");
            }
            other => panic!("expected ResourceConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn api_errors_surface_verbatim() {
        let spec = sample_spec();
        let workloads = WorkloadBuilder::new(&spec).build().unwrap();
        let ids = identities_for(&workloads, true);

        let mut client = MockClusterClient::new();
        client
            .expect_create_namespace()
            .returning(|_| Err(api_error(403, "Forbidden").into()));
        client.expect_create_secret().never();

        let err = ResourceDeployer::new(&client, "fabric")
            .deploy_network(&workloads, &ids, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Kube(_)));
        assert!(err.to_string().contains("Forbidden"));
    }

    #[tokio::test]
    async fn missing_identity_bundle_is_an_error() {
        let spec = sample_spec();
        let workloads = WorkloadBuilder::new(&spec).build().unwrap();
        let ids = MaterializedIdentities::default();

        let client = MockClusterClient::new();
        let err = ResourceDeployer::new(&client, "fabric")
            .deploy_extension(&workloads, &ids)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("orderer0-ordererorg1"));
    }

    // =========================================================================
    // Story: Namespace deletion is bounded and safe to repeat
    // =========================================================================

    #[tokio::test]
    async fn absent_namespace_is_already_deleted() {
        let mut client = MockClusterClient::new();
        client
            .expect_delete_namespace()
            .with(eq("fabric"))
            .times(1)
            .returning(|_| Ok(false));
        client.expect_namespace_exists().never();

        ResourceDeployer::new(&client, "fabric")
            .delete_namespace(Duration::from_millis(5), Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn waits_until_namespace_disappears() {
        let polls = Arc::new(Mutex::new(0));
        let p = polls.clone();
        let mut client = MockClusterClient::new();
        client.expect_delete_namespace().returning(|_| Ok(true));
        client.expect_namespace_exists().returning(move |_| {
            let mut n = p.lock().unwrap();
            *n += 1;
            Ok(*n < 3)
        });

        ResourceDeployer::new(&client, "fabric")
            .delete_namespace(Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(*polls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn stuck_namespace_reports_still_terminating() {
        let mut client = MockClusterClient::new();
        client.expect_delete_namespace().returning(|_| Ok(true));
        client.expect_namespace_exists().returning(|_| Ok(true));

        let err = ResourceDeployer::new(&client, "fabric")
            .delete_namespace(Duration::from_millis(5), Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NamespaceTerminating { ref namespace } if namespace == "fabric"));
        assert!(err.to_string().contains("still in terminating phase"));
    }
}
