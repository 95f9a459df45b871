//! Maps a [`NetworkSpec`] to ordered [`WorkloadDescriptor`]s

use std::collections::BTreeMap;

use super::ports::{PortAllocator, PortClass};
use super::{
    ContainerSpec, KeyToPath, PortSpec, StorageClaim, VolumeMount, VolumeSource, VolumeSpec,
    WorkloadDescriptor,
};
use crate::network::{DbKind, NetworkSpec, NodeKind, NodeRef, ServiceType};
use crate::Result;

/// Root under which identity material is mounted in every container
pub const ARTIFACTS_MOUNT: &str = "/etc/hyperledger/fabric/artifacts";
/// Secret holding the orderer system channel genesis block
pub const GENESIS_SECRET: &str = "genesisblock";
/// Secret holding every organization's TLS CA certificate for mutual TLS
pub const CLIENT_ROOT_CA_SECRET: &str = "clientrootca";

const LEDGER_MOUNT: &str = "/var/hyperledger/production";
const COUCHDB_MOUNT: &str = "/opt/couchdb/data";
const COUCHDB_PORT: u16 = 5984;
const CA_INTERNAL_PORT: u16 = 7054;
const CHAINCODE_LISTEN_PORT: u16 = 7052;
const DIND_PORT: u16 = 2375;

/// Builds workload descriptors from a validated spec
pub struct WorkloadBuilder<'a> {
    spec: &'a NetworkSpec,
}

impl<'a> WorkloadBuilder<'a> {
    /// Builder over `spec`
    pub fn new(spec: &'a NetworkSpec) -> Self {
        Self { spec }
    }

    /// Descriptors for a fresh deployment.
    ///
    /// Orderer organizations come first (orderers, then CAs), followed by
    /// peer organizations (CAs, then each peer preceded by its CouchDB).
    pub fn build(&self) -> Result<Vec<WorkloadDescriptor>> {
        let mut ports = PortAllocator::new();
        let mut out = Vec::new();

        for org in &self.spec.orderer_organizations {
            for j in 0..org.num_orderers {
                let node = NodeRef::new(NodeKind::Orderer, j, &org.name);
                out.push(self.orderer(&node, &org.msp_id, &mut ports)?);
            }
            for j in 0..org.num_ca {
                let node = NodeRef::new(NodeKind::Ca, j, &org.name);
                out.push(self.ca(&node, &mut ports)?);
            }
        }

        for org in &self.spec.peer_organizations {
            for j in 0..org.num_ca {
                let node = NodeRef::new(NodeKind::Ca, j, &org.name);
                out.push(self.ca(&node, &mut ports)?);
            }
            for j in 0..org.num_peers {
                let node = NodeRef::new(NodeKind::Peer, j, &org.name);
                out.extend(self.peer_with_db(&node, &org.msp_id, &mut ports)?);
            }
        }

        Ok(out)
    }

    /// Descriptors for the peers requested by `add_peer` only.
    ///
    /// Peer cursors resume after every peer of the original deployment so the
    /// new nodes never collide with running ones.
    pub fn build_extension(&self) -> Result<Vec<WorkloadDescriptor>> {
        let mut ports = PortAllocator::resuming_after(self.spec.total_peers())?;
        let mut out = Vec::new();
        for node in self.spec.delta_peer_nodes() {
            let msp_id = self
                .spec
                .peer_org(&node.org)
                .map(|o| o.msp_id.clone())
                .unwrap_or_default();
            out.extend(self.peer_with_db(&node, &msp_id, &mut ports)?);
        }
        Ok(out)
    }

    fn peer_with_db(
        &self,
        node: &NodeRef,
        msp_id: &str,
        ports: &mut PortAllocator,
    ) -> Result<Vec<WorkloadDescriptor>> {
        let mut out = Vec::with_capacity(2);
        if self.spec.peer_db == DbKind::CouchDb {
            out.push(self.couchdb(node));
        }
        out.push(self.peer(node, msp_id, ports)?);
        Ok(out)
    }

    fn peer(
        &self,
        node: &NodeRef,
        msp_id: &str,
        ports: &mut PortAllocator,
    ) -> Result<WorkloadDescriptor> {
        let spec = self.spec;
        let port = ports.next(PortClass::Peer)?;
        let metrics = ports.next(PortClass::PeerMetrics)?;
        let address = format!("{}:{}", node.name, port);

        let mut peer = ContainerSpec::new("peer", spec.docker.peer_image(&spec.fabric_version))
            .with_env("CORE_PEER_ID", &node.name)
            .with_env("CORE_PEER_ADDRESS", &address)
            .with_env("CORE_PEER_LISTENADDRESS", format!("0.0.0.0:{port}"))
            .with_env(
                "CORE_PEER_CHAINCODEADDRESS",
                format!("{}:{CHAINCODE_LISTEN_PORT}", node.name),
            )
            .with_env(
                "CORE_PEER_CHAINCODELISTENADDRESS",
                format!("0.0.0.0:{CHAINCODE_LISTEN_PORT}"),
            )
            .with_env("CORE_PEER_GOSSIP_BOOTSTRAP", &address)
            .with_env("CORE_PEER_GOSSIP_EXTERNALENDPOINT", &address)
            .with_env(
                "CORE_PEER_GOSSIP_USELEADERELECTION",
                spec.gossip_enable.to_string(),
            )
            .with_env("CORE_PEER_GOSSIP_ORGLEADER", (!spec.gossip_enable).to_string())
            .with_env("CORE_PEER_LOCALMSPID", msp_id)
            .with_env("CORE_PEER_MSPCONFIGPATH", format!("{ARTIFACTS_MOUNT}/msp"))
            .with_env(
                "CORE_OPERATIONS_LISTENADDRESS",
                format!("0.0.0.0:{metrics}"),
            )
            .with_env("CORE_METRICS_PROVIDER", self.metrics_provider())
            .with_env("CORE_VM_ENDPOINT", format!("tcp://localhost:{DIND_PORT}"))
            .with_env("FABRIC_LOGGING_SPEC", &spec.logging.peer);
        peer.command = vec!["peer".to_string()];
        peer.args = vec!["node".to_string(), "start".to_string()];
        peer.resources = spec.k8s.resources.peers.clone();

        peer = self.peer_tls_env(peer);
        peer = match spec.peer_db {
            DbKind::CouchDb => peer
                .with_env("CORE_LEDGER_STATE_STATEDATABASE", "CouchDB")
                .with_env(
                    "CORE_LEDGER_STATE_COUCHDBCONFIG_COUCHDBADDRESS",
                    format!(
                        "{}:{}",
                        crate::network::node_name(NodeKind::CouchDb, node.index, &node.org),
                        COUCHDB_PORT
                    ),
                )
                .with_env("CORE_LEDGER_STATE_COUCHDBCONFIG_USERNAME", "admin")
                .with_env("CORE_LEDGER_STATE_COUCHDBCONFIG_PASSWORD", "adminpw"),
            DbKind::GoLevelDb => peer.with_env("CORE_LEDGER_STATE_STATEDATABASE", "goleveldb"),
        };

        let mut dind = ContainerSpec::new("dind", spec.docker.dind_image());
        dind.args = vec![
            "dockerd".to_string(),
            "-H".to_string(),
            format!("tcp://0.0.0.0:{DIND_PORT}"),
            "-H".to_string(),
            "unix:///var/run/docker.sock".to_string(),
        ];
        dind.privileged = true;
        dind.resources = spec.k8s.resources.dind.clone();

        let mut volumes = self.identity_volumes(node);
        peer.mounts = self.identity_mounts();
        let storage = self.storage_for(&node.name);
        if let Some(claim) = &storage {
            volumes.push(claim_volume(claim));
            peer.mounts.push(VolumeMount::new("data", LEDGER_MOUNT));
        }

        Ok(WorkloadDescriptor {
            name: node.name.clone(),
            kind: NodeKind::Peer,
            org: node.org.clone(),
            containers: vec![dind, peer],
            volumes,
            ports: vec![PortSpec::allocated(port), PortSpec::allocated(metrics)],
            service_type: spec.k8s.service_type,
            annotations: self.metrics_annotations(metrics),
            storage,
        })
    }

    fn orderer(
        &self,
        node: &NodeRef,
        msp_id: &str,
        ports: &mut PortAllocator,
    ) -> Result<WorkloadDescriptor> {
        let spec = self.spec;
        let port = ports.next(PortClass::Orderer)?;
        let metrics = ports.next(PortClass::OrdererMetrics)?;

        let mut orderer =
            ContainerSpec::new("orderer", spec.docker.orderer_image(&spec.fabric_version))
                .with_env("ORDERER_GENERAL_LISTENADDRESS", "0.0.0.0")
                .with_env("ORDERER_GENERAL_LISTENPORT", port.to_string())
                .with_env("ORDERER_GENERAL_LOCALMSPID", msp_id)
                .with_env("ORDERER_GENERAL_LOCALMSPDIR", format!("{ARTIFACTS_MOUNT}/msp"))
                .with_env("ORDERER_GENERAL_BOOTSTRAPMETHOD", "file")
                .with_env(
                    "ORDERER_GENERAL_BOOTSTRAPFILE",
                    format!("{ARTIFACTS_MOUNT}/genesis/genesis.block"),
                )
                .with_env(
                    "ORDERER_OPERATIONS_LISTENADDRESS",
                    format!("0.0.0.0:{metrics}"),
                )
                .with_env("ORDERER_METRICS_PROVIDER", self.metrics_provider())
                .with_env("FABRIC_LOGGING_SPEC", &spec.logging.orderer);
        orderer.command = vec!["orderer".to_string()];
        orderer.resources = spec.k8s.resources.orderers.clone();
        orderer = self.orderer_tls_env(orderer);

        let mut volumes = self.identity_volumes(node);
        volumes.push(VolumeSpec {
            name: "genesis".to_string(),
            source: VolumeSource::Secret {
                name: GENESIS_SECRET.to_string(),
            },
        });
        orderer.mounts = self.identity_mounts();
        orderer
            .mounts
            .push(VolumeMount::new("genesis", format!("{ARTIFACTS_MOUNT}/genesis")));

        let storage = self.storage_for(&node.name);
        if let Some(claim) = &storage {
            volumes.push(claim_volume(claim));
            orderer.mounts.push(VolumeMount::new("data", LEDGER_MOUNT));
        }

        Ok(WorkloadDescriptor {
            name: node.name.clone(),
            kind: NodeKind::Orderer,
            org: node.org.clone(),
            containers: vec![orderer],
            volumes,
            ports: vec![PortSpec::allocated(port), PortSpec::allocated(metrics)],
            service_type: spec.k8s.service_type,
            annotations: self.metrics_annotations(metrics),
            storage,
        })
    }

    fn ca(&self, node: &NodeRef, ports: &mut PortAllocator) -> Result<WorkloadDescriptor> {
        let spec = self.spec;
        let external = ports.next(PortClass::Ca)?;
        let ca_dir = format!("{ARTIFACTS_MOUNT}/ca");

        let mut ca = ContainerSpec::new("ca", spec.docker.ca_image())
            .with_env("FABRIC_CA_HOME", "/etc/hyperledger/fabric-ca-server")
            .with_env("FABRIC_CA_SERVER_CA_NAME", &node.name)
            .with_env("FABRIC_CA_SERVER_CA_CERTFILE", format!("{ca_dir}/ca-cert"))
            .with_env("FABRIC_CA_SERVER_CA_KEYFILE", format!("{ca_dir}/ca-key"))
            .with_env("FABRIC_CA_SERVER_PORT", CA_INTERNAL_PORT.to_string())
            .with_env(
                "FABRIC_CA_SERVER_TLS_ENABLED",
                spec.tls.is_enabled().to_string(),
            )
            .with_env("FABRIC_CA_SERVER_LOGLEVEL", spec.logging.ca.to_lowercase());
        if spec.tls.is_enabled() {
            ca = ca
                .with_env("FABRIC_CA_SERVER_TLS_CERTFILE", format!("{ca_dir}/tlsca-cert"))
                .with_env("FABRIC_CA_SERVER_TLS_KEYFILE", format!("{ca_dir}/tlsca-key"));
        }
        ca.command = vec!["fabric-ca-server".to_string()];
        ca.args = vec![
            "start".to_string(),
            "-b".to_string(),
            "admin:adminpw".to_string(),
        ];
        ca.resources = spec.k8s.resources.ca.clone();
        ca.mounts = vec![VolumeMount::new("ca", ca_dir)];

        Ok(WorkloadDescriptor {
            name: node.name.clone(),
            kind: NodeKind::Ca,
            org: node.org.clone(),
            containers: vec![ca],
            volumes: vec![VolumeSpec {
                name: "ca".to_string(),
                source: VolumeSource::ConfigMap {
                    name: format!("{}-ca", node.org),
                },
            }],
            ports: vec![PortSpec {
                port: CA_INTERNAL_PORT,
                node_port: Some(external),
            }],
            service_type: spec.k8s.service_type,
            annotations: BTreeMap::new(),
            storage: None,
        })
    }

    fn couchdb(&self, peer: &NodeRef) -> WorkloadDescriptor {
        let spec = self.spec;
        let name = crate::network::node_name(NodeKind::CouchDb, peer.index, &peer.org);

        let mut db = ContainerSpec::new("couchdb", spec.docker.couchdb_image())
            .with_env("COUCHDB_USER", "admin")
            .with_env("COUCHDB_PASSWORD", "adminpw");
        db.resources = spec.k8s.resources.couchdb.clone();

        let storage = self.storage_for(&name);
        let mut volumes = Vec::new();
        if let Some(claim) = &storage {
            volumes.push(claim_volume(claim));
            db.mounts.push(VolumeMount::new("data", COUCHDB_MOUNT));
        }

        WorkloadDescriptor {
            name,
            kind: NodeKind::CouchDb,
            org: peer.org.clone(),
            containers: vec![db],
            volumes,
            ports: vec![PortSpec::internal(COUCHDB_PORT)],
            service_type: ServiceType::ClusterIp,
            annotations: BTreeMap::new(),
            storage,
        }
    }

    /// MSP, TLS and (for mutual TLS) client root CA volumes of a peer or orderer
    fn identity_volumes(&self, node: &NodeRef) -> Vec<VolumeSpec> {
        let org = &node.org;
        let mut msp_items = vec![
            key("cacerts", format!("cacerts/ca.{org}-cert.pem")),
            key("signcerts", format!("signcerts/{}-cert.pem", node.hostname())),
            key("keystore", "keystore/priv_sk"),
            key("tlscacerts", format!("tlscacerts/tlsca.{org}-cert.pem")),
        ];
        let mut sources = Vec::with_capacity(2);
        if self.spec.enable_node_ous {
            msp_items.push(key("config", "config.yaml"));
            sources.push((format!("{}-msp", node.name), msp_items));
        } else {
            sources.push((format!("{}-msp", node.name), msp_items));
            let admin = format!("Admin@{org}-cert.pem");
            sources.push((
                format!("{org}-admincerts"),
                vec![key(admin.clone(), format!("admincerts/{admin}"))],
            ));
        }

        let mut volumes = vec![
            VolumeSpec {
                name: "msp".to_string(),
                source: VolumeSource::Projected { sources },
            },
            VolumeSpec {
                name: "tls".to_string(),
                source: VolumeSource::ConfigMap {
                    name: format!("{}-tls", node.name),
                },
            },
        ];
        if self.spec.tls.is_mutual() {
            volumes.push(VolumeSpec {
                name: "clientrootca".to_string(),
                source: VolumeSource::Secret {
                    name: CLIENT_ROOT_CA_SECRET.to_string(),
                },
            });
        }
        volumes
    }

    fn identity_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = vec![
            VolumeMount::new("msp", format!("{ARTIFACTS_MOUNT}/msp")),
            VolumeMount::new("tls", format!("{ARTIFACTS_MOUNT}/tls")),
        ];
        if self.spec.tls.is_mutual() {
            mounts.push(VolumeMount::new(
                "clientrootca",
                format!("{ARTIFACTS_MOUNT}/clientrootca"),
            ));
        }
        mounts
    }

    fn client_root_ca_files(&self) -> Vec<String> {
        self.spec
            .organizations()
            .map(|o| format!("{ARTIFACTS_MOUNT}/clientrootca/{}.pem", o.name))
            .collect()
    }

    fn peer_tls_env(&self, c: ContainerSpec) -> ContainerSpec {
        let tls = &self.spec.tls;
        let mut c = c.with_env("CORE_PEER_TLS_ENABLED", tls.is_enabled().to_string());
        if tls.is_enabled() {
            c = c
                .with_env("CORE_PEER_TLS_CERT_FILE", format!("{ARTIFACTS_MOUNT}/tls/server.crt"))
                .with_env("CORE_PEER_TLS_KEY_FILE", format!("{ARTIFACTS_MOUNT}/tls/server.key"))
                .with_env("CORE_PEER_TLS_ROOTCERT_FILE", format!("{ARTIFACTS_MOUNT}/tls/ca.crt"));
        }
        if tls.is_mutual() {
            c = c
                .with_env("CORE_PEER_TLS_CLIENTAUTHREQUIRED", "true")
                .with_env(
                    "CORE_PEER_TLS_CLIENTROOTCAS_FILES",
                    self.client_root_ca_files().join(" "),
                );
        }
        c
    }

    fn orderer_tls_env(&self, c: ContainerSpec) -> ContainerSpec {
        let tls = &self.spec.tls;
        let cert = format!("{ARTIFACTS_MOUNT}/tls/server.crt");
        let key = format!("{ARTIFACTS_MOUNT}/tls/server.key");
        let root = format!("[{ARTIFACTS_MOUNT}/tls/ca.crt]");
        let mut c = c.with_env("ORDERER_GENERAL_TLS_ENABLED", tls.is_enabled().to_string());
        if tls.is_enabled() {
            c = c
                .with_env("ORDERER_GENERAL_TLS_PRIVATEKEY", &key)
                .with_env("ORDERER_GENERAL_TLS_CERTIFICATE", &cert)
                .with_env("ORDERER_GENERAL_TLS_ROOTCAS", &root)
                .with_env("ORDERER_GENERAL_CLUSTER_CLIENTCERTIFICATE", &cert)
                .with_env("ORDERER_GENERAL_CLUSTER_CLIENTPRIVATEKEY", &key)
                .with_env("ORDERER_GENERAL_CLUSTER_ROOTCAS", &root);
        }
        if tls.is_mutual() {
            c = c
                .with_env("ORDERER_GENERAL_TLS_CLIENTAUTHREQUIRED", "true")
                .with_env(
                    "ORDERER_GENERAL_TLS_CLIENTROOTCAS",
                    format!("[{}]", self.client_root_ca_files().join(",")),
                );
        }
        c
    }

    fn metrics_provider(&self) -> &'static str {
        if self.spec.metrics {
            "prometheus"
        } else {
            "disabled"
        }
    }

    fn metrics_annotations(&self, metrics_port: u16) -> BTreeMap<String, String> {
        if !self.spec.metrics {
            return BTreeMap::new();
        }
        BTreeMap::from([
            ("prometheus.io/scrape".to_string(), "true".to_string()),
            ("prometheus.io/path".to_string(), "metrics".to_string()),
            ("prometheus.io/port".to_string(), metrics_port.to_string()),
            ("prometheus.io/scheme".to_string(), "http".to_string()),
        ])
    }

    fn storage_for(&self, workload: &str) -> Option<StorageClaim> {
        let k8s = &self.spec.k8s;
        k8s.data_persistence.then(|| StorageClaim {
            name: format!("{workload}-data"),
            storage_class: k8s.storage_class.clone(),
            capacity: k8s.storage_capacity.clone(),
            access_modes: k8s.access_modes.clone(),
        })
    }
}

fn key(key: impl Into<String>, path: impl Into<String>) -> KeyToPath {
    KeyToPath {
        key: key.into(),
        path: path.into(),
    }
}

fn claim_volume(claim: &StorageClaim) -> VolumeSpec {
    VolumeSpec {
        name: "data".to_string(),
        source: VolumeSource::Claim {
            name: claim.name.clone(),
        },
    }
}
