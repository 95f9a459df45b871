//! Identity materialization from the crypto material tree
//!
//! The external generator writes certificates and keys to fixed locations
//! under `crypto-config/`. This module reads them back into per-node and
//! per-organization bundles keyed the way the workloads mount them. A
//! missing file is a [`Error::MaterialNotFound`] so that `up` aborts instead of
//! deploying a node without an identity.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ArtifactLayout;
use crate::network::{NetworkSpec, NodeKind, NodeRef, OrgRef, OrgRole};
use crate::{Error, Result};

/// Per-node certificate and key material
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityBundle {
    /// Node name
    pub node: String,
    /// MSP material: `cacerts`, `signcerts`, `keystore`, `tlscacerts` and
    /// `config` when node OUs are enabled
    pub msp: BTreeMap<String, String>,
    /// TLS material: `server.crt`, `server.key`, `ca.crt`
    pub tls: BTreeMap<String, String>,
}

/// Per-organization certificate and key material
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrgIdentity {
    /// Organization name
    pub org: String,
    /// Admin certificates, keyed by file name
    pub admincerts: BTreeMap<String, String>,
    /// CA material: `ca-cert`, `ca-key`, `tlsca-cert`, `tlsca-key`
    pub ca: Option<BTreeMap<String, String>>,
}

/// Where admin certificates live for an organization
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminCertLayout {
    /// One `Admin@{org}-cert.pem` file, required
    SingleFile,
    /// Whatever the `admincerts` directory holds, possibly nothing
    Directory,
}

impl AdminCertLayout {
    /// Layout implied by the node OU setting
    pub fn for_spec(spec: &NetworkSpec) -> Self {
        if spec.enable_node_ous {
            Self::Directory
        } else {
            Self::SingleFile
        }
    }
}

/// Everything `up` needs to create identity objects
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterializedIdentities {
    /// One bundle per peer and orderer
    pub nodes: Vec<IdentityBundle>,
    /// One entry per organization
    pub orgs: Vec<OrgIdentity>,
    /// TLS CA certificate per organization, keyed `{org}.pem`, for mutual TLS
    pub client_root_cas: Option<BTreeMap<String, String>>,
}

/// Reads identity material for the nodes of a spec
pub struct IdentityMaterializer<'a> {
    spec: &'a NetworkSpec,
    layout: &'a ArtifactLayout,
}

impl<'a> IdentityMaterializer<'a> {
    /// Materializer over `spec`, reading from `layout`
    pub fn new(spec: &'a NetworkSpec, layout: &'a ArtifactLayout) -> Self {
        Self { spec, layout }
    }

    /// All identities for a fresh deployment
    pub async fn materialize_all(&self) -> Result<MaterializedIdentities> {
        let mut orgs = Vec::new();
        for org in self.spec.organizations() {
            orgs.push(self.org_identity(&org).await?);
        }

        let mut nodes = Vec::new();
        for node in self
            .spec
            .orderer_nodes()
            .iter()
            .chain(self.spec.peer_nodes().iter())
        {
            nodes.push(self.node_bundle(node).await?);
        }

        let client_root_cas = if self.spec.tls.is_mutual() {
            Some(self.client_root_cas().await?)
        } else {
            None
        };

        Ok(MaterializedIdentities {
            nodes,
            orgs,
            client_root_cas,
        })
    }

    /// Identities for peers added by `extend`; organization objects exist already
    pub async fn materialize_delta(&self) -> Result<MaterializedIdentities> {
        let mut nodes = Vec::new();
        for node in self.spec.delta_peer_nodes() {
            nodes.push(self.node_bundle(&node).await?);
        }
        Ok(MaterializedIdentities {
            nodes,
            ..Default::default()
        })
    }

    /// MSP and TLS material of a peer or orderer
    pub async fn node_bundle(&self, node: &NodeRef) -> Result<IdentityBundle> {
        let role = match node.kind {
            NodeKind::Peer => OrgRole::Peer,
            NodeKind::Orderer => OrgRole::Orderer,
            NodeKind::Ca | NodeKind::CouchDb => {
                return Err(Error::validation(format!(
                    "{} nodes carry no MSP identity",
                    node.kind
                )))
            }
        };
        let org = &node.org;
        let hostname = node.hostname();
        let dir = self.layout.node_dir(role, org, &hostname);
        debug!(node = %node.name, dir = %dir.display(), "Reading node identity");

        let mut msp = BTreeMap::new();
        msp.insert(
            "cacerts".to_string(),
            read(dir.join(format!("msp/cacerts/ca.{org}-cert.pem"))).await?,
        );
        msp.insert(
            "signcerts".to_string(),
            read(dir.join(format!("msp/signcerts/{hostname}-cert.pem"))).await?,
        );
        msp.insert(
            "keystore".to_string(),
            read(dir.join("msp/keystore/priv_sk")).await?,
        );
        msp.insert(
            "tlscacerts".to_string(),
            read(dir.join(format!("msp/tlscacerts/tlsca.{org}-cert.pem"))).await?,
        );
        if self.spec.enable_node_ous {
            msp.insert(
                "config".to_string(),
                read(dir.join("msp/config.yaml")).await?,
            );
        }

        let mut tls = BTreeMap::new();
        for file in ["server.crt", "server.key", "ca.crt"] {
            tls.insert(file.to_string(), read(dir.join("tls").join(file)).await?);
        }

        Ok(IdentityBundle {
            node: node.name.clone(),
            msp,
            tls,
        })
    }

    /// Admin certificates and, when needed, CA material of an organization
    pub async fn org_identity(&self, org: &OrgRef<'_>) -> Result<OrgIdentity> {
        let org_dir = self.layout.org_dir(org.role, org.name);
        let admin_dir = org_dir.join("msp/admincerts");

        let admincerts = match AdminCertLayout::for_spec(self.spec) {
            AdminCertLayout::SingleFile => {
                let file = format!("Admin@{}-cert.pem", org.name);
                let cert = read(admin_dir.join(&file)).await?;
                BTreeMap::from([(file, cert)])
            }
            AdminCertLayout::Directory => read_dir_files(&admin_dir).await?,
        };

        let ca = if org.num_ca > 0 || self.spec.tls.is_mutual() {
            let mut ca = BTreeMap::new();
            ca.insert(
                "ca-cert".to_string(),
                read(org_dir.join(format!("ca/ca.{}-cert.pem", org.name))).await?,
            );
            ca.insert("ca-key".to_string(), read(org_dir.join("ca/priv_sk")).await?);
            ca.insert(
                "tlsca-cert".to_string(),
                read(org_dir.join(format!("tlsca/tlsca.{}-cert.pem", org.name))).await?,
            );
            ca.insert(
                "tlsca-key".to_string(),
                read(org_dir.join("tlsca/priv_sk")).await?,
            );
            Some(ca)
        } else {
            None
        };

        Ok(OrgIdentity {
            org: org.name.to_string(),
            admincerts,
            ca,
        })
    }

    /// TLS CA certificate of every organization, keyed `{org}.pem`
    pub async fn client_root_cas(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for org in self.spec.organizations() {
            let path = self
                .layout
                .org_dir(org.role, org.name)
                .join(format!("tlsca/tlsca.{}-cert.pem", org.name));
            out.insert(format!("{}.pem", org.name), read(path).await?);
        }
        Ok(out)
    }
}

async fn read(path: PathBuf) -> Result<String> {
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| Error::material(&path, e))
}

/// Regular files of a directory keyed by file name; an absent directory is empty
async fn read_dir_files(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(Error::material(dir, e)),
    };
    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::material(dir, e))? {
        let path = entry.path();
        if path.is_file() {
            let name = entry.file_name().to_string_lossy().into_owned();
            out.insert(name, read(path).await?);
        }
    }
    Ok(out)
}
