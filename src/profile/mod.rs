//! Per-organization connection profiles
//!
//! Each peer organization gets its own document. It carries that
//! organization's admin key and signed certificate, its own peers and CAs,
//! and the public data of every orderer. Orderer admin identities are only
//! referenced by path, so no document ever holds another organization's key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::config::ArtifactLayout;
use crate::endpoint::EndpointResolver;
use crate::network::{NetworkSpec, NodeKind, NodeRef, OrgRole, PeerOrganization};
use crate::{Error, Result};

const CLIENT_PORT: usize = 0;
const OPERATIONS_PORT: usize = 1;

/// Inline PEM material
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pem {
    /// PEM text
    pub pem: String,
}

/// gRPC client options
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcOptions {
    /// Name the server certificate is checked against
    #[serde(rename = "ssl-target-name-override")]
    pub ssl_target_name_override: String,
}

/// An orderer as seen by clients
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdererEntry {
    /// MSP of the owning orderer organization
    pub mspid: String,
    /// `grpc(s)://host:port`
    pub url: String,
    /// Operations endpoint
    #[serde(rename = "metricsURL")]
    pub metrics_url: String,
    /// gRPC options
    pub grpc_options: GrpcOptions,
    /// TLS CA certificate
    #[serde(rename = "tlsCACerts")]
    pub tls_ca_certs: Pem,
    /// Admin certificate of the orderer organization
    pub admin_cert: Pem,
    /// Directory of the orderer organization's admin MSP, holding its key
    pub admin_path: String,
}

/// A peer as seen by clients
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    /// `grpc(s)://host:port`
    pub url: String,
    /// Operations endpoint
    #[serde(rename = "metricsURL")]
    pub metrics_url: String,
    /// gRPC options
    pub grpc_options: GrpcOptions,
    /// TLS CA certificate
    #[serde(rename = "tlsCACerts")]
    pub tls_ca_certs: Pem,
}

/// CA TLS verification options
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpOptions {
    /// Verify the server certificate
    pub verify: bool,
}

/// Bootstrap registrar of a CA
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registrar {
    /// Enrollment id
    pub enroll_id: String,
    /// Enrollment secret
    pub enroll_secret: String,
}

/// A certificate authority as seen by clients
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaEntry {
    /// `http(s)://host:port`
    pub url: String,
    /// CA name as configured on the server
    pub ca_name: String,
    /// CA certificate
    #[serde(rename = "tlsCACerts")]
    pub tls_ca_certs: Pem,
    /// HTTP options
    pub http_options: HttpOptions,
    /// Bootstrap identity
    pub registrar: Registrar,
}

/// The organization a profile belongs to
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationEntry {
    /// Organization name
    pub name: String,
    /// MSP identifier
    pub mspid: String,
    /// Peer names
    pub peers: Vec<String>,
    /// CA keys into `certificateAuthorities`
    pub certificate_authorities: Vec<String>,
    /// Admin private key
    pub admin_private_key: Pem,
    /// Admin signed certificate
    pub signed_cert: Pem,
}

/// Members of a channel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Orderer names
    pub orderers: Vec<String>,
    /// Peer names
    pub peers: Vec<String>,
    /// Instantiated chaincodes, filled in by clients
    #[serde(default)]
    pub chaincodes: Vec<String>,
}

/// Peer request timeouts in seconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerTimeouts {
    /// Endorsement
    pub endorser: u32,
    /// Event hub
    pub event_hub: u32,
    /// Event registration
    pub event_reg: u32,
}

/// Request timeouts in seconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Peer timeouts
    pub peer: PeerTimeouts,
    /// Orderer broadcast
    pub orderer: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            peer: PeerTimeouts {
                endorser: 300,
                event_hub: 600,
                event_reg: 300,
            },
            orderer: 300,
        }
    }
}

/// Client connection settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Timeouts
    pub timeout: Timeouts,
}

/// Client section
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSection {
    /// Organization the client acts for
    pub organization: String,
    /// Connection settings
    pub connection: Connection,
}

/// A connection profile document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    /// Schema version
    pub version: String,
    /// Network name
    pub name: String,
    /// Free text
    pub description: String,
    /// Client section
    pub client: ClientSection,
    /// Pre-declared channels
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelEntry>,
    /// Every orderer of the network
    #[serde(default)]
    pub orderers: BTreeMap<String, OrdererEntry>,
    /// Peers of the organization
    #[serde(default)]
    pub peers: BTreeMap<String, PeerEntry>,
    /// CAs of the organization, keyed `ca{j}`
    #[serde(default)]
    pub certificate_authorities: BTreeMap<String, CaEntry>,
    /// The organization itself
    #[serde(default)]
    pub organizations: BTreeMap<String, OrganizationEntry>,
    /// Top-level keys added by other tools
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ConnectionProfile {
    fn new(organization: &str) -> Self {
        Self {
            version: "1.0".to_string(),
            name: "My network".to_string(),
            description: "Connection Profile for Blockchain Network".to_string(),
            client: ClientSection {
                organization: organization.to_string(),
                connection: Connection::default(),
            },
            channels: BTreeMap::new(),
            orderers: BTreeMap::new(),
            peers: BTreeMap::new(),
            certificate_authorities: BTreeMap::new(),
            organizations: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Parse a profile document
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Builds profiles from the crypto tree and resolved endpoints
pub struct ProfileGenerator<'a> {
    spec: &'a NetworkSpec,
    layout: &'a ArtifactLayout,
    resolver: &'a dyn EndpointResolver,
}

impl<'a> ProfileGenerator<'a> {
    /// Generator over a deployed network
    pub fn new(
        spec: &'a NetworkSpec,
        layout: &'a ArtifactLayout,
        resolver: &'a dyn EndpointResolver,
    ) -> Self {
        Self {
            spec,
            layout,
            resolver,
        }
    }

    /// Write one profile per peer organization, returning their paths
    pub async fn generate_all(&self) -> Result<Vec<PathBuf>> {
        let orderers = self.orderers().await?;
        let mut written = Vec::new();
        for org in &self.spec.peer_organizations {
            let profile = self.profile_for(org, &orderers).await?;
            let path = self.layout.connection_profile(&org.name);
            write_yaml(&path, &serde_yaml::to_string(&profile)?).await?;
            info!(org = %org.name, path = %path.display(), "Wrote connection profile");
            written.push(path);
        }
        Ok(written)
    }

    /// Build the profile of one peer organization
    pub async fn profile_for(
        &self,
        org: &PeerOrganization,
        orderers: &BTreeMap<String, OrdererEntry>,
    ) -> Result<ConnectionProfile> {
        let mut profile = ConnectionProfile::new(&org.name);
        profile.orderers = orderers.clone();

        for j in 0..org.num_peers {
            let node = NodeRef::new(NodeKind::Peer, j, &org.name);
            let entry = self.peer_entry(&node).await?;
            profile.peers.insert(node.name, entry);
        }

        for j in 0..org.num_ca {
            let node = NodeRef::new(NodeKind::Ca, j, &org.name);
            let entry = self.ca_entry(&node).await?;
            profile.certificate_authorities.insert(format!("ca{j}"), entry);
        }

        let admin = self.layout.admin_dir(OrgRole::Peer, &org.name).join("msp");
        profile.organizations.insert(
            org.name.clone(),
            OrganizationEntry {
                name: org.name.clone(),
                mspid: org.msp_id.clone(),
                peers: profile.peers.keys().cloned().collect(),
                certificate_authorities: profile.certificate_authorities.keys().cloned().collect(),
                admin_private_key: Pem {
                    pem: read(admin.join("keystore/priv_sk")).await?,
                },
                signed_cert: Pem {
                    pem: read(admin.join(format!("signcerts/Admin@{}-cert.pem", org.name))).await?,
                },
            },
        );

        for channel in self.spec.channel_names() {
            profile.channels.insert(
                channel,
                ChannelEntry {
                    orderers: profile.orderers.keys().cloned().collect(),
                    peers: profile.peers.keys().cloned().collect(),
                    chaincodes: Vec::new(),
                },
            );
        }

        Ok(profile)
    }

    /// Add the peers requested by `add_peer` to existing profiles.
    ///
    /// Only the `peers` map and the organization's peer list change; every
    /// other key in the document, known or not, is written back untouched.
    pub async fn append_peers(&self) -> Result<Vec<PathBuf>> {
        let mut by_org: BTreeMap<String, Vec<NodeRef>> = BTreeMap::new();
        for node in self.spec.delta_peer_nodes() {
            by_org.entry(node.org.clone()).or_default().push(node);
        }

        let mut written = Vec::new();
        for (org, nodes) in by_org {
            let path = self.layout.connection_profile(&org);
            let mut doc: Value = serde_yaml::from_str(&read(path.clone()).await?)?;

            for node in &nodes {
                let entry = serde_yaml::to_value(self.peer_entry(node).await?)?;
                insert_peer(&mut doc, &org, &node.name, entry)?;
            }

            write_yaml(&path, &serde_yaml::to_string(&doc)?).await?;
            info!(org = %org, added = nodes.len(), path = %path.display(), "Extended connection profile");
            written.push(path);
        }
        Ok(written)
    }

    async fn orderers(&self) -> Result<BTreeMap<String, OrdererEntry>> {
        let mut out = BTreeMap::new();
        for node in self.spec.orderer_nodes() {
            let msp_id = self
                .spec
                .org(&node.org)
                .map(|o| o.msp_id.to_string())
                .unwrap_or_default();
            let tls_ca = self
                .layout
                .node_dir(OrgRole::Orderer, &node.org, &node.hostname())
                .join(format!("msp/tlscacerts/tlsca.{}-cert.pem", node.org));
            let admin_msp = self
                .layout
                .admin_dir(OrgRole::Orderer, &node.org)
                .join("msp");
            let admin_cert = admin_msp.join(format!("signcerts/Admin@{}-cert.pem", node.org));

            let entry = OrdererEntry {
                mspid: msp_id,
                url: self.grpc_url(&node.name).await?,
                metrics_url: self.metrics_url(&node.name).await?,
                grpc_options: GrpcOptions {
                    ssl_target_name_override: node.name.clone(),
                },
                tls_ca_certs: Pem {
                    pem: read(tls_ca).await?,
                },
                admin_cert: Pem {
                    pem: read(admin_cert).await?,
                },
                admin_path: admin_msp.display().to_string(),
            };
            out.insert(node.name, entry);
        }
        Ok(out)
    }

    async fn peer_entry(&self, node: &NodeRef) -> Result<PeerEntry> {
        let tls_ca = self
            .layout
            .org_dir(OrgRole::Peer, &node.org)
            .join(format!("tlsca/tlsca.{}-cert.pem", node.org));
        Ok(PeerEntry {
            url: self.grpc_url(&node.name).await?,
            metrics_url: self.metrics_url(&node.name).await?,
            grpc_options: GrpcOptions {
                ssl_target_name_override: node.name.clone(),
            },
            tls_ca_certs: Pem {
                pem: read(tls_ca).await?,
            },
        })
    }

    async fn ca_entry(&self, node: &NodeRef) -> Result<CaEntry> {
        let scheme = if self.spec.tls.is_enabled() { "https" } else { "http" };
        let endpoint = self.resolver.resolve(&node.name, CLIENT_PORT).await?;
        let cert = self
            .layout
            .org_dir(OrgRole::Peer, &node.org)
            .join(format!("ca/ca.{}-cert.pem", node.org));
        Ok(CaEntry {
            url: format!("{scheme}://{endpoint}"),
            ca_name: node.name.clone(),
            tls_ca_certs: Pem {
                pem: read(cert).await?,
            },
            http_options: HttpOptions { verify: false },
            registrar: Registrar {
                enroll_id: "admin".to_string(),
                enroll_secret: "adminpw".to_string(),
            },
        })
    }

    async fn grpc_url(&self, node: &str) -> Result<String> {
        let scheme = if self.spec.tls.is_enabled() { "grpcs" } else { "grpc" };
        let endpoint = self.resolver.resolve(node, CLIENT_PORT).await?;
        Ok(format!("{scheme}://{endpoint}"))
    }

    async fn metrics_url(&self, node: &str) -> Result<String> {
        let endpoint = self.resolver.resolve(node, OPERATIONS_PORT).await?;
        Ok(format!("http://{endpoint}"))
    }
}

/// Insert a peer into `peers` and the organization's peer list unless present
fn insert_peer(doc: &mut Value, org: &str, name: &str, entry: Value) -> Result<()> {
    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| Error::serialization("connection profile is not a mapping"))?;

    let peers = root
        .entry(Value::from("peers"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let peers = peers
        .as_mapping_mut()
        .ok_or_else(|| Error::serialization("connection profile peers is not a mapping"))?;
    if peers.contains_key(name) {
        debug!(peer = %name, "Peer already in profile");
    } else {
        peers.insert(Value::from(name), entry);
    }

    let org_peers = root
        .get_mut("organizations")
        .and_then(|o| o.get_mut(org))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| {
            Error::serialization(format!("connection profile has no organization {org}"))
        })?
        .entry(Value::from("peers"))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    let list = org_peers.as_sequence_mut().ok_or_else(|| {
        Error::serialization(format!("peers of organization {org} is not a list"))
    })?;
    let name = Value::from(name);
    if !list.contains(&name) {
        list.push(name);
    }
    Ok(())
}

async fn read(path: PathBuf) -> Result<String> {
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| Error::material(&path, e))
}

async fn write_yaml(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| Error::io(path, e))
}
