//! Network specification: the declarative description of a Fabric test network
//!
//! A [`NetworkSpec`] is parsed once from YAML, validated, and then treated as
//! immutable input by every other module. Node names and crypto hostnames are
//! derived here so that the workload builder, identity materializer and
//! profile generator agree on them.

mod types;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use types::{
    BatchSize, ConsensusKind, DbKind, DockerOptions, ImageOverrides, K8sOptions, LoggingOptions,
    NodeKind, OrdererOptions, OrgRole, ResourceOptions, Resources, ServiceType, TlsMode,
};

/// Default Fabric release used for image tags
pub const DEFAULT_FABRIC_VERSION: &str = "2.2.0";

/// Default channel name prefix for pre-declared channels
pub const DEFAULT_CHANNEL_PREFIX: &str = "testorgschannel";

fn default_fabric_version() -> String {
    DEFAULT_FABRIC_VERSION.to_string()
}

fn default_artifacts_location() -> String {
    "artifacts".to_string()
}

fn default_channel_prefix() -> String {
    DEFAULT_CHANNEL_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

/// An organization that runs ordering nodes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdererOrganization {
    /// Organization name, also its crypto domain
    pub name: String,
    /// MSP identifier
    pub msp_id: String,
    /// Number of ordering nodes
    pub num_orderers: u32,
    /// Number of certificate authorities
    #[serde(default)]
    pub num_ca: u32,
}

/// An organization that runs peers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerOrganization {
    /// Organization name, also its crypto domain
    pub name: String,
    /// MSP identifier
    pub msp_id: String,
    /// Number of peers
    pub num_peers: u32,
    /// Number of certificate authorities
    #[serde(default)]
    pub num_ca: u32,
}

/// Additional peers requested for an existing organization by `extend`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDelta {
    /// Name of an existing peer organization
    pub name: String,
    /// Number of peers to add
    pub num_peers: u32,
}

/// Declarative description of the whole network
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Fabric release used as the default image tag
    #[serde(default = "default_fabric_version")]
    pub fabric_version: String,
    /// Root of generated artifacts; relative paths resolve against the spec file
    #[serde(default = "default_artifacts_location")]
    pub artifacts_location: String,
    /// Ordering organizations, in allocation order
    #[serde(default)]
    pub orderer_organizations: Vec<OrdererOrganization>,
    /// Peer organizations, in allocation order
    #[serde(default)]
    pub peer_organizations: Vec<PeerOrganization>,
    /// Peers to add on `extend`
    #[serde(default)]
    pub add_peer: Vec<PeerDelta>,
    /// Transport security mode
    #[serde(default)]
    pub tls: TlsMode,
    /// Whether MSPs classify identities by organizational unit
    #[serde(default = "default_true")]
    pub enable_node_ous: bool,
    /// Attach scrape annotations to peers and orderers
    #[serde(default)]
    pub metrics: bool,
    /// Enable gossip leader election and org leader settings on peers
    #[serde(default)]
    pub gossip_enable: bool,
    /// Ordering service options
    #[serde(default)]
    pub orderer: OrdererOptions,
    /// Peer state database
    #[serde(default)]
    pub peer_db: DbKind,
    /// Number of channels pre-declared in connection profiles
    #[serde(default)]
    pub num_channels: u32,
    /// Prefix for pre-declared channel names
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
    /// Container image overrides
    #[serde(default)]
    pub docker: DockerOptions,
    /// Log levels per node class
    #[serde(default)]
    pub logging: LoggingOptions,
    /// Cluster options
    #[serde(default)]
    pub k8s: K8sOptions,
}

/// A single logical node derived from the spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRef {
    /// Node name, e.g. `peer0-org1`
    pub name: String,
    /// Owning organization
    pub org: String,
    /// Node kind
    pub kind: NodeKind,
    /// Index within the organization
    pub index: u32,
}

impl NodeRef {
    /// Build a node reference, deriving its name
    pub fn new(kind: NodeKind, index: u32, org: impl Into<String>) -> Self {
        let org = org.into();
        Self {
            name: node_name(kind, index, &org),
            org,
            kind,
            index,
        }
    }

    /// Hostname used by the crypto generator, `{name}.{org}`
    pub fn hostname(&self) -> String {
        format!("{}.{}", self.name, self.org)
    }
}

/// Name of the `index`th node of `kind` in `org`
pub fn node_name(kind: NodeKind, index: u32, org: &str) -> String {
    match kind {
        NodeKind::Peer => format!("peer{index}-{org}"),
        NodeKind::Orderer => format!("orderer{index}-{org}"),
        NodeKind::Ca => format!("ca{index}-{org}"),
        NodeKind::CouchDb => format!("couchdb-peer{index}-{org}"),
    }
}

/// Organization summary shared by orderer and peer orgs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrgRef<'a> {
    /// Organization name
    pub name: &'a str,
    /// MSP identifier
    pub msp_id: &'a str,
    /// Whether this org runs orderers or peers
    pub role: OrgRole,
    /// Number of CAs
    pub num_ca: u32,
}

impl NetworkSpec {
    /// Parse and validate a spec from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let spec: NetworkSpec = serde_yaml::from_str(content)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Read, parse and validate a spec file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.orderer_organizations.is_empty() {
            return Err(Error::validation(
                "at least one orderer organization is required",
            ));
        }
        if self.peer_organizations.is_empty() {
            return Err(Error::validation("at least one peer organization is required"));
        }

        let mut seen = std::collections::BTreeSet::new();
        for org in self.organizations() {
            validate_label(org.name)?;
            if org.msp_id.is_empty() {
                return Err(Error::validation(format!(
                    "organization {} has an empty msp_id",
                    org.name
                )));
            }
            if !seen.insert(org.name) {
                return Err(Error::validation(format!(
                    "organization name {} is used more than once",
                    org.name
                )));
            }
        }

        for org in &self.orderer_organizations {
            if org.num_orderers == 0 {
                return Err(Error::validation(format!(
                    "orderer organization {} has no orderers",
                    org.name
                )));
            }
        }

        match self.orderer.consensus_type {
            ConsensusKind::Solo => {
                if self.orderer_organizations.len() != 1
                    || self.orderer_organizations[0].num_orderers != 1
                {
                    return Err(Error::validation(
                        "solo consensus requires exactly one orderer organization with one orderer",
                    ));
                }
            }
            ConsensusKind::Kafka => {
                if self.orderer_organizations.len() != 1 {
                    return Err(Error::validation(
                        "kafka consensus requires exactly one orderer organization",
                    ));
                }
            }
            ConsensusKind::EtcdRaft => {
                if !self.tls.is_enabled() {
                    return Err(Error::validation("etcdraft consensus requires tls"));
                }
            }
        }

        for delta in &self.add_peer {
            if self.peer_org(&delta.name).is_none() {
                return Err(Error::validation(format!(
                    "add_peer references unknown organization {}",
                    delta.name
                )));
            }
            if delta.num_peers == 0 {
                return Err(Error::validation(format!(
                    "add_peer for {} must add at least one peer",
                    delta.name
                )));
            }
        }

        if self.k8s.namespace.is_empty() {
            return Err(Error::validation("k8s.namespace must not be empty"));
        }
        validate_label(&self.k8s.namespace)?;

        Ok(())
    }

    /// All organizations, orderer orgs first
    pub fn organizations(&self) -> impl Iterator<Item = OrgRef<'_>> {
        let orderers = self.orderer_organizations.iter().map(|o| OrgRef {
            name: &o.name,
            msp_id: &o.msp_id,
            role: OrgRole::Orderer,
            num_ca: o.num_ca,
        });
        let peers = self.peer_organizations.iter().map(|o| OrgRef {
            name: &o.name,
            msp_id: &o.msp_id,
            role: OrgRole::Peer,
            num_ca: o.num_ca,
        });
        orderers.chain(peers)
    }

    /// Look up a peer organization by name
    pub fn peer_org(&self, name: &str) -> Option<&PeerOrganization> {
        self.peer_organizations.iter().find(|o| o.name == name)
    }

    /// Look up any organization by name
    pub fn org(&self, name: &str) -> Option<OrgRef<'_>> {
        self.organizations().find(|o| o.name == name)
    }

    /// Every orderer node, in allocation order
    pub fn orderer_nodes(&self) -> Vec<NodeRef> {
        self.orderer_organizations
            .iter()
            .flat_map(|org| {
                (0..org.num_orderers).map(move |j| NodeRef::new(NodeKind::Orderer, j, &org.name))
            })
            .collect()
    }

    /// Every peer node currently in the spec, in allocation order
    pub fn peer_nodes(&self) -> Vec<NodeRef> {
        self.peer_organizations
            .iter()
            .flat_map(|org| {
                (0..org.num_peers).map(move |j| NodeRef::new(NodeKind::Peer, j, &org.name))
            })
            .collect()
    }

    /// Peers added by `add_peer`, indexed after the existing ones
    pub fn delta_peer_nodes(&self) -> Vec<NodeRef> {
        self.add_peer
            .iter()
            .filter_map(|delta| self.peer_org(&delta.name).map(|org| (org, delta.num_peers)))
            .flat_map(|(org, add)| {
                (org.num_peers..org.num_peers + add)
                    .map(move |j| NodeRef::new(NodeKind::Peer, j, &org.name))
            })
            .collect()
    }

    /// Total number of peers across all organizations before extension
    pub fn total_peers(&self) -> u32 {
        self.peer_organizations.iter().map(|o| o.num_peers).sum()
    }

    /// Peer count for an organization after applying `add_peer`
    pub fn extended_peer_count(&self, org: &PeerOrganization) -> u32 {
        let added: u32 = self
            .add_peer
            .iter()
            .filter(|d| d.name == org.name)
            .map(|d| d.num_peers)
            .sum();
        org.num_peers + added
    }

    /// Names of the pre-declared channels
    pub fn channel_names(&self) -> Vec<String> {
        (0..self.num_channels)
            .map(|i| format!("{}{}", self.channel_prefix, i))
            .collect()
    }
}

/// Names become object names and DNS labels, so keep them to RFC 1123 labels
fn validate_label(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 50
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "name '{name}' must be lowercase alphanumeric or '-', at most 50 characters"
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
fabric_version: "2.2.0"
orderer_organizations:
  - name: ordererorg1
    msp_id: OrdererOrg1ExampleCom
    num_orderers: 1
    num_ca: 0
peer_organizations:
  - name: org1
    msp_id: Org1ExampleCom
    num_peers: 2
    num_ca: 0
  - name: org2
    msp_id: Org2ExampleCom
    num_peers: 2
    num_ca: 0
tls: mutual
orderer:
  consensus_type: etcdraft
k8s:
  namespace: fabric
  service_type: NodePort
  data_persistence: true
  storage_class: standard
  storage_capacity: 20Gi
"#;

    /// Two peer orgs of two peers and one orderer org of one orderer
    pub(crate) fn sample_spec() -> NetworkSpec {
        NetworkSpec::from_yaml(SAMPLE).expect("sample spec should parse")
    }

    // =========================================================================
    // Story: Parsing the network description
    // =========================================================================

    #[test]
    fn sample_spec_parses_with_defaults() {
        let spec = sample_spec();
        assert_eq!(spec.orderer_organizations.len(), 1);
        assert_eq!(spec.peer_organizations.len(), 2);
        assert_eq!(spec.tls, TlsMode::Mutual);
        assert_eq!(spec.orderer.consensus_type, ConsensusKind::EtcdRaft);
        assert_eq!(spec.peer_db, DbKind::GoLevelDb);
        assert_eq!(spec.k8s.service_type, ServiceType::NodePort);
        assert!(spec.k8s.data_persistence);
        assert!(spec.enable_node_ous);
        assert_eq!(spec.channel_prefix, "testorgschannel");
        assert_eq!(spec.artifacts_location, "artifacts");
    }

    #[test]
    fn tls_accepts_booleans_and_words() {
        let parse = |tls: &str| {
            let yaml = SAMPLE.replace("tls: mutual", &format!("tls: {tls}"));
            NetworkSpec::from_yaml(&yaml).map(|s| s.tls)
        };
        assert_eq!(parse("true").unwrap(), TlsMode::Enabled);
        assert!(parse("false").is_err(), "etcdraft needs tls");
        assert_eq!(parse("enabled").unwrap(), TlsMode::Enabled);
        assert_eq!(parse("mutual").unwrap(), TlsMode::Mutual);
        assert!(parse("sometimes").is_err());
    }

    #[test]
    fn node_names_follow_kind_index_org() {
        assert_eq!(node_name(NodeKind::Peer, 0, "org1"), "peer0-org1");
        assert_eq!(node_name(NodeKind::Orderer, 2, "ordererorg1"), "orderer2-ordererorg1");
        assert_eq!(node_name(NodeKind::Ca, 0, "org2"), "ca0-org2");
        assert_eq!(node_name(NodeKind::CouchDb, 1, "org1"), "couchdb-peer1-org1");
        assert_eq!(
            NodeRef::new(NodeKind::Peer, 1, "org2").hostname(),
            "peer1-org2.org2"
        );
    }

    #[test]
    fn nodes_are_listed_in_allocation_order() {
        let spec = sample_spec();
        let peers: Vec<_> = spec.peer_nodes().into_iter().map(|n| n.name).collect();
        assert_eq!(peers, ["peer0-org1", "peer1-org1", "peer0-org2", "peer1-org2"]);
        let orderers: Vec<_> = spec.orderer_nodes().into_iter().map(|n| n.name).collect();
        assert_eq!(orderers, ["orderer0-ordererorg1"]);
        assert_eq!(spec.total_peers(), 4);
    }

    #[test]
    fn delta_peers_start_after_existing_indices() {
        let mut spec = sample_spec();
        spec.add_peer = vec![PeerDelta {
            name: "org2".into(),
            num_peers: 2,
        }];
        spec.validate().unwrap();
        let delta: Vec<_> = spec.delta_peer_nodes().into_iter().map(|n| n.name).collect();
        assert_eq!(delta, ["peer2-org2", "peer3-org2"]);
        assert_eq!(spec.extended_peer_count(&spec.peer_organizations[1]), 4);
        assert_eq!(spec.extended_peer_count(&spec.peer_organizations[0]), 2);
    }

    // =========================================================================
    // Story: Validation catches impossible networks before anything runs
    // =========================================================================

    #[test]
    fn solo_requires_a_single_orderer() {
        let yaml = SAMPLE
            .replace("consensus_type: etcdraft", "consensus_type: solo")
            .replace("num_orderers: 1", "num_orderers: 2");
        let err = NetworkSpec::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("solo consensus"));
    }

    #[test]
    fn solo_with_one_orderer_is_accepted() {
        let yaml = SAMPLE.replace("consensus_type: etcdraft", "consensus_type: solo");
        assert!(NetworkSpec::from_yaml(&yaml).is_ok());
    }

    #[test]
    fn kafka_requires_a_single_orderer_org() {
        let mut spec = sample_spec();
        spec.orderer.consensus_type = ConsensusKind::Kafka;
        spec.orderer_organizations.push(OrdererOrganization {
            name: "ordererorg2".into(),
            msp_id: "OrdererOrg2".into(),
            num_orderers: 1,
            num_ca: 0,
        });
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("kafka consensus"));
    }

    #[test]
    fn duplicate_org_names_are_rejected() {
        let mut spec = sample_spec();
        spec.peer_organizations[1].name = "org1".into();
        assert!(spec.validate().unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn org_names_must_be_dns_labels() {
        let mut spec = sample_spec();
        spec.peer_organizations[0].name = "Org_1".into();
        assert!(matches!(spec.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn add_peer_must_reference_existing_org() {
        let mut spec = sample_spec();
        spec.add_peer = vec![PeerDelta {
            name: "org9".into(),
            num_peers: 1,
        }];
        assert!(spec.validate().unwrap_err().to_string().contains("org9"));
    }

    #[test]
    fn channel_names_use_prefix() {
        let mut spec = sample_spec();
        spec.num_channels = 2;
        assert_eq!(spec.channel_names(), ["testorgschannel0", "testorgschannel1"]);
    }

    #[tokio::test]
    async fn missing_spec_file_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("network.yaml");
        let err = NetworkSpec::load(&path).await.unwrap_err();
        assert!(matches!(err, Error::Io { path: ref p, .. } if *p == path));
    }
}
