//! Enumerations and option blocks used by [`NetworkSpec`](super::NetworkSpec)

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// Transport security mode for peers and orderers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Plaintext gRPC
    #[default]
    Disabled,
    /// Server-side TLS
    Enabled,
    /// TLS with client certificate verification
    Mutual,
}

impl TlsMode {
    /// True unless TLS is disabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// True for mutual TLS
    pub fn is_mutual(&self) -> bool {
        matches!(self, Self::Mutual)
    }

    /// Lowercase name used in YAML
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::Mutual => "mutual",
        }
    }
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "false" | "disabled" => Ok(Self::Disabled),
            "true" | "enabled" => Ok(Self::Enabled),
            "mutual" => Ok(Self::Mutual),
            _ => Err(Error::validation(format!(
                "invalid tls mode: {s} (expected true, false or mutual)"
            ))),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// YAML writes `tls: true` as a boolean, so accept either form
#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    Text(String),
}

impl<'de> Deserialize<'de> for TlsMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match BoolOrString::deserialize(deserializer)? {
            BoolOrString::Bool(true) => Ok(Self::Enabled),
            BoolOrString::Bool(false) => Ok(Self::Disabled),
            BoolOrString::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for TlsMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Accept `true`, `false`, `"true"` and `"false"` for boolean flags
pub(crate) fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Text(s) => match s.to_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean flag: {other}"
            ))),
        },
    }
}

/// Ordering service consensus
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusKind {
    /// Single ordering node
    Solo,
    /// Kafka-backed ordering (brokers are external)
    Kafka,
    /// Raft among ordering nodes
    #[default]
    EtcdRaft,
}

impl ConsensusKind {
    /// Orderer type as written in `configtx.yaml`
    pub fn orderer_type(&self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Kafka => "kafka",
            Self::EtcdRaft => "etcdraft",
        }
    }
}

impl fmt::Display for ConsensusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.orderer_type())
    }
}

/// Peer state database
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbKind {
    /// Embedded key-value store
    #[default]
    GoLevelDb,
    /// CouchDB document store, run as its own workload per peer
    CouchDb,
}

/// Kubernetes service type for externally reachable nodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    /// Node port on every cluster node
    #[default]
    NodePort,
    /// Cloud load balancer
    LoadBalancer,
    /// Cluster-internal only
    #[serde(rename = "ClusterIP")]
    ClusterIp,
}

impl ServiceType {
    /// Value for `Service.spec.type`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
            Self::ClusterIp => "ClusterIP",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of logical node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Peer
    Peer,
    /// Ordering node
    Orderer,
    /// Certificate authority
    Ca,
    /// CouchDB state database for one peer
    CouchDb,
}

impl NodeKind {
    /// Value of the `type` label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Orderer => "orderer",
            Self::Ca => "ca",
            Self::CouchDb => "couchdb",
        }
    }

    /// Peers and orderers expose an operations endpoint worth scraping
    pub fn exposes_metrics(&self) -> bool {
        matches!(self, Self::Peer | Self::Orderer)
    }
}

impl FromStr for NodeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "peer" => Ok(Self::Peer),
            "orderer" => Ok(Self::Orderer),
            "ca" => Ok(Self::Ca),
            "couchdb" => Ok(Self::CouchDb),
            _ => Err(Error::validation(format!("unknown node kind: {s}"))),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which list an organization came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrgRole {
    /// Ordering organization
    Orderer,
    /// Peer organization
    Peer,
}

impl OrgRole {
    /// Top-level directory in the crypto tree
    pub fn org_dir(&self) -> &'static str {
        match self {
            Self::Orderer => "ordererOrganizations",
            Self::Peer => "peerOrganizations",
        }
    }

    /// Node directory inside an organization
    pub fn nodes_dir(&self) -> &'static str {
        match self {
            Self::Orderer => "orderers",
            Self::Peer => "peers",
        }
    }
}

/// Batch settings for the ordering service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSize {
    /// Maximum messages per block
    pub max_message_count: u32,
    /// Hard block size cap
    pub absolute_max_bytes: String,
    /// Preferred block size
    pub preferred_max_bytes: String,
}

impl Default for BatchSize {
    fn default() -> Self {
        Self {
            max_message_count: 500,
            absolute_max_bytes: "10 MB".to_string(),
            preferred_max_bytes: "2 MB".to_string(),
        }
    }
}

/// Ordering service options
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdererOptions {
    /// Consensus kind
    pub consensus_type: ConsensusKind,
    /// Block cut timeout
    pub batch_timeout: String,
    /// Block size limits
    pub batch_size: BatchSize,
    /// Broker addresses for kafka consensus
    pub kafka_brokers: Vec<String>,
}

impl Default for OrdererOptions {
    fn default() -> Self {
        Self {
            consensus_type: ConsensusKind::default(),
            batch_timeout: "2s".to_string(),
            batch_size: BatchSize::default(),
            kafka_brokers: Vec::new(),
        }
    }
}

/// Per-image overrides; unset entries fall back to `{org}/fabric-*:{tag}`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOverrides {
    /// Peer image
    pub peer: Option<String>,
    /// Orderer image
    pub orderer: Option<String>,
    /// CA image
    pub ca: Option<String>,
    /// CouchDB image
    pub couchdb: Option<String>,
    /// Docker-in-docker sidecar image
    pub dind: Option<String>,
}

/// Container image selection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerOptions {
    /// Registry organization for Fabric images
    pub org: String,
    /// Tag for peer and orderer images; defaults to the Fabric version
    pub tag: Option<String>,
    /// Tag for the CA image, which is released separately
    pub ca_tag: String,
    /// Full image overrides
    pub images: ImageOverrides,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            org: "hyperledger".to_string(),
            tag: None,
            ca_tag: "1.5".to_string(),
            images: ImageOverrides::default(),
        }
    }
}

impl DockerOptions {
    fn fabric_image(&self, component: &str, tag: &str) -> String {
        format!("{}/fabric-{}:{}", self.org, component, tag)
    }

    fn tag<'a>(&'a self, fabric_version: &'a str) -> &'a str {
        self.tag.as_deref().unwrap_or(fabric_version)
    }

    /// Peer image
    pub fn peer_image(&self, fabric_version: &str) -> String {
        self.images
            .peer
            .clone()
            .unwrap_or_else(|| self.fabric_image("peer", self.tag(fabric_version)))
    }

    /// Orderer image
    pub fn orderer_image(&self, fabric_version: &str) -> String {
        self.images
            .orderer
            .clone()
            .unwrap_or_else(|| self.fabric_image("orderer", self.tag(fabric_version)))
    }

    /// CA image
    pub fn ca_image(&self) -> String {
        self.images
            .ca
            .clone()
            .unwrap_or_else(|| self.fabric_image("ca", &self.ca_tag))
    }

    /// CouchDB image
    pub fn couchdb_image(&self) -> String {
        self.images
            .couchdb
            .clone()
            .unwrap_or_else(|| "couchdb:3.1".to_string())
    }

    /// Docker-in-docker image used to build chaincode
    pub fn dind_image(&self) -> String {
        self.images
            .dind
            .clone()
            .unwrap_or_else(|| "docker:dind".to_string())
    }
}

/// `FABRIC_LOGGING_SPEC` per node class
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Peer logging spec
    pub peer: String,
    /// Orderer logging spec
    pub orderer: String,
    /// CA log level
    pub ca: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            peer: "INFO".to_string(),
            orderer: "INFO".to_string(),
            ca: "INFO".to_string(),
        }
    }
}

/// Compute resources for one container class
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// Limits, e.g. `cpu: "1"`, `memory: 1Gi`
    pub limits: BTreeMap<String, String>,
    /// Requests
    pub requests: BTreeMap<String, String>,
}

/// Resources per node class
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceOptions {
    /// Peer container
    pub peers: Option<Resources>,
    /// Orderer container
    pub orderers: Option<Resources>,
    /// CA container
    pub ca: Option<Resources>,
    /// CouchDB container
    pub couchdb: Option<Resources>,
    /// Docker-in-docker sidecar
    pub dind: Option<Resources>,
}

/// Cluster placement options
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sOptions {
    /// Namespace owning every object of the network
    pub namespace: String,
    /// Service type for peers, orderers and CAs
    pub service_type: ServiceType,
    /// Back ledgers with persistent volume claims
    #[serde(deserialize_with = "deserialize_flag")]
    pub data_persistence: bool,
    /// Storage class for claims; cluster default when unset
    pub storage_class: Option<String>,
    /// Requested capacity per claim
    pub storage_capacity: String,
    /// Access modes per claim
    pub access_modes: Vec<String>,
    /// Container resources
    pub resources: ResourceOptions,
}

impl Default for K8sOptions {
    fn default() -> Self {
        Self {
            namespace: "fabric".to_string(),
            service_type: ServiceType::default(),
            data_persistence: false,
            storage_class: None,
            storage_capacity: "1Gi".to_string(),
            access_modes: vec!["ReadWriteOnce".to_string()],
            resources: ResourceOptions::default(),
        }
    }
}
