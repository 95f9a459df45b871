//! Rendering of `crypto-config.yaml` and `configtx.yaml` from a network spec

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::ArtifactLayout;
use crate::network::{ConsensusKind, NetworkSpec, NodeKind, NodeRef, OrgRef, OrgRole};
use crate::workload::WorkloadDescriptor;
use crate::{Error, Result};

/// Profile used to build the orderer system channel genesis block
pub const GENESIS_PROFILE: &str = "testOrgsOrdererGenesis";
/// Orderer system channel name
pub const SYSTEM_CHANNEL: &str = "orderersystemchannel";
/// Consortium every peer organization joins
pub const CONSORTIUM: &str = "FabricConsortium";
/// Profile for creating application channels
pub const CHANNEL_PROFILE: &str = "testorgschannel";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CryptoConfig {
    orderer_orgs: Vec<CryptoOrg>,
    peer_orgs: Vec<CryptoOrg>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CryptoOrg {
    name: String,
    domain: String,
    #[serde(rename = "EnableNodeOUs")]
    enable_node_ous: bool,
    specs: Vec<HostSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    users: Option<UserCount>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostSpec {
    hostname: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct UserCount {
    count: u32,
}

/// Input for the crypto generator.
///
/// With `extended` set, peer organizations include the peers requested by
/// `add_peer`, which is what `cryptogen extend` needs to see.
pub fn render_crypto_config(spec: &NetworkSpec, extended: bool) -> Result<String> {
    let hosts = |kind: NodeKind, count: u32, org: &str| -> Vec<HostSpec> {
        (0..count)
            .map(|j| HostSpec {
                hostname: NodeRef::new(kind, j, org).name,
            })
            .collect()
    };

    let config = CryptoConfig {
        orderer_orgs: spec
            .orderer_organizations
            .iter()
            .map(|o| CryptoOrg {
                name: o.name.clone(),
                domain: o.name.clone(),
                enable_node_ous: spec.enable_node_ous,
                specs: hosts(NodeKind::Orderer, o.num_orderers, &o.name),
                users: None,
            })
            .collect(),
        peer_orgs: spec
            .peer_organizations
            .iter()
            .map(|o| {
                let count = if extended {
                    spec.extended_peer_count(o)
                } else {
                    o.num_peers
                };
                CryptoOrg {
                    name: o.name.clone(),
                    domain: o.name.clone(),
                    enable_node_ous: spec.enable_node_ous,
                    specs: hosts(NodeKind::Peer, count, &o.name),
                    users: Some(UserCount { count: 1 }),
                }
            })
            .collect(),
    };
    serde_yaml::to_string(&config).map_err(Error::from)
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Policy {
    #[serde(rename = "Type")]
    kind: &'static str,
    rule: String,
}

impl Policy {
    fn signature(rule: String) -> Self {
        Self {
            kind: "Signature",
            rule,
        }
    }

    fn implicit(rule: &str) -> Self {
        Self {
            kind: "ImplicitMeta",
            rule: rule.to_string(),
        }
    }
}

type Policies = BTreeMap<&'static str, Policy>;
type Capabilities = BTreeMap<&'static str, bool>;

fn v2_capabilities() -> Capabilities {
    BTreeMap::from([("V2_0", true)])
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Organization {
    name: String,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "MSPDir")]
    msp_dir: String,
    policies: Policies,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    orderer_endpoints: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    anchor_peers: Vec<AnchorPeer>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AnchorPeer {
    host: String,
    port: u16,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchSizeSection {
    max_message_count: u32,
    absolute_max_bytes: String,
    preferred_max_bytes: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Consenter {
    host: String,
    port: u16,
    #[serde(rename = "ClientTLSCert")]
    client_tls_cert: String,
    #[serde(rename = "ServerTLSCert")]
    server_tls_cert: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EtcdRaft {
    consenters: Vec<Consenter>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Kafka {
    brokers: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct OrdererSection {
    orderer_type: &'static str,
    addresses: Vec<String>,
    batch_timeout: String,
    batch_size: BatchSizeSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    kafka: Option<Kafka>,
    #[serde(skip_serializing_if = "Option::is_none")]
    etcd_raft: Option<EtcdRaft>,
    organizations: Vec<Organization>,
    policies: Policies,
    capabilities: Capabilities,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Consortium {
    organizations: Vec<Organization>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ApplicationSection {
    organizations: Vec<Organization>,
    policies: Policies,
    capabilities: Capabilities,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Profile {
    policies: Policies,
    capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    orderer: Option<OrdererSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    consortiums: Option<BTreeMap<&'static str, Consortium>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    consortium: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    application: Option<ApplicationSection>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConfigTx {
    organizations: Vec<Organization>,
    profiles: BTreeMap<&'static str, Profile>,
}

fn channel_policies() -> Policies {
    BTreeMap::from([
        ("Readers", Policy::implicit("ANY Readers")),
        ("Writers", Policy::implicit("ANY Writers")),
        ("Admins", Policy::implicit("MAJORITY Admins")),
    ])
}

/// Input for the channel artifact generator: one genesis profile and one
/// application channel profile. Orderer endpoints and anchor peers use the
/// ports assigned in `workloads`.
pub fn render_configtx(
    spec: &NetworkSpec,
    layout: &ArtifactLayout,
    workloads: &[WorkloadDescriptor],
) -> Result<String> {
    let client_port = |name: &str| -> Result<u16> {
        workloads
            .iter()
            .find(|w| w.name == name)
            .and_then(|w| w.ports.first())
            .map(|p| p.port)
            .ok_or_else(|| Error::validation(format!("no workload rendered for {name}")))
    };

    let orderers = spec.orderer_nodes();
    let mut addresses = Vec::with_capacity(orderers.len());
    let mut consenters = Vec::with_capacity(orderers.len());
    for node in &orderers {
        let port = client_port(&node.name)?;
        addresses.push(format!("{}:{}", node.name, port));
        let tls = layout
            .node_dir(OrgRole::Orderer, &node.org, &node.hostname())
            .join("tls/server.crt")
            .display()
            .to_string();
        consenters.push(Consenter {
            host: node.name.clone(),
            port,
            client_tls_cert: tls.clone(),
            server_tls_cert: tls,
        });
    }

    let mut orderer_orgs = Vec::new();
    let mut peer_orgs = Vec::new();
    for org in spec.organizations() {
        let mut entry = organization(layout, &org);
        match org.role {
            OrgRole::Orderer => {
                entry.orderer_endpoints = orderers
                    .iter()
                    .zip(&addresses)
                    .filter(|(node, _)| node.org == org.name)
                    .map(|(_, address)| address.clone())
                    .collect();
                orderer_orgs.push(entry);
            }
            OrgRole::Peer => {
                let anchor = NodeRef::new(NodeKind::Peer, 0, org.name);
                if let Ok(port) = client_port(&anchor.name) {
                    entry.anchor_peers.push(AnchorPeer {
                        host: anchor.name,
                        port,
                    });
                }
                peer_orgs.push(entry);
            }
        }
    }

    let consensus = spec.orderer.consensus_type;
    let batch = &spec.orderer.batch_size;
    let orderer = OrdererSection {
        orderer_type: consensus.orderer_type(),
        addresses,
        batch_timeout: spec.orderer.batch_timeout.clone(),
        batch_size: BatchSizeSection {
            max_message_count: batch.max_message_count,
            absolute_max_bytes: batch.absolute_max_bytes.clone(),
            preferred_max_bytes: batch.preferred_max_bytes.clone(),
        },
        kafka: (consensus == ConsensusKind::Kafka).then(|| Kafka {
            brokers: spec.orderer.kafka_brokers.clone(),
        }),
        etcd_raft: (consensus == ConsensusKind::EtcdRaft).then_some(EtcdRaft { consenters }),
        organizations: orderer_orgs.clone(),
        policies: {
            let mut p = channel_policies();
            p.insert("BlockValidation", Policy::implicit("ANY Writers"));
            p
        },
        capabilities: v2_capabilities(),
    };

    let genesis = Profile {
        policies: channel_policies(),
        capabilities: v2_capabilities(),
        orderer: Some(orderer),
        consortiums: Some(BTreeMap::from([(
            CONSORTIUM,
            Consortium {
                organizations: peer_orgs.clone(),
            },
        )])),
        consortium: None,
        application: None,
    };

    let mut application_policies = channel_policies();
    application_policies.insert("LifecycleEndorsement", Policy::implicit("MAJORITY Endorsement"));
    application_policies.insert("Endorsement", Policy::implicit("MAJORITY Endorsement"));
    let channel = Profile {
        policies: channel_policies(),
        capabilities: v2_capabilities(),
        orderer: None,
        consortiums: None,
        consortium: Some(CONSORTIUM),
        application: Some(ApplicationSection {
            organizations: peer_orgs.clone(),
            policies: application_policies,
            capabilities: v2_capabilities(),
        }),
    };

    let mut organizations = orderer_orgs;
    organizations.extend(peer_orgs);
    let configtx = ConfigTx {
        organizations,
        profiles: BTreeMap::from([(GENESIS_PROFILE, genesis), (CHANNEL_PROFILE, channel)]),
    };
    serde_yaml::to_string(&configtx).map_err(Error::from)
}

fn organization(layout: &ArtifactLayout, org: &OrgRef<'_>) -> Organization {
    let id = org.msp_id;
    let mut policies = BTreeMap::from([
        (
            "Readers",
            Policy::signature(format!("OR('{id}.admin', '{id}.peer', '{id}.client')")),
        ),
        (
            "Writers",
            Policy::signature(format!("OR('{id}.admin', '{id}.client')")),
        ),
        ("Admins", Policy::signature(format!("OR('{id}.admin')"))),
    ]);
    match org.role {
        OrgRole::Orderer => {
            policies.insert("Readers", Policy::signature(format!("OR('{id}.member')")));
            policies.insert("Writers", Policy::signature(format!("OR('{id}.member')")));
        }
        OrgRole::Peer => {
            policies.insert("Endorsement", Policy::signature(format!("OR('{id}.peer')")));
        }
    }

    Organization {
        name: id.to_string(),
        id: id.to_string(),
        msp_dir: layout
            .org_dir(org.role, org.name)
            .join("msp")
            .display()
            .to_string(),
        policies,
        orderer_endpoints: Vec::new(),
        anchor_peers: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tests::sample_spec;
    use crate::network::PeerDelta;
    use crate::workload::WorkloadBuilder;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn crypto_config_lists_every_host() {
        let spec = sample_spec();
        let doc = yaml(&render_crypto_config(&spec, false).unwrap());

        let orderer_org = &doc["OrdererOrgs"][0];
        assert_eq!(orderer_org["Name"], "ordererorg1");
        assert_eq!(orderer_org["Domain"], "ordererorg1");
        assert_eq!(orderer_org["Specs"][0]["Hostname"], "orderer0-ordererorg1");
        assert_eq!(orderer_org["EnableNodeOUs"], true);

        let org2 = &doc["PeerOrgs"][1];
        assert_eq!(org2["Specs"].as_sequence().unwrap().len(), 2);
        assert_eq!(org2["Specs"][1]["Hostname"], "peer1-org2");
        assert_eq!(org2["Users"]["Count"], 1);
    }

    #[test]
    fn extended_crypto_config_includes_added_peers() {
        let mut spec = sample_spec();
        spec.add_peer = vec![PeerDelta {
            name: "org2".into(),
            num_peers: 1,
        }];
        let doc = yaml(&render_crypto_config(&spec, true).unwrap());
        assert_eq!(doc["PeerOrgs"][1]["Specs"].as_sequence().unwrap().len(), 3);
        assert_eq!(doc["PeerOrgs"][1]["Specs"][2]["Hostname"], "peer2-org2");
        assert_eq!(doc["PeerOrgs"][0]["Specs"].as_sequence().unwrap().len(), 2);

        let plain = yaml(&render_crypto_config(&spec, false).unwrap());
        assert_eq!(plain["PeerOrgs"][1]["Specs"].as_sequence().unwrap().len(), 2);
    }

    #[test]
    fn configtx_wires_raft_consenters_and_consortium() {
        let spec = sample_spec();
        let layout = ArtifactLayout::new("/a").unwrap();
        let workloads = WorkloadBuilder::new(&spec).build().unwrap();
        let doc = yaml(&render_configtx(&spec, &layout, &workloads).unwrap());

        let genesis = &doc["Profiles"][GENESIS_PROFILE];
        let orderer = &genesis["Orderer"];
        assert_eq!(orderer["OrdererType"], "etcdraft");
        assert_eq!(orderer["Addresses"][0], "orderer0-ordererorg1:30000");
        let consenter = &orderer["EtcdRaft"]["Consenters"][0];
        assert_eq!(consenter["Port"], 30000);
        assert_eq!(
            consenter["ServerTLSCert"],
            "/a/crypto-config/ordererOrganizations/ordererorg1/orderers/orderer0-ordererorg1.ordererorg1/tls/server.crt"
        );
        assert!(orderer.get("Kafka").is_none());

        let members = genesis["Consortiums"][CONSORTIUM]["Organizations"]
            .as_sequence()
            .unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0]["ID"], "Org1ExampleCom");
        assert_eq!(members[0]["AnchorPeers"][0]["Port"], 31000);
        assert_eq!(members[1]["AnchorPeers"][0]["Host"], "peer0-org2");

        let channel = &doc["Profiles"][CHANNEL_PROFILE];
        assert_eq!(channel["Consortium"], CONSORTIUM);
        assert_eq!(
            channel["Application"]["Policies"]["Endorsement"]["Rule"],
            "MAJORITY Endorsement"
        );
    }

    #[test]
    fn configtx_solo_has_no_raft_section() {
        let mut spec = sample_spec();
        spec.orderer.consensus_type = ConsensusKind::Solo;
        let layout = ArtifactLayout::new("/a").unwrap();
        let workloads = WorkloadBuilder::new(&spec).build().unwrap();
        let doc = yaml(&render_configtx(&spec, &layout, &workloads).unwrap());
        let orderer = &doc["Profiles"][GENESIS_PROFILE]["Orderer"];
        assert_eq!(orderer["OrdererType"], "solo");
        assert!(orderer.get("EtcdRaft").is_none());
    }

    #[test]
    fn configtx_requires_rendered_orderers() {
        let spec = sample_spec();
        let layout = ArtifactLayout::new("/a").unwrap();
        assert!(matches!(
            render_configtx(&spec, &layout, &[]),
            Err(Error::Validation(_))
        ));
    }
}
