//! Externally reachable addresses of deployed nodes
//!
//! The address depends on how the node's service is exposed: a cluster node
//! address plus node port, the load balancer ingress, or in-cluster DNS.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::ListParams;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::{Error, Result};

/// A host and port reachable from the launcher
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// IP address or hostname
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Endpoint at `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolves the service port of a node to a reachable endpoint
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Endpoint of port `port_index` of the service named `service`
    async fn resolve(&self, service: &str, port_index: usize) -> Result<Endpoint>;
}

/// [`EndpointResolver`] reading services and nodes from the cluster
pub struct KubeEndpointResolver {
    client: Client,
    namespace: String,
}

impl KubeEndpointResolver {
    /// Resolver for services in `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    async fn node_address(&self) -> Result<String> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        preferred_node_address(&list.items)
            .ok_or_else(|| Error::validation("no cluster node reports an ExternalIP or InternalIP"))
    }
}

#[async_trait]
impl EndpointResolver for KubeEndpointResolver {
    async fn resolve(&self, service: &str, port_index: usize) -> Result<Endpoint> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let svc = services.get(service).await?;

        let node_address = if service_type(&svc) == "NodePort" {
            Some(self.node_address().await?)
        } else {
            None
        };
        let endpoint = service_endpoint(&svc, &self.namespace, port_index, node_address.as_deref())?;
        debug!(service = %service, endpoint = %endpoint, "Resolved endpoint");
        Ok(endpoint)
    }
}

fn service_type(svc: &Service) -> &str {
    svc.spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .unwrap_or("ClusterIP")
}

/// First ExternalIP across nodes, else the first InternalIP
pub fn preferred_node_address(nodes: &[Node]) -> Option<String> {
    let addresses: Vec<_> = nodes
        .iter()
        .filter_map(|n| n.status.as_ref()?.addresses.as_ref())
        .flatten()
        .collect();
    ["ExternalIP", "InternalIP"].iter().find_map(|kind| {
        addresses
            .iter()
            .find(|a| a.type_ == *kind)
            .map(|a| a.address.clone())
    })
}

/// Endpoint of a service port given its exposure type.
///
/// `node_address` is only consulted for NodePort services.
pub fn service_endpoint(
    svc: &Service,
    namespace: &str,
    port_index: usize,
    node_address: Option<&str>,
) -> Result<Endpoint> {
    let name = svc.metadata.name.clone().unwrap_or_default();
    let port = svc
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.get(port_index))
        .ok_or_else(|| Error::validation(format!("service {name} has no port {port_index}")))?;

    let to_u16 = |p: i32| {
        u16::try_from(p).map_err(|_| Error::validation(format!("service {name} port {p} out of range")))
    };

    match service_type(svc) {
        "NodePort" => {
            let node_port = port.node_port.ok_or_else(|| {
                Error::validation(format!("service {name} port {port_index} has no nodePort"))
            })?;
            let host = node_address
                .ok_or_else(|| Error::validation("no node address for NodePort service"))?;
            Ok(Endpoint::new(host, to_u16(node_port)?))
        }
        "LoadBalancer" => {
            let ingress = svc
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|i| i.first())
                .ok_or_else(|| {
                    Error::validation(format!("load balancer for {name} has no ingress yet"))
                })?;
            let host = ingress
                .ip
                .clone()
                .or_else(|| ingress.hostname.clone())
                .ok_or_else(|| {
                    Error::validation(format!("load balancer for {name} has no ip or hostname"))
                })?;
            Ok(Endpoint::new(host, to_u16(port.port)?))
        }
        _ => Ok(Endpoint::new(
            format!("{name}.{namespace}.svc.cluster.local"),
            to_u16(port.port)?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, NodeAddress, NodeStatus, ServicePort,
        ServiceSpec, ServiceStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn node(addresses: &[(&str, &str)]) -> Node {
        Node {
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(t, a)| NodeAddress {
                            type_: t.to_string(),
                            address: a.to_string(),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn svc(type_: &str, ports: &[(i32, Option<i32>)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("peer0-org1".into()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some(type_.into()),
                ports: Some(
                    ports
                        .iter()
                        .map(|(port, node_port)| ServicePort {
                            port: *port,
                            node_port: *node_port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn external_ip_wins_over_internal() {
        let nodes = [
            node(&[("InternalIP", "10.0.0.1")]),
            node(&[("InternalIP", "10.0.0.2"), ("ExternalIP", "34.1.2.3")]),
        ];
        assert_eq!(preferred_node_address(&nodes).as_deref(), Some("34.1.2.3"));
    }

    #[test]
    fn internal_ip_when_no_external() {
        let nodes = [node(&[("Hostname", "kind-control-plane"), ("InternalIP", "172.18.0.2")])];
        assert_eq!(preferred_node_address(&nodes).as_deref(), Some("172.18.0.2"));
        assert_eq!(preferred_node_address(&[]), None);
    }

    #[test]
    fn node_port_uses_node_address_and_node_port() {
        let s = svc("NodePort", &[(31000, Some(31000)), (32000, Some(32000))]);
        let ep = service_endpoint(&s, "fabric", 1, Some("172.18.0.2")).unwrap();
        assert_eq!(ep, Endpoint::new("172.18.0.2", 32000));
        assert_eq!(ep.to_string(), "172.18.0.2:32000");
    }

    #[test]
    fn load_balancer_uses_ingress() {
        let mut s = svc("LoadBalancer", &[(31000, None), (32000, None)]);
        s.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    hostname: Some("lb.example.com".into()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        let ep = service_endpoint(&s, "fabric", 0, None).unwrap();
        assert_eq!(ep, Endpoint::new("lb.example.com", 31000));
    }

    #[test]
    fn pending_load_balancer_is_an_error() {
        let s = svc("LoadBalancer", &[(31000, None)]);
        let err = service_endpoint(&s, "fabric", 0, None).unwrap_err();
        assert!(err.to_string().contains("no ingress"));
    }

    #[test]
    fn cluster_ip_uses_service_dns() {
        let s = svc("ClusterIP", &[(5984, None)]);
        let ep = service_endpoint(&s, "fabric", 0, None).unwrap();
        assert_eq!(ep, Endpoint::new("peer0-org1.fabric.svc.cluster.local", 5984));
    }

    #[test]
    fn missing_port_index_is_an_error() {
        let s = svc("NodePort", &[(31000, Some(31000))]);
        assert!(service_endpoint(&s, "fabric", 1, Some("1.2.3.4")).is_err());
    }
}
