//! Shared setup for cluster tests

use std::path::PathBuf;

use kube::Client;

use fabnet::kube_utils::create_client;

/// Kubeconfig named by `KUBECONFIG`
pub fn kubeconfig() -> PathBuf {
    std::env::var_os("KUBECONFIG")
        .map(PathBuf::from)
        .expect("KUBECONFIG must point at a test cluster")
}

/// Client for the test cluster
pub async fn test_client() -> Client {
    create_client(&kubeconfig())
        .await
        .expect("failed to connect to test cluster")
}

/// Tool binary from its env override or `PATH`
pub fn tool(env: &str, default: &str) -> PathBuf {
    std::env::var_os(env)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// A namespace name unique to this test run
pub fn unique_namespace(prefix: &str) -> String {
    let suffix: u32 = rand::random::<u32>() % 100_000;
    format!("{prefix}-{suffix}")
}

/// Spec for one orderer and one peer in `namespace`, artifacts under `artifacts`
pub fn small_network(namespace: &str, artifacts: &std::path::Path) -> String {
    format!(
        r#"
fabric_version: "2.2.0"
artifacts_location: {artifacts}
orderer_organizations:
  - name: ordererorg1
    msp_id: OrdererOrg1ExampleCom
    num_orderers: 1
    num_ca: 0
peer_organizations:
  - name: org1
    msp_id: Org1ExampleCom
    num_peers: 1
    num_ca: 0
tls: enabled
orderer:
  consensus_type: etcdraft
peer_db: goleveldb
k8s:
  namespace: {namespace}
  service_type: NodePort
  data_persistence: false
"#,
        artifacts = artifacts.display()
    )
}
