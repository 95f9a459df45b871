//! Stories about the cluster-facing seams: object creation, endpoint
//! resolution and namespace deletion

use std::time::Duration;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use fabnet::deployer::resources;
use fabnet::deployer::{ClusterClient, KubeClusterClient, ResourceDeployer};
use fabnet::endpoint::{EndpointResolver, KubeEndpointResolver};
use fabnet::Error;

use super::helpers::{test_client, unique_namespace};

fn node_port_service(name: &str, port: i32) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some([("k8s-app".to_string(), name.to_string())].into()),
            ports: Some(vec![ServicePort {
                name: Some("port0".to_string()),
                port,
                node_port: Some(port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Story: Objects are created once and conflicts are reported
// =============================================================================

#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_second_create_of_a_namespace_is_a_conflict() {
    let client = test_client().await;
    let cluster = KubeClusterClient::new(client);
    let ns = unique_namespace("fabnet-conflict");

    cluster
        .create_namespace(&resources::namespace(&ns))
        .await
        .expect("first create should succeed");
    let err = cluster
        .create_namespace(&resources::namespace(&ns))
        .await
        .expect_err("second create should conflict");
    assert!(
        matches!(err, Error::ResourceConflict { ref name, .. } if *name == ns),
        "unexpected error: {err:?}"
    );

    ResourceDeployer::new(&cluster, &ns)
        .delete_namespace(Duration::from_secs(2), Duration::from_secs(120))
        .await
        .expect("namespace should be deleted");
    assert!(!cluster.namespace_exists(&ns).await.unwrap());
}

// =============================================================================
// Story: NodePort services resolve to a node address
// =============================================================================

#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_node_port_service_resolves_to_node_address() {
    let client = test_client().await;
    let cluster = KubeClusterClient::new(client.clone());
    let ns = unique_namespace("fabnet-endpoint");

    cluster
        .create_namespace(&resources::namespace(&ns))
        .await
        .unwrap();
    cluster
        .create_service(&ns, &node_port_service("peer0-org1", 30999))
        .await
        .unwrap();

    let resolver = KubeEndpointResolver::new(client, ns.clone());
    let endpoint = resolver.resolve("peer0-org1", 0).await.unwrap();
    assert_eq!(endpoint.port, 30999);
    assert!(!endpoint.host.is_empty());

    ResourceDeployer::new(&cluster, &ns)
        .delete_namespace(Duration::from_secs(2), Duration::from_secs(120))
        .await
        .unwrap();
}

// =============================================================================
// Story: Deleting a namespace that never existed
// =============================================================================

#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_deleting_an_absent_namespace_succeeds() {
    let cluster = KubeClusterClient::new(test_client().await);
    let ns = unique_namespace("fabnet-absent");

    ResourceDeployer::new(&cluster, &ns)
        .delete_namespace(Duration::from_secs(1), Duration::from_secs(10))
        .await
        .expect("absent namespace is already deleted");
}
