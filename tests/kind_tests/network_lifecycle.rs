//! The full journey of a small network: up, health, extend, down

use std::path::Path;

use fabnet::config::{ArtifactLayout, LauncherSettings};
use fabnet::controller::{Action, Backends, Launcher};
use fabnet::network::{NetworkSpec, PeerDelta};

use super::helpers::{kubeconfig, small_network, tool, unique_namespace};

async fn launcher(spec_path: &Path, spec: NetworkSpec) -> Launcher {
    let layout = ArtifactLayout::resolve(spec_path, &spec.artifacts_location).unwrap();
    let settings = LauncherSettings::default();
    let backends = Backends::connect(
        &kubeconfig(),
        &spec.k8s.namespace,
        &settings,
        tool("CRYPTOGEN", "cryptogen"),
        tool("CONFIGTXGEN", "configtxgen"),
    )
    .await
    .expect("failed to connect to test cluster");
    Launcher::new(spec, layout, settings, backends)
}

/// Story: An operator brings a network up, grows it, and tears it down
///
/// Expected behavior:
/// - `up` leaves a healthy orderer and peer plus a profile for org1
/// - `health` passes on the running network
/// - `extend` adds peer1-org1 and appends it to the existing profile
/// - `down` removes the namespace and every generated directory
#[tokio::test]
#[ignore = "requires kind cluster and Fabric tools - run with: cargo test --test kind -- --ignored"]
async fn story_operator_runs_the_full_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let artifacts = tmp.path().join("artifacts");
    let spec_path = tmp.path().join("network.yaml");
    let namespace = unique_namespace("fabnet-e2e");
    std::fs::write(&spec_path, small_network(&namespace, &artifacts)).unwrap();

    let spec = NetworkSpec::load(&spec_path).await.unwrap();
    let up = launcher(&spec_path, spec.clone()).await;
    up.run(Action::Up).await.expect("up should succeed");

    let profile_path = ArtifactLayout::new(&artifacts).unwrap().connection_profile("org1");
    let profile = std::fs::read_to_string(&profile_path).expect("profile for org1");
    assert!(profile.contains("peer0-org1"));

    up.run(Action::Health).await.expect("network should be healthy");

    let mut extended = spec.clone();
    extended.add_peer = vec![PeerDelta {
        name: "org1".to_string(),
        num_peers: 1,
    }];
    launcher(&spec_path, extended)
        .await
        .run(Action::Extend)
        .await
        .expect("extend should succeed");
    let profile = std::fs::read_to_string(&profile_path).unwrap();
    assert!(profile.contains("peer0-org1"));
    assert!(profile.contains("peer1-org1"));

    up.run(Action::Down).await.expect("down should succeed");
    assert!(!profile_path.exists());
}
