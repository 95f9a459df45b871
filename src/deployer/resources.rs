//! Kubernetes objects built from descriptors and identity bundles

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapProjection, ConfigMapVolumeSource, Container, ContainerPort, EnvVar,
    KeyToPath, Namespace, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ProjectedVolumeSource,
    ResourceRequirements, Secret, SecretVolumeSource, SecurityContext, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount, VolumeProjection, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;

use crate::identity::{IdentityBundle, OrgIdentity};
use crate::network::{Resources, ServiceType};
use crate::workload::{
    ContainerSpec, StorageClaim, VolumeSource, VolumeSpec, WorkloadDescriptor,
    CLIENT_ROOT_CA_SECRET, GENESIS_SECRET,
};

fn metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Namespace owning the network
pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: metadata(name),
        ..Default::default()
    }
}

/// Secret holding the genesis block under `genesis.block`
pub fn genesis_secret(block: Vec<u8>) -> Secret {
    Secret {
        metadata: metadata(GENESIS_SECRET),
        data: Some(BTreeMap::from([(
            "genesis.block".to_string(),
            ByteString(block),
        )])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Secret holding every organization's TLS CA certificate
pub fn client_root_ca_secret(certs: &BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: metadata(CLIENT_ROOT_CA_SECRET),
        string_data: Some(certs.clone()),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

fn config_map(name: String, data: &BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: metadata(&name),
        data: Some(data.clone()),
        ..Default::default()
    }
}

/// `{node}-msp` and `{node}-tls`
pub fn node_config_maps(bundle: &IdentityBundle) -> Vec<ConfigMap> {
    vec![
        config_map(format!("{}-msp", bundle.node), &bundle.msp),
        config_map(format!("{}-tls", bundle.node), &bundle.tls),
    ]
}

/// `{org}-admincerts` and, when present, `{org}-ca`
pub fn org_config_maps(identity: &OrgIdentity) -> Vec<ConfigMap> {
    let mut maps = vec![config_map(
        format!("{}-admincerts", identity.org),
        &identity.admincerts,
    )];
    if let Some(ca) = &identity.ca {
        maps.push(config_map(format!("{}-ca", identity.org), ca));
    }
    maps
}

/// Claim requested by a descriptor
pub fn persistent_volume_claim(claim: &StorageClaim) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: metadata(&claim.name),
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: claim.storage_class.clone(),
            access_modes: Some(claim.access_modes.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(claim.capacity.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service exposing a descriptor's ports in declaration order, named `port{i}`
pub fn service(desc: &WorkloadDescriptor) -> Service {
    let ports = desc
        .ports
        .iter()
        .enumerate()
        .map(|(i, p)| ServicePort {
            name: Some(format!("port{i}")),
            port: i32::from(p.port),
            target_port: Some(IntOrString::Int(i32::from(p.port))),
            node_port: match desc.service_type {
                ServiceType::NodePort => p.node_port.map(i32::from),
                ServiceType::LoadBalancer | ServiceType::ClusterIp => None,
            },
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(desc.name.clone()),
            labels: Some(desc.labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(desc.service_type.as_str().to_string()),
            selector: Some(desc.labels()),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Single-replica stateful workload for a descriptor
pub fn stateful_set(desc: &WorkloadDescriptor) -> StatefulSet {
    let labels = desc.labels();
    let annotations = (!desc.annotations.is_empty()).then(|| desc.annotations.clone());

    let containers = desc
        .containers
        .iter()
        .map(|c| {
            let mut container = container(c);
            // the node's own process owns the declared ports
            if c.name == desc.kind.as_str() {
                container.ports = Some(
                    desc.ports
                        .iter()
                        .map(|p| ContainerPort {
                            container_port: i32::from(p.port),
                            ..Default::default()
                        })
                        .collect(),
                );
            }
            container
        })
        .collect();

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(desc.name.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: desc.name.clone(),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    volumes: (!desc.volumes.is_empty())
                        .then(|| desc.volumes.iter().map(volume).collect()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container(spec: &ContainerSpec) -> Container {
    Container {
        name: spec.name.clone(),
        image: Some(spec.image.clone()),
        command: (!spec.command.is_empty()).then(|| spec.command.clone()),
        args: (!spec.args.is_empty()).then(|| spec.args.clone()),
        env: (!spec.env.is_empty()).then(|| {
            spec.env
                .iter()
                .map(|(name, value)| EnvVar {
                    name: name.clone(),
                    value: Some(value.clone()),
                    ..Default::default()
                })
                .collect()
        }),
        resources: spec.resources.as_ref().map(resource_requirements),
        volume_mounts: (!spec.mounts.is_empty()).then(|| {
            spec.mounts
                .iter()
                .map(|m| VolumeMount {
                    name: m.volume.clone(),
                    mount_path: m.mount_path.clone(),
                    ..Default::default()
                })
                .collect()
        }),
        security_context: spec.privileged.then(|| SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn resource_requirements(resources: &Resources) -> ResourceRequirements {
    let quantities = |m: &BTreeMap<String, String>| -> Option<BTreeMap<String, Quantity>> {
        (!m.is_empty()).then(|| {
            m.iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect()
        })
    };
    ResourceRequirements {
        limits: quantities(&resources.limits),
        requests: quantities(&resources.requests),
        ..Default::default()
    }
}

fn volume(spec: &VolumeSpec) -> Volume {
    let mut volume = Volume {
        name: spec.name.clone(),
        ..Default::default()
    };
    match &spec.source {
        VolumeSource::ConfigMap { name } => {
            volume.config_map = Some(ConfigMapVolumeSource {
                name: name.clone(),
                ..Default::default()
            })
        }
        VolumeSource::Projected { sources } => {
            volume.projected = Some(ProjectedVolumeSource {
                sources: Some(
                    sources
                        .iter()
                        .map(|(name, items)| VolumeProjection {
                            config_map: Some(ConfigMapProjection {
                                name: name.clone(),
                                items: Some(
                                    items
                                        .iter()
                                        .map(|i| KeyToPath {
                                            key: i.key.clone(),
                                            path: i.path.clone(),
                                            ..Default::default()
                                        })
                                        .collect(),
                                ),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            })
        }
        VolumeSource::Secret { name } => {
            volume.secret = Some(SecretVolumeSource {
                secret_name: Some(name.clone()),
                ..Default::default()
            })
        }
        VolumeSource::Claim { name } => {
            volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
                claim_name: name.clone(),
                ..Default::default()
            })
        }
    }
    volume
}
