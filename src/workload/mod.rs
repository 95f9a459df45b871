//! Workload descriptors: what each logical node needs in order to run
//!
//! Descriptors are plain data produced by [`WorkloadBuilder`] and consumed,
//! never mutated, by the deployer. They are independent of the Kubernetes API
//! types so the builder stays a pure function of the network spec.

mod builder;
pub mod ports;

use std::collections::BTreeMap;

use crate::network::{NodeKind, Resources, ServiceType};

pub use builder::{WorkloadBuilder, ARTIFACTS_MOUNT, CLIENT_ROOT_CA_SECRET, GENESIS_SECRET};
pub use ports::{PortAllocator, PortClass};

/// Label key carrying the workload name
pub const APP_LABEL: &str = "k8s-app";
/// Label key carrying the node kind
pub const TYPE_LABEL: &str = "type";

/// A mount of a named volume into a container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeMount {
    /// Volume name
    pub volume: String,
    /// Absolute mount path
    pub mount_path: String,
}

impl VolumeMount {
    /// Mount `volume` at `mount_path`
    pub fn new(volume: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            mount_path: mount_path.into(),
        }
    }
}

/// One container of a workload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Entrypoint override
    pub command: Vec<String>,
    /// Arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Resource limits and requests
    pub resources: Option<Resources>,
    /// Volume mounts
    pub mounts: Vec<VolumeMount>,
    /// Run privileged
    pub privileged: bool,
}

impl ContainerSpec {
    /// Container with a name and image
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Set an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A config map key projected to a relative path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyToPath {
    /// Config map key
    pub key: String,
    /// Path relative to the mount point
    pub path: String,
}

/// Backing object of a volume
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeSource {
    /// Every key of a config map as a file
    ConfigMap {
        /// Config map name
        name: String,
    },
    /// Selected keys of several config maps merged into one directory
    Projected {
        /// Config map name and its projected keys
        sources: Vec<(String, Vec<KeyToPath>)>,
    },
    /// Every key of a secret as a file
    Secret {
        /// Secret name
        name: String,
    },
    /// A persistent volume claim
    Claim {
        /// Claim name
        name: String,
    },
}

/// A named volume of a workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Volume name, referenced by mounts
    pub name: String,
    /// Backing object
    pub source: VolumeSource,
}

impl VolumeSpec {
    /// True if this volume is backed by the object named `object`
    pub fn references(&self, object: &str) -> bool {
        match &self.source {
            VolumeSource::ConfigMap { name }
            | VolumeSource::Secret { name }
            | VolumeSource::Claim { name } => name == object,
            VolumeSource::Projected { sources } => sources.iter().any(|(name, _)| name == object),
        }
    }
}

/// An exposed port; index 0 of a descriptor is the client port, index 1 the
/// operations/health port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortSpec {
    /// Container and service port
    pub port: u16,
    /// Externally allocated node port, if any
    pub node_port: Option<u16>,
}

impl PortSpec {
    /// Port that is both listened on and exposed as a node port
    pub fn allocated(port: u16) -> Self {
        Self {
            port,
            node_port: Some(port),
        }
    }

    /// Cluster-internal port
    pub fn internal(port: u16) -> Self {
        Self {
            port,
            node_port: None,
        }
    }
}

/// Persistent storage requested by a workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageClaim {
    /// Claim name, `{workload}-data`
    pub name: String,
    /// Storage class; cluster default when unset
    pub storage_class: Option<String>,
    /// Requested capacity
    pub capacity: String,
    /// Access modes
    pub access_modes: Vec<String>,
}

/// Everything needed to deploy one logical node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadDescriptor {
    /// Workload, service and label name
    pub name: String,
    /// Node kind
    pub kind: NodeKind,
    /// Owning organization
    pub org: String,
    /// Containers, in pod order
    pub containers: Vec<ContainerSpec>,
    /// Volumes
    pub volumes: Vec<VolumeSpec>,
    /// Exposed ports
    pub ports: Vec<PortSpec>,
    /// Service type
    pub service_type: ServiceType,
    /// Pod template annotations
    pub annotations: BTreeMap<String, String>,
    /// Persistent claim to create before the workload
    pub storage: Option<StorageClaim>,
}

impl WorkloadDescriptor {
    /// Labels shared by the workload, its pods and its service selector
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_LABEL.to_string(), self.name.clone()),
            (TYPE_LABEL.to_string(), self.kind.as_str().to_string()),
        ])
    }

    /// Node ports allocated to this workload
    pub fn allocated_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().filter_map(|p| p.node_port)
    }

    /// True if any volume is backed by `object`
    pub fn references(&self, object: &str) -> bool {
        self.volumes.iter().any(|v| v.references(object))
    }

    /// Look up a container by name
    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }
}
