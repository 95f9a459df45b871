//! fabnet - Kubernetes lifecycle orchestrator for Hyperledger Fabric test networks
//!
//! fabnet reads a declarative network description, generates crypto material
//! and the genesis block with the Fabric tools, deploys every orderer, peer,
//! CA and CouchDB node as a StatefulSet, waits for the network to become
//! healthy and writes one connection profile per peer organization.
//!
//! # Modules
//!
//! - [`network`] - NetworkSpec parsing, defaults and validation
//! - [`workload`] - Workload descriptors and node port allocation
//! - [`tools`] - cryptogen / configtxgen invocation and their YAML inputs
//! - [`identity`] - Reading generated MSP and TLS material
//! - [`deployer`] - Creating and deleting cluster objects
//! - [`readiness`] - Pod readiness and node health probes
//! - [`endpoint`] - Reachable addresses of services
//! - [`profile`] - Connection profile generation
//! - [`controller`] - The up / down / health / extend lifecycle
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod deployer;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod kube_utils;
pub mod network;
pub mod profile;
pub mod readiness;
pub mod retry;
pub mod tools;
pub mod workload;

use std::time::Duration;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Timing Constants
// =============================================================================

/// Wait between pods reporting running and the first health probe
pub const HEALTH_SETTLE_DELAY: Duration = Duration::from_secs(15);

/// Interval between pod readiness re-evaluations
pub const POD_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Readiness polls per pod before giving up
pub const POD_MAX_POLLS: u32 = 20;

/// Interval between checks for namespace removal
pub const NAMESPACE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long `down` waits for the namespace to disappear
pub const NAMESPACE_DELETE_TIMEOUT: Duration = Duration::from_secs(180);
