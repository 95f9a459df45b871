//! Integration tests for fabnet
//!
//! # Test Organization
//!
//! - `cluster_objects`: Stories about creating objects, resolving service
//!   endpoints and deleting namespaces through the Kubernetes API
//!
//! - `network_lifecycle`: The full up / health / extend / down journey of a
//!   small network (slow, pulls Fabric images)
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind cluster_objects -- --ignored
//! cargo test --test kind network_lifecycle -- --ignored --nocapture
//! ```

mod cluster_objects;
mod helpers;
mod network_lifecycle;
