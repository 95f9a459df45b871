//! Readiness probing for deployed workloads
//!
//! Every workload label gets its own task that follows the pod through a
//! watch stream. The task ends as soon as the pod is running, a container
//! terminates, or the tick budget runs out. Results flow over a channel to
//! one aggregator so a single slow pod never hides another pod's failure.

mod health;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::workload::APP_LABEL;
use crate::{Error, Result};

pub use health::{health_url, HealthCheck, HttpHealthCheck};
#[cfg(test)]
pub use health::MockHealthCheck;

/// Observed state of a pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodState {
    /// Not running yet; `reason` is the most specific cause available
    Pending {
        /// Waiting reason, failing condition, or phase
        reason: String,
    },
    /// Phase is Running and every container is running
    Running,
    /// A container terminated
    Failed {
        /// Pod name
        pod: String,
        /// Container name
        container: String,
        /// Termination reason
        reason: String,
        /// Termination message
        message: String,
    },
}

impl PodState {
    fn into_error(self, label: &str) -> Option<Error> {
        match self {
            PodState::Failed {
                pod,
                container,
                reason,
                message,
            } => Some(Error::ContainerTerminated {
                pod,
                container,
                reason,
                message,
            }),
            PodState::Pending { reason } => Some(Error::ReadinessTimeout {
                pod: label.to_string(),
                reason,
            }),
            PodState::Running => None,
        }
    }
}

/// Classify a pod from its status
pub fn evaluate_pod(pod: &Pod) -> PodState {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let Some(status) = &pod.status else {
        return PodState::Pending {
            reason: "no status reported".to_string(),
        };
    };
    let containers = status.container_statuses.as_deref().unwrap_or_default();

    for c in containers {
        if let Some(terminated) = c.state.as_ref().and_then(|s| s.terminated.as_ref()) {
            return PodState::Failed {
                pod: name,
                container: c.name.clone(),
                reason: terminated.reason.clone().unwrap_or_default(),
                message: terminated.message.clone().unwrap_or_default(),
            };
        }
    }

    let phase = status.phase.as_deref().unwrap_or("Unknown");
    let all_running = !containers.is_empty()
        && containers
            .iter()
            .all(|c| c.state.as_ref().is_some_and(|s| s.running.is_some()));
    if phase == "Running" && all_running {
        return PodState::Running;
    }

    let waiting = containers
        .iter()
        .filter_map(|c| c.state.as_ref()?.waiting.as_ref()?.reason.clone())
        .next();
    let condition = status
        .conditions
        .iter()
        .flatten()
        .filter(|c| c.status != "True")
        .find_map(|c| c.reason.clone());
    PodState::Pending {
        reason: waiting.or(condition).unwrap_or_else(|| phase.to_string()),
    }
}

/// Follow pod updates for `label` until the pod runs or fails, or
/// `max_polls` ticks of `poll_interval` pass.
///
/// An ended stream is not a failure; the tick budget still applies.
pub async fn watch_until_running<S, E>(
    label: &str,
    mut pods: S,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<Pod, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut last = PodState::Pending {
        reason: "no pod observed".to_string(),
    };
    let mut ticker = tokio::time::interval(poll_interval);
    // the first tick completes immediately
    ticker.tick().await;
    let mut polls = 0u32;
    let mut stream_open = true;

    loop {
        tokio::select! {
            event = pods.next(), if stream_open => match event {
                Some(Ok(pod)) => {
                    last = evaluate_pod(&pod);
                    debug!(label = %label, state = ?last, "Pod update");
                    match last {
                        PodState::Running => return Ok(()),
                        PodState::Failed { .. } => break,
                        PodState::Pending { .. } => {}
                    }
                }
                Some(Err(e)) => warn!(label = %label, error = %e, "Pod watch error"),
                None => stream_open = false,
            },
            _ = ticker.tick() => {
                polls += 1;
                debug!(label = %label, polls, "Pod not running yet");
                if polls >= max_polls {
                    break;
                }
            }
        }
    }

    match last.into_error(label) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Waits for the pod behind a workload label to run
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodObserver: Send + Sync {
    /// Resolve once the pod labelled `k8s-app=label` runs
    async fn wait_running(&self, label: &str) -> Result<()>;
}

/// [`PodObserver`] backed by a pod watch
pub struct KubePodObserver {
    client: Client,
    namespace: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl KubePodObserver {
    /// Observer for pods in `namespace`
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            poll_interval,
            max_polls,
        }
    }
}

#[async_trait]
impl PodObserver for KubePodObserver {
    async fn wait_running(&self, label: &str) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let config = watcher::Config::default().labels(&format!("{APP_LABEL}={label}"));
        let stream = watcher(pods, config)
            .default_backoff()
            .applied_objects()
            .boxed();
        watch_until_running(label, stream, self.poll_interval, self.max_polls).await
    }
}

/// Wait for every label concurrently and report all failures together
pub async fn verify_pods_running(observer: Arc<dyn PodObserver>, labels: &[String]) -> Result<()> {
    info!(count = labels.len(), "Waiting for pods to run");
    let (tx, mut rx) = mpsc::channel(labels.len().max(1));

    for label in labels {
        let tx = tx.clone();
        let observer = observer.clone();
        let label = label.clone();
        tokio::spawn(async move {
            let result = observer.wait_running(&label).await;
            // receiver outlives every sender
            let _ = tx.send((label, result)).await;
        });
    }
    drop(tx);

    let mut reported = Vec::with_capacity(labels.len());
    let mut failures = Vec::new();
    while let Some((label, result)) = rx.recv().await {
        match result {
            Ok(()) => debug!(label = %label, "Pod running"),
            Err(e) => {
                warn!(label = %label, error = %e, "Pod failed to come up");
                failures.push(e.to_string());
            }
        }
        reported.push(label);
    }

    for label in labels {
        if !reported.contains(label) {
            failures.push(format!("readiness task for {label} ended without a result"));
        }
    }

    if failures.is_empty() {
        info!("All pods running");
        Ok(())
    } else {
        Err(Error::Readiness { failures })
    }
}
