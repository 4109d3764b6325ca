//! Controller runner: builds one controller future per reconciler
//!
//! Each `build_*` function returns boxed futures the caller joins. Building
//! is separate from running so the composition root stays small.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use odh_common::crd::{Component, DataScienceCluster};
use odh_common::LABEL_COMPONENT_NAME;
use odh_components::{new_dsc_reconciler, ComponentError, ComponentRegistry, ControllerConfig};
use odh_controller::{BaseReconciler, ClusterClient};

/// Watcher timeout (seconds), below the client read timeout so idle
/// watches are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller loop ready to be awaited
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build one controller per registered component
///
/// Each controller only sees the Component CR carrying its name label and
/// is retriggered by changes to the Deployments it owns.
pub fn build_component_controllers(
    kube_client: Client,
    cluster: Arc<dyn ClusterClient>,
    registry: &ComponentRegistry,
    config: &ControllerConfig,
) -> Result<Vec<ControllerFuture>, ComponentError> {
    let mut controllers: Vec<ControllerFuture> = Vec::new();
    for handler in registry.handlers() {
        let reconciler = Arc::new(handler.new_component_reconciler(cluster.clone(), config)?);
        let selector = format!("{LABEL_COMPONENT_NAME}={}", handler.name());
        let components: Api<Component> = Api::all(kube_client.clone());
        let deployments: Api<Deployment> = Api::all(kube_client.clone());
        let name = handler.name().to_string();

        tracing::info!(component = %name, "- component controller");
        controllers.push(Box::pin(
            Controller::new(
                components,
                WatcherConfig::default().labels(&selector).timeout(WATCH_TIMEOUT_SECS),
            )
            .owns(deployments, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(
                BaseReconciler::<Component>::reconcile,
                BaseReconciler::<Component>::error_policy,
                reconciler,
            )
            .for_each(log_reconcile_result(name)),
        ));
    }
    Ok(controllers)
}

/// Build the DataScienceCluster controller
///
/// Component CRs are owned by the DataScienceCluster, so their status
/// changes retrigger the aggregation.
pub fn build_dsc_controller(
    kube_client: Client,
    cluster: Arc<dyn ClusterClient>,
    registry: Arc<ComponentRegistry>,
    config: &ControllerConfig,
) -> ControllerFuture {
    let reconciler = Arc::new(new_dsc_reconciler(registry, cluster, config));
    let dscs: Api<DataScienceCluster> = Api::all(kube_client.clone());
    let components: Api<Component> = Api::all(kube_client);

    tracing::info!("- DataScienceCluster controller");
    Box::pin(
        Controller::new(dscs, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .owns(components, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(
                BaseReconciler::<DataScienceCluster>::reconcile,
                BaseReconciler::<DataScienceCluster>::error_policy,
                reconciler,
            )
            .for_each(log_reconcile_result("datasciencecluster".to_string())),
    )
}

/// Creates a closure for logging reconciliation results
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller: String,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(controller = %controller, ?action, "reconciliation completed"),
            Err(e) => tracing::warn!(controller = %controller, error = ?e, "reconciliation error"),
        }
        std::future::ready(())
    }
}
