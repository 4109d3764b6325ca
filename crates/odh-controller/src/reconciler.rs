//! Generic reconcile loop shared by every platform controller
//!
//! A [`BaseReconciler`] runs two ordered action chains against an instance:
//! - the finalizer chain, when the instance is being deleted and still
//!   carries the platform finalizer
//! - the main chain otherwise, followed by a status write
//!
//! Chains stop at the first failing action. A `Stop` error in the finalizer
//! chain counts as success so the finalizer can still be removed.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::api::DynamicObject;
use kube::runtime::controller::Action as ControllerAction;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use odh_common::crd::{
    Condition, DSCInitialization, DataScienceCluster, PlatformStatus, Release, PHASE_NOT_READY,
    PHASE_READY,
};
use odh_common::resources::{is_terminating, to_typed};
use odh_common::{metrics, Error, PLATFORM_FINALIZER};

use crate::action::{Action, Actions};
use crate::client::{ClusterClient, ResourceRef};
use crate::conditions::{ConditionsManager, CONDITION_PROVISIONING_SUCCEEDED};
use crate::error::ReconcileError;
use crate::object::{gvk_for, PlatformObject};
use crate::request::ReconciliationRequest;
use crate::status::report_condition;

/// Requeue interval for a ready instance
pub const READY_RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue interval for an instance that is not ready yet
pub const NOT_READY_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Requeue delay after a transient error
pub const TRANSIENT_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue delay after a fatal error
pub const FATAL_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue delay after the chain stopped on an expected condition
pub const STOP_REQUEUE: Duration = Duration::from_secs(300);

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`BaseReconciler`]
pub struct ReconcilerBuilder<T> {
    client: Arc<dyn ClusterClient>,
    name: String,
    release: Release,
    actions: Actions,
    finalizer: Actions,
    _kind: PhantomData<fn() -> T>,
}

impl<T: PlatformObject> ReconcilerBuilder<T> {
    /// Running platform release, stamped on deployed resources and status
    pub fn with_release(mut self, release: Release) -> Self {
        self.release = release;
        self
    }

    /// Append an action to the main chain
    pub fn with_action(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    /// Append an already shared action to the main chain
    pub fn with_shared_action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    /// Append an action to the finalizer chain
    pub fn with_finalizer(mut self, action: impl Action + 'static) -> Self {
        self.finalizer.push(Arc::new(action));
        self
    }

    /// Append an already shared action to the finalizer chain
    pub fn with_shared_finalizer(mut self, action: Arc<dyn Action>) -> Self {
        self.finalizer.push(action);
        self
    }

    /// Finish building
    pub fn build(self) -> BaseReconciler<T> {
        BaseReconciler {
            client: self.client,
            name: self.name,
            release: self.release,
            actions: self.actions,
            finalizer: self.finalizer,
            _kind: PhantomData,
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Reconciles objects of type `T` through action chains
pub struct BaseReconciler<T> {
    client: Arc<dyn ClusterClient>,
    name: String,
    release: Release,
    actions: Actions,
    finalizer: Actions,
    _kind: PhantomData<fn() -> T>,
}

impl<T: PlatformObject> BaseReconciler<T> {
    /// Start building a reconciler named `name`
    ///
    /// The name is the field manager for applied resources and the value of
    /// the `part-of` label used by garbage collection.
    pub fn builder(client: Arc<dyn ClusterClient>, name: impl Into<String>) -> ReconcilerBuilder<T> {
        ReconcilerBuilder {
            client,
            name: name.into(),
            release: Release::default(),
            actions: Vec::new(),
            finalizer: Vec::new(),
            _kind: PhantomData,
        }
    }

    /// Controller name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry point for `kube::runtime::Controller::run`
    pub async fn reconcile(obj: Arc<T>, ctx: Arc<Self>) -> Result<ControllerAction, ReconcileError> {
        let resource = ResourceRef {
            gvk: gvk_for::<T>(),
            namespace: obj.namespace(),
            name: obj.name_any(),
        };
        ctx.reconcile_ref(&resource).await
    }

    /// Requeue policy for failed reconciles
    pub fn error_policy(obj: Arc<T>, error: &ReconcileError, ctx: Arc<Self>) -> ControllerAction {
        let name = obj.name_any();
        match error {
            ReconcileError::Stop { reason, .. } => {
                debug!(controller = %ctx.name, instance = %name, reason = %reason, "reconcile stopped");
                ControllerAction::requeue(STOP_REQUEUE)
            }
            ReconcileError::Transient(e) => {
                warn!(controller = %ctx.name, instance = %name, error = %e, "reconcile failed, will retry");
                ControllerAction::requeue(TRANSIENT_REQUEUE)
            }
            ReconcileError::Fatal(msg) => {
                error!(controller = %ctx.name, instance = %name, error = %msg, "reconcile failed");
                ControllerAction::requeue(FATAL_REQUEUE)
            }
        }
    }

    /// Reconcile the object behind `resource`
    pub async fn reconcile_ref(&self, resource: &ResourceRef) -> Result<ControllerAction, ReconcileError> {
        let start = Instant::now();
        let result = self.reconcile_inner(resource).await;
        metrics::record_reconcile_duration(&self.name, result.is_ok(), start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::record_reconcile_error(&self.name, e.error_type());
        }
        result
    }

    async fn reconcile_inner(&self, resource: &ResourceRef) -> Result<ControllerAction, ReconcileError> {
        let Some(obj) = self.client.get(resource).await? else {
            debug!(controller = %self.name, resource = %resource, "instance gone, nothing to do");
            return Ok(ControllerAction::await_change());
        };

        if is_terminating(&obj) {
            return self.finalize(resource, obj).await;
        }

        if !self.finalizer.is_empty() {
            self.client.add_finalizer(resource, PLATFORM_FINALIZER).await?;
        }

        let dsc = exactly_one::<DataScienceCluster>(self.list_all::<DataScienceCluster>().await?)?;
        let dsci = exactly_one::<DSCInitialization>(self.list_all::<DSCInitialization>().await?)?;
        let typed: T = to_typed(&obj)?;

        let mut rr = self.request(obj);
        rr.dev_flags = typed.dev_flags().cloned();
        rr.dsc = Some(dsc);
        rr.dsci = Some(dsci);

        info!(controller = %self.name, instance = %rr.name(), generation = rr.generation(), "reconciling");
        let outcome = self.run_chain(&self.actions, &mut rr, "main").await;

        match &outcome {
            Ok(()) => rr.conditions.mark_true(CONDITION_PROVISIONING_SUCCEEDED, ""),
            Err(e) => rr
                .conditions
                .mark_false(CONDITION_PROVISIONING_SUCCEEDED, e.reason(), e.to_string()),
        }
        rr.conditions.recompute_happy();
        self.write_status(resource, &rr).await?;

        outcome?;
        Ok(ControllerAction::requeue(if rr.conditions.is_happy() {
            READY_RESYNC_INTERVAL
        } else {
            NOT_READY_RESYNC_INTERVAL
        }))
    }

    /// Run the finalizer chain and release the instance
    async fn finalize(&self, resource: &ResourceRef, obj: DynamicObject) -> Result<ControllerAction, ReconcileError> {
        let has_finalizer = obj.finalizers().iter().any(|f| f == PLATFORM_FINALIZER);
        if !has_finalizer {
            return Ok(ControllerAction::await_change());
        }

        // Singletons may already be gone during teardown
        let dsci = self.list_all::<DSCInitialization>().await?;
        let mut rr = self.request(obj);
        if let [only] = dsci.as_slice() {
            rr.dsci = Some(only.clone());
        }

        info!(controller = %self.name, instance = %rr.name(), "running finalizer chain");
        match self.run_chain(&self.finalizer, &mut rr, "finalizer").await {
            Ok(()) => {}
            Err(e) if e.is_stop() => {}
            Err(e) => return Err(e),
        }

        self.client.remove_finalizer(resource, PLATFORM_FINALIZER).await?;
        info!(controller = %self.name, instance = %rr.name(), "finalizer removed");
        Ok(ControllerAction::await_change())
    }

    fn request(&self, obj: DynamicObject) -> ReconciliationRequest {
        let generation = obj.metadata.generation.unwrap_or_default();
        let existing = existing_conditions(&obj);
        let mut rr = ReconciliationRequest::new(self.client.clone(), &self.name, obj, self.release.clone());
        rr.conditions = ConditionsManager::default()
            .with_conditions(existing)
            .with_generation(generation);
        rr
    }

    async fn run_chain(
        &self,
        actions: &[Arc<dyn Action>],
        rr: &mut ReconciliationRequest,
        chain: &str,
    ) -> Result<(), ReconcileError> {
        for action in actions {
            debug!(controller = %self.name, chain, action = %action.name(), "executing action");
            if let Err(e) = action.execute(rr).await {
                if e.is_stop() {
                    info!(controller = %self.name, chain, action = %action.name(), reason = %e.reason(), "chain stopped");
                } else {
                    error!(
                        controller = %self.name,
                        instance = %rr.name(),
                        chain,
                        action = %action.name(),
                        error = %e,
                        "action failed"
                    );
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn list_all<K>(&self) -> Result<Vec<K>, ReconcileError>
    where
        K: kube::Resource<DynamicType = ()> + DeserializeOwned,
    {
        let objects = self.client.list(&gvk_for::<K>(), None, "").await?;
        Ok(objects
            .iter()
            .map(to_typed::<K>)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn write_status(&self, resource: &ResourceRef, rr: &ReconciliationRequest) -> Result<(), ReconcileError> {
        let status = PlatformStatus {
            phase: if rr.conditions.is_happy() { PHASE_READY } else { PHASE_NOT_READY }.to_string(),
            observed_generation: rr.generation(),
            conditions: rr.conditions.conditions().to_vec(),
            release: Some(rr.release.clone()),
        };
        let mut fields = match serde_json::to_value(&status).map_err(Error::from)? {
            Value::Object(map) => map,
            _ => return Err(ReconcileError::fatal("status did not serialize to an object")),
        };
        fields.extend(rr.extra_status.clone());

        report_condition(self.client.as_ref(), resource, |obj| {
            if !obj.data.get("status").is_some_and(Value::is_object) {
                obj.data["status"] = Value::Object(Default::default());
            }
            for (key, value) in &fields {
                obj.data["status"][key] = value.clone();
            }
            Ok(())
        })
        .await?;
        Ok(())
    }
}

/// The only element of `items`, or a configuration error
fn exactly_one<K: kube::Resource<DynamicType = ()>>(mut items: Vec<K>) -> Result<K, ReconcileError> {
    match items.len() {
        1 => Ok(items.remove(0)),
        n => Err(Error::configuration(format!(
            "expected exactly one {}, found {n}",
            K::kind(&())
        ))
        .into()),
    }
}

fn existing_conditions(obj: &DynamicObject) -> Vec<Condition> {
    obj.data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .cloned()
        .and_then(|c| serde_json::from_value(c).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use kube::api::GroupVersionKind;
    use odh_common::crd::{Component, ConditionStatus};
    use odh_common::resources::from_value;
    use serde_json::json;

    use crate::action::action_fn;
    use crate::actions::DeleteResourcesAction;
    use crate::conditions::{CONDITION_DEPLOYMENTS_AVAILABLE, CONDITION_READY};
    use crate::testing::FakeClusterClient;

    fn component(name: &str) -> DynamicObject {
        from_value(json!({
            "apiVersion": "components.platform.opendatahub.io/v1alpha1",
            "kind": "Component",
            "metadata": {"name": name},
            "spec": {}
        }))
        .unwrap()
    }

    fn dsc() -> DynamicObject {
        from_value(json!({
            "apiVersion": "datasciencecluster.opendatahub.io/v1",
            "kind": "DataScienceCluster",
            "metadata": {"name": "default-dsc"},
            "spec": {"components": {"foo": {"managementState": "Managed"}}}
        }))
        .unwrap()
    }

    fn dsci() -> DynamicObject {
        from_value(json!({
            "apiVersion": "dscinitialization.opendatahub.io/v1",
            "kind": "DSCInitialization",
            "metadata": {"name": "default-dsci"},
            "spec": {"applicationsNamespace": "ns"}
        }))
        .unwrap()
    }

    fn deployment(name: &str, part_of: &str) -> DynamicObject {
        from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "ns", "labels": {"part-of": part_of}}
        }))
        .unwrap()
    }

    fn instance_ref() -> ResourceRef {
        ResourceRef::of(&component("default-foo")).unwrap()
    }

    fn deployments_ready() -> Arc<dyn Action> {
        action_fn("deployments-ready", |rr| {
            rr.conditions.mark_true(CONDITION_DEPLOYMENTS_AVAILABLE, "1/1 deployments ready");
            Ok(())
        })
    }

    #[tokio::test]
    async fn successful_chain_reports_ready() {
        let fake = Arc::new(
            FakeClusterClient::new()
                .with_object(component("default-foo"))
                .with_object(dsc())
                .with_object(dsci()),
        );
        let reconciler = BaseReconciler::<Component>::builder(fake.clone(), "foo")
            .with_shared_action(deployments_ready())
            .with_shared_finalizer(action_fn("noop", |_| Ok(())))
            .build();

        reconciler.reconcile_ref(&instance_ref()).await.unwrap();

        let stored = fake.object(&instance_ref()).unwrap();
        let status: PlatformStatus = serde_json::from_value(stored.data["status"].clone()).unwrap();
        assert_eq!(status.phase, PHASE_READY);
        assert_eq!(status.observed_generation, 1);
        let ready = status.conditions.iter().find(|c| c.type_ == CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(
            stored.metadata.finalizers.unwrap_or_default(),
            vec![PLATFORM_FINALIZER.to_string()]
        );
    }

    #[tokio::test]
    async fn stop_is_surfaced_in_status() {
        let fake = Arc::new(
            FakeClusterClient::new()
                .with_object(component("default-foo"))
                .with_object(dsc())
                .with_object(dsci()),
        );
        let reconciler = BaseReconciler::<Component>::builder(fake.clone(), "foo")
            .with_shared_action(action_fn("check", |_| {
                Err(ReconcileError::stop("ServiceMeshNotConfigured", "mesh missing"))
            }))
            .build();

        let err = reconciler.reconcile_ref(&instance_ref()).await.unwrap_err();
        assert!(err.is_stop());

        let stored = fake.object(&instance_ref()).unwrap();
        assert_eq!(stored.data["status"]["phase"], PHASE_NOT_READY);
        let conditions: Vec<Condition> =
            serde_json::from_value(stored.data["status"]["conditions"].clone()).unwrap();
        let provisioned = conditions
            .iter()
            .find(|c| c.type_ == CONDITION_PROVISIONING_SUCCEEDED)
            .unwrap();
        assert_eq!(provisioned.status, ConditionStatus::False);
        assert_eq!(provisioned.reason, "ServiceMeshNotConfigured");
    }

    #[tokio::test]
    async fn missing_singleton_runs_no_action() {
        let fake = Arc::new(FakeClusterClient::new().with_object(component("default-foo")).with_object(dsci()));
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let reconciler = BaseReconciler::<Component>::builder(fake.clone(), "foo")
            .with_shared_action(action_fn("count", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .build();

        let err = reconciler.reconcile_ref(&instance_ref()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Fatal(_)));
        assert!(err.to_string().contains("DataScienceCluster"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(fake.writes().status_updates, 0);
    }

    #[tokio::test]
    async fn duplicate_singleton_is_fatal() {
        let mut second = dsc();
        second.metadata.name = Some("another-dsc".to_string());
        let fake = Arc::new(
            FakeClusterClient::new()
                .with_object(component("default-foo"))
                .with_object(dsc())
                .with_object(second)
                .with_object(dsci()),
        );
        let reconciler = BaseReconciler::<Component>::builder(fake, "foo").build();
        let err = reconciler.reconcile_ref(&instance_ref()).await.unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }

    #[tokio::test]
    async fn missing_instance_is_not_an_error() {
        let fake = Arc::new(FakeClusterClient::new());
        let reconciler = BaseReconciler::<Component>::builder(fake.clone(), "foo").build();
        reconciler.reconcile_ref(&instance_ref()).await.unwrap();
        assert_eq!(fake.writes().total(), 0);
    }

    #[tokio::test]
    async fn finalizer_chain_deletes_by_label_and_releases_instance() {
        let fake = Arc::new(
            FakeClusterClient::new()
                .with_object(component("default-foo"))
                .with_object(deployment("foo", "foo"))
                .with_object(deployment("baz", "baz")),
        );
        fake.add_finalizer(&instance_ref(), PLATFORM_FINALIZER).await.unwrap();
        fake.mark_deleting(&instance_ref());

        let reconciler = BaseReconciler::<Component>::builder(fake.clone(), "foo")
            .with_finalizer(
                DeleteResourcesAction::new([GroupVersionKind::gvk("apps", "v1", "Deployment")])
                    .in_namespace("ns")
                    .with_label("part-of", "foo"),
            )
            .build();

        reconciler.reconcile_ref(&instance_ref()).await.unwrap();

        assert_eq!(fake.names_of_kind("Deployment"), vec!["baz"]);
        assert!(fake.object(&instance_ref()).is_none());
    }

    #[tokio::test]
    async fn stop_in_finalizer_chain_still_releases_instance() {
        let fake = Arc::new(FakeClusterClient::new().with_object(component("default-foo")));
        fake.add_finalizer(&instance_ref(), PLATFORM_FINALIZER).await.unwrap();
        fake.mark_deleting(&instance_ref());

        let reconciler = BaseReconciler::<Component>::builder(fake.clone(), "foo")
            .with_finalizer(crate::actions::CheckCrdAction::new("missing.example.com", "Missing", ""))
            .build();

        reconciler.reconcile_ref(&instance_ref()).await.unwrap();
        assert!(fake.object(&instance_ref()).is_none());
    }

    #[tokio::test]
    async fn failing_finalizer_keeps_instance() {
        let fake = Arc::new(FakeClusterClient::new().with_object(component("default-foo")));
        fake.add_finalizer(&instance_ref(), PLATFORM_FINALIZER).await.unwrap();
        fake.mark_deleting(&instance_ref());

        let reconciler = BaseReconciler::<Component>::builder(fake.clone(), "foo")
            .with_shared_finalizer(action_fn("boom", |_| Err(ReconcileError::fatal("boom"))))
            .build();

        assert!(reconciler.reconcile_ref(&instance_ref()).await.is_err());
        assert!(fake.object(&instance_ref()).is_some());
    }

    mod error_policy_tests {
        use super::*;
        use rstest::rstest;

        #[rstest]
        #[case::stop(ReconcileError::stop("ServiceMeshNotConfigured", "mesh missing"), STOP_REQUEUE)]
        #[case::transient(ReconcileError::from(Error::conflict("modified")), TRANSIENT_REQUEUE)]
        #[case::fatal(ReconcileError::fatal("bad manifests"), FATAL_REQUEUE)]
        fn error_policy_requeues_by_error_class(#[case] error: ReconcileError, #[case] delay: Duration) {
            let reconciler = Arc::new(BaseReconciler::<Component>::builder(Arc::new(FakeClusterClient::new()), "foo").build());
            let instance = Arc::new(Component::new("default-foo", Default::default()));

            let action = BaseReconciler::error_policy(instance, &error, reconciler);

            assert_eq!(action, ControllerAction::requeue(delay));
        }
    }
}
