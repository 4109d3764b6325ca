//! Status writes that survive concurrent modification

use kube::api::DynamicObject;
use tracing::debug;

use odh_common::retry::{retry_with_backoff, RetryConfig};
use odh_common::Error;

use crate::client::{ClusterClient, ResourceRef};

/// Update the status of `resource` through the status subresource
///
/// `update` receives the freshly fetched object and mutates its status. On
/// Conflict or NotFound the object is fetched again and `update` re-run,
/// with bounded exponential backoff.
pub async fn report_condition<F>(
    client: &dyn ClusterClient,
    resource: &ResourceRef,
    update: F,
) -> Result<DynamicObject, Error>
where
    F: Fn(&mut DynamicObject) -> Result<(), Error> + Send + Sync,
{
    report_condition_with(&RetryConfig::status_update(), client, resource, update).await
}

pub(crate) async fn report_condition_with<F>(
    config: &RetryConfig,
    client: &dyn ClusterClient,
    resource: &ResourceRef,
    update: F,
) -> Result<DynamicObject, Error>
where
    F: Fn(&mut DynamicObject) -> Result<(), Error> + Send + Sync,
{
    retry_with_backoff(
        config,
        "report-condition",
        |e: &Error| e.is_conflict() || e.is_not_found(),
        || {
            let update = &update;
            async move {
                let mut obj = client
                    .get(resource)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("{resource} not found")))?;
                update(&mut obj)?;
                let updated = client.update_status(&obj).await?;
                debug!(resource = %resource, "status updated");
                Ok(updated)
            }
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use kube::api::GroupVersionKind;
    use odh_common::resources::from_value;
    use serde_json::json;

    use crate::testing::FakeClusterClient;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn component() -> (FakeClusterClient, ResourceRef) {
        let obj = from_value(json!({
            "apiVersion": "components.platform.opendatahub.io/v1alpha1",
            "kind": "Component",
            "metadata": {"name": "default-dashboard"}
        }))
        .unwrap();
        let r = ResourceRef::cluster(
            GroupVersionKind::gvk("components.platform.opendatahub.io", "v1alpha1", "Component"),
            "default-dashboard",
        );
        (FakeClusterClient::new().with_object(obj), r)
    }

    #[tokio::test]
    async fn writes_status() {
        let (fake, r) = component();
        let updated = report_condition(&fake, &r, |obj| {
            obj.data["status"] = json!({"phase": "Ready"});
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(updated.data["status"]["phase"], "Ready");
        assert_eq!(fake.writes().status_updates, 1);
    }

    #[tokio::test]
    async fn conflicts_refetch_and_rerun_update() {
        let (fake, r) = component();
        fake.fail_status_updates(&[409, 409]);
        let calls = AtomicU32::new(0);

        report_condition_with(&fast(), &fake, &r, |obj| {
            calls.fetch_add(1, Ordering::SeqCst);
            obj.data["status"] = json!({"phase": "NotReady"});
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stored = fake.object(&r).unwrap();
        assert_eq!(stored.data["status"]["phase"], "NotReady");
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let (fake, r) = component();
        fake.fail_status_updates(&[422]);
        let calls = AtomicU32::new(0);

        let err = report_condition_with(&fast(), &fake, &r, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.api_code(), Some(422));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_object_exhausts_retries() {
        let fake = FakeClusterClient::new();
        let (_, r) = component();
        let err = report_condition_with(&fast(), &fake, &r, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
