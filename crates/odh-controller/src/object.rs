//! Typed platform objects a [`BaseReconciler`](crate::reconciler::BaseReconciler) can drive

use std::fmt::Debug;

use kube::api::GroupVersionKind;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use odh_common::crd::{Component, DSCInitialization, DataScienceCluster, DevFlags};

/// A cluster-scoped platform CRD with a status subresource
pub trait PlatformObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Development overrides carried by the object
    fn dev_flags(&self) -> Option<&DevFlags> {
        None
    }
}

/// Group, version and kind of a statically typed resource
pub fn gvk_for<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

impl PlatformObject for Component {
    fn dev_flags(&self) -> Option<&DevFlags> {
        self.spec.dev_flags.as_ref()
    }
}

impl PlatformObject for DataScienceCluster {}

impl PlatformObject for DSCInitialization {}
