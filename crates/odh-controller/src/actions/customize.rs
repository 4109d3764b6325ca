//! Per-resource mutations applied between render and deploy

use async_trait::async_trait;
use kube::api::DynamicObject;

use odh_common::resources::{kind_of, set_annotation, set_label};

use crate::action::Action;
use crate::error::ReconcileError;
use crate::request::ReconciliationRequest;

type Customizer = Box<dyn Fn(&mut DynamicObject) -> Result<(), ReconcileError> + Send + Sync>;

/// Runs every customizer over every rendered resource
///
/// Customizers see resources in install order and run in the order they
/// were added.
#[derive(Default)]
pub struct CustomizeAction {
    customizers: Vec<Customizer>,
}

impl CustomizeAction {
    /// No customizers
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary mutation
    pub fn with<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut DynamicObject) -> Result<(), ReconcileError> + Send + Sync + 'static,
    {
        self.customizers.push(Box::new(f));
        self
    }

    /// Set an annotation on every resource of `kind`
    pub fn annotate_kind(self, kind: &str, key: &str, value: &str) -> Self {
        let (kind, key, value) = (kind.to_string(), key.to_string(), value.to_string());
        self.with(move |obj| {
            if kind_of(obj) == kind {
                set_annotation(obj, &key, &value);
            }
            Ok(())
        })
    }

    /// Set a label on every resource of `kind`
    pub fn label_kind(self, kind: &str, key: &str, value: &str) -> Self {
        let (kind, key, value) = (kind.to_string(), key.to_string(), value.to_string());
        self.with(move |obj| {
            if kind_of(obj) == kind {
                set_label(obj, &key, &value);
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Action for CustomizeAction {
    fn name(&self) -> &str {
        "customize"
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        rr.for_each_resource(|obj| {
            for customize in &self.customizers {
                customize(obj)?;
            }
            Ok(true)
        })
    }
}
