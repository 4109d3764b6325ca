//! The unit of work of the reconciliation pipeline

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ReconcileError;
use crate::request::ReconciliationRequest;

/// One step of a reconcile chain
///
/// Actions are built once per controller and shared by every reconcile, so
/// any state they hold must be safe to share. `execute` must be idempotent:
/// a cycle that fails part way is simply run again.
#[async_trait]
pub trait Action: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Run against the current cycle
    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError>;
}

/// Ordered list of actions
pub type Actions = Vec<Arc<dyn Action>>;

/// [`Action`] built from a synchronous closure
pub struct FnAction<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&mut ReconciliationRequest) -> Result<(), ReconcileError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, rr: &mut ReconciliationRequest) -> Result<(), ReconcileError> {
        (self.f)(rr)
    }
}

/// Wrap a closure as a shareable action
pub fn action_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn Action>
where
    F: Fn(&mut ReconciliationRequest) -> Result<(), ReconcileError> + Send + Sync + 'static,
{
    Arc::new(FnAction {
        name: name.into(),
        f,
    })
}
