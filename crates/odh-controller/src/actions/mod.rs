//! Built-in pipeline actions
//!
//! A typical component chain is
//! `initialize -> devflags -> render -> customize -> deploy -> update-status -> gc`,
//! with `delete-resources` in the finalizer chain.

mod cleanup;
mod customize;
mod deploy;
mod deployments;
mod gc;
mod manifests;
mod render;

pub use cleanup::{CheckCrdAction, DeleteResourcesAction};
pub use customize::CustomizeAction;
pub use deploy::{DeployAction, DeployCache, DEFAULT_DEPLOY_CACHE_TTL};
pub use deployments::UpdateDeploymentsStatusAction;
pub use gc::GcAction;
pub use manifests::{DevFlagsAction, InitializeAction};
pub use render::{RenderHelmAction, RenderKustomizeAction, RenderTemplateAction};
