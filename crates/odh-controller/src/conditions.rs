//! Status condition bookkeeping for one reconcile cycle
//!
//! A [`ConditionsManager`] owns the happy condition (`Ready`) and a set of
//! dependent conditions. Actions mark dependents; the reconciler then
//! recomputes the happy condition from them before writing status.

use odh_common::crd::{find_condition, set_condition, Condition, ConditionSeverity, ConditionStatus};

/// Overall readiness of a platform object
pub const CONDITION_READY: &str = "Ready";

/// The main action chain completed without error
pub const CONDITION_PROVISIONING_SUCCEEDED: &str = "ProvisioningSucceeded";

/// Every deployment of the component is available
pub const CONDITION_DEPLOYMENTS_AVAILABLE: &str = "DeploymentsAvailable";

/// Reason used when a deployment is missing or unavailable
pub const REASON_DEPLOYMENTS_NOT_READY: &str = "DeploymentsNotReady";

/// Reason used for True conditions
pub const REASON_READY: &str = "Ready";

/// Reason used for a failed chain without a more specific reason
pub const REASON_ERROR: &str = "Error";

/// Tracks the conditions of one object during a cycle
#[derive(Clone, Debug)]
pub struct ConditionsManager {
    happy: String,
    dependents: Vec<String>,
    generation: Option<i64>,
    conditions: Vec<Condition>,
}

impl Default for ConditionsManager {
    fn default() -> Self {
        Self::new(
            CONDITION_READY,
            &[CONDITION_PROVISIONING_SUCCEEDED, CONDITION_DEPLOYMENTS_AVAILABLE],
        )
    }
}

impl ConditionsManager {
    /// Create a manager with a happy condition and its dependents
    pub fn new(happy: &str, dependents: &[&str]) -> Self {
        Self {
            happy: happy.to_string(),
            dependents: dependents.iter().map(|d| d.to_string()).collect(),
            generation: None,
            conditions: Vec::new(),
        }
    }

    /// Start from the conditions already in status
    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Stamp `observedGeneration` on every condition marked from now on
    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Make the happy condition also depend on `type_`
    pub fn add_dependent(&mut self, type_: &str) {
        if !self.dependents.iter().any(|d| d == type_) {
            self.dependents.push(type_.to_string());
        }
    }

    fn set(&mut self, mut condition: Condition) {
        condition.observed_generation = self.generation;
        set_condition(&mut self.conditions, condition);
    }

    /// Mark a condition True
    pub fn mark_true(&mut self, type_: &str, message: impl Into<String>) {
        self.set(Condition::new(type_, ConditionStatus::True, REASON_READY, message));
    }

    /// Mark a condition False with error severity
    pub fn mark_false(&mut self, type_: &str, reason: &str, message: impl Into<String>) {
        let mut condition = Condition::new(type_, ConditionStatus::False, reason, message);
        condition.severity = Some(ConditionSeverity::Error);
        self.set(condition);
    }

    /// Mark a condition False without affecting readiness
    pub fn mark_info(&mut self, type_: &str, reason: &str, message: impl Into<String>) {
        let mut condition = Condition::new(type_, ConditionStatus::False, reason, message);
        condition.severity = Some(ConditionSeverity::Info);
        self.set(condition);
    }

    /// Mark a condition Unknown
    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: impl Into<String>) {
        self.set(Condition::new(type_, ConditionStatus::Unknown, reason, message));
    }

    /// Look up a condition
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        find_condition(&self.conditions, type_)
    }

    /// True when the happy condition is True
    pub fn is_happy(&self) -> bool {
        self.get(&self.happy).is_some_and(Condition::is_true)
    }

    /// Recompute the happy condition from the dependents
    ///
    /// The first dependent that is False with error severity makes the happy
    /// condition False with that dependent's reason and message. Otherwise
    /// any Unknown dependent makes it Unknown. Dependents that were never
    /// marked are ignored.
    pub fn recompute_happy(&mut self) {
        let marked: Vec<&Condition> = self
            .dependents
            .iter()
            .filter_map(|d| find_condition(&self.conditions, d))
            .collect();
        let failed = marked
            .iter()
            .find(|c| {
                c.status == ConditionStatus::False && c.severity != Some(ConditionSeverity::Info)
            })
            .map(|c| (c.reason.clone(), c.message.clone()));
        let unknown = marked
            .iter()
            .find(|c| c.status == ConditionStatus::Unknown)
            .map(|c| (c.reason.clone(), c.message.clone()));

        let happy = self.happy.clone();
        match (failed, unknown) {
            (Some((reason, message)), _) => self.mark_false(&happy, &reason, message),
            (None, Some((reason, message))) => self.mark_unknown(&happy, &reason, message),
            (None, None) => self.mark_true(&happy, ""),
        }
    }

    /// Conditions in insertion order
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Consume the manager, returning the conditions
    pub fn into_conditions(self) -> Vec<Condition> {
        self.conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_dependents_true_is_happy() {
        let mut cm = ConditionsManager::default();
        cm.mark_true(CONDITION_PROVISIONING_SUCCEEDED, "");
        cm.mark_true(CONDITION_DEPLOYMENTS_AVAILABLE, "1/1 deployments ready");
        cm.recompute_happy();
        assert!(cm.is_happy());
    }

    #[test]
    fn false_dependent_propagates_reason() {
        let mut cm = ConditionsManager::default().with_generation(3);
        cm.mark_true(CONDITION_PROVISIONING_SUCCEEDED, "");
        cm.mark_false(
            CONDITION_DEPLOYMENTS_AVAILABLE,
            REASON_DEPLOYMENTS_NOT_READY,
            "0/2 deployments ready",
        );
        cm.recompute_happy();

        let ready = cm.get(CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, REASON_DEPLOYMENTS_NOT_READY);
        assert_eq!(ready.message, "0/2 deployments ready");
        assert_eq!(ready.observed_generation, Some(3));
    }

    #[test]
    fn info_severity_does_not_block_readiness() {
        let mut cm = ConditionsManager::default();
        cm.mark_true(CONDITION_PROVISIONING_SUCCEEDED, "");
        cm.mark_info(CONDITION_DEPLOYMENTS_AVAILABLE, "NoDeployments", "nothing to wait for");
        cm.recompute_happy();
        assert!(cm.is_happy());
    }

    #[test]
    fn unknown_dependent_makes_happy_unknown() {
        let mut cm = ConditionsManager::default();
        cm.mark_unknown(CONDITION_PROVISIONING_SUCCEEDED, "Reconciling", "");
        cm.recompute_happy();
        assert_eq!(cm.get(CONDITION_READY).unwrap().status, ConditionStatus::Unknown);
    }

    #[test]
    fn existing_conditions_are_updated_in_place() {
        let existing = vec![Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            "Error",
            "old",
        )];
        let mut cm = ConditionsManager::default().with_conditions(existing);
        cm.mark_true(CONDITION_PROVISIONING_SUCCEEDED, "");
        cm.recompute_happy();
        assert_eq!(cm.conditions().len(), 2);
        assert!(cm.is_happy());
    }

    #[test]
    fn added_dependents_feed_readiness() {
        let mut cm = ConditionsManager::default();
        cm.add_dependent("DashboardReady");
        cm.add_dependent("DashboardReady");
        cm.mark_true(CONDITION_PROVISIONING_SUCCEEDED, "");
        cm.mark_false("DashboardReady", "DeploymentsNotReady", "0/1 deployments ready");
        cm.recompute_happy();
        let ready = cm.get(CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.message, "0/1 deployments ready");
    }
}
