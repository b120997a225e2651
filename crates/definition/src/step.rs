//! Step definitions and their builder.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Hint for where a step's forward action should run.
///
/// `CpuBound` signals that the action should be off-loaded to an external
/// worker pool; the engine itself only carries the hint through to the
/// invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAffinity {
    /// Run on the saga's cooperative scheduler.
    #[default]
    Default,
    /// Off-load to an external CPU-bound worker pool.
    CpuBound,
}

/// One unit of forward work within a saga.
///
/// Immutable after construction; build through [`StepDefinition::builder`].
/// The forward `action` and optional `compensation` are names resolved by
/// the step invoker at call time; the definition itself is plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step id, unique within the saga.
    pub id: String,
    /// Forward action name.
    pub action: String,
    /// Compensating action name; steps without one are skipped on rollback.
    pub compensation: Option<String>,
    /// Ids of steps that must complete before this one may start.
    pub dependencies: BTreeSet<String>,
    /// Additional attempts after the first (0 = no retries).
    pub retry: u32,
    /// Base backoff between attempts; doubles per failed attempt.
    pub backoff_ms: u64,
    /// Per-attempt deadline; 0 disables the timeout.
    pub timeout_ms: u64,
    /// Whether backoff delays are randomized.
    pub jitter: bool,
    /// Jitter spread: the delay stays within `base * (1 ± jitter_factor)`.
    pub jitter_factor: f64,
    /// Execution-affinity hint.
    pub affinity: ExecutionAffinity,
    /// Override for compensation attempts (policy default otherwise).
    pub compensation_retry: Option<u32>,
    /// Override for compensation backoff base (policy default otherwise).
    pub compensation_backoff_ms: Option<u64>,
    /// Per-attempt deadline for the compensating action (none otherwise).
    pub compensation_timeout_ms: Option<u64>,
    /// A failed compensation of a critical step must propagate even under
    /// policies that otherwise absorb compensation errors.
    pub critical: bool,
}

impl StepDefinition {
    /// Starts building a step with the given id and forward action name.
    pub fn builder(id: impl Into<String>, action: impl Into<String>) -> StepDefinitionBuilder {
        StepDefinitionBuilder {
            id: id.into(),
            action: action.into(),
            compensation: None,
            dependencies: BTreeSet::new(),
            retry: 0,
            backoff_ms: 100,
            timeout_ms: 0,
            jitter: false,
            jitter_factor: 0.0,
            affinity: ExecutionAffinity::Default,
            compensation_retry: None,
            compensation_backoff_ms: None,
            compensation_timeout_ms: None,
            critical: false,
        }
    }

    /// Returns true if the step declares a compensating action.
    pub fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }
}

/// Fluent builder for [`StepDefinition`].
#[derive(Debug, Clone)]
pub struct StepDefinitionBuilder {
    id: String,
    action: String,
    compensation: Option<String>,
    dependencies: BTreeSet<String>,
    retry: u32,
    backoff_ms: u64,
    timeout_ms: u64,
    jitter: bool,
    jitter_factor: f64,
    affinity: ExecutionAffinity,
    compensation_retry: Option<u32>,
    compensation_backoff_ms: Option<u64>,
    compensation_timeout_ms: Option<u64>,
    critical: bool,
}

impl StepDefinitionBuilder {
    /// Sets the compensating action name.
    pub fn compensation(mut self, action: impl Into<String>) -> Self {
        self.compensation = Some(action.into());
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.insert(step_id.into());
        self
    }

    /// Adds dependencies on several steps at once.
    pub fn depends_on_all<I, S>(mut self, step_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(step_ids.into_iter().map(Into::into));
        self
    }

    /// Sets the number of additional attempts after the first.
    pub fn retry(mut self, retries: u32) -> Self {
        self.retry = retries;
        self
    }

    /// Sets the base backoff between attempts in milliseconds.
    pub fn backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    /// Sets the per-attempt timeout in milliseconds (0 disables it).
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Enables randomized backoff with the given factor (clamped to 0.0–1.0).
    pub fn jitter(mut self, factor: f64) -> Self {
        self.jitter = true;
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Marks the step's forward action as CPU-bound.
    pub fn cpu_bound(mut self) -> Self {
        self.affinity = ExecutionAffinity::CpuBound;
        self
    }

    /// Overrides the compensation attempt count for this step.
    pub fn compensation_retry(mut self, retries: u32) -> Self {
        self.compensation_retry = Some(retries);
        self
    }

    /// Overrides the compensation backoff base for this step.
    pub fn compensation_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.compensation_backoff_ms = Some(backoff_ms);
        self
    }

    /// Sets a per-attempt deadline for the compensating action.
    pub fn compensation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.compensation_timeout_ms = Some(timeout_ms);
        self
    }

    /// Marks the step as critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Builds the immutable step definition.
    pub fn build(self) -> StepDefinition {
        StepDefinition {
            id: self.id,
            action: self.action,
            compensation: self.compensation,
            dependencies: self.dependencies,
            retry: self.retry,
            backoff_ms: self.backoff_ms,
            timeout_ms: self.timeout_ms,
            jitter: self.jitter,
            jitter_factor: self.jitter_factor,
            affinity: self.affinity,
            compensation_retry: self.compensation_retry,
            compensation_backoff_ms: self.compensation_backoff_ms,
            compensation_timeout_ms: self.compensation_timeout_ms,
            critical: self.critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let step = StepDefinition::builder("reserve", "reserve_inventory").build();

        assert_eq!(step.id, "reserve");
        assert_eq!(step.action, "reserve_inventory");
        assert!(step.compensation.is_none());
        assert!(!step.has_compensation());
        assert!(step.dependencies.is_empty());
        assert_eq!(step.retry, 0);
        assert_eq!(step.backoff_ms, 100);
        assert_eq!(step.timeout_ms, 0);
        assert!(!step.jitter);
        assert_eq!(step.affinity, ExecutionAffinity::Default);
        assert!(!step.critical);
    }

    #[test]
    fn builder_sets_all_fields() {
        let step = StepDefinition::builder("charge", "charge_card")
            .compensation("refund_card")
            .depends_on("reserve")
            .depends_on_all(["validate", "price"])
            .retry(2)
            .backoff_ms(250)
            .timeout_ms(5_000)
            .jitter(0.25)
            .cpu_bound()
            .compensation_retry(5)
            .compensation_backoff_ms(500)
            .compensation_timeout_ms(2_000)
            .critical()
            .build();

        assert_eq!(step.compensation.as_deref(), Some("refund_card"));
        assert!(step.has_compensation());
        assert_eq!(step.dependencies.len(), 3);
        assert!(step.dependencies.contains("reserve"));
        assert_eq!(step.retry, 2);
        assert_eq!(step.backoff_ms, 250);
        assert_eq!(step.timeout_ms, 5_000);
        assert!(step.jitter);
        assert_eq!(step.jitter_factor, 0.25);
        assert_eq!(step.affinity, ExecutionAffinity::CpuBound);
        assert_eq!(step.compensation_retry, Some(5));
        assert_eq!(step.compensation_backoff_ms, Some(500));
        assert_eq!(step.compensation_timeout_ms, Some(2_000));
        assert!(step.critical);
    }

    #[test]
    fn jitter_factor_is_clamped() {
        let step = StepDefinition::builder("a", "act").jitter(3.0).build();
        assert_eq!(step.jitter_factor, 1.0);

        let step = StepDefinition::builder("a", "act").jitter(-0.5).build();
        assert_eq!(step.jitter_factor, 0.0);
    }

    #[test]
    fn serialization_roundtrip() {
        let step = StepDefinition::builder("ship", "create_shipment")
            .compensation("cancel_shipment")
            .depends_on("charge")
            .retry(1)
            .build();

        let json = serde_json::to_string(&step).unwrap();
        let back: StepDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, step.id);
        assert_eq!(back.compensation, step.compensation);
        assert_eq!(back.dependencies, step.dependencies);
    }
}
