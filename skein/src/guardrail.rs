//! Guardrails — policy checks on agent inputs and outputs.
//!
//! - **[`InputGuardrail`]** — validates the user's initial message, on the
//!   first turn only (e.g. off-topic detection, content filtering).
//! - **[`OutputGuardrail`]** — validates the model's final content after
//!   schema decoding (e.g. PII detection, policy compliance).
//!
//! # Execution modes
//!
//! Input guardrails run per [`GuardrailSettings::mode`]:
//!
//! - **Parallel** (default): all checks run concurrently with the first
//!   LLM call. On violation the LLM result is *discarded* and the run
//!   errors with `InputGuardrailTripwire`.
//! - **Sequential**: checks run one after another before the LLM call;
//!   the first violation short-circuits and the call is never made.
//!
//! Output guardrails always run after the final output is produced, and
//! short-circuit on the first violation.
//!
//! Each check is bounded by [`GuardrailSettings::timeout`]; a timed-out or
//! erroring check resolves per the [`FailSafe`] policy (`Allow` treats it
//! as valid, `Block` as a violation).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::message::Message;

/// The verdict of a guardrail check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the content passed the check.
    pub valid: bool,
    /// Why the check failed, when it did.
    pub reason: Option<String>,
}

impl Verdict {
    /// A passing verdict.
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    /// A failing verdict with the stated reason.
    #[must_use]
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Trait for implementing input guardrail check logic.
#[async_trait]
pub trait InputCheck: Send + Sync {
    /// Check the input messages being sent to the model.
    async fn check(&self, input: &[Message]) -> Result<Verdict>;
}

/// Trait for implementing output guardrail check logic.
#[async_trait]
pub trait OutputCheck: Send + Sync {
    /// Check the agent's final output value.
    async fn check(&self, output: &Value) -> Result<Verdict>;
}

/// A named input guardrail.
#[derive(Clone)]
pub struct InputGuardrail {
    name: String,
    check: Arc<dyn InputCheck>,
}

impl InputGuardrail {
    /// Create a new input guardrail with the given name and check logic.
    #[must_use]
    pub fn new(name: impl Into<String>, check: impl InputCheck + 'static) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Create an input guardrail from a synchronous predicate.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Message]) -> Verdict + Send + Sync + 'static,
    {
        struct FnCheck<F>(F);

        #[async_trait]
        impl<F> InputCheck for FnCheck<F>
        where
            F: Fn(&[Message]) -> Verdict + Send + Sync,
        {
            async fn check(&self, input: &[Message]) -> Result<Verdict> {
                Ok((self.0)(input))
            }
        }

        Self::new(name, FnCheck(f))
    }

    /// Returns the name of this guardrail.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute this guardrail check.
    pub async fn run(&self, input: &[Message]) -> Result<Verdict> {
        self.check.check(input).await
    }
}

impl std::fmt::Debug for InputGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputGuardrail")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A named output guardrail.
#[derive(Clone)]
pub struct OutputGuardrail {
    name: String,
    check: Arc<dyn OutputCheck>,
}

impl OutputGuardrail {
    /// Create a new output guardrail with the given name and check logic.
    #[must_use]
    pub fn new(name: impl Into<String>, check: impl OutputCheck + 'static) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Create an output guardrail from a synchronous predicate.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Verdict + Send + Sync + 'static,
    {
        struct FnCheck<F>(F);

        #[async_trait]
        impl<F> OutputCheck for FnCheck<F>
        where
            F: Fn(&Value) -> Verdict + Send + Sync,
        {
            async fn check(&self, output: &Value) -> Result<Verdict> {
                Ok((self.0)(output))
            }
        }

        Self::new(name, FnCheck(f))
    }

    /// Returns the name of this guardrail.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute this guardrail check.
    pub async fn run(&self, output: &Value) -> Result<Verdict> {
        self.check.check(output).await
    }
}

impl std::fmt::Debug for OutputGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputGuardrail")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// How input guardrails are scheduled relative to the first LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run concurrently with the LLM call; discard the result on violation.
    #[default]
    Parallel,
    /// Run before the LLM call; short-circuit on violation.
    Sequential,
}

/// What to do when a guardrail check errors or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailSafe {
    /// Treat the check as valid.
    #[default]
    Allow,
    /// Treat the check as a violation.
    Block,
}

/// Scheduling and safety policy for guardrail execution.
#[derive(Debug, Clone, Copy)]
pub struct GuardrailSettings {
    /// Input guardrail scheduling mode.
    pub mode: ExecutionMode,
    /// Per-check timeout.
    pub timeout: Duration,
    /// Policy applied on check error or timeout.
    pub fail_safe: FailSafe,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            timeout: Duration::from_secs(30),
            fail_safe: FailSafe::Allow,
        }
    }
}

/// One guardrail's name and verdict, for event emission.
#[derive(Debug, Clone)]
pub struct GuardrailReport {
    /// Name of the guardrail.
    pub name: String,
    /// Its verdict.
    pub verdict: Verdict,
}

impl GuardrailReport {
    /// The first failing report in a batch, if any.
    #[must_use]
    pub fn first_violation(reports: &[Self]) -> Option<&Self> {
        reports.iter().find(|r| !r.verdict.valid)
    }
}

/// Run one check under the timeout / fail-safe policy.
async fn bounded<Fut>(name: &str, settings: &GuardrailSettings, fut: Fut) -> Verdict
where
    Fut: Future<Output = Result<Verdict>>,
{
    match tokio::time::timeout(settings.timeout, fut).await {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) => {
            warn!(guardrail = name, error = %e, "Guardrail check failed");
            fail_safe_verdict(name, settings, "check failed")
        }
        Err(_) => {
            warn!(guardrail = name, timeout = ?settings.timeout, "Guardrail check timed out");
            fail_safe_verdict(name, settings, "check timed out")
        }
    }
}

fn fail_safe_verdict(name: &str, settings: &GuardrailSettings, what: &str) -> Verdict {
    match settings.fail_safe {
        FailSafe::Allow => Verdict::pass(),
        FailSafe::Block => Verdict::block(format!("guardrail '{name}' {what}")),
    }
}

/// Evaluate input guardrails per the settings' execution mode.
///
/// Parallel mode runs all checks concurrently and reports every verdict;
/// sequential mode stops at the first violation.
pub async fn evaluate_input(
    guardrails: &[InputGuardrail],
    settings: &GuardrailSettings,
    input: &[Message],
) -> Vec<GuardrailReport> {
    match settings.mode {
        ExecutionMode::Parallel => {
            let futs = guardrails
                .iter()
                .map(|g| async move {
                    GuardrailReport {
                        name: g.name().to_owned(),
                        verdict: bounded(g.name(), settings, g.run(input)).await,
                    }
                })
                .collect::<Vec<_>>();
            futures::future::join_all(futs).await
        }
        ExecutionMode::Sequential => {
            let mut reports = Vec::with_capacity(guardrails.len());
            for g in guardrails {
                let verdict = bounded(g.name(), settings, g.run(input)).await;
                let valid = verdict.valid;
                reports.push(GuardrailReport {
                    name: g.name().to_owned(),
                    verdict,
                });
                if !valid {
                    break;
                }
            }
            reports
        }
    }
}

/// Evaluate output guardrails sequentially, stopping at the first
/// violation.
pub async fn evaluate_output(
    guardrails: &[OutputGuardrail],
    settings: &GuardrailSettings,
    output: &Value,
) -> Vec<GuardrailReport> {
    let mut reports = Vec::with_capacity(guardrails.len());
    for g in guardrails {
        let verdict = bounded(g.name(), settings, g.run(output)).await;
        let valid = verdict.valid;
        reports.push(GuardrailReport {
            name: g.name().to_owned(),
            verdict,
        });
        if !valid {
            break;
        }
    }
    reports
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spam_filter() -> InputGuardrail {
        InputGuardrail::from_fn("spam-filter", |input| {
            let text: String = input.iter().filter_map(Message::text).collect();
            if text.contains("spam") {
                Verdict::block("spam detected")
            } else {
                Verdict::pass()
            }
        })
    }

    #[tokio::test]
    async fn input_guardrail_passes_clean_input() {
        let reports = evaluate_input(
            &[spam_filter()],
            &GuardrailSettings::default(),
            &[Message::user("hello")],
        )
        .await;
        assert!(GuardrailReport::first_violation(&reports).is_none());
    }

    #[tokio::test]
    async fn input_guardrail_blocks_with_reason() {
        let reports = evaluate_input(
            &[spam_filter()],
            &GuardrailSettings::default(),
            &[Message::user("buy spam now")],
        )
        .await;
        let violation = GuardrailReport::first_violation(&reports).unwrap();
        assert_eq!(violation.name, "spam-filter");
        assert_eq!(violation.verdict.reason.as_deref(), Some("spam detected"));
    }

    #[tokio::test]
    async fn sequential_mode_short_circuits() {
        let settings = GuardrailSettings {
            mode: ExecutionMode::Sequential,
            ..Default::default()
        };
        let guardrails = vec![
            InputGuardrail::from_fn("first", |_| Verdict::block("no")),
            InputGuardrail::from_fn("second", |_| Verdict::pass()),
        ];
        let reports = evaluate_input(&guardrails, &settings, &[Message::user("x")]).await;
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn timeout_obeys_fail_safe() {
        struct Slow;

        #[async_trait]
        impl InputCheck for Slow {
            async fn check(&self, _input: &[Message]) -> Result<Verdict> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Verdict::pass())
            }
        }

        let mut settings = GuardrailSettings {
            timeout: Duration::from_millis(10),
            ..Default::default()
        };

        let guardrails = vec![InputGuardrail::new("slow", Slow)];
        let reports = evaluate_input(&guardrails, &settings, &[]).await;
        assert!(reports[0].verdict.valid, "fail-safe allow treats timeout as valid");

        settings.fail_safe = FailSafe::Block;
        let reports = evaluate_input(&guardrails, &settings, &[]).await;
        assert!(!reports[0].verdict.valid);
    }

    #[tokio::test]
    async fn output_guardrails_short_circuit() {
        let guardrails = vec![
            OutputGuardrail::from_fn("pii", |output| {
                if output.as_str().is_some_and(|s| s.contains("ssn")) {
                    Verdict::block("pii detected")
                } else {
                    Verdict::pass()
                }
            }),
            OutputGuardrail::from_fn("never-reached", |_| Verdict::block("x")),
        ];
        let reports = evaluate_output(
            &guardrails,
            &GuardrailSettings::default(),
            &Value::String("contains ssn".into()),
        )
        .await;
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].verdict.valid);
    }
}
