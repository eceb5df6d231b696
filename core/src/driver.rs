//! Batch prover driver (§4.D): issues the full SMT command sequence for one
//! VC in a single non-interactive exchange and resolves it to an [`Outcome`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{HoudiniError, Result};
use crate::model::Model;
use crate::process_session::SolverSession;
use crate::sexpr::SExpr;
use crate::vcgen::VcGenerator;

/// Cooperative cancellation shared between the CLI's ctrl-c handler (or a
/// caller-driven timeout) and every in-flight `await_response` call.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called; resolves immediately if it
    /// already has been.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// The prover's verdict for one VC (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Valid,
    Invalid,
    Undetermined,
    TimedOut,
    OutOfMemory,
    OutOfResource,
    SolverException,
}

/// Whether the target solver is Z3 (gates the `(get-info :rlimit)` step).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    Z3,
    Other,
}

/// Result of one `begin_check` call: the outcome, the optional counterexample
/// control-flow path, and the raw model (for counterexample projection).
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub outcome: Outcome,
    pub control_flow_path: Vec<String>,
    pub model: Option<Model>,
    pub reason_unknown: Option<String>,
    /// Names surviving `(get-unsat-core)`, when `produce_unsat_core` was set
    /// and the check came back `Valid` (§4.D step 5, §4.F propagation).
    pub unsat_core: Vec<String>,
}

/// Flattens a `(get-unsat-core)` reply — `(n1 n2 ...)` or a bare `n1` — into
/// the list of surviving assertion names.
fn unsat_core_names(expr: &SExpr) -> Vec<String> {
    match expr {
        SExpr::Atom(name) => vec![name.clone()],
        SExpr::App(name, args) => {
            let mut names = Vec::new();
            if !name.is_empty() {
                names.push(name.clone());
            }
            for arg in args {
                if let SExpr::Atom(s) = arg {
                    names.push(s.clone());
                }
            }
            names
        }
    }
}

fn classify_outcome_sexpr(expr: &SExpr) -> Outcome {
    match expr {
        SExpr::Atom(s) if s == "sat" => Outcome::Invalid,
        SExpr::Atom(s) if s == "unsat" => Outcome::Valid,
        SExpr::Atom(s) if s == "unknown" => Outcome::Undetermined,
        SExpr::App(head, _) if head == "error" => {
            let text = expr.to_string();
            if text.contains("max. resource limit exceeded") {
                Outcome::OutOfResource
            } else {
                Outcome::SolverException
            }
        }
        _ => Outcome::SolverException,
    }
}

fn refine_by_reason_unknown(reason: &str) -> Outcome {
    let lower = reason.to_lowercase();
    if lower.contains("timeout") || lower.contains("canceled") || lower.contains("resource limit") {
        Outcome::TimedOut
    } else if lower.contains("memout") {
        Outcome::OutOfMemory
    } else {
        Outcome::Undetermined
    }
}

/// An explicit batch-mode-unsupported operation (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedOp {
    Evaluate,
    Check,
    UnsatCore,
    CheckAssumptions,
}

impl UnsupportedOp {
    fn name(self) -> &'static str {
        match self {
            UnsupportedOp::Evaluate => "Evaluate",
            UnsupportedOp::Check => "Check",
            UnsupportedOp::UnsatCore => "UnsatCore",
            UnsupportedOp::CheckAssumptions => "CheckAssumptions",
        }
    }
}

/// Rejects the explicit batch-mode-unsupported operations (§4.D).
pub fn reject_unsupported(op: UnsupportedOp) -> Result<()> {
    Err(HoudiniError::UnsupportedOperation(op.name()))
}

pub struct BatchDriver<'a> {
    session: &'a SolverSession,
    solver_kind: SolverKind,
    rlimit_option: String,
    max_control_flow_steps: usize,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        session: &'a SolverSession,
        solver_kind: SolverKind,
        rlimit_option: impl Into<String>,
        max_control_flow_steps: usize,
    ) -> Self {
        Self {
            session,
            solver_kind,
            rlimit_option: rlimit_option.into(),
            max_control_flow_steps,
        }
    }

    /// Runs the full check sequence for one VC (§4.D steps 1-5) and resolves
    /// the outcome plus any control-flow path.
    #[allow(clippy::too_many_arguments)]
    pub async fn begin_check(
        &self,
        preamble: &str,
        vc: &str,
        optimizations: &[String],
        control_flow_constant: i64,
        generator: &dyn VcGenerator,
        cancel: &CancellationToken,
        produce_unsat_core: bool,
    ) -> Result<CheckResult> {
        if !preamble.is_empty() {
            self.session.send(preamble).await?;
        }
        if produce_unsat_core {
            self.session
                .send("(set-option :produce-unsat-cores true)")
                .await?;
        }
        self.session
            .send(&format!("(assert (not {vc}))"))
            .await?;

        self.session.send("(push 1)").await?;
        self.session.send(vc).await?;
        if produce_unsat_core {
            for (index, (candidate, rendered)) in generator.candidate_assertions().iter().enumerate() {
                self.session
                    .send(&format!("(assert (! {rendered} :named {candidate}${index}))"))
                    .await?;
            }
        }
        for opt in optimizations {
            self.session.send(opt).await?;
        }
        self.session.send("(check-sat)").await?;
        self.session.send("(get-info :reason-unknown)").await?;
        if matches!(self.solver_kind, SolverKind::Z3) {
            self.session
                .send(&format!("(get-info :{})", self.rlimit_option))
                .await?;
        }
        self.session.send("(get-model)").await?;

        let outcome_sexpr = self.session.await_response(cancel).await?;
        let mut outcome = outcome_sexpr
            .as_ref()
            .map(classify_outcome_sexpr)
            .unwrap_or(Outcome::SolverException);

        let reason_sexpr = self.session.await_response(cancel).await?;
        let reason_unknown = reason_sexpr.map(|e| e.to_string());
        if outcome == Outcome::Undetermined {
            if let Some(reason) = &reason_unknown {
                outcome = refine_by_reason_unknown(reason);
            }
        }

        if matches!(self.solver_kind, SolverKind::Z3) {
            let _ = self.session.await_response(cancel).await?;
        }

        let model_sexpr = self.session.await_response(cancel).await?;
        let model = model_sexpr.map(|e| Model::parse(&e));

        let mut unsat_core = Vec::new();
        if produce_unsat_core && outcome == Outcome::Valid {
            self.session.send("(get-unsat-core)").await?;
            if let Some(core_sexpr) = self.session.await_response(cancel).await? {
                unsat_core = unsat_core_names(&core_sexpr);
            }
        }

        self.session.send("(pop 1)").await?;
        self.session.indicate_end_of_input().await;

        let mut control_flow_path = Vec::new();
        let mut had_error = false;
        if outcome == Outcome::Invalid {
            if let Some(model) = &model {
                match generator.calculate_path(control_flow_constant, model, self.max_control_flow_steps) {
                    Ok(path) => control_flow_path = path,
                    Err(_) => had_error = true,
                }
            }
        }
        if outcome == Outcome::Invalid && control_flow_path.is_empty() && had_error {
            outcome = Outcome::Undetermined;
        }

        Ok(CheckResult {
            outcome,
            control_flow_path,
            model,
            reason_unknown,
            unsat_core,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sat_unsat_unknown() {
        assert_eq!(classify_outcome_sexpr(&SExpr::atom("sat")), Outcome::Invalid);
        assert_eq!(classify_outcome_sexpr(&SExpr::atom("unsat")), Outcome::Valid);
        assert_eq!(
            classify_outcome_sexpr(&SExpr::atom("unknown")),
            Outcome::Undetermined
        );
    }

    #[test]
    fn classifies_resource_limit_error() {
        let e = SExpr::app(
            "error",
            vec![SExpr::atom("max. resource limit exceeded (z3)")],
        );
        assert_eq!(classify_outcome_sexpr(&e), Outcome::OutOfResource);
    }

    #[test]
    fn reason_unknown_maps_timeout_and_memout() {
        assert_eq!(refine_by_reason_unknown("timeout"), Outcome::TimedOut);
        assert_eq!(refine_by_reason_unknown("canceled"), Outcome::TimedOut);
        assert_eq!(refine_by_reason_unknown("resource limit"), Outcome::TimedOut);
        assert_eq!(refine_by_reason_unknown("memout"), Outcome::OutOfMemory);
        assert_eq!(refine_by_reason_unknown("incomplete"), Outcome::Undetermined);
    }

    #[tokio::test]
    async fn cancellation_token_resolves_waiters() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel();
        handle.await.expect("join");
        assert!(token.is_cancelled());
    }

    #[test]
    fn unsat_core_names_flattens_a_name_list() {
        let core = SExpr::app(
            "candidate$0",
            vec![SExpr::atom("candidate$1"), SExpr::atom("candidate$2")],
        );
        assert_eq!(
            unsat_core_names(&core),
            vec!["candidate$0", "candidate$1", "candidate$2"]
        );
        assert_eq!(unsat_core_names(&SExpr::atom("candidate$0")), vec!["candidate$0"]);
        assert!(unsat_core_names(&SExpr::app("", vec![])).is_empty());
    }

    #[test]
    fn unsupported_ops_are_rejected() {
        for op in [
            UnsupportedOp::Evaluate,
            UnsupportedOp::Check,
            UnsupportedOp::UnsatCore,
            UnsupportedOp::CheckAssumptions,
        ] {
            assert!(reject_unsupported(op).is_err());
        }
    }
}
