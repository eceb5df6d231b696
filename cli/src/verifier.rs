//! Wires the Houdini engine's [`ImplementationVerifier`] collaborator to a
//! real [`BatchDriver`] over one solver session per implementation.
//!
//! This is intentionally thin glue rather than a full model-state
//! projection: it locates the failing block from the control-flow path and
//! consults the VC generator's recorded assert sites to classify the
//! refutation (§4.F propagation table) and build a best-effort
//! [`Counterexample`] out of the captured trace. The fuller per-variable
//! model projection machinery in `houdini_core::model`
//! (`ModelViewInfo`/`CaptureState`/`initialize_model_states`) stays
//! unreachable from here: the program model has no SSA/assignment command
//! to source per-variable "incarnation" data from, so there is nothing real
//! to project it out of (documented in `DESIGN.md`).

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use houdini_core::driver::{BatchDriver, CancellationToken, SolverKind};
use houdini_core::houdini::{
    Assignment, ImplementationVerifier, RefutedAnnotation, StagingOverrides, VerifyError, VerifyReport,
};
use houdini_core::model::Counterexample;
use houdini_core::process_session::{NoopInspector, SolverSession, TracingErrorHandler, Verbosity};
use houdini_core::program::Program;
use houdini_core::vcgen::{AssertSite, TextVcGenerator, VcGenerator};

pub struct SolverBackedVerifier<'a> {
    program: &'a Program,
    sessions: HashMap<String, Arc<SolverSession>>,
    generators: HashMap<String, TextVcGenerator>,
    control_flow_constants: HashMap<String, i64>,
    solver_kind: SolverKind,
    rlimit_option: String,
    max_control_flow_steps: usize,
    unsat_core_inference: bool,
    cancel: CancellationToken,
}

impl<'a> SolverBackedVerifier<'a> {
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        program: &'a Program,
        solver_path: &str,
        solver_args: &[String],
        verbosity: Verbosity,
        solver_kind: SolverKind,
        rlimit_option: impl Into<String>,
        max_control_flow_steps: usize,
        unsat_core_inference: bool,
        log_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let mut sessions = HashMap::new();
        let mut generators = HashMap::new();
        let mut control_flow_constants = HashMap::new();
        for (index, implementation) in program.implementations.iter().enumerate() {
            let session = SolverSession::spawn_with_log(
                index as u64,
                solver_path,
                solver_args,
                verbosity,
                Arc::new(NoopInspector),
                Arc::new(TracingErrorHandler),
                log_path,
            )
            .await?;
            sessions.insert(implementation.name.clone(), session);
            generators.insert(implementation.name.clone(), TextVcGenerator::new());
            control_flow_constants.insert(implementation.name.clone(), index as i64);
        }
        Ok(Self {
            program,
            sessions,
            generators,
            control_flow_constants,
            solver_kind,
            rlimit_option: rlimit_option.into(),
            max_control_flow_steps,
            unsat_core_inference,
            cancel: CancellationToken::new(),
        })
    }

    pub async fn close_all(&self) {
        for session in self.sessions.values() {
            session.close().await;
        }
    }

    fn solver_exception() -> VerifyReport {
        VerifyReport {
            outcome: houdini_core::driver::Outcome::SolverException,
            errors: vec![VerifyError::Genuine],
            unsat_core: vec![],
            counterexample: None,
        }
    }

    async fn verify_inner(&mut self, implementation: &str, assignment: &Assignment, staging: &StagingOverrides) -> VerifyReport {
        let Some(implementation_model) = self.program.implementation(implementation) else {
            return Self::solver_exception();
        };
        let effective = staging.effective(assignment, self.program);
        let Some(session) = self.sessions.get(implementation) else {
            return Self::solver_exception();
        };
        let Some(generator) = self.generators.get_mut(implementation) else {
            return Self::solver_exception();
        };
        let vc = match generator.generate_vc(self.program, implementation_model, &effective) {
            Ok(vc) => vc,
            Err(_) => return Self::solver_exception(),
        };
        let preamble = format!("{}\n{}", generator.prepare_common(), generator.flush_axioms());
        let control_flow_constant = *self.control_flow_constants.get(implementation).unwrap_or(&0);
        let driver = BatchDriver::new(session, self.solver_kind, self.rlimit_option.clone(), self.max_control_flow_steps);
        let result = match driver
            .begin_check(
                preamble.trim(),
                &vc,
                &[],
                control_flow_constant,
                &*generator,
                &self.cancel,
                self.unsat_core_inference,
            )
            .await
        {
            Ok(result) => result,
            Err(_) => return Self::solver_exception(),
        };

        let mut errors = Vec::new();
        let mut counterexample = None;
        if result.outcome == houdini_core::driver::Outcome::Invalid {
            let failing_block = result.control_flow_path.last().cloned().unwrap_or_default();
            let mut matched = false;
            for entry in generator.assert_sites() {
                if entry.block != failing_block {
                    continue;
                }
                if let Some(candidate) = &entry.candidate {
                    errors.push(VerifyError::Refuted(RefutedAnnotation {
                        candidate: candidate.clone(),
                        site: entry.kind.clone(),
                    }));
                    matched = true;
                    if counterexample.is_none() {
                        counterexample = Some(build_counterexample(entry, generator.capture_trace().to_vec()));
                    }
                }
            }
            if !matched {
                errors.push(VerifyError::Genuine);
            }
        }

        VerifyReport {
            outcome: result.outcome,
            errors,
            unsat_core: result.unsat_core,
            counterexample,
        }
    }
}

/// Projects one refuted [`AssertSite`] plus the captured trace into the
/// matching [`Counterexample`] shape (§4.E).
fn build_counterexample(site: &AssertSite, trace: Vec<String>) -> Counterexample {
    match &site.kind {
        houdini_core::houdini::RefutationSite::Requires { callee } => Counterexample::Call {
            trace,
            site: site.site,
            callee: callee.clone(),
        },
        houdini_core::houdini::RefutationSite::Ensures => Counterexample::Return { trace, site: site.site },
        houdini_core::houdini::RefutationSite::Assert => Counterexample::Assert {
            trace,
            site: site.site,
            error_data: String::new(),
        },
    }
}

impl<'a> ImplementationVerifier for SolverBackedVerifier<'a> {
    fn verify<'b>(
        &'b mut self,
        implementation: &'b str,
        assignment: &'b Assignment,
        staging: &'b StagingOverrides,
    ) -> Pin<Box<dyn Future<Output = VerifyReport> + 'b>> {
        Box::pin(self.verify_inner(implementation, assignment, staging))
    }
}
