//! Crate-level integration test: parses a textual program through
//! `program_text`, then drives the real `HoudiniEngine` over it with a
//! scripted `ImplementationVerifier` double (no solver subprocess — none is
//! assumed to be installed in the test environment). Exercises the
//! requires/ensures classification end-to-end: a refuted `Requires` at the
//! caller re-queues the callee per the propagation table, and the run
//! converges on `pre = false`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use houdini_cli::program_text::parse_program;
use houdini_core::driver::Outcome;
use houdini_core::houdini::{
    Assignment, HoudiniEngine, ImplementationVerifier, RefutationSite, RefutedAnnotation, StagingOverrides,
    VerifyError, VerifyReport,
};

const PROGRAM: &str = "\
const pre existential
proc Callee
requires pre => guard
endproc
impl Impl$Callee of Callee
block entry
assert guard @1:1
endblock
endimpl
impl Impl$Caller of Caller
block entry
call Callee @2:1
endblock
endimpl
";

/// Returns `Invalid` + a `Requires` refutation of `pre` for the caller as
/// long as `pre` is still asserted true; `Valid` (with `pre` in its unsat
/// core) for the callee.
struct ScriptedVerifier {
    caller_calls: RefCell<u32>,
    callee_calls: RefCell<u32>,
}

impl ImplementationVerifier for ScriptedVerifier {
    fn verify<'a>(
        &'a mut self,
        implementation: &'a str,
        assignment: &'a Assignment,
        _staging: &'a StagingOverrides,
    ) -> Pin<Box<dyn Future<Output = VerifyReport> + 'a>> {
        let report = match implementation {
            "Impl$Callee" => {
                *self.callee_calls.borrow_mut() += 1;
                VerifyReport {
                    outcome: Outcome::Valid,
                    errors: vec![],
                    unsat_core: vec!["pre".to_string()],
                    counterexample: None,
                }
            }
            "Impl$Caller" => {
                *self.caller_calls.borrow_mut() += 1;
                if assignment.get("pre") == Some(true) {
                    VerifyReport {
                        outcome: Outcome::Invalid,
                        errors: vec![VerifyError::Refuted(RefutedAnnotation {
                            candidate: "pre".to_string(),
                            site: RefutationSite::Requires {
                                callee: "Impl$Callee".to_string(),
                            },
                        })],
                        unsat_core: vec![],
                        counterexample: None,
                    }
                } else {
                    VerifyReport {
                        outcome: Outcome::Valid,
                        errors: vec![],
                        unsat_core: vec![],
                        counterexample: None,
                    }
                }
            }
            other => panic!("unexpected implementation: {other}"),
        };
        Box::pin(async move { report })
    }
}

#[tokio::test]
async fn requires_refutation_reconverges_the_assignment_and_revisits_the_callee() {
    let program = parse_program(PROGRAM).expect("parse program text");
    assert_eq!(program.procedures.len(), 1);
    assert_eq!(program.implementations.len(), 2);

    let candidates: HashSet<String> = program.existential_candidates();
    assert_eq!(candidates, HashSet::from(["pre".to_string()]));

    let mut engine = HoudiniEngine::new(&program, false, true, false);
    let mut verifier = ScriptedVerifier {
        caller_calls: RefCell::new(0),
        callee_calls: RefCell::new(0),
    };
    let staging = StagingOverrides::default();
    let outcome = engine.run(&candidates, None, &staging, &mut verifier).await;

    assert_eq!(outcome.assignment.get("pre"), Some(false));
    assert!(outcome.refuted_candidates.contains("pre"));
    assert_eq!(outcome.implementation_outcomes["Impl$Caller"], Outcome::Valid);
    assert_eq!(outcome.implementation_outcomes["Impl$Callee"], Outcome::Valid);
    // The callee must be re-verified after the requires refutation, not just
    // checked once up front in the initial reverse-topological pass.
    assert!(*verifier.callee_calls.borrow() >= 2);
}
