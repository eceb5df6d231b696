//! Houdini fixed-point inference engine (§4.F).
//!
//! Candidates only ever flip `true -> false`. Combined with a finite
//! candidate domain, that monotonicity is what gives the work-queue loop
//! its termination argument: each refutation strictly shrinks the
//! assignment, so the loop reaches a greatest fixed point in finitely many
//! iterations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexSet;

use crate::driver::Outcome;
use crate::model::Counterexample;
use crate::observer::{Event, ObserverPublisher};
use crate::program::{CallGraph, Program};

/// A boolean assignment over candidate names, in insertion order for
/// deterministic iteration (matches the teacher's preference for
/// `IndexMap`/`IndexSet` over `HashMap` wherever iteration order is
/// observable).
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    values: indexmap::IndexMap<String, bool>,
}

impl Assignment {
    /// Every candidate in `candidates` assigned `true` (§4.F init step 7).
    pub fn all_true(candidates: &HashSet<String>) -> Self {
        let mut values = indexmap::IndexMap::new();
        let mut sorted: Vec<&String> = candidates.iter().collect();
        sorted.sort();
        for c in sorted {
            values.insert(c.clone(), true);
        }
        Self { values }
    }

    pub fn from_map(map: HashMap<String, bool>) -> Self {
        let mut values = indexmap::IndexMap::new();
        let mut sorted: Vec<(String, bool)> = map.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, v) in sorted {
            values.insert(k, v);
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.values.get(name).copied()
    }

    /// Flips `name` to `false`. No-op (and never flips back) if already
    /// false or absent, preserving monotonicity.
    pub fn refute(&mut self, name: &str) -> bool {
        match self.values.get_mut(name) {
            Some(v) if *v => {
                *v = false;
                true
            }
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &bool)> {
        self.values.iter()
    }
}

/// Per-verify-call overrides that do not mutate the stored assignment
/// (§4.F Staging).
#[derive(Debug, Clone, Default)]
pub struct StagingOverrides {
    pub current_stage: Option<u32>,
    pub completed_stages: HashSet<u32>,
}

impl StagingOverrides {
    /// Applies stage forcing on top of the base assignment for one verify
    /// call, without touching `base`.
    pub fn effective(&self, base: &Assignment, program: &Program) -> Assignment {
        let mut effective = base.clone();
        for constant in &program.constants {
            if let Some(n) = constant.stage_active {
                let forced = self.current_stage == Some(n);
                effective.values.insert(constant.name.clone(), forced);
            }
            if let Some(m) = constant.stage_complete {
                let forced = self.completed_stages.contains(&m);
                effective.values.insert(constant.name.clone(), forced);
            }
        }
        effective
    }
}

/// Why one candidate was refuted, carrying enough context for the
/// propagation table (§4.F step 2d).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefutationSite {
    Requires { callee: String },
    Ensures,
    Assert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefutedAnnotation {
    pub candidate: String,
    pub site: RefutationSite,
}

/// One error surfaced by a verify call: either matched to a candidate (a
/// refutation) or genuine (no candidate explains it).
#[derive(Debug, Clone)]
pub enum VerifyError {
    Refuted(RefutedAnnotation),
    Genuine,
}

/// The result of one inner-loop verify call against an implementation
/// (§4.F step 2a).
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub outcome: Outcome,
    pub errors: Vec<VerifyError>,
    pub unsat_core: Vec<String>,
    /// The concrete failing trace, when the verifier could build one (§4.E).
    pub counterexample: Option<Counterexample>,
}

/// Per-implementation verifier collaborator. A real instantiation drives
/// [`crate::driver::BatchDriver`] plus [`crate::vcgen::VcGenerator`]; tests
/// substitute a scripted double. `verify` is the only suspension point in
/// the engine (§5), so it returns a boxed future rather than requiring an
/// `async_trait`-style macro dependency.
pub trait ImplementationVerifier {
    fn verify<'a>(
        &'a mut self,
        implementation: &'a str,
        assignment: &'a Assignment,
        staging: &'a StagingOverrides,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = VerifyReport> + 'a>>;
}

/// Final per-implementation/per-candidate bookkeeping returned once the
/// work queue drains.
#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    pub assignment: Assignment,
    pub implementation_outcomes: HashMap<String, Outcome>,
    pub refuted_candidates: HashSet<String>,
    pub vcgen_failures: HashSet<String>,
    pub deny_list: HashSet<String>,
}

/// Work queue with set semantics: enqueueing an already-queued
/// implementation is a no-op (§4.F "the work queue" — candidates only ever
/// add finitely many re-checks, never duplicate one already pending).
#[derive(Debug, Clone, Default)]
struct WorkQueue {
    order: IndexSet<String>,
}

impl WorkQueue {
    fn push(&mut self, name: &str) -> bool {
        self.order.insert(name.to_string())
    }

    fn pop_front(&mut self) -> Option<String> {
        self.order.shift_remove_index(0)
    }

    fn peek_front(&self) -> Option<&String> {
        self.order.get_index(0)
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn drain_all(&mut self) {
        self.order.clear();
    }
}

pub struct HoudiniEngine<'a> {
    program: &'a Program,
    call_graph: CallGraph,
    observers: ObserverPublisher,
    reverse_queue_order: bool,
    unsat_core_inference: bool,
    cross_dependencies: bool,
    assumed_by: HashMap<String, HashSet<String>>,
    deny_list: HashSet<String>,
    vcgen_failures: HashSet<String>,
    last_unsat_core: HashMap<String, HashSet<String>>,
}

impl<'a> HoudiniEngine<'a> {
    pub fn new(program: &'a Program, reverse_queue_order: bool, unsat_core_inference: bool, cross_dependencies: bool) -> Self {
        let call_graph = CallGraph::build(program);
        Self {
            program,
            call_graph,
            observers: ObserverPublisher::new(),
            reverse_queue_order,
            unsat_core_inference,
            cross_dependencies,
            assumed_by: HashMap::new(),
            deny_list: HashSet::new(),
            vcgen_failures: HashSet::new(),
            last_unsat_core: HashMap::new(),
        }
    }

    pub fn register_observer(&mut self, observer: Arc<dyn crate::observer::Observer>) {
        self.observers.register(observer);
    }

    /// Associates candidates mentioned in assume commands with the
    /// implementations that assume them (§4.F init step 3). No-op unless
    /// cross-dependency analysis is enabled.
    pub fn scan_cross_dependencies(&mut self, candidates: &HashSet<String>) {
        if !self.cross_dependencies {
            return;
        }
        for implementation in &self.program.implementations {
            for block in &implementation.blocks {
                for command in &block.commands {
                    if let crate::program::Command::Assume(expr) = command {
                        if let Some(name) = crate::program::matches_candidate(expr, candidates) {
                            self.assumed_by
                                .entry(name)
                                .or_default()
                                .insert(implementation.name.clone());
                        } else if let crate::program::Expr::Ident(name) = expr {
                            if candidates.contains(name) {
                                self.assumed_by
                                    .entry(name.clone())
                                    .or_default()
                                    .insert(implementation.name.clone());
                            }
                        }
                    }
                }
            }
        }
    }

    fn mark_vcgen_failure(&mut self, implementation: &str) {
        self.vcgen_failures.insert(implementation.to_string());
        self.deny_list.insert(implementation.to_string());
    }

    /// Registers implementations whose VC generation failed up front
    /// (§4.F init step 5); they never enter the work queue.
    pub fn record_vcgen_failures<'b>(&mut self, failed: impl IntoIterator<Item = &'b str>) {
        for name in failed {
            self.mark_vcgen_failure(name);
        }
    }

    fn initial_queue(&self) -> WorkQueue {
        let names: Vec<String> = self
            .program
            .implementations
            .iter()
            .map(|i| i.name.clone())
            .filter(|n| !self.deny_list.contains(n))
            .collect();
        let mut order = self.call_graph.reverse_topological_order(&names);
        if self.reverse_queue_order {
            order.reverse();
        }
        let mut queue = WorkQueue::default();
        for name in order {
            queue.push(&name);
        }
        queue
    }

    fn related_implementations(&self, current: &str, site: &RefutationSite, candidate: &str) -> Vec<String> {
        match site {
            RefutationSite::Requires { callee } => self
                .call_graph
                .callees_of(current)
                .filter(|c| *c == callee)
                .filter(|c| {
                    self.last_unsat_core
                        .get(*c)
                        .map(|core| core.contains(candidate))
                        .unwrap_or(false)
                })
                .cloned()
                .collect::<Vec<String>>(),
            RefutationSite::Ensures => self
                .call_graph
                .callers_of(current)
                .filter(|c| {
                    self.last_unsat_core
                        .get(*c)
                        .map(|core| core.contains(candidate))
                        .unwrap_or(false)
                })
                .cloned()
                .collect::<Vec<String>>(),
            RefutationSite::Assert => {
                if !self.cross_dependencies {
                    return Vec::new();
                }
                self.assumed_by
                    .get(candidate)
                    .into_iter()
                    .flatten()
                    .filter(|c| {
                        self.last_unsat_core
                            .get(*c)
                            .map(|core| core.contains(candidate))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            }
        }
        .into_iter()
        .filter(|name| !self.deny_list.contains(name))
        .collect()
    }

    /// Runs the main loop (§4.F) to a fixed point against `verifier`.
    /// `staging` is applied on top of the stored assignment for every verify
    /// call this run makes; callers that don't use staging pass
    /// `&StagingOverrides::default()`.
    pub async fn run(
        &mut self,
        candidates: &HashSet<String>,
        initial: Option<Assignment>,
        staging: &StagingOverrides,
        verifier: &mut dyn ImplementationVerifier,
    ) -> EngineOutcome {
        self.observers.publish(Event::Start);
        let mut sorted_candidates: Vec<&String> = candidates.iter().collect();
        sorted_candidates.sort();
        for candidate in sorted_candidates {
            self.observers.publish(Event::Constant(candidate));
        }
        let mut assignment = initial.unwrap_or_else(|| Assignment::all_true(candidates));
        let mut queue = self.initial_queue();
        let mut implementation_outcomes = HashMap::new();
        let mut refuted_candidates = HashSet::new();
        let mut iteration = 0usize;

        while !queue.is_empty() {
            iteration += 1;
            self.observers.publish(Event::Iteration(iteration));
            let Some(current) = queue.peek_front().cloned() else {
                break;
            };
            self.observers.publish(Event::Implementation(&current));

            loop {
                let report = verifier.verify(&current, &assignment, staging).await;
                self.observers
                    .publish(Event::Outcome(&current, report.outcome));

                let mut genuine_error = false;
                let mut applied_refutations = Vec::new();
                for error in &report.errors {
                    match error {
                        VerifyError::Genuine => genuine_error = true,
                        VerifyError::Refuted(annotation) => {
                            applied_refutations.push(annotation.clone());
                        }
                    }
                }

                if genuine_error {
                    implementation_outcomes.insert(current.clone(), report.outcome);
                    self.observers.publish(Event::Exception(&current));
                    queue.drain_all();
                    self.observers.publish(Event::FlushStart);
                    self.observers.publish(Event::FlushFinish);
                    break;
                }

                if matches!(
                    report.outcome,
                    Outcome::TimedOut | Outcome::OutOfResource | Outcome::OutOfMemory
                ) {
                    let names: Vec<String> = assignment.iter().map(|(k, _)| k.clone()).collect();
                    for name in names {
                        assignment.refute(&name);
                        refuted_candidates.insert(name);
                    }
                    self.deny_list.insert(current.clone());
                    implementation_outcomes.insert(current.clone(), report.outcome);
                    queue.pop_front();
                    self.observers.publish(Event::Dequeue(&current));
                    break;
                }

                if self.unsat_core_inference && matches!(report.outcome, Outcome::Valid) {
                    self.last_unsat_core
                        .insert(current.clone(), report.unsat_core.iter().cloned().collect());
                }

                if applied_refutations.is_empty() {
                    implementation_outcomes.insert(current.clone(), report.outcome);
                    queue.pop_front();
                    self.observers.publish(Event::Dequeue(&current));
                    break;
                }

                for annotation in &applied_refutations {
                    if assignment.refute(&annotation.candidate) {
                        refuted_candidates.insert(annotation.candidate.clone());
                        self.observers
                            .publish(Event::Assignment(&annotation.candidate, false));
                        for related in
                            self.related_implementations(&current, &annotation.site, &annotation.candidate)
                        {
                            if queue.push(&related) {
                                self.observers.publish(Event::Enqueue(&related));
                            }
                        }
                    }
                }
                // Loop again under the weaker assignment (§4.F step 2h).
            }
        }

        self.observers.publish(Event::End);
        EngineOutcome {
            assignment,
            implementation_outcomes,
            refuted_candidates,
            vcgen_failures: self.vcgen_failures.clone(),
            deny_list: self.deny_list.clone(),
        }
    }
}

/// Applies the inferred assignment back onto the program AST (§4.F
/// post-inference transformation).
pub fn apply_assignment(program: &Program, assignment: &Assignment) -> Program {
    use crate::program::{Command, Expr};

    let mut out = program.clone();
    for implementation in &mut out.implementations {
        for block in &mut implementation.blocks {
            let mut rewritten = Vec::with_capacity(block.commands.len());
            for command in block.commands.drain(..) {
                match command {
                    Command::Assert(expr, site) => {
                        if let Some(candidate) =
                            crate::program::matches_candidate(&expr, &program.existential_candidates())
                        {
                            match assignment.get(&candidate) {
                                Some(true) => {
                                    let true_expr = expr.substitute(&candidate, &Expr::Literal("true".into()));
                                    rewritten.push(Command::Assume(true_expr));
                                }
                                Some(false) => {
                                    // Removed: a false guard trivializes to `true`.
                                }
                                None => rewritten.push(Command::Assert(expr, site)),
                            }
                        } else {
                            rewritten.push(Command::Assert(expr, site));
                        }
                    }
                    other => rewritten.push(other),
                }
            }
            block.commands = rewritten;
        }
    }
    out.constants.retain(|c| !c.existential);
    out
}

/// No-ops in the base engine; a peer-sharing subclass overrides these to
/// exchange refutations across concurrently running engines (§4.F).
pub trait ConcurrentInferenceHooks {
    fn task_id(&self) -> &str {
        "default"
    }
    fn exchange_refuted_annotations(&mut self, _incoming: &[RefutedAnnotation]) {}
    fn apply_refuted_shared_annotations(&mut self, _assignment: &mut Assignment) {}
    fn share_refuted_annotation(&mut self, _annotation: &RefutedAnnotation) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::program::{Block, Command, ConstantDecl, Expr, Implementation, ProcName, Site};

    fn toy_program() -> Program {
        Program {
            procedures: vec![],
            implementations: vec![
                Implementation {
                    name: "Impl$Caller".into(),
                    proc_name: ProcName("Caller".into()),
                    blocks: vec![Block {
                        label: "entry".into(),
                        commands: vec![Command::Call(ProcName("Callee".into()), Site::default())],
                    }],
                },
                Implementation {
                    name: "Impl$Callee".into(),
                    proc_name: ProcName("Callee".into()),
                    blocks: vec![Block {
                        label: "entry".into(),
                        commands: vec![Command::Assert(
                            Expr::implies(Expr::ident("c0"), Expr::ident("phi")),
                            Site::default(),
                        )],
                    }],
                },
            ],
            constants: vec![ConstantDecl::existential("c0")],
        }
    }

    /// Scripted verifier: `Impl$Callee` refutes `c0` once, then verifies
    /// clean; `Impl$Caller` always verifies clean.
    struct ScriptedVerifier {
        callee_attempts: usize,
    }

    impl ImplementationVerifier for ScriptedVerifier {
        fn verify<'a>(
            &'a mut self,
            implementation: &'a str,
            assignment: &'a Assignment,
            _staging: &'a StagingOverrides,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = VerifyReport> + 'a>> {
            Box::pin(async move {
                if implementation == "Impl$Callee" {
                    self.callee_attempts += 1;
                    if assignment.get("c0") == Some(true) {
                        return VerifyReport {
                            outcome: Outcome::Invalid,
                            errors: vec![VerifyError::Refuted(RefutedAnnotation {
                                candidate: "c0".into(),
                                site: RefutationSite::Assert,
                            })],
                            unsat_core: vec![],
                            counterexample: None,
                        };
                    }
                    return VerifyReport {
                        outcome: Outcome::Valid,
                        errors: vec![],
                        unsat_core: vec!["c0".into()],
                        counterexample: None,
                    };
                }
                VerifyReport {
                    outcome: Outcome::Valid,
                    errors: vec![],
                    unsat_core: vec![],
                    counterexample: None,
                }
            })
        }
    }

    #[tokio::test]
    async fn refutes_candidate_and_reaches_fixed_point() {
        let program = toy_program();
        let mut candidates = HashSet::new();
        candidates.insert("c0".to_string());
        let mut engine = HoudiniEngine::new(&program, false, true, false);
        let mut verifier = ScriptedVerifier { callee_attempts: 0 };
        let outcome = engine
            .run(&candidates, None, &StagingOverrides::default(), &mut verifier)
            .await;
        assert_eq!(outcome.assignment.get("c0"), Some(false));
        assert!(outcome.refuted_candidates.contains("c0"));
        assert_eq!(
            outcome.implementation_outcomes.get("Impl$Caller"),
            Some(&Outcome::Valid)
        );
        assert_eq!(
            outcome.implementation_outcomes.get("Impl$Callee"),
            Some(&Outcome::Valid)
        );
        assert_eq!(verifier.callee_attempts, 2);
    }

    #[tokio::test]
    async fn genuine_error_flushes_the_remaining_queue() {
        struct AlwaysGenuine;
        impl ImplementationVerifier for AlwaysGenuine {
            fn verify<'a>(
                &'a mut self,
                _implementation: &'a str,
                _assignment: &'a Assignment,
                _staging: &'a StagingOverrides,
            ) -> std::pin::Pin<Box<dyn std::future::Future<Output = VerifyReport> + 'a>> {
                Box::pin(async move {
                    VerifyReport {
                        outcome: Outcome::Invalid,
                        errors: vec![VerifyError::Genuine],
                        unsat_core: vec![],
                        counterexample: None,
                    }
                })
            }
        }
        let program = toy_program();
        let mut candidates = HashSet::new();
        candidates.insert("c0".to_string());
        let mut engine = HoudiniEngine::new(&program, false, false, false);
        let mut verifier = AlwaysGenuine;
        let outcome = engine
            .run(&candidates, None, &StagingOverrides::default(), &mut verifier)
            .await;
        // Exactly one implementation is recorded before the flush drains the rest.
        assert_eq!(outcome.implementation_outcomes.len(), 1);
    }

    #[test]
    fn apply_assignment_removes_false_guards_and_assumes_true_ones() {
        let program = toy_program();
        let mut map = HashMap::new();
        map.insert("c0".to_string(), false);
        let assignment = Assignment::from_map(map);
        let transformed = apply_assignment(&program, &assignment);
        assert!(transformed.constants.is_empty());
        let callee = transformed.implementation("Impl$Callee").expect("callee");
        assert!(callee.blocks[0].commands.is_empty());
    }

    #[test]
    fn staging_overrides_do_not_mutate_stored_assignment() {
        let mut program = toy_program();
        program.constants[0].stage_active = Some(1);
        let base = Assignment::all_true(&program.existential_candidates());
        let staging = StagingOverrides {
            current_stage: Some(2),
            completed_stages: HashSet::new(),
        };
        let effective = staging.effective(&base, &program);
        assert_eq!(effective.get("c0"), Some(false));
        assert_eq!(base.get("c0"), Some(true));
    }

    #[tokio::test]
    async fn run_threads_caller_supplied_staging_into_every_verify_call() {
        struct RecordingVerifier {
            saw_stage: Vec<Option<u32>>,
        }
        impl ImplementationVerifier for RecordingVerifier {
            fn verify<'a>(
                &'a mut self,
                _implementation: &'a str,
                _assignment: &'a Assignment,
                staging: &'a StagingOverrides,
            ) -> std::pin::Pin<Box<dyn std::future::Future<Output = VerifyReport> + 'a>> {
                self.saw_stage.push(staging.current_stage);
                Box::pin(async move {
                    VerifyReport {
                        outcome: Outcome::Valid,
                        errors: vec![],
                        unsat_core: vec![],
                        counterexample: None,
                    }
                })
            }
        }
        let program = toy_program();
        let mut candidates = HashSet::new();
        candidates.insert("c0".to_string());
        let mut engine = HoudiniEngine::new(&program, false, false, false);
        let staging = StagingOverrides {
            current_stage: Some(3),
            completed_stages: HashSet::new(),
        };
        let mut verifier = RecordingVerifier { saw_stage: vec![] };
        engine.run(&candidates, None, &staging, &mut verifier).await;
        assert!(!verifier.saw_stage.is_empty());
        assert!(verifier.saw_stage.iter().all(|s| *s == Some(3)));
    }
}
