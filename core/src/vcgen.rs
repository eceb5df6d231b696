//! VC-generator shim (§4.H): the trait boundary the batch driver and Houdini
//! engine consume, plus one concrete textual implementation sufficient to
//! exercise the rest of the pipeline end-to-end in tests.

use std::collections::{HashMap, HashSet};

use crate::error::{HoudiniError, Result};
use crate::houdini::{Assignment, RefutationSite};
use crate::model::Model;
use crate::program::{matches_candidate, Command, Expr, Implementation, Program, Site};
use crate::sexpr::SExpr;

pub trait VcGenerator {
    fn setup_axiom_builder(&mut self);
    fn prepare_common(&mut self) -> String;
    fn flush_axioms(&mut self) -> String;
    fn vc_expr_to_string(&self, expr: &Expr, indent: usize) -> String;

    /// Walks the model's `ControlFlow` function from `v := 0`, per §4.D.
    fn calculate_path(
        &self,
        control_flow_const: i64,
        model: &Model,
        max_steps: usize,
    ) -> Result<Vec<String>>;

    /// Renders the full VC for one implementation under `assignment`.
    fn generate_vc(
        &mut self,
        program: &Program,
        implementation: &Implementation,
        assignment: &Assignment,
    ) -> Result<String>;

    /// Candidate-guarded assertions from the last `generate_vc` call, as
    /// `(candidate, rendered text)` pairs, for `:named` unsat-core queries
    /// (§4.F propagation).
    fn candidate_assertions(&self) -> &[(String, String)];
}

/// One emitted proof obligation from the last `generate_vc` call: which
/// candidate (if any) guards it, which block it came from, and whether it's
/// a plain assert, a call's requires check, or the implementation's own
/// ensures check (§4.F propagation table).
#[derive(Debug, Clone)]
pub struct AssertSite {
    pub kind: RefutationSite,
    pub candidate: Option<String>,
    pub block: String,
    pub site: Site,
}

/// Renders the program model into SMT-LIB 2 text. Toy but real: enough to
/// drive an actual solver (or the textual-echo test double) through the
/// batch driver's full command sequence.
#[derive(Debug, Default)]
pub struct TextVcGenerator {
    sort_decls: Vec<String>,
    axioms: Vec<String>,
    candidate_asserts: Vec<(String, String)>,
    assert_sites: Vec<AssertSite>,
    capture_trace: Vec<String>,
}

impl TextVcGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn render_expr(&self, expr: &Expr, assignment: &Assignment) -> String {
        match expr {
            Expr::Ident(name) => assignment
                .get(name)
                .map(|b| if b { "true".to_string() } else { "false".to_string() })
                .unwrap_or_else(|| name.clone()),
            Expr::Literal(l) => l.clone(),
            Expr::Not(e) => format!("(not {})", self.render_expr(e, assignment)),
            Expr::And(es) => format!(
                "(and {})",
                es.iter()
                    .map(|e| self.render_expr(e, assignment))
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
            Expr::Implies(a, b) => format!(
                "(=> {} {})",
                self.render_expr(a, assignment),
                self.render_expr(b, assignment)
            ),
            Expr::App(f, args) => format!(
                "({} {})",
                f,
                args.iter()
                    .map(|e| self.render_expr(e, assignment))
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_assert(
        &mut self,
        asserts: &mut Vec<String>,
        expr: &Expr,
        assignment: &Assignment,
        candidate_names: &HashSet<String>,
        kind: RefutationSite,
        block: &str,
        site: Site,
    ) {
        let rendered = self.render_expr(expr, assignment);
        let candidate = matches_candidate(expr, candidate_names);
        if let Some(name) = &candidate {
            self.candidate_asserts.push((name.clone(), rendered.clone()));
        }
        self.assert_sites.push(AssertSite {
            kind,
            candidate,
            block: block.to_string(),
            site,
        });
        asserts.push(rendered);
    }

    /// Lines captured by `Command::CaptureState` during the last
    /// `generate_vc` call, in program order (§4.E trace projection).
    pub fn capture_trace(&self) -> &[String] {
        &self.capture_trace
    }

    /// Proof obligations emitted by the last `generate_vc` call, tagged with
    /// the refutation-propagation kind they belong to (§4.F table).
    pub fn assert_sites(&self) -> &[AssertSite] {
        &self.assert_sites
    }
}

impl VcGenerator for TextVcGenerator {
    fn setup_axiom_builder(&mut self) {
        self.sort_decls.clear();
        self.axioms.clear();
    }

    fn prepare_common(&mut self) -> String {
        self.sort_decls.join("\n")
    }

    fn flush_axioms(&mut self) -> String {
        std::mem::take(&mut self.axioms).join("\n")
    }

    fn vc_expr_to_string(&self, expr: &Expr, indent: usize) -> String {
        format!("{}{}", " ".repeat(indent), expr)
    }

    fn calculate_path(
        &self,
        control_flow_const: i64,
        model: &Model,
        max_steps: usize,
    ) -> Result<Vec<String>> {
        let Some(control_flow) = model.function("ControlFlow") else {
            return Ok(Vec::new());
        };
        let mut path = Vec::new();
        let mut v = SExpr::atom("0");
        let k = SExpr::atom(control_flow_const.to_string());
        for _ in 0..max_steps {
            let next = control_flow.apply(&[k.clone(), v.clone()]);
            match &next {
                SExpr::App(_, args) if !args.is_empty() => {
                    path.push(args[0].to_string());
                    return Ok(path);
                }
                SExpr::Atom(s) if s.parse::<i64>().is_ok() => {
                    path.push(s.clone());
                    v = next;
                }
                _ => {
                    return Err(HoudiniError::HardSolverError(
                        "ControlFlow model value is neither an integer nor a datatype application"
                            .to_string(),
                    ));
                }
            }
        }
        Err(HoudiniError::ControlFlowCycle(max_steps))
    }

    fn generate_vc(
        &mut self,
        program: &Program,
        implementation: &Implementation,
        assignment: &Assignment,
    ) -> Result<String> {
        self.setup_axiom_builder();
        self.candidate_asserts.clear();
        self.assert_sites.clear();
        self.capture_trace.clear();

        let candidate_names: HashSet<String> = assignment.iter().map(|(k, _)| k.clone()).collect();
        let mut asserts = Vec::new();

        for block in &implementation.blocks {
            for command in &block.commands {
                match command {
                    Command::Assert(expr, site) => {
                        self.push_assert(
                            &mut asserts,
                            expr,
                            assignment,
                            &candidate_names,
                            RefutationSite::Assert,
                            &block.label,
                            *site,
                        );
                    }
                    Command::Assume(expr) => {
                        asserts.push(format!("(=> true {})", self.render_expr(expr, assignment)));
                    }
                    Command::Call(proc, site) => {
                        // Requires become proof obligations at the call site
                        // (the caller must establish them); ensures become
                        // assumed post-call facts. A callee's own ensures are
                        // separately proven as that implementation's exit
                        // obligation below, so a refutation there correctly
                        // invalidates every caller that relied on this
                        // assumption (§4.F Ensures propagation row). The
                        // `callee` tag is the resolved *implementation* name
                        // (matching `CallGraph`'s edges), not the bare
                        // procedure name, so refutation propagation can find
                        // it via `callees_of`.
                        let callee_impl = program
                            .implementations
                            .iter()
                            .find(|i| &i.proc_name == proc)
                            .map(|i| i.name.clone())
                            .unwrap_or_else(|| proc.0.clone());
                        if let Some(procedure) = program.procedure(proc) {
                            for req in &procedure.requires {
                                if req.free {
                                    asserts.push(format!(
                                        "(=> true {})",
                                        self.render_expr(&req.expr, assignment)
                                    ));
                                } else {
                                    self.push_assert(
                                        &mut asserts,
                                        &req.expr,
                                        assignment,
                                        &candidate_names,
                                        RefutationSite::Requires {
                                            callee: callee_impl.clone(),
                                        },
                                        &block.label,
                                        *site,
                                    );
                                }
                            }
                            for ens in &procedure.ensures {
                                asserts.push(format!(
                                    "(=> true {})",
                                    self.render_expr(&ens.expr, assignment)
                                ));
                            }
                        }
                    }
                    Command::CaptureState(label) => {
                        self.capture_trace.push(label.clone());
                    }
                }
            }
        }

        if let Some(procedure) = program.procedure(&implementation.proc_name) {
            let exit_label = implementation
                .blocks
                .last()
                .map(|b| b.label.clone())
                .unwrap_or_default();
            for ens in &procedure.ensures {
                if ens.free {
                    asserts.push(format!(
                        "(=> true {})",
                        self.render_expr(&ens.expr, assignment)
                    ));
                } else {
                    self.push_assert(
                        &mut asserts,
                        &ens.expr,
                        assignment,
                        &candidate_names,
                        RefutationSite::Ensures,
                        &exit_label,
                        Site::default(),
                    );
                }
            }
        }

        if asserts.is_empty() {
            return Ok("true".to_string());
        }
        Ok(format!("(and {})", asserts.join(" ")))
    }

    fn candidate_assertions(&self) -> &[(String, String)] {
        &self.candidate_asserts
    }
}

/// Per-procedure table of live generator instances, created once during
/// Houdini initialization (§4.F step 5).
#[derive(Default)]
pub struct VcGeneratorPool {
    generators: HashMap<String, TextVcGenerator>,
}

impl VcGeneratorPool {
    pub fn new(program: &Program) -> Self {
        let generators = program
            .implementations
            .iter()
            .map(|i| (i.name.clone(), TextVcGenerator::new()))
            .collect();
        Self { generators }
    }

    pub fn get_mut(&mut self, implementation: &str) -> Option<&mut TextVcGenerator> {
        self.generators.get_mut(implementation)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::program::{Block, ProcName, Site};
    use std::collections::HashMap as Map;

    #[test]
    fn control_flow_path_scenario_6() {
        let model_text = "(model \
            (define-fun ControlFlow ((k Int) (v Int)) Int \
              (ite (and (= k 1) (= v 0)) 7 (ite (and (= k 1) (= v 7)) (dt Block42) 0))))";
        let (tx, rx) = async_channel::unbounded();
        let rt = tokio::runtime::Runtime::new().expect("rt");
        let expr = rt.block_on(async move {
            tx.send(model_text.to_string()).await.expect("send");
            tx.close();
            let mut reader = crate::sexpr::SExprReader::new(rx);
            reader.read_sexpr().await.expect("parse").expect("some")
        });
        let model = Model::parse(&expr);
        let gen = TextVcGenerator::new();
        let path = gen.calculate_path(1, &model, 100).expect("path");
        assert_eq!(path, vec!["7".to_string(), "Block42".to_string()]);
    }

    #[test]
    fn generate_vc_renders_assigned_candidates() {
        let mut gen = TextVcGenerator::new();
        let implementation = Implementation {
            name: "Impl$A".to_string(),
            proc_name: ProcName("A".to_string()),
            blocks: vec![Block {
                label: "entry".to_string(),
                commands: vec![Command::Assert(
                    Expr::implies(Expr::ident("c"), Expr::ident("phi")),
                    Site::default(),
                )],
            }],
        };
        let mut assignment_map = Map::new();
        assignment_map.insert("c".to_string(), true);
        let assignment = Assignment::from_map(assignment_map);
        let program = Program::default();
        let vc = gen
            .generate_vc(&program, &implementation, &assignment)
            .expect("vc");
        assert_eq!(vc, "(and (=> true phi))");
    }

    #[test]
    fn generate_vc_splits_requires_and_ensures_from_plain_asserts() {
        use crate::program::{ProcName, Procedure, Spec};

        let mut gen = TextVcGenerator::new();
        let callee = ProcName("Callee".to_string());
        let program = Program {
            procedures: vec![Procedure {
                name: callee.clone(),
                requires: vec![Spec {
                    expr: Expr::implies(Expr::ident("pre"), Expr::ident("guard")),
                    free: false,
                }],
                ensures: vec![Spec {
                    expr: Expr::ident("post"),
                    free: false,
                }],
            }],
            implementations: vec![],
            constants: vec![],
        };
        let implementation = Implementation {
            name: "Impl$Caller".to_string(),
            proc_name: ProcName("Caller".to_string()),
            blocks: vec![Block {
                label: "entry".to_string(),
                commands: vec![Command::Call(callee, Site::default())],
            }],
        };
        let mut assignment_map = Map::new();
        assignment_map.insert("pre".to_string(), true);
        let assignment = Assignment::from_map(assignment_map);
        gen.generate_vc(&program, &implementation, &assignment).expect("vc");

        let sites = gen.assert_sites();
        assert_eq!(sites.len(), 1);
        assert!(matches!(
            sites[0].kind,
            RefutationSite::Requires { ref callee } if callee == "Callee"
        ));
        assert_eq!(sites[0].candidate.as_deref(), Some("pre"));
    }

    #[test]
    fn generate_vc_checks_implementations_own_ensures_at_exit() {
        use crate::program::{ProcName, Procedure, Spec};

        let mut gen = TextVcGenerator::new();
        let proc_name = ProcName("Callee".to_string());
        let program = Program {
            procedures: vec![Procedure {
                name: proc_name.clone(),
                requires: vec![],
                ensures: vec![Spec {
                    expr: Expr::implies(Expr::ident("post"), Expr::ident("phi")),
                    free: false,
                }],
            }],
            implementations: vec![],
            constants: vec![],
        };
        let implementation = Implementation {
            name: "Impl$Callee".to_string(),
            proc_name,
            blocks: vec![Block {
                label: "exit".to_string(),
                commands: vec![],
            }],
        };
        let mut assignment_map = Map::new();
        assignment_map.insert("post".to_string(), true);
        let assignment = Assignment::from_map(assignment_map);
        gen.generate_vc(&program, &implementation, &assignment).expect("vc");

        let sites = gen.assert_sites();
        assert_eq!(sites.len(), 1);
        assert!(matches!(sites[0].kind, RefutationSite::Ensures));
        assert_eq!(sites[0].block, "exit");
        assert_eq!(sites[0].candidate.as_deref(), Some("post"));
    }
}
