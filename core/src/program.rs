//! Minimal in-crate program model (§3a).
//!
//! The distilled spec treats the Boogie-equivalent AST as an external
//! collaborator; this shim is the smallest concrete representation that lets
//! the Houdini engine, counterexample projection, and the VC-generator shim
//! operate on real data end-to-end.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcName(pub String);

impl std::fmt::Display for ProcName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A source location, matching the `location = line*1000 + column` encoding
/// used by counterexamples (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Site {
    pub line: u32,
    pub column: u32,
}

impl Site {
    pub fn location(&self) -> i64 {
        self.line as i64 * 1000 + self.column as i64
    }
}

/// A small boolean/arithmetic expression tree, rich enough to express
/// `cand => phi` (possibly nested) and to be rendered to SMT-LIB text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Ident(String),
    Literal(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Implies(Box<Expr>, Box<Expr>),
    App(String, Vec<Expr>),
}

impl Expr {
    pub fn implies(a: Expr, b: Expr) -> Expr {
        Expr::Implies(Box::new(a), Box::new(b))
    }

    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Ident(name.into())
    }

    /// Substitutes every occurrence of `name` (as a bare identifier) with
    /// `replacement`.
    pub fn substitute(&self, name: &str, replacement: &Expr) -> Expr {
        match self {
            Expr::Ident(s) if s == name => replacement.clone(),
            Expr::Ident(_) | Expr::Literal(_) => self.clone(),
            Expr::Not(e) => Expr::Not(Box::new(e.substitute(name, replacement))),
            Expr::And(es) => Expr::And(es.iter().map(|e| e.substitute(name, replacement)).collect()),
            Expr::Implies(a, b) => Expr::implies(
                a.substitute(name, replacement),
                b.substitute(name, replacement),
            ),
            Expr::App(f, args) => Expr::App(
                f.clone(),
                args.iter().map(|e| e.substitute(name, replacement)).collect(),
            ),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Ident(s) => write!(f, "{s}"),
            Expr::Literal(s) => write!(f, "{s}"),
            Expr::Not(e) => write!(f, "(not {e})"),
            Expr::And(es) => {
                write!(f, "(and")?;
                for e in es {
                    write!(f, " {e}")?;
                }
                write!(f, ")")
            }
            Expr::Implies(a, b) => write!(f, "(=> {a} {b})"),
            Expr::App(name, args) => {
                write!(f, "({name}")?;
                for a in args {
                    write!(f, " {a}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// The candidate-recognition predicate (§4.F): an expression matches
/// candidate `c` iff it is `c => b`, or `a => b` where `b` recursively
/// matches (the identity of intermediate antecedents is ignored).
pub fn matches_candidate(expr: &Expr, candidates: &HashSet<String>) -> Option<String> {
    match expr {
        Expr::Implies(a, b) => {
            if let Expr::Ident(name) = a.as_ref() {
                if candidates.contains(name) {
                    return Some(name.clone());
                }
            }
            matches_candidate(b, candidates)
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Spec {
    pub expr: Expr,
    pub free: bool,
}

#[derive(Debug, Clone)]
pub struct Procedure {
    pub name: ProcName,
    pub requires: Vec<Spec>,
    pub ensures: Vec<Spec>,
}

#[derive(Debug, Clone)]
pub enum Command {
    Assert(Expr, Site),
    Assume(Expr),
    Call(ProcName, Site),
    CaptureState(String),
}

#[derive(Debug, Clone)]
pub struct Block {
    pub label: String,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone)]
pub struct Implementation {
    pub name: String,
    pub proc_name: ProcName,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone)]
pub struct ConstantDecl {
    pub name: String,
    pub existential: bool,
    /// Staging attributes (§4.F): forces the candidate to `current_stage ==
    /// stage_active` or `stage_complete ∈ completed_stages` during a single
    /// verify call, without mutating the stored assignment.
    pub stage_active: Option<u32>,
    pub stage_complete: Option<u32>,
}

impl ConstantDecl {
    pub fn existential(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            existential: true,
            stage_active: None,
            stage_complete: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub procedures: Vec<Procedure>,
    pub implementations: Vec<Implementation>,
    pub constants: Vec<ConstantDecl>,
}

impl Program {
    pub fn existential_candidates(&self) -> HashSet<String> {
        self.constants
            .iter()
            .filter(|c| c.existential)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn procedure(&self, name: &ProcName) -> Option<&Procedure> {
        self.procedures.iter().find(|p| &p.name == name)
    }

    pub fn implementation(&self, name: &str) -> Option<&Implementation> {
        self.implementations.iter().find(|i| i.name == name)
    }
}

/// Call graph built once from `Command::Call` sites (§4.F step 2).
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    pub callers: HashMap<String, HashSet<String>>,
    pub callees: HashMap<String, HashSet<String>>,
}

impl CallGraph {
    /// Builds the graph over implementation names. `Command::Call` carries a
    /// `ProcName`, which may be implemented by zero, one, or (for a
    /// `{:entrypoint}`-style abstract procedure) several implementations; a
    /// call site is resolved to every implementation of the called procedure
    /// before it becomes an edge, so graph nodes are never raw procedure
    /// names (the callers/callees keys here are always `Implementation::name`,
    /// matching `Program::implementation`'s lookup key).
    pub fn build(program: &Program) -> Self {
        let mut implementations_of: HashMap<String, Vec<String>> = HashMap::new();
        for implementation in &program.implementations {
            implementations_of
                .entry(implementation.proc_name.0.clone())
                .or_default()
                .push(implementation.name.clone());
        }

        let mut graph = CallGraph::default();
        for implementation in &program.implementations {
            for block in &implementation.blocks {
                for command in &block.commands {
                    if let Command::Call(callee, _) = command {
                        let Some(callee_impls) = implementations_of.get(&callee.0) else {
                            continue;
                        };
                        for callee_impl in callee_impls {
                            graph
                                .callees
                                .entry(implementation.name.clone())
                                .or_default()
                                .insert(callee_impl.clone());
                            graph
                                .callers
                                .entry(callee_impl.clone())
                                .or_default()
                                .insert(implementation.name.clone());
                        }
                    }
                }
            }
        }
        graph
    }

    pub fn callees_of(&self, implementation: &str) -> impl Iterator<Item = &String> {
        self.callees.get(implementation).into_iter().flatten()
    }

    pub fn callers_of(&self, implementation: &str) -> impl Iterator<Item = &String> {
        self.callers.get(implementation).into_iter().flatten()
    }

    /// Reverse-topological order over strongly-connected components (leaves
    /// first), via a straightforward iterative Tarjan pass. Implementations
    /// that form a cycle are grouped and returned together, order among them
    /// unspecified but deterministic for a given input.
    pub fn reverse_topological_order(&self, implementations: &[String]) -> Vec<String> {
        let mut state = TarjanState::default();
        for v in implementations {
            if !state.indices.contains_key(v) {
                state.strongconnect(v, self);
            }
        }
        // Tarjan emits SCCs in reverse-topological order already (leaves
        // first, since a component is finished only after all its
        // successors).
        state.order
    }
}

/// Inlines callee bodies into their call sites up to `depth` levels (§4.F
/// step 4, config key `inline_depth`). A call whose depth budget is
/// exhausted, or whose procedure has no implementation, is left as a plain
/// `Call` (and silently skipped by VC generation, as today). `depth == 0` is
/// a no-op clone, matching the config default.
pub fn inline_calls(program: &Program, depth: u32) -> Program {
    let mut out = program.clone();
    if depth == 0 {
        return out;
    }

    let mut implementation_of: HashMap<String, String> = HashMap::new();
    for implementation in &program.implementations {
        implementation_of
            .entry(implementation.proc_name.0.clone())
            .or_insert_with(|| implementation.name.clone());
    }
    let by_name: HashMap<String, Implementation> = program
        .implementations
        .iter()
        .map(|i| (i.name.clone(), i.clone()))
        .collect();

    for implementation in &mut out.implementations {
        for block in &mut implementation.blocks {
            block.commands = inline_commands(&block.commands, &by_name, &implementation_of, depth);
        }
    }
    out
}

fn inline_commands(
    commands: &[Command],
    by_name: &HashMap<String, Implementation>,
    implementation_of: &HashMap<String, String>,
    remaining_depth: u32,
) -> Vec<Command> {
    let mut out = Vec::with_capacity(commands.len());
    for command in commands {
        match command {
            Command::Call(proc, site) if remaining_depth > 0 => {
                let callee = implementation_of.get(&proc.0).and_then(|name| by_name.get(name));
                match callee {
                    Some(callee) => {
                        for callee_block in &callee.blocks {
                            out.extend(inline_commands(
                                &callee_block.commands,
                                by_name,
                                implementation_of,
                                remaining_depth - 1,
                            ));
                        }
                    }
                    None => out.push(Command::Call(proc.clone(), *site)),
                }
            }
            other => out.push(other.clone()),
        }
    }
    out
}

#[derive(Default)]
struct TarjanState {
    index: usize,
    indices: HashMap<String, usize>,
    lowlink: HashMap<String, usize>,
    on_stack: HashSet<String>,
    stack: Vec<String>,
    order: Vec<String>,
}

impl TarjanState {
    fn strongconnect(&mut self, v: &str, graph: &CallGraph) {
        self.indices.insert(v.to_string(), self.index);
        self.lowlink.insert(v.to_string(), self.index);
        self.index += 1;
        self.stack.push(v.to_string());
        self.on_stack.insert(v.to_string());

        for w in graph.callees_of(v) {
            if !self.indices.contains_key(w) {
                self.strongconnect(w, graph);
                let wl = self.lowlink[w];
                let vl = self.lowlink[v];
                self.lowlink.insert(v.to_string(), vl.min(wl));
            } else if self.on_stack.contains(w) {
                let wi = self.indices[w];
                let vl = self.lowlink[v];
                self.lowlink.insert(v.to_string(), vl.min(wi));
            }
        }

        if self.lowlink[v] == self.indices[v] {
            while let Some(w) = self.stack.pop() {
                self.on_stack.remove(&w);
                let done = w == v;
                self.order.push(w);
                if done {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_matches_direct_and_nested_implications() {
        let mut cands = HashSet::new();
        cands.insert("c".to_string());
        let direct = Expr::implies(Expr::ident("c"), Expr::ident("phi"));
        assert_eq!(matches_candidate(&direct, &cands), Some("c".to_string()));

        let nested = Expr::implies(
            Expr::ident("other"),
            Expr::implies(Expr::ident("c"), Expr::ident("phi")),
        );
        assert_eq!(matches_candidate(&nested, &cands), Some("c".to_string()));

        let none = Expr::implies(Expr::ident("other"), Expr::ident("phi"));
        assert_eq!(matches_candidate(&none, &cands), None);
    }

    #[test]
    fn call_graph_reverse_topological_leaves_first() {
        let program = Program {
            procedures: vec![],
            implementations: vec![
                Implementation {
                    name: "A".into(),
                    proc_name: ProcName("A".into()),
                    blocks: vec![Block {
                        label: "entry".into(),
                        commands: vec![Command::Call(ProcName("B".into()), Site::default())],
                    }],
                },
                Implementation {
                    name: "B".into(),
                    proc_name: ProcName("B".into()),
                    blocks: vec![],
                },
            ],
            constants: vec![],
        };
        let graph = CallGraph::build(&program);
        let order = graph.reverse_topological_order(&["A".to_string(), "B".to_string()]);
        assert_eq!(order, vec!["B".to_string(), "A".to_string()]);
    }

    /// The normal case in this codebase's own naming convention: the
    /// implementation name (`Impl$Callee`) differs from the procedure name
    /// it implements (`Callee`). The graph must resolve through that
    /// indirection rather than storing the bare `ProcName` as a node.
    fn distinct_names_program() -> Program {
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
                    blocks: vec![],
                },
            ],
            constants: vec![],
        }
    }

    #[test]
    fn call_graph_resolves_procedure_names_to_implementation_names() {
        let program = distinct_names_program();
        let graph = CallGraph::build(&program);
        assert!(!graph.callees.contains_key("Callee"));
        assert!(graph
            .callees_of("Impl$Caller")
            .any(|c| c == "Impl$Callee"));
        assert!(graph
            .callers_of("Impl$Callee")
            .any(|c| c == "Impl$Caller"));
    }

    #[test]
    fn reverse_topological_order_never_emits_a_phantom_procedure_node() {
        let program = distinct_names_program();
        let graph = CallGraph::build(&program);
        let order = graph.reverse_topological_order(&[
            "Impl$Caller".to_string(),
            "Impl$Callee".to_string(),
        ]);
        assert_eq!(order, vec!["Impl$Callee".to_string(), "Impl$Caller".to_string()]);
    }

    #[test]
    fn inline_calls_splices_callee_blocks_up_to_depth() {
        let program = distinct_names_program();
        // Give Impl$Callee a body so there is something to splice in.
        let mut program = program;
        program.implementations[1].blocks.push(Block {
            label: "entry".into(),
            commands: vec![Command::Assert(Expr::ident("phi"), Site::default())],
        });

        let not_inlined = inline_calls(&program, 0);
        assert!(matches!(
            not_inlined.implementations[0].blocks[0].commands[0],
            Command::Call(..)
        ));

        let inlined = inline_calls(&program, 1);
        assert!(matches!(
            inlined.implementations[0].blocks[0].commands[0],
            Command::Assert(..)
        ));
    }
}
