//! A small textual format for the program model (§3a), parsed directly into
//! `houdini_core::program::Program`. Not SMT-LIB — just enough surface to
//! drive the `infer` subcommand end-to-end without a real Boogie-equivalent
//! front end.
//!
//! Grammar (one statement per line, blank lines and `#` comments ignored):
//!
//! ```text
//! const <name> existential
//! proc <proc-name>
//!   requires <expr>
//!   requires free <expr>
//!   ensures <expr>
//!   ensures free <expr>
//! endproc
//! impl <impl-name> of <proc-name>
//! block <label>
//!   assert <expr> @<line>:<col>
//!   assume <expr>
//!   call <callee-proc-name> @<line>:<col>
//!   capture <label>
//! endblock
//! endimpl
//! ```
//!
//! `proc` declarations are optional: a `call` to a procedure with no
//! matching `proc` block simply carries no requires/ensures obligations.
//!
//! Expressions support identifiers, `true`/`false`/numeric literals, `!`,
//! `&` (n-ary and), and right-associative `=>` (implies) — the shape
//! candidate recognition needs.

use anyhow::{anyhow, bail, Context, Result};
use houdini_core::program::{
    Block, Command, ConstantDecl, Expr, Implementation, ProcName, Procedure, Program, Site, Spec,
};

fn parse_expr(text: &str) -> Result<Expr> {
    let tokens = tokenize(text);
    let mut pos = 0;
    let expr = parse_implies(&tokens, &mut pos)?;
    if pos != tokens.len() {
        bail!("trailing tokens in expression: {text}");
    }
    Ok(expr)
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '=' {
            chars.next();
            if chars.peek() == Some(&'>') {
                chars.next();
            }
            tokens.push("=>".to_string());
        } else if c == '!' || c == '&' {
            chars.next();
            tokens.push(c.to_string());
        } else {
            let mut ident = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '=' || c == '!' || c == '&' {
                    break;
                }
                ident.push(c);
                chars.next();
            }
            tokens.push(ident);
        }
    }
    tokens
}

fn parse_implies(tokens: &[String], pos: &mut usize) -> Result<Expr> {
    let lhs = parse_not(tokens, pos)?;
    if tokens.get(*pos).map(String::as_str) == Some("=>") {
        *pos += 1;
        let rhs = parse_implies(tokens, pos)?;
        return Ok(Expr::implies(lhs, rhs));
    }
    Ok(lhs)
}

fn parse_not(tokens: &[String], pos: &mut usize) -> Result<Expr> {
    if tokens.get(*pos).map(String::as_str) == Some("!") {
        *pos += 1;
        let inner = parse_not(tokens, pos)?;
        return Ok(Expr::Not(Box::new(inner)));
    }
    parse_and(tokens, pos)
}

fn parse_and(tokens: &[String], pos: &mut usize) -> Result<Expr> {
    let mut parts = vec![parse_atom(tokens, pos)?];
    while tokens.get(*pos).map(String::as_str) == Some("&") {
        *pos += 1;
        parts.push(parse_atom(tokens, pos)?);
    }
    if parts.len() == 1 {
        Ok(parts.remove(0))
    } else {
        Ok(Expr::And(parts))
    }
}

fn parse_atom(tokens: &[String], pos: &mut usize) -> Result<Expr> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| anyhow!("unexpected end of expression"))?;
    *pos += 1;
    if token == "true" || token == "false" || token.parse::<i64>().is_ok() {
        Ok(Expr::Literal(token.clone()))
    } else {
        Ok(Expr::ident(token.clone()))
    }
}

fn parse_site(rest: &str) -> Site {
    if let Some(at) = rest.rfind('@') {
        let loc = &rest[at + 1..];
        if let Some((line, col)) = loc.split_once(':') {
            if let (Ok(line), Ok(column)) = (line.parse(), col.parse()) {
                return Site { line, column };
            }
        }
    }
    Site::default()
}

fn strip_site(rest: &str) -> &str {
    match rest.rfind('@') {
        Some(at) => rest[..at].trim(),
        None => rest.trim(),
    }
}

pub fn parse_program(text: &str) -> Result<Program> {
    let mut program = Program::default();
    let mut current_impl: Option<(String, String, Vec<Block>)> = None;
    let mut current_block: Option<(String, Vec<Command>)> = None;
    let mut current_proc: Option<(String, Vec<Spec>, Vec<Spec>)> = None;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let context = || format!("line {}: {line}", lineno + 1);

        if let Some(rest) = line.strip_prefix("const ") {
            let mut parts = rest.split_whitespace();
            let name = parts.next().ok_or_else(|| anyhow::anyhow!(context()))?.to_string();
            let existential = parts.next() == Some("existential");
            program.constants.push(ConstantDecl {
                name,
                existential,
                stage_active: None,
                stage_complete: None,
            });
        } else if let Some(rest) = line.strip_prefix("proc ") {
            current_proc = Some((rest.trim().to_string(), Vec::new(), Vec::new()));
        } else if let Some(rest) = line.strip_prefix("requires ") {
            let (free, expr_text) = match rest.strip_prefix("free ") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            let expr = parse_expr(expr_text.trim()).with_context(context)?;
            let (_, requires, _) = current_proc.as_mut().ok_or_else(|| anyhow::anyhow!(context()))?;
            requires.push(Spec { expr, free });
        } else if let Some(rest) = line.strip_prefix("ensures ") {
            let (free, expr_text) = match rest.strip_prefix("free ") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            let expr = parse_expr(expr_text.trim()).with_context(context)?;
            let (_, _, ensures) = current_proc.as_mut().ok_or_else(|| anyhow::anyhow!(context()))?;
            ensures.push(Spec { expr, free });
        } else if line == "endproc" {
            let (name, requires, ensures) = current_proc.take().ok_or_else(|| anyhow::anyhow!(context()))?;
            program.procedures.push(Procedure {
                name: ProcName(name),
                requires,
                ensures,
            });
        } else if let Some(rest) = line.strip_prefix("impl ") {
            let mut parts = rest.split_whitespace();
            let impl_name = parts.next().ok_or_else(|| anyhow::anyhow!(context()))?.to_string();
            let of = parts.next();
            let proc_name = match of {
                Some("of") => parts.next().ok_or_else(|| anyhow::anyhow!(context()))?.to_string(),
                _ => bail!("expected `impl <name> of <proc>`: {}", context()),
            };
            current_impl = Some((impl_name, proc_name, Vec::new()));
        } else if let Some(rest) = line.strip_prefix("block ") {
            current_block = Some((rest.trim().to_string(), Vec::new()));
        } else if let Some(rest) = line.strip_prefix("assert ") {
            let site = parse_site(rest);
            let expr = parse_expr(strip_site(rest)).with_context(context)?;
            let (_, commands) = current_block.as_mut().ok_or_else(|| anyhow::anyhow!(context()))?;
            commands.push(Command::Assert(expr, site));
        } else if let Some(rest) = line.strip_prefix("assume ") {
            let expr = parse_expr(strip_site(rest)).with_context(context)?;
            let (_, commands) = current_block.as_mut().ok_or_else(|| anyhow::anyhow!(context()))?;
            commands.push(Command::Assume(expr));
        } else if let Some(rest) = line.strip_prefix("call ") {
            let site = parse_site(rest);
            let callee = strip_site(rest).to_string();
            let (_, commands) = current_block.as_mut().ok_or_else(|| anyhow::anyhow!(context()))?;
            commands.push(Command::Call(ProcName(callee), site));
        } else if let Some(rest) = line.strip_prefix("capture ") {
            let (_, commands) = current_block.as_mut().ok_or_else(|| anyhow::anyhow!(context()))?;
            commands.push(Command::CaptureState(rest.trim().to_string()));
        } else if line == "endblock" {
            let (label, commands) = current_block.take().ok_or_else(|| anyhow::anyhow!(context()))?;
            let (_, _, blocks) = current_impl.as_mut().ok_or_else(|| anyhow::anyhow!(context()))?;
            blocks.push(Block { label, commands });
        } else if line == "endimpl" {
            let (name, proc_name, blocks) = current_impl.take().ok_or_else(|| anyhow::anyhow!(context()))?;
            program.implementations.push(Implementation {
                name,
                proc_name: ProcName(proc_name),
                blocks,
            });
        } else {
            bail!("unrecognized line: {}", context());
        }
    }

    Ok(program)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_small_program() {
        let text = "\
const c0 existential
impl Impl$Callee of Callee
block entry
assert c0 => phi @3:1
endblock
endimpl
";
        let program = parse_program(text).expect("parse");
        assert_eq!(program.constants.len(), 1);
        assert!(program.constants[0].existential);
        let implementation = program.implementation("Impl$Callee").expect("impl");
        assert_eq!(implementation.blocks[0].label, "entry");
        match &implementation.blocks[0].commands[0] {
            Command::Assert(expr, site) => {
                assert_eq!(site.line, 3);
                assert_eq!(expr.to_string(), "(=> c0 phi)");
            }
            other => panic!("expected assert, got {other:?}"),
        }
    }

    #[test]
    fn parses_proc_requires_and_ensures() {
        let text = "\
const pre existential
const post existential
proc Callee
requires pre => guard
ensures free post
endproc
impl Impl$Callee of Callee
block entry
endblock
endimpl
";
        let program = parse_program(text).expect("parse");
        assert_eq!(program.procedures.len(), 1);
        let callee = program.procedure(&ProcName("Callee".to_string())).expect("proc");
        assert_eq!(callee.requires.len(), 1);
        assert!(!callee.requires[0].free);
        assert_eq!(callee.ensures.len(), 1);
        assert!(callee.ensures[0].free);
    }
}
