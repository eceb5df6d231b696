//! Lazy, line-oriented S-expression reader (§4.A).
//!
//! The reader pulls raw lines from an [`async_channel::Receiver`] — the same
//! channel shape the solver session (`process_session`) uses for its inbound
//! stdout queue — and assembles them into [`SExpr`] values one at a time.
//! Each call to [`SExprReader::read_sexpr`] yields at most one top-level
//! expression, so the reader is restartable across calls and never blocks
//! past the point where a full expression is available.

use std::fmt;

/// Either an atom or an application `(name arg*)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SExpr {
    Atom(String),
    App(String, Vec<SExpr>),
}

impl SExpr {
    pub fn atom(s: impl Into<String>) -> Self {
        SExpr::Atom(s.into())
    }

    pub fn app(name: impl Into<String>, args: Vec<SExpr>) -> Self {
        SExpr::App(name.into(), args)
    }

    /// `IsId ⇔ arguments empty`.
    pub fn is_id(&self) -> bool {
        match self {
            SExpr::Atom(_) => true,
            SExpr::App(_, args) => args.is_empty(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SExpr::Atom(s) => s,
            SExpr::App(n, _) => n,
        }
    }

    pub fn args(&self) -> &[SExpr] {
        match self {
            SExpr::Atom(_) => &[],
            SExpr::App(_, args) => args,
        }
    }

    /// Finds the first argument whose own name equals `name`, for
    /// `(model (define-fun foo ...) ...)`-style lookups.
    pub fn find_arg(&self, name: &str) -> Option<&SExpr> {
        self.args().iter().find(|a| a.name() == name)
    }
}

fn atom_needs_quoting(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || "()\";|".contains(c))
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExpr::Atom(s) if atom_needs_quoting(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            SExpr::Atom(s) => write!(f, "{s}"),
            SExpr::App(name, args) => {
                write!(f, "(")?;
                let mut wrote_token = false;
                if !name.is_empty() {
                    write!(f, "{name}")?;
                    wrote_token = true;
                }
                for a in args {
                    if wrote_token {
                        write!(f, " ")?;
                    }
                    write!(f, "{a}")?;
                    wrote_token = true;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("parse error: {0}")]
pub struct ParseError(pub String);

/// Streaming S-expression reader over a channel of raw input lines.
///
/// A closed, empty channel signals EOF (the "null line" of the spec).
pub struct SExprReader {
    lines: async_channel::Receiver<String>,
    buf: Vec<char>,
    pos: usize,
    at_eof: bool,
}

impl SExprReader {
    pub fn new(lines: async_channel::Receiver<String>) -> Self {
        Self {
            lines,
            buf: Vec::new(),
            pos: 0,
            at_eof: false,
        }
    }

    /// Parses and returns the next top-level expression, or `None` at EOF.
    pub async fn read_sexpr(&mut self) -> Result<Option<SExpr>, ParseError> {
        self.skip_trivia().await?;
        if self.at_eof && self.pos >= self.buf.len() {
            return Ok(None);
        }
        match self.parse_sexpr().await {
            Ok(expr) => Ok(Some(expr)),
            Err(e) => {
                // Resynchronize by discarding the remainder of the buffered line.
                self.pos = self.buf.len();
                Err(e)
            }
        }
    }

    async fn ensure_buf(&mut self) -> bool {
        if self.pos < self.buf.len() {
            return true;
        }
        if self.at_eof {
            return false;
        }
        match self.lines.recv().await {
            Ok(line) => {
                self.buf = line.chars().collect();
                self.buf.push('\n');
                self.pos = 0;
                true
            }
            Err(_) => {
                self.at_eof = true;
                false
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.buf.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    async fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            if !self.ensure_buf().await {
                return Ok(());
            }
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some(';') => {
                    // Comment: discard to end of buffered line, then force a refill.
                    self.pos = self.buf.len();
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_sexpr<'a>(
        &'a mut self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<SExpr, ParseError>> + 'a>> {
        Box::pin(async move {
            self.skip_trivia().await?;
            if !self.ensure_buf().await {
                return Err(ParseError("unexpected end of input".to_string()));
            }
            match self.peek() {
                Some(')') => Err(ParseError("unexpected ')' at top level".to_string())),
                Some('(') => {
                    self.bump();
                    let name = self.parse_name().await?;
                    let mut args = Vec::new();
                    loop {
                        self.skip_trivia().await?;
                        if !self.ensure_buf().await {
                            return Err(ParseError(format!(
                                "unclosed '(' after head '{name}'"
                            )));
                        }
                        if self.peek() == Some(')') {
                            self.bump();
                            break;
                        }
                        args.push(self.parse_sexpr().await?);
                    }
                    Ok(SExpr::App(name, args))
                }
                _ => {
                    let atom = self.parse_atom().await?;
                    Ok(SExpr::Atom(atom))
                }
            }
        })
    }

    /// `name := bare | quoted | ''`. An empty name is only legal right after
    /// the `(` that opens this application, and only in the two shapes SMT-LIB
    /// actually emits there: the head is itself a nested application (next
    /// token `(`, e.g. `((_ as-array f) x)`), or the whole application is the
    /// bare empty list `()` (next token `)`, e.g. `define-fun`'s empty
    /// parameter list). Anywhere else an empty name is a parse error.
    async fn parse_name(&mut self) -> Result<String, ParseError> {
        self.skip_trivia().await?;
        if !self.ensure_buf().await {
            return Err(ParseError("unexpected end of input in application head".to_string()));
        }
        match self.peek() {
            Some('(') | Some(')') => Ok(String::new()),
            _ => self.parse_atom().await,
        }
    }

    async fn parse_atom(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some('"') => self.parse_quoted('"', true).await,
            Some('|') => self.parse_quoted('|', false).await,
            _ => self.parse_bare().await,
        }
    }

    fn is_bare_terminator(c: char) -> bool {
        c.is_whitespace() || "()".contains(c) || c == ';'
    }

    async fn parse_bare(&mut self) -> Result<String, ParseError> {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if Self::is_bare_terminator(c) {
                break;
            }
            s.push(c);
            self.bump();
            if !self.ensure_buf().await {
                break;
            }
        }
        if s.is_empty() {
            return Err(ParseError("expected an atom".to_string()));
        }
        Ok(s)
    }

    /// Consumes a `"..."` or `|...|` quoted atom, which may span multiple
    /// lines; embedded newlines are preserved literally. `\"` escapes inside
    /// `"`-quoting only.
    async fn parse_quoted(&mut self, delim: char, escapes: bool) -> Result<String, ParseError> {
        self.bump(); // opening delimiter
        let mut s = String::new();
        loop {
            if !self.ensure_buf().await {
                return Err(ParseError(format!("unterminated quoted atom (missing closing '{delim}')")));
            }
            let Some(c) = self.bump() else {
                return Err(ParseError("unterminated quoted atom".to_string()));
            };
            if escapes && c == '\\' {
                if !self.ensure_buf().await {
                    return Err(ParseError("unterminated escape at end of input".to_string()));
                }
                match self.bump() {
                    Some('"') => s.push('"'),
                    Some(other) => {
                        s.push('\\');
                        s.push(other);
                    }
                    None => unreachable!(),
                }
                continue;
            }
            if c == delim {
                return Ok(s);
            }
            s.push(c);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn parse_all(input: &str) -> Vec<SExpr> {
        let (tx, rx) = async_channel::unbounded();
        for line in input.split('\n') {
            tx.send(line.to_string()).await.expect("send");
        }
        tx.close();
        let mut reader = SExprReader::new(rx);
        let mut out = Vec::new();
        while let Some(e) = reader.read_sexpr().await.expect("parse") {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn scenario_5_parses_two_top_level_expressions() {
        let input = "(foo (bar \"a b\") | q |)\n;comment\n(baz)";
        let exprs = parse_all(input).await;
        assert_eq!(
            exprs,
            vec![
                SExpr::app(
                    "foo",
                    vec![
                        SExpr::app("bar", vec![SExpr::atom("a b")]),
                        SExpr::atom(" q "),
                    ],
                ),
                SExpr::app("baz", vec![]),
            ]
        );
    }

    #[tokio::test]
    async fn bare_atoms_and_nesting() {
        let exprs = parse_all("(check-sat)\nunsat\n(error \"boom\")").await;
        assert_eq!(exprs[0], SExpr::app("check-sat", vec![]));
        assert_eq!(exprs[1], SExpr::atom("unsat"));
        assert_eq!(exprs[2], SExpr::app("error", vec![SExpr::atom("boom")]));
    }

    #[tokio::test]
    async fn multiline_quoted_atom_preserves_newline() {
        let exprs = parse_all("(reason-unknown \"line one\nline two\")").await;
        match &exprs[0] {
            SExpr::App(name, args) => {
                assert_eq!(name, "reason-unknown");
                assert_eq!(args[0], SExpr::atom("line one\nline two"));
            }
            _ => panic!("expected application"),
        }
    }

    #[tokio::test]
    async fn empty_name_is_allowed_before_an_open_paren() {
        let exprs = parse_all("((_ as-array f) x)").await;
        match &exprs[0] {
            SExpr::App(name, args) => {
                assert_eq!(name, "");
                assert_eq!(args.len(), 2);
            }
            _ => panic!("expected application"),
        }
    }

    #[tokio::test]
    async fn bare_empty_parens_parse_as_an_empty_application() {
        let exprs = parse_all("()").await;
        assert_eq!(exprs, vec![SExpr::app("", vec![])]);
    }

    #[tokio::test]
    async fn stray_close_paren_is_a_parse_error() {
        let (tx, rx) = async_channel::unbounded();
        tx.send(")".to_string()).await.expect("send");
        tx.close();
        let mut reader = SExprReader::new(rx);
        assert!(reader.read_sexpr().await.is_err());
    }

    #[tokio::test]
    async fn unclosed_paren_is_a_parse_error() {
        let (tx, rx) = async_channel::unbounded();
        tx.send("(foo bar".to_string()).await.expect("send");
        tx.close();
        let mut reader = SExprReader::new(rx);
        assert!(reader.read_sexpr().await.is_err());
    }

    #[tokio::test]
    async fn round_trip_print_then_parse() {
        let original = SExpr::app(
            "model",
            vec![
                SExpr::app("define-fun", vec![SExpr::atom("x"), SExpr::atom("7")]),
                SExpr::atom("plain"),
            ],
        );
        let printed = original.to_string();
        let parsed = parse_all(&printed).await;
        assert_eq!(parsed, vec![original]);
    }
}
