//! Response classifier (§4.C): translates a parsed [`SExpr`] into a reply
//! category, special-casing benign solver errors.

use crate::process_session::Inspector;
use crate::sexpr::SExpr;

const RESOURCE_LIMIT_MARKER: &str = "max. resource limit exceeded";

const BENIGN_ERROR_MARKERS: &[&str] = &[
    "model is not available",
    "context is unsatisfiable",
    "Cannot get model",
    "last result wasn't unknown",
];

pub enum Classification {
    Ok(SExpr),
    Swallowed,
    SoftNull,
    Error(String),
}

fn error_text(expr: &SExpr) -> String {
    match expr.args().first() {
        Some(SExpr::Atom(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => expr.to_string(),
    }
}

pub fn classify(expr: &SExpr, inspector: &dyn Inspector) -> Classification {
    match expr {
        SExpr::App(head, _) if head == "error" => {
            let text = error_text(expr);
            if text.contains(RESOURCE_LIMIT_MARKER) {
                Classification::Ok(expr.clone())
            } else if BENIGN_ERROR_MARKERS.iter().any(|m| text.contains(m)) {
                Classification::SoftNull
            } else {
                Classification::Error(text)
            }
        }
        SExpr::App(head, args) if head == "progress" => {
            for arg in args {
                if arg.name() == "labels" {
                    let names: Vec<&str> = arg.args().iter().map(SExpr::name).collect();
                    inspector.stats_line(format!("STATS LABELS {}", names.join(" ")));
                } else if arg.name().starts_with(':') {
                    let names: Vec<&str> = arg.args().iter().map(SExpr::name).collect();
                    inspector.stats_line(format!(
                        "STATS NAMED_VALUES {} {}",
                        arg.name(),
                        names.join(" ")
                    ));
                }
            }
            Classification::Swallowed
        }
        SExpr::App(head, _) if head == "unsupported" => Classification::Swallowed,
        other => Classification::Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_session::NoopInspector;

    fn classify_str(expr: SExpr) -> String {
        match classify(&expr, &NoopInspector) {
            Classification::Ok(_) => "ok".into(),
            Classification::Swallowed => "swallowed".into(),
            Classification::SoftNull => "soft-null".into(),
            Classification::Error(m) => format!("error:{m}"),
        }
    }

    #[test]
    fn resource_limit_error_propagates() {
        let e = SExpr::app(
            "error",
            vec![SExpr::atom("max. resource limit exceeded (z3)")],
        );
        assert_eq!(classify_str(e), "ok");
    }

    #[test]
    fn benign_errors_are_soft_null() {
        for marker in BENIGN_ERROR_MARKERS {
            let e = SExpr::app("error", vec![SExpr::atom(format!("boom: {marker}"))]);
            assert_eq!(classify_str(e), "soft-null");
        }
    }

    #[test]
    fn other_errors_are_hard() {
        let e = SExpr::app("error", vec![SExpr::atom("syntax error near foo")]);
        assert_eq!(classify_str(e), "error:syntax error near foo");
    }

    #[test]
    fn progress_and_unsupported_are_swallowed() {
        assert_eq!(classify_str(SExpr::app("unsupported", vec![])), "swallowed");
        assert_eq!(
            classify_str(SExpr::app(
                "progress",
                vec![SExpr::app("labels", vec![SExpr::atom("a"), SExpr::atom("b")])]
            )),
            "swallowed"
        );
    }

    #[test]
    fn anything_else_is_ok() {
        assert_eq!(classify_str(SExpr::atom("sat")), "ok");
        assert_eq!(classify_str(SExpr::app("model", vec![])), "ok");
    }
}
