//! Support for `--set key=value` overrides shared across the binary's
//! subcommands, mirroring the teacher's `CliConfigOverrides`.

use clap::ArgAction;
use clap::Parser;

/// CLI option that captures arbitrary configuration overrides specified as
/// `--set key=value`. Both halves are kept unparsed; the caller decides how
/// to interpret the right-hand side (here, `houdini_core::config::Config`).
#[derive(Parser, Debug, Default, Clone)]
pub struct CliConfigOverrides {
    /// Override a configuration value that would otherwise come from the
    /// TOML config file. Repeatable.
    ///
    /// Examples:
    ///   - `--set verbosity=verbose`
    ///   - `--set max_control_flow_steps=500`
    #[arg(
        long = "set",
        value_name = "key=value",
        action = ArgAction::Append,
        global = true,
    )]
    pub raw_overrides: Vec<String>,
}

impl CliConfigOverrides {
    /// Splits each raw `key=value` string into a `(key, value)` pair.
    pub fn parse_overrides(&self) -> Result<Vec<(String, String)>, String> {
        self.raw_overrides
            .iter()
            .map(|s| {
                let mut parts = s.splitn(2, '=');
                let key = match parts.next() {
                    Some(k) => k.trim(),
                    None => return Err("Override missing key".to_string()),
                };
                let value = parts
                    .next()
                    .ok_or_else(|| format!("Invalid override (missing '='): {s}"))?
                    .trim();
                if key.is_empty() {
                    return Err(format!("Empty key in override: {s}"));
                }
                Ok((key.to_string(), value.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        let overrides = CliConfigOverrides {
            raw_overrides: vec!["verbosity=verbose".to_string(), "inline_depth=2".to_string()],
        };
        let parsed = overrides.parse_overrides().expect("parse");
        assert_eq!(
            parsed,
            vec![
                ("verbosity".to_string(), "verbose".to_string()),
                ("inline_depth".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_missing_equals() {
        let overrides = CliConfigOverrides {
            raw_overrides: vec!["no-equals-sign".to_string()],
        };
        assert!(overrides.parse_overrides().is_err());
    }
}
