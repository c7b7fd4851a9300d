//! Loading the desired variable state from disk.
//!
//! Two formats are understood: a JSON array of variable records (any file
//! ending in `.json`), and a dotenv file of `KEY=value` lines where every entry
//! becomes a variable in a single environment scope.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::models::Variable;

/// How records in a desired-state file are turned into variables
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Scope given to every dotenv entry
    pub scope: String,
    /// Type given to every dotenv entry (`env_var` or `file`)
    pub variable_type: String,
    /// Flags given to every dotenv entry
    pub protected: bool,
    pub masked: bool,
    pub raw: bool,
    /// Reject malformed JSON records instead of normalizing them
    pub strict: bool,
}

pub fn load(path: &Path, options: &LoadOptions) -> Result<Vec<Variable>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let vars = if is_json {
        parse_json(file, options.strict)
    } else {
        parse_dotenv(file, options)
    }
    .with_context(|| format!("Failed to load {}", path.display()))?;

    tracing::debug!("Loaded {} variables from {}", vars.len(), path.display());
    Ok(vars)
}

fn parse_json<R: Read>(reader: R, strict: bool) -> Result<Vec<Variable>> {
    let records: Vec<Value> = serde_json::from_reader(reader).context("expected a JSON array of variables")?;

    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            if strict {
                Variable::strict_from_value(record).with_context(|| format!("record {}", i))
            } else {
                Ok(Variable::from_value(record))
            }
        })
        .collect()
}

fn parse_dotenv<R: Read>(mut reader: R, options: &LoadOptions) -> Result<Vec<Variable>> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;

    let escaped = escape_substitutions(&input);
    dotenvy::from_read_iter(escaped.as_bytes())
        .map(|item| -> Result<Variable> {
            let (key, value) = item?;
            Ok(Variable::new(key, value)
                .with_scope(options.scope.as_str())
                .with_variable_type(options.variable_type.as_str())
                .with_protected(options.protected)
                .with_masked(options.masked)
                .with_raw(options.raw))
        })
        .collect()
}

/// Escape every `$` dotenvy would otherwise expand, so values reach GitLab as
/// written (`$CI_PROJECT_DIR` is resolved by the runner, not here). Single
/// quotes, existing escapes and comments already keep `$` literal.
fn escape_substitutions(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut strong_quote = false;
    let mut escaped = false;
    let mut comment = false;
    let mut prev = '\n';

    for c in input.chars() {
        if comment {
            if c == '\n' {
                comment = false;
            }
        } else if escaped {
            escaped = false;
        } else if strong_quote {
            if c == '\'' {
                strong_quote = false;
            }
        } else {
            match c {
                '\'' => strong_quote = true,
                '\\' => escaped = true,
                '#' if prev.is_whitespace() => comment = true,
                '$' => out.push('\\'),
                _ => {}
            }
        }
        out.push(c);
        prev = c;
    }
    out
}
